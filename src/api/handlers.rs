use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::allocator::CodeAllocator;
use crate::contracts::{AllocError, Clock, CounterStore, DepartmentId, RequesterId, SystemClock};

/// Server metrics for monitoring.
#[derive(Default)]
pub struct Metrics {
    pub previews_total: AtomicU64,
    pub sample_commits_total: AtomicU64,
    pub unit_allocations_total: AtomicU64,
    pub report_allocations_total: AtomicU64,
    pub errors_total: AtomicU64,
    pub start_time: std::sync::OnceLock<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        let m = Self::default();
        let _ = m.start_time.set(Instant::now());
        m
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

/// Application state shared across handlers.
pub struct AppState<S: CounterStore, C: Clock = SystemClock> {
    pub allocator: Arc<CodeAllocator<S, C>>,
    pub metrics: Arc<Metrics>,
}

/// Query parameters for code previews.
#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub requester_id: RequesterId,
}

/// Per-department hint in a preview response.
#[derive(Debug, Serialize)]
pub struct UnitCounterResponse {
    pub department_id: DepartmentId,
    pub department_code: String,
    pub department_name: String,
    pub next_unit_number: u64,
}

/// Response for code previews.
#[derive(Debug, Serialize)]
pub struct PreviewCodesResponse {
    pub next_sample_code: String,
    pub unit_counters: Vec<UnitCounterResponse>,
    pub reserved: bool,
}

/// Request body for committing a sample code.
#[derive(Debug, Deserialize)]
pub struct CommitSampleRequest {
    pub requester_id: RequesterId,
}

/// Response carrying a committed code.
#[derive(Debug, Serialize)]
pub struct AllocatedCodeResponse {
    pub code: String,
    pub value: u64,
}

/// Request body for allocating report numbers.
#[derive(Debug, Deserialize)]
pub struct ReportNumbersRequest {
    pub diseases: Vec<String>,
}

/// Response mapping each distinct disease to its report number.
#[derive(Debug, Serialize)]
pub struct ReportNumbersResponse {
    pub report_numbers: std::collections::HashMap<String, String>,
    pub count: usize,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type.
pub enum ApiError {
    Alloc(AllocError),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_response) = match self {
            ApiError::Alloc(AllocError::ScopeNotFound(id)) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: format!("Department not found: {}", id),
                    code: "SCOPE_NOT_FOUND".into(),
                },
            ),
            ApiError::Alloc(AllocError::Storage(e)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: e.to_string(),
                    code: "STORAGE_ERROR".into(),
                },
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: msg,
                    code: "BAD_REQUEST".into(),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<AllocError> for ApiError {
    fn from(e: AllocError) -> Self {
        ApiError::Alloc(e)
    }
}

/// GET /codes/preview
/// Reserves the next sample code for the requester and reports the next
/// unit number per department without reserving them.
pub async fn preview_codes<S: CounterStore, C: Clock>(
    State(state): State<Arc<AppState<S, C>>>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewCodesResponse>, ApiError> {
    let preview = state
        .allocator
        .preview_codes(query.requester_id)
        .map_err(|e| {
            state.metrics.record_error();
            ApiError::from(e)
        })?;

    state.metrics.previews_total.fetch_add(1, Ordering::Relaxed);

    Ok(Json(PreviewCodesResponse {
        next_sample_code: preview.sample_code,
        unit_counters: preview
            .unit_hints
            .into_iter()
            .map(|hint| UnitCounterResponse {
                department_id: hint.department_id,
                department_code: hint.department_code,
                department_name: hint.department_name,
                next_unit_number: hint.next_unit_number,
            })
            .collect(),
        reserved: true,
    }))
}

/// POST /codes/sample/commit
/// Commits the requester's reservation (or a fresh increment) at
/// record-creation time and returns the final sample code.
pub async fn commit_sample_code<S: CounterStore, C: Clock>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(request): Json<CommitSampleRequest>,
) -> Result<(StatusCode, Json<AllocatedCodeResponse>), ApiError> {
    let allocated = state
        .allocator
        .commit_sample_code(request.requester_id)
        .map_err(|e| {
            state.metrics.record_error();
            ApiError::from(e)
        })?;

    state
        .metrics
        .sample_commits_total
        .fetch_add(1, Ordering::Relaxed);

    Ok((
        StatusCode::CREATED,
        Json(AllocatedCodeResponse {
            code: allocated.code,
            value: allocated.value,
        }),
    ))
}

/// POST /departments/{id}/unit-codes
/// Allocates the next unit code for a department.
pub async fn allocate_unit_code<S: CounterStore, C: Clock>(
    State(state): State<Arc<AppState<S, C>>>,
    Path(department_id): Path<DepartmentId>,
) -> Result<(StatusCode, Json<AllocatedCodeResponse>), ApiError> {
    let allocated = state
        .allocator
        .allocate_unit_code(department_id)
        .map_err(|e| {
            state.metrics.record_error();
            ApiError::from(e)
        })?;

    state
        .metrics
        .unit_allocations_total
        .fetch_add(1, Ordering::Relaxed);

    Ok((
        StatusCode::CREATED,
        Json(AllocatedCodeResponse {
            code: allocated.code,
            value: allocated.value,
        }),
    ))
}

/// POST /report-numbers
/// Allocates one report number per distinct disease in a COA payload.
pub async fn allocate_report_numbers<S: CounterStore, C: Clock>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(request): Json<ReportNumbersRequest>,
) -> Result<(StatusCode, Json<ReportNumbersResponse>), ApiError> {
    if request.diseases.is_empty() {
        return Ok((
            StatusCode::CREATED,
            Json(ReportNumbersResponse {
                report_numbers: Default::default(),
                count: 0,
            }),
        ));
    }

    let report_numbers = state
        .allocator
        .allocate_report_numbers(&request.diseases)
        .map_err(|e| {
            state.metrics.record_error();
            ApiError::from(e)
        })?;

    state
        .metrics
        .report_allocations_total
        .fetch_add(report_numbers.len() as u64, Ordering::Relaxed);

    Ok((
        StatusCode::CREATED,
        Json(ReportNumbersResponse {
            count: report_numbers.len(),
            report_numbers,
        }),
    ))
}

/// GET /health
/// Health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy"
    }))
}

/// Response for stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_secs: f64,
    pub previews_total: u64,
    pub sample_commits_total: u64,
    pub unit_allocations_total: u64,
    pub report_allocations_total: u64,
    pub active_reservations: usize,
    pub errors_total: u64,
    pub allocations_per_sec: f64,
}

/// Calculates rate per second, returning 0.0 if duration is zero.
#[inline]
fn safe_rate(count: u64, duration_secs: f64) -> f64 {
    if duration_secs > 0.0 {
        count as f64 / duration_secs
    } else {
        0.0
    }
}

/// GET /stats
/// Server statistics and metrics.
pub async fn get_stats<S: CounterStore, C: Clock>(
    State(state): State<Arc<AppState<S, C>>>,
) -> impl IntoResponse {
    let metrics = &state.metrics;

    let uptime_secs = metrics
        .start_time
        .get()
        .map(|t| t.elapsed().as_secs_f64())
        .unwrap_or(0.0);

    let previews_total = metrics.previews_total.load(Ordering::Relaxed);
    let sample_commits_total = metrics.sample_commits_total.load(Ordering::Relaxed);
    let unit_allocations_total = metrics.unit_allocations_total.load(Ordering::Relaxed);
    let report_allocations_total = metrics.report_allocations_total.load(Ordering::Relaxed);
    let errors_total = metrics.errors_total.load(Ordering::Relaxed);

    let allocations_total =
        sample_commits_total + unit_allocations_total + report_allocations_total;

    Json(StatsResponse {
        uptime_secs,
        previews_total,
        sample_commits_total,
        unit_allocations_total,
        report_allocations_total,
        active_reservations: state.allocator.active_reservations(),
        errors_total,
        allocations_per_sec: safe_rate(allocations_total, uptime_secs),
    })
}
