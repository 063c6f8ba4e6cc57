mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::contracts::{Clock, CounterStore};

pub use handlers::{
    AllocatedCodeResponse, ApiError, AppState, CommitSampleRequest, ErrorResponse, Metrics,
    PreviewCodesResponse, ReportNumbersRequest, ReportNumbersResponse, StatsResponse,
    UnitCounterResponse,
};

/// Creates the API router.
pub fn create_router<S: CounterStore + 'static, C: Clock + 'static>(
    state: Arc<AppState<S, C>>,
) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats::<S, C>))
        .route("/codes/preview", get(handlers::preview_codes::<S, C>))
        .route(
            "/codes/sample/commit",
            post(handlers::commit_sample_code::<S, C>),
        )
        .route(
            "/departments/:id/unit-codes",
            post(handlers::allocate_unit_code::<S, C>),
        )
        .route(
            "/report-numbers",
            post(handlers::allocate_report_numbers::<S, C>),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Creates a config from environment variables.
    ///
    /// Reads `LABSEQ_HOST` (default: 0.0.0.0) and `LABSEQ_PORT`
    /// (default: 8080).
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("LABSEQ_HOST").unwrap_or(default.host),
            port: std::env::var("LABSEQ_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(default.port),
        }
    }
}

/// Starts the HTTP server.
pub async fn start_server<S, C, F>(
    config: ServerConfig,
    state: Arc<AppState<S, C>>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: CounterStore + 'static,
    C: Clock + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
