//! End-to-end tests for the HTTP facade: the preview/commit flow and every
//! route, driven through the router with oneshot requests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use tower::ServiceExt;

use labseq::allocator::{CodeAllocator, Department};
use labseq::api::{create_router, AppState, Metrics};
use labseq::contracts::ManualClock;
use labseq::storage::InMemoryCounterStore;

type TestState = AppState<InMemoryCounterStore, ManualClock>;

fn test_app() -> (Router, Arc<TestState>, ManualClock) {
    let store = Arc::new(InMemoryCounterStore::new());
    let clock = ManualClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
    let allocator = Arc::new(CodeAllocator::with_clock(store, clock.clone()));

    allocator
        .register_department(Department {
            id: 1,
            code: "PCR".into(),
            name: "PCR".into(),
        })
        .unwrap();
    allocator
        .register_department(Department {
            id: 2,
            code: "SER".into(),
            name: "Serology".into(),
        })
        .unwrap();

    let state = Arc::new(AppState {
        allocator,
        metrics: Arc::new(Metrics::new()),
    });

    (create_router(Arc::clone(&state)), state, clock)
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

async fn post_json(
    router: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn health_returns_ok() {
    let (router, _state, _clock) = test_app();

    let (status, json) = get_json(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn preview_reserves_and_reports_unit_hints() {
    let (router, _state, _clock) = test_app();

    let (status, json) = get_json(&router, "/codes/preview?requester_id=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["next_sample_code"], "SMP25-1");
    assert_eq!(json["reserved"], true);

    let hints = json["unit_counters"].as_array().unwrap();
    assert_eq!(hints.len(), 2);
    assert_eq!(hints[0]["department_code"], "PCR");
    assert_eq!(hints[0]["next_unit_number"], 1);
    assert_eq!(hints[1]["department_code"], "SER");

    // Reloading the form repeats the same code for the same requester.
    let (_, json) = get_json(&router, "/codes/preview?requester_id=7").await;
    assert_eq!(json["next_sample_code"], "SMP25-1");

    // A different requester is positioned after the first reservation.
    let (_, json) = get_json(&router, "/codes/preview?requester_id=8").await;
    assert_eq!(json["next_sample_code"], "SMP25-2");
}

#[tokio::test]
async fn commit_uses_the_reservation() {
    let (router, state, _clock) = test_app();

    get_json(&router, "/codes/preview?requester_id=7").await;

    let (status, json) = post_json(
        &router,
        "/codes/sample/commit",
        serde_json::json!({ "requester_id": 7 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["code"], "SMP25-1");
    assert_eq!(json["value"], 1);

    assert_eq!(state.allocator.active_reservations(), 0);
}

#[tokio::test]
async fn commit_without_preview_increments() {
    let (router, _state, _clock) = test_app();

    let (status, json) = post_json(
        &router,
        "/codes/sample/commit",
        serde_json::json!({ "requester_id": 42 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["code"], "SMP25-1");
}

#[tokio::test]
async fn expired_preview_falls_back_on_commit() {
    let (router, _state, clock) = test_app();

    get_json(&router, "/codes/preview?requester_id=7").await;
    get_json(&router, "/codes/preview?requester_id=8").await;

    clock.advance(chrono::Duration::minutes(3));

    // Requester 8's reservation of 2 is dead; the commit increments from
    // the persisted counter instead.
    let (status, json) = post_json(
        &router,
        "/codes/sample/commit",
        serde_json::json!({ "requester_id": 8 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["code"], "SMP25-1");
}

#[tokio::test]
async fn unit_codes_increment_per_department() {
    let (router, _state, _clock) = test_app();

    let (status, json) = post_json(&router, "/departments/1/unit-codes", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["code"], "PCR-1");

    let (_, json) = post_json(&router, "/departments/1/unit-codes", serde_json::json!({})).await;
    assert_eq!(json["code"], "PCR-2");

    // Another department runs its own counter.
    let (_, json) = post_json(&router, "/departments/2/unit-codes", serde_json::json!({})).await;
    assert_eq!(json["code"], "SER-1");
}

#[tokio::test]
async fn unknown_department_is_a_client_error() {
    let (router, _state, _clock) = test_app();

    let (status, json) =
        post_json(&router, "/departments/99/unit-codes", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "SCOPE_NOT_FOUND");
}

#[tokio::test]
async fn report_numbers_allocate_per_distinct_disease() {
    let (router, _state, _clock) = test_app();

    let (status, json) = post_json(
        &router,
        "/report-numbers",
        serde_json::json!({ "diseases": ["Salmonella", "Fungal culture", "Salmonella"] }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["count"], 2);
    assert_eq!(json["report_numbers"]["Salmonella"], "Salm25-1");
    assert_eq!(json["report_numbers"]["Fungal culture"], "CU25-1");

    // A later COA for the same disease continues the lab-wide count.
    let (_, json) = post_json(
        &router,
        "/report-numbers",
        serde_json::json!({ "diseases": ["Salmonella"] }),
    )
    .await;
    assert_eq!(json["report_numbers"]["Salmonella"], "Salm25-2");
}

#[tokio::test]
async fn empty_disease_payload_allocates_nothing() {
    let (router, _state, _clock) = test_app();

    let (status, json) = post_json(
        &router,
        "/report-numbers",
        serde_json::json!({ "diseases": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let (router, _state, _clock) = test_app();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/codes/sample/commit")
                .header("content-type", "application/json")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn stats_track_operations() {
    let (router, _state, _clock) = test_app();

    get_json(&router, "/codes/preview?requester_id=7").await;
    post_json(
        &router,
        "/codes/sample/commit",
        serde_json::json!({ "requester_id": 7 }),
    )
    .await;
    post_json(&router, "/departments/1/unit-codes", serde_json::json!({})).await;
    post_json(
        &router,
        "/report-numbers",
        serde_json::json!({ "diseases": ["Salmonella"] }),
    )
    .await;

    let (status, json) = get_json(&router, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["previews_total"], 1);
    assert_eq!(json["sample_commits_total"], 1);
    assert_eq!(json["unit_allocations_total"], 1);
    assert_eq!(json["report_allocations_total"], 1);
    assert_eq!(json["active_reservations"], 0);
    assert_eq!(json["errors_total"], 0);
}
