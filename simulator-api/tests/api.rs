//! End-to-end checks of the REST surface through the real `axum::Router`,
//! exercised with `tower::ServiceExt::oneshot` rather than a bound socket.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use simulator_api::{routes, state::AppState};
use tower::ServiceExt;

fn app() -> axum::Router {
    routes::build_router(AppState::new())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn fresh_simulation_reports_none_status() {
    let response = app().oneshot(Request::get("/api/simulation").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "NONE");
}

#[tokio::test]
async fn starting_without_client_groups_is_rejected() {
    let response = app().oneshot(Request::put("/api/simulation").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn adding_a_group_then_starting_then_stopping_round_trips() {
    let app = app();

    let add_body = json!({
        "id": "g1",
        "count": 1,
        "requestRateMs": 50,
        "rampUpMs": 0,
        "delayMs": 0,
        "behaviorScript": null,
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/clients")
                .header("content-type", "application/json")
                .body(Body::from(add_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(Request::put("/api/simulation").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "RUNNING");

    let response = app.clone().oneshot(Request::get("/api/clients/g1").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "mutating-id routes reject while running");

    let response = app.clone().oneshot(Request::delete("/api/simulation").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "STOPPED");
}

#[tokio::test]
async fn unknown_client_group_id_is_not_found() {
    let response = app().oneshot(Request::get("/api/clients/does-not-exist").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn server_behavior_round_trips_through_put_and_get() {
    let app = app();
    let behavior = json!({
        "to": 30.0,
        "rtFrom": 0.0,
        "rtTo": 50.0,
        "errors": [{"x": 0.0, "y": 0.1, "type": "curve"}, {"x": 1.0, "y": 0.1, "type": "curve"}],
        "rtMin": [{"x": 0.0, "y": 5.0, "type": "curve"}, {"x": 1.0, "y": 5.0, "type": "curve"}],
        "rtMax": [{"x": 0.0, "y": 10.0, "type": "curve"}, {"x": 1.0, "y": 10.0, "type": "curve"}],
        "resourceManagementEnabled": false,
        "resourceSettings": {
            "maxConcurrentRequests": 10,
            "maxMemoryMb": 512.0,
            "maxQueueSize": 50,
            "memoryLeakRateMbPerSec": 0.0,
            "memoryPerRequestMb": 1.0,
            "gcPauseIntervalSec": 30.0,
            "gcPauseDurationMs": 50.0,
        },
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri("/api/server")
                .header("content-type", "application/json")
                .body(Body::from(behavior.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(Request::get("/api/server").body(Body::empty()).unwrap()).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["to"], 30.0);
}
