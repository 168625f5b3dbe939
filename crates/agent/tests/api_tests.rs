//! Integration tests for the agent API endpoints

#[path = "../src/api.rs"]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use repair_lib::health::{components, EMPTY_POLICY_MESSAGE, NO_MODEL_MESSAGE, UNHEALTHY_AFTER};
use repair_lib::{Action, HealthRegistry, RepairMetrics};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_repair_components().await;

    let metrics = RepairMetrics::new();
    let state = Arc::new(AppState::new(health_registry, metrics));
    let router = create_router(state.clone());

    (router, state)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get_text(app: Router, uri: &str) -> String {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_healthz_degraded_until_model_trained() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["predictor"]["message"],
        NO_MODEL_MESSAGE
    );
    assert_eq!(
        health["components"]["policy"]["message"],
        EMPTY_POLICY_MESSAGE
    );
}

#[tokio::test]
async fn test_healthz_returns_ok_once_model_and_policy_reported() {
    let (app, state) = setup_test_app().await;
    state.health_registry.report_model(Some("v3")).await;
    state.health_registry.report_policy(8).await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    for _ in 0..UNHEALTHY_AFTER {
        state
            .health_registry
            .report_flush(Some("permission denied"))
            .await;
    }

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(
        health["components"][components::PERSISTENCE]["status"],
        "unhealthy"
    );
}

#[tokio::test]
async fn test_healthz_includes_component_details() {
    let (app, _state) = setup_test_app().await;

    let (_, health) = get_json(app, "/healthz").await;

    assert!(health["components"].is_object());
    for name in components::ALL {
        assert!(health["components"][name].is_object(), "missing {}", name);
    }
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    // Not ready until learned state is loaded
    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready_without_model() {
    let (app, state) = setup_test_app().await;

    // Degraded predictor does not block readiness
    state.health_registry.set_ready(true).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state) = setup_test_app().await;

    state.health_registry.set_ready(true).await;
    for _ in 0..UNHEALTHY_AFTER {
        state.health_registry.report_collection(0, 2).await;
    }

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(readiness["reason"]
        .as_str()
        .unwrap()
        .starts_with("collector unhealthy"));
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.inc_ticks();
    state.metrics.record_action(Action::Restart, true, 4.5);
    state.metrics.record_training(0.25);
    state.metrics.set_model_version("v1");
    state.metrics.set_q_table_entries(3);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let metrics_text = get_text(app, "/metrics").await;

    assert!(metrics_text.contains("repair_agent_ticks_total"));
    assert!(metrics_text.contains("repair_agent_actions_total"));
    assert!(metrics_text.contains(r#"action="restart""#));
    assert!(metrics_text.contains("repair_agent_model_version_info"));
    assert!(metrics_text.contains("repair_agent_q_table_entries"));
}

#[tokio::test]
async fn test_metrics_contains_histogram_buckets() {
    let (app, state) = setup_test_app().await;

    state.metrics.record_training(0.1);
    state.metrics.record_training(1.5);
    state.metrics.record_action(Action::ScaleUp, false, -10.0);

    let metrics_text = get_text(app, "/metrics").await;

    assert!(metrics_text.contains("repair_agent_training_latency_seconds_bucket"));
    assert!(metrics_text.contains("repair_agent_training_latency_seconds_count"));
    assert!(metrics_text.contains("repair_agent_action_reward_sum"));
}
