//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each admin endpoint against the
//! memory store.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use blog_cache::{
    api::create_router,
    config::{Config, Environment},
    store::{KvStore, MemoryStore},
    AppState,
};
use serde_json::Value;
use tower::ServiceExt;

// == Helper Functions ==

fn create_state(store: Arc<MemoryStore>) -> AppState {
    let config = Config::preset(Environment::Test);
    AppState::build(store, &config).unwrap()
}

fn create_test_app() -> Router {
    create_router(create_state(Arc::new(MemoryStore::default())))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint_reports_store() {
    let app = create_test_app();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["store"], "memory");
    assert_eq!(json["storeReachable"], true);
    assert!(json["health"]["score"].is_number());
}

#[tokio::test]
async fn test_health_endpoint_store_down() {
    let store = Arc::new(MemoryStore::default());
    let app = create_router(create_state(store.clone()));
    store.set_available(false);

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "unhealthy");
}

// == Stats and Metrics Endpoint Tests ==

#[tokio::test]
async fn test_stats_reflect_engine_traffic() {
    let state = create_state(Arc::new(MemoryStore::default()));
    let metrics_task = state.admin.metrics().spawn();
    let engine = state.engine().clone();
    let app = create_router(state.clone());

    engine.set("1", &"hello", "article", None).await;
    let _: Option<String> = engine.get("1", "article").await;
    let _: Option<String> = engine.get("2", "article").await;

    // the aggregator consumes the bus asynchronously
    for _ in 0..50 {
        if state.admin.metrics().snapshot().misses == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = app.oneshot(get("/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["snapshot"]["hits"], 1);
    assert_eq!(json["snapshot"]["misses"], 1);
    assert_eq!(json["snapshot"]["sets"], 1);
    assert_eq!(json["snapshot"]["hitRate"], 0.5);
    assert_eq!(json["perType"]["article"]["hits"], 1);
    assert_eq!(json["registeredTypes"], 8);
    assert_eq!(json["storeHitRate"], 0.5);

    metrics_task.abort();
}

#[tokio::test]
async fn test_report_and_reset() {
    let state = create_state(Arc::new(MemoryStore::default()));
    let metrics_task = state.admin.metrics().spawn();
    let app = create_router(state.clone());

    let _: Option<String> = state.engine().get("missing", "user").await;
    for _ in 0..50 {
        if state.admin.metrics().snapshot().misses == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let report = app.clone().oneshot(get("/metrics/report")).await.unwrap();
    let json = body_to_json(report.into_body()).await;
    assert_eq!(json["snapshot"]["misses"], 1);
    assert_eq!(json["hotKeys"][0]["key"], "blog_test:user:missing");
    assert!(json["recommendations"].as_array().is_some());

    let reset = app
        .clone()
        .oneshot(json_request("POST", "/metrics/reset", ""))
        .await
        .unwrap();
    assert_eq!(reset.status(), StatusCode::OK);

    let score = app.oneshot(get("/metrics/health-score")).await.unwrap();
    let json = body_to_json(score.into_body()).await;
    assert_eq!(json["hitRate"], 0.0);
    assert_eq!(json["grade"], "poor");

    metrics_task.abort();
}

// == Clear Endpoint Tests ==

#[tokio::test]
async fn test_clear_by_tag_endpoint() {
    let store = Arc::new(MemoryStore::default());
    let state = create_state(store.clone());
    let app = create_router(state.clone());

    state.engine().set("1", &"a", "article", None).await;
    state.engine().set("rust", &"t", "tag", None).await;
    state.engine().set("7", &"u", "user", None).await;

    let response = app
        .oneshot(json_request("POST", "/cache/clear", r#"{"tags":["content"]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["removed"], 2);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_clear_by_relative_pattern() {
    let store = Arc::new(MemoryStore::default());
    let state = create_state(store.clone());
    let app = create_router(state.clone());

    state.engine().set("1:draft", &"a", "article", None).await;
    state.engine().set("2", &"b", "article", None).await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/cache/clear",
            r#"{"patterns":["article:*:draft"]}"#,
        ))
        .await
        .unwrap();

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["removed"], 1);
}

#[tokio::test]
async fn test_clear_unknown_type_is_bad_request() {
    let app = create_test_app();

    let response = app
        .oneshot(json_request("POST", "/cache/clear", r#"{"types":["nope"]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_clear_all_requires_confirm() {
    let app = create_test_app();

    let response = app
        .oneshot(json_request("POST", "/cache/clear-all", "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_clear_all_store_down_is_unavailable() {
    let store = Arc::new(MemoryStore::default());
    let app = create_router(create_state(store.clone()));
    store.set_available(false);

    let response = app
        .oneshot(json_request("POST", "/cache/clear-all", r#"{"confirm":true}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// == Cleanup Endpoint Tests ==

#[tokio::test]
async fn test_manual_cleanup_endpoint() {
    let store = Arc::new(MemoryStore::new(1000));
    let app = create_router(create_state(store.clone()));
    store
        .set("blog_test:comment:1", b"1", Duration::from_secs(10))
        .await
        .unwrap();
    store.simulate_used_memory(Some(900));

    let response = app
        .oneshot(json_request("POST", "/cache/cleanup", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["keysRemoved"], 1);
    assert_eq!(json["memoryUsage"], 0.9);
    assert!(store.is_empty().await);
}

// == Type Endpoint Tests ==

#[tokio::test]
async fn test_list_types() {
    let app = create_test_app();

    let response = app.oneshot(get("/types")).await.unwrap();

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["count"], 8);
    assert_eq!(json["types"][0]["type"], "article");
}

#[tokio::test]
async fn test_update_type_and_reject_invalid() {
    let app = create_test_app();

    let response = app
        .clone()
        .oneshot(json_request("PUT", "/types/user", r#"{"ttl":120,"enabled":false}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["defaultTtlSeconds"], 120);
    assert_eq!(json["enabled"], false);

    let response = app
        .oneshot(json_request("PUT", "/types/user", r#"{"keyPrefix":"article"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
