//! Router tests over a lazily connected pool: every request here is answered
//! before a database connection would be needed.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use schema_adapter::{
    common_routes, common_routes_with_ready, entity_routes, Adapter, AdapterConfig, AdapterError, AppState, Schema, SchemaRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn user_schema() -> Schema {
    serde_json::from_value(json!({
        "properties": {
            "id": { "type": "integer" },
            "name": { "type": "string" },
            "floor": { "type": "integer" }
        },
        "required": ["name"]
    }))
    .unwrap()
}

fn lazy_adapter() -> Adapter {
    let config = AdapterConfig {
        database_url: "postgres://localhost:1/unreachable".into(),
        ..AdapterConfig::default()
    };
    let registry = Arc::new(SchemaRegistry::new());
    registry.register("user", user_schema());
    Adapter::connect_lazy(config, registry).unwrap()
}

fn app() -> Router {
    let state = AppState::new(lazy_adapter());
    Router::new().merge(common_routes()).nest("/api", entity_routes(state))
}

async fn send(req: Request<Body>) -> (StatusCode, Value) {
    let res = app().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_and_version() {
    let (status, body) = send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(get("/version")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "schema-adapter");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let (status, _) = send(get("/info")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ready_lists_schemas_and_reports_an_unreachable_database() {
    let app = common_routes_with_ready(AppState::new(lazy_adapter()));
    let res = app.oneshot(get("/ready")).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["database"], "unavailable");
    assert_eq!(body["schemas"], json!(["user"]));
}

#[tokio::test]
async fn unknown_schema_is_404() {
    let (status, body) = send(get("/api/nosuch")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "schema_not_found");

    let req = Request::builder()
        .method("POST")
        .uri("/api/nosuch")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"name":"x"}"#))
        .unwrap();
    let (status, _) = send(req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_filter_property_is_rejected() {
    let (status, body) = send(get("/api/user?nope=1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unknown_property");
}

#[tokio::test]
async fn malformed_options_are_rejected() {
    let (status, body) = send(get("/api/user?sort=%7Bbroken")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_filter");

    let (status, body) = send(get("/api/user?limit=ten")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");

    let (status, body) = send(get("/api/user?floor=~%3A3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_filter");
}

#[tokio::test]
async fn zero_id_is_required_error() {
    let (status, body) = send(get("/api/user/0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "id_required");

    let req = Request::builder()
        .method("DELETE")
        .uri("/api/user/0")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn event_names_are_checked() {
    let adapter = lazy_adapter();
    for bad in ["user:create", "user:upsert:before", "user:create:during", ":create:before"] {
        let err = adapter.on(bad, |_ctx| Box::pin(async { Ok(()) })).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidEvent(_)), "{}", bad);
    }
    adapter.on("User:create:before", |_ctx| Box::pin(async { Ok(()) })).unwrap();
    assert_eq!(adapter.listener_count("user:create:before").unwrap(), 1);
    assert_eq!(adapter.listener_count("user:create:after").unwrap(), 0);
}

#[tokio::test]
async fn destructive_table_operations_need_test_mode() {
    let adapter = lazy_adapter();
    assert!(matches!(
        adapter.drop_table("user").await,
        Err(AdapterError::UnauthorizedOperation(_))
    ));
    assert!(matches!(
        adapter.clear_table("user").await,
        Err(AdapterError::UnauthorizedOperation(_))
    ));
}

#[tokio::test]
async fn validation_runs_without_a_connection() {
    let adapter = lazy_adapter();
    let report = adapter
        .validate("user", json!({ "floor": 1 }).as_object().unwrap())
        .unwrap();
    assert!(!report.passed);
    let ok = adapter
        .validate("user", json!({ "name": "Ann" }).as_object().unwrap())
        .unwrap();
    assert!(ok.passed);
    let ddl = adapter.sql_for_create_table("user", &user_schema()).unwrap();
    assert!(ddl.starts_with(r#"CREATE TABLE "user" ("id" serial PRIMARY KEY"#));
}
