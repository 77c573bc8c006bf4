//! API route handlers for the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{
    Json,
    extract::{Query, State},
};
use serde_json::{Value, json};
use thiserror::Error;
use tickhook_core::TickhookError;
use tickhook_scheduler::{InvocationOutcome, parse_schedule_request, parse_unschedule_request};

use super::server::AppState;

const MALFORMED_BODY: &str = "Malformed request body. Request must be a valid json form.";

/// Error returned by a handler, rendered as `{"ok": false, "error": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Tickhook(#[from] TickhookError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Tickhook(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Tickhook(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        } else {
            tracing::debug!("Request rejected: {self}");
        }
        (status, Json(json!({"ok": false, "error": self.to_string()}))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn parse_json(raw: &str) -> Result<Value, ApiError> {
    serde_json::from_str(raw).map_err(|_| ApiError::BadRequest(MALFORMED_BODY.into()))
}

fn schedule(state: &AppState, doc: &Value) -> ApiResult {
    let request = parse_schedule_request(doc)?;
    let task = state.registry.schedule(request)?;
    Ok(Json(json!({
        "ok": true,
        "message": "Task has been scheduled.",
        "scheduledToTime": task.scheduled_to_time,
    })))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "tickhook-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Schedule from a JSON request body.
pub async fn schedule_post(State(state): State<Arc<AppState>>, body: String) -> ApiResult {
    schedule(&state, &parse_json(&body)?)
}

/// Schedule from `?serialized=<url-encoded JSON>`, for callers limited to GET.
pub async fn schedule_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let serialized = params.get("serialized").ok_or_else(|| {
        ApiError::BadRequest("Malformed request. Url parameters must contain serialized= key.".into())
    })?;
    schedule(&state, &parse_json(serialized)?)
}

pub async fn unschedule(State(state): State<Arc<AppState>>, body: String) -> ApiResult {
    let url = parse_unschedule_request(&parse_json(&body)?)?;
    state.registry.unschedule(&url)?;
    Ok(Json(json!({"ok": true, "message": "Task has been unscheduled."})))
}

/// Runs one bounded driver invocation; responds only once its budget is spent.
pub async fn on_minute_call(State(state): State<Arc<AppState>>) -> Response {
    match state.driver.run().await {
        InvocationOutcome::NothingToDo { reason } => {
            (StatusCode::OK, Json(json!({"ok": true, "message": reason}))).into_response()
        }
        InvocationOutcome::Accepted { cycles, totals } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "ok": true,
                "message": "Accepted",
                "cycles": cycles,
                "dispatched": totals.due,
                "deleted": totals.deleted,
                "storeErrors": totals.store_errors,
            })),
        )
            .into_response(),
    }
}

pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult {
    let tasks = state.registry.list()?;
    Ok(Json(json!({"ok": true, "count": tasks.len(), "tasks": tasks})))
}

pub async fn method_not_allowed(method: Method) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "ok": false,
            "error": format!("Request method {method} is not accepted on this endpoint"),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{INTERNAL_KEY_HEADER, build_router};
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Instant;
    use tickhook_core::config::DriverConfig;
    use tickhook_scheduler::{
        Clock, DispatchResult, Dispatcher, ManualClock, MemoryStore, MinuteDriver, ScheduledTask,
        SweepEngine, TaskRegistry, TaskStore,
    };
    use tower::ServiceExt;

    const T0: i64 = 1_700_000_000;
    const PREFIX: &str = "/scheduler/internal";

    struct StubDispatcher(u16);

    #[async_trait]
    impl Dispatcher for StubDispatcher {
        async fn dispatch(&self, _task: &ScheduledTask) -> DispatchResult {
            DispatchResult::from_status(self.0, "")
        }
    }

    /// Scans fine but every write fails.
    struct ReadOnlyStore;

    impl TaskStore for ReadOnlyStore {
        fn scan(&self) -> tickhook_core::Result<Vec<ScheduledTask>> {
            Ok(Vec::new())
        }
        fn upsert(&self, _: &ScheduledTask) -> tickhook_core::Result<()> {
            Err(TickhookError::store("database is locked"))
        }
        fn delete(&self, _: &str) -> tickhook_core::Result<()> {
            Err(TickhookError::store("database is locked"))
        }
    }

    fn test_app(store: Arc<dyn TaskStore>, internal_key: Option<&str>) -> Router {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_at(T0));
        let engine = SweepEngine::new(store.clone(), Arc::new(StubDispatcher(200)), clock.clone());
        build_router(AppState {
            registry: TaskRegistry::new(store, clock),
            driver: MinuteDriver::new(engine, &DriverConfig::default()),
            internal_key: internal_key.map(String::from),
            prefix: PREFIX.into(),
            start_time: Instant::now(),
        })
    }

    fn request(method: &str, path: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(format!("{PREFIX}{path}"));
        match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn post_task() -> Value {
        json!({
            "url": "https://billing.example.com/remind",
            "verb": "POST",
            "body": {"invoice": 7},
            "retryCount": 2,
            "retryInSeconds": 5
        })
    }

    // ---- Schedule ----

    #[tokio::test]
    async fn test_schedule_post() {
        let store = Arc::new(MemoryStore::new());
        let app = test_app(store.clone(), None);

        let (status, json) = send(&app, request("POST", "/schedule", Some(post_task()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["scheduledToTime"], T0 + 5);

        let task = store.get("https://billing.example.com/remind").unwrap();
        assert_eq!(task.retried_count, 0);
        assert_eq!(task.retry_count, 2);
    }

    #[tokio::test]
    async fn test_schedule_get_with_serialized_query() {
        let store = Arc::new(MemoryStore::new());
        let app = test_app(store.clone(), None);
        let doc = json!({
            "url": "https://status.example.com/ping?src=tf",
            "verb": "GET",
            "retryCount": -1,
            "retryInSeconds": 60
        });
        let uri = format!("/schedule?serialized={}", urlencoding::encode(&doc.to_string()));

        let (status, _) = send(&app, request("GET", &uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(store.get("https://status.example.com/ping?src=tf").is_some());
    }

    #[tokio::test]
    async fn test_schedule_get_without_serialized_is_400() {
        let app = test_app(Arc::new(MemoryStore::new()), None);
        let (status, json) = send(&app, request("GET", "/schedule", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("serialized"));
    }

    #[tokio::test]
    async fn test_schedule_malformed_json_is_400() {
        let app = test_app(Arc::new(MemoryStore::new()), None);
        let req = Request::builder()
            .method("POST")
            .uri(format!("{PREFIX}/schedule"))
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], MALFORMED_BODY);
    }

    #[tokio::test]
    async fn test_schedule_body_rules_are_400() {
        let store = Arc::new(MemoryStore::new());
        let app = test_app(store.clone(), None);

        let mut get_with_body = post_task();
        get_with_body["verb"] = json!("GET");
        let (status, json) = send(&app, request("POST", "/schedule", Some(get_with_body))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["ok"], false);

        let mut put_without_body = post_task();
        put_without_body["verb"] = json!("PUT");
        put_without_body.as_object_mut().unwrap().remove("body");
        let (status, _) = send(&app, request("POST", "/schedule", Some(put_without_body))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_methods_are_405() {
        let app = test_app(Arc::new(MemoryStore::new()), None);
        let (status, json) = send(&app, request("PUT", "/schedule", Some(post_task()))).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(json["error"].as_str().unwrap().contains("PUT"));

        let (status, _) = send(&app, request("POST", "/unschedule", Some(json!({"url": "https://a.example.com/"})))).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    // ---- Unschedule ----

    #[tokio::test]
    async fn test_unschedule_removes_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let app = test_app(store.clone(), None);
        send(&app, request("POST", "/schedule", Some(post_task()))).await;

        let body = json!({"url": "https://billing.example.com/remind"});
        let (status, json) = send(&app, request("DELETE", "/unschedule", Some(body.clone()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Task has been unscheduled.");
        assert!(store.is_empty());

        let (status, _) = send(&app, request("DELETE", "/unschedule", Some(body))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, request("DELETE", "/unschedule", Some(json!({"url": "mailto:x@y"})))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_store_write_failure_is_500() {
        let app = test_app(Arc::new(ReadOnlyStore), None);

        let (status, json) = send(&app, request("POST", "/schedule", Some(post_task()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["ok"], false);
        assert!(json["error"].as_str().unwrap().contains("database is locked"));

        let body = json!({"url": "https://billing.example.com/remind"});
        let (status, _) = send(&app, request("DELETE", "/unschedule", Some(body))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ---- Minute call ----

    #[tokio::test]
    async fn test_on_minute_call_with_empty_store() {
        let app = test_app(Arc::new(MemoryStore::new()), None);
        let (status, json) = send(&app, request("GET", "/on_minute_call", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
    }

    #[tokio::test]
    async fn test_on_minute_call_runs_budget_and_accepts() {
        let store = Arc::new(MemoryStore::new());
        let app = test_app(store.clone(), None);
        send(&app, request("POST", "/schedule", Some(post_task()))).await;

        // ManualClock sleeps advance virtual time, so the 50 s budget passes instantly.
        let (status, json) = send(&app, request("POST", "/on_minute_call", None)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["cycles"], 5);
        assert_eq!(json["dispatched"], 1);
        assert_eq!(json["deleted"], 1);
        // Succeeded with the default cancelRetryOnSuccess.
        assert!(store.scan().unwrap().is_empty());
    }

    // ---- Listing, health, auth ----

    #[tokio::test]
    async fn test_list_tasks() {
        let store = Arc::new(MemoryStore::new());
        let app = test_app(store, None);
        send(&app, request("POST", "/schedule", Some(post_task()))).await;

        let (status, json) = send(&app, request("GET", "/tasks", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 1);
        assert_eq!(json["tasks"][0]["url"], "https://billing.example.com/remind");
        assert_eq!(json["tasks"][0]["retriedCount"], 0);
    }

    #[tokio::test]
    async fn test_internal_key_is_enforced() {
        let store = Arc::new(MemoryStore::new());
        let app = test_app(store.clone(), Some("s3cret"));

        let (status, json) = send(&app, request("POST", "/schedule", Some(post_task()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["ok"], false);
        assert!(store.is_empty());

        let mut req = request("POST", "/schedule", Some(post_task()));
        req.headers_mut().insert(INTERNAL_KEY_HEADER, "wrong".parse().unwrap());
        assert_eq!(send(&app, req).await.0, StatusCode::UNAUTHORIZED);

        let mut req = request("POST", "/schedule", Some(post_task()));
        req.headers_mut().insert(INTERNAL_KEY_HEADER, "s3cret".parse().unwrap());
        assert_eq!(send(&app, req).await.0, StatusCode::OK);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = test_app(Arc::new(MemoryStore::new()), Some("s3cret"));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[test]
    fn test_api_error_status() {
        assert_eq!(
            ApiError::from(TickhookError::validation("bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(TickhookError::store("down")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
    }
}
