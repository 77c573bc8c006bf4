//! HTTP server implementation using Axum.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{
    Json, Router,
    extract::State,
    routing::{any, delete, get, post},
};
use tickhook_core::TickhookConfig;
use tickhook_scheduler::{
    Clock, Dispatcher, HttpDispatcher, MinuteDriver, SweepEngine, SystemClock, TaskRegistry, open_store,
};
use tower_http::trace::TraceLayer;

/// Header carrying the shared secret for internal callers.
pub const INTERNAL_KEY_HEADER: &str = "X-Internal-Key";

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub registry: TaskRegistry,
    pub driver: MinuteDriver,
    /// Expected `X-Internal-Key`; None lets every caller through.
    pub internal_key: Option<String>,
    /// Mount point of the scheduler endpoints, e.g. `/scheduler/internal`.
    pub prefix: String,
    pub start_time: Instant,
}

impl AppState {
    /// Wire store, dispatcher and clock from config.
    pub fn from_config(config: &TickhookConfig) -> anyhow::Result<Self> {
        let store = open_store(&config.store)?;
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(HttpDispatcher::new(&config.dispatch)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let engine = SweepEngine::new(store.clone(), dispatcher, clock.clone());
        Ok(Self {
            registry: TaskRegistry::new(store, clock),
            driver: MinuteDriver::new(engine, &config.driver),
            internal_key: config.gateway.internal_key.clone(),
            prefix: config.gateway.prefix.clone(),
            start_time: Instant::now(),
        })
    }
}

/// Internal key auth middleware — validates the X-Internal-Key header.
async fn require_internal_key(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    // If no key configured, allow all
    let Some(expected) = &state.internal_key else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(INTERNAL_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided == expected {
        return next.run(req).await;
    }

    tracing::warn!(path = %req.uri().path(), "Rejected call without a valid internal key");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"ok": false, "error": "Unauthorized: invalid or missing internal key"})),
    )
        .into_response()
}

/// `/scheduler/internal/` → `/scheduler/internal`; `/` or empty → root.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    let prefix = normalize_prefix(&shared.prefix);

    // Protected routes — require the internal key when one is configured
    let internal = Router::new()
        .route(
            "/schedule",
            post(super::routes::schedule_post)
                .get(super::routes::schedule_get)
                .fallback(super::routes::method_not_allowed),
        )
        .route(
            "/unschedule",
            delete(super::routes::unschedule).fallback(super::routes::method_not_allowed),
        )
        .route("/on_minute_call", any(super::routes::on_minute_call))
        .route(
            "/tasks",
            get(super::routes::list_tasks).fallback(super::routes::method_not_allowed),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_internal_key,
        ));

    // Public routes — no auth
    let public = Router::new().route("/health", get(super::routes::health_check));

    let app = if prefix.is_empty() {
        internal.merge(public)
    } else {
        Router::new().nest(&prefix, internal).merge(public)
    };

    app.layer(TraceLayer::new_for_http()).with_state(shared)
}

/// Start the HTTP server.
pub async fn start(config: &TickhookConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    if state.internal_key.is_none() {
        tracing::warn!(
            "No internal key configured (gateway.internal_key / TICKHOOK_INTERNAL_KEY): scheduler endpoints are open to any caller"
        );
    }
    let prefix = normalize_prefix(&state.prefix);
    let app = build_router(state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Gateway server listening on http://{addr}{prefix}");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/scheduler/internal"), "/scheduler/internal");
        assert_eq!(normalize_prefix("scheduler/internal/"), "/scheduler/internal");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
    }
}
