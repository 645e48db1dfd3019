use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::{metrics, request_id_middleware, security_headers_middleware};
use crate::AppState;

pub mod handlers;

/// Full service: health checks, metrics, and the gate API under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_router(state.clone()))
        .with_state(state)
        // Gate requests are tiny JSON documents
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Terminal UIs are served from `GATE_TERMINAL_ORIGIN`; localhost is allowed for dev.
fn cors_layer() -> CorsLayer {
    let terminal_origin = std::env::var("GATE_TERMINAL_ORIGIN")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin_str = origin.to_str().unwrap_or("");
            origin_str == terminal_origin
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-admin-key"),
            HeaderName::from_static("x-operator"),
            HeaderName::from_static("x-request-id"),
        ])
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    if state.engine.allocator.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "no parking slots loaded").into_response();
    }
    "ok".into_response()
}

async fn metrics_handler() -> Response {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        metrics::encode_metrics(),
    )
        .into_response()
}

/// Build the gate API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let admin = Router::new()
        .route("/slot/force-release", post(handlers::force_release))
        .route("/slots/:id/reserve", post(handlers::reserve_slot))
        .route("/slots/:id/unreserve", post(handlers::unreserve_slot))
        .route("/tokens/:code", delete(handlers::delete_token))
        .route("/audit", get(handlers::list_audit))
        .layer(middleware::from_fn_with_state(state, admin_auth));

    Router::new()
        .route("/entry", post(handlers::process_entry))
        .route("/exit", post(handlers::issue_exit))
        .route("/scan", post(handlers::scan))
        .route("/tokens", get(handlers::list_tokens))
        .route("/slots", get(handlers::list_slots))
        .route("/slots/summary", get(handlers::slot_summary))
        .route("/sensors/events", post(handlers::push_sensor_event))
        .merge(admin)
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` header against the configured admin key.
/// Returns 401 if missing/invalid, 500 if server config is broken.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let Some(expected) = state.config.admin_key.as_deref() else {
        tracing::error!("GATE_ADMIN_KEY is not set; refusing administrative request");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };

    match provided_key {
        Some(k) if k == expected => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
