//! HTTP surface
//!
//! Four API routes plus health and metrics:
//!
//! - `GET /api/get-auth-url` — the Dropbox consent URL for the
//!   no-redirect flow
//! - `POST /api/get-access-token` — exchange a pasted authorization
//!   code; response shape depends on the configured return mode
//! - `POST /api/refresh-token` — bearer-authenticated by session
//!   credential, returns a currently valid provider token pair
//! - `POST /api/revoke-session` — drop all server-side state for the
//!   authenticated user
//!
//! Error bodies carry a generic `{"error": ...}` string; the concrete
//! failure detail goes to logs only.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::warn;

use credential_store::CredentialStore;
use token_lifecycle::{Coordinator, Error as LifecycleError};

use crate::config::ReturnMode;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<CredentialStore>,
    pub auth_url: String,
    pub return_mode: ReturnMode,
    pub metrics: ServiceMetrics,
    pub prometheus: PrometheusHandle,
}

/// Process-local counters surfaced by the health endpoint.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub started_at: Instant,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit layer bounds in-flight requests across all
/// routes; excess requests queue rather than shed.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/api/get-auth-url", get(get_auth_url))
        .route("/api/get-access-token", post(get_access_token))
        .route("/api/refresh-token", post(refresh_token))
        .route("/api/revoke-session", post(revoke_session))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LinkRequest {
    auth_code: String,
}

async fn get_auth_url(State(state): State<AppState>) -> Response {
    let start = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = (
        StatusCode::OK,
        Json(serde_json::json!({ "auth_url": state.auth_url })),
    )
        .into_response();
    finish(&state, "get-auth-url", start, response)
}

async fn get_access_token(
    State(state): State<AppState>,
    payload: Result<Json<LinkRequest>, JsonRejection>,
) -> Response {
    let start = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let Ok(Json(request)) = payload else {
        let response = error_response(
            StatusCode::BAD_REQUEST,
            "request body must be JSON with an auth_code field",
        );
        return finish(&state, "get-access-token", start, response);
    };
    if request.auth_code.trim().is_empty() {
        let response = error_response(StatusCode::BAD_REQUEST, "auth_code must not be empty");
        return finish(&state, "get-access-token", start, response);
    }

    let response = match state.coordinator.link_account(&request.auth_code).await {
        Ok(linked) => {
            let body = match state.return_mode {
                ReturnMode::SessionCredential => serde_json::json!({
                    "user_id": linked.user_id,
                    "session_token": linked.session_token,
                }),
                ReturnMode::RawProviderToken => serde_json::json!({
                    "user_id": linked.user_id,
                    "access_token": linked.tokens.access_token,
                    "refresh_token": linked.tokens.refresh_token,
                }),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => lifecycle_error_response("get-access-token", &e),
    };
    finish(&state, "get-access-token", start, response)
}

async fn refresh_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let start = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = match authenticate(&state, &headers) {
        Err(response) => response,
        Ok(user_id) => match state.coordinator.usable_tokens(&user_id).await {
            Ok(tokens) => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "access_token": tokens.access_token,
                    "refresh_token": tokens.refresh_token,
                })),
            )
                .into_response(),
            Err(e) => lifecycle_error_response("refresh-token", &e),
        },
    };
    finish(&state, "refresh-token", start, response)
}

async fn revoke_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let start = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = match authenticate(&state, &headers) {
        Err(response) => response,
        Ok(user_id) => match state.coordinator.revoke(&user_id).await {
            Ok(revoked) => (
                StatusCode::OK,
                Json(serde_json::json!({ "revoked": revoked })),
            )
                .into_response(),
            Err(e) => lifecycle_error_response("revoke-session", &e),
        },
    };
    finish(&state, "revoke-session", start, response)
}

/// Health endpoint: status, uptime, request counters, linked accounts.
async fn health(State(state): State<AppState>) -> Response {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
        "linked_accounts": state.store.len().await,
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// Prometheus metrics endpoint in text exposition format.
async fn render_metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
        .into_response()
}

/// Resolve the bearer session credential to a user id, or produce the
/// 401 response. Missing header, non-bearer scheme, and failed
/// verification are indistinguishable to the client.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, Response> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(credential) = credential else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "missing or invalid session credential",
        ));
    };
    state
        .coordinator
        .verify_session(credential)
        .map_err(|_| {
            error_response(
                StatusCode::UNAUTHORIZED,
                "missing or invalid session credential",
            )
        })
}

/// Map a lifecycle error to its HTTP response, logging the detail that
/// stays out of the client-visible body.
fn lifecycle_error_response(endpoint: &'static str, err: &LifecycleError) -> Response {
    warn!(endpoint, error = %err, "request failed");
    let (status, message) = match err {
        LifecycleError::SessionNotLinked | LifecycleError::InvalidSession => (
            StatusCode::UNAUTHORIZED,
            "missing or invalid session credential",
        ),
        LifecycleError::ExchangeFailed(_) => (
            StatusCode::BAD_GATEWAY,
            "authorization code exchange failed",
        ),
        LifecycleError::RefreshFailed(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "token refresh failed")
        }
        LifecycleError::Store(_) | LifecycleError::Session(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    };
    error_response(status, message)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Count errors and record the request metric before handing the
/// response back.
fn finish(state: &AppState, endpoint: &'static str, start: Instant, response: Response) -> Response {
    if response.status().is_client_error() || response.status().is_server_error() {
        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    crate::metrics::record_request(
        endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
