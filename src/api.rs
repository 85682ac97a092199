//! HTTP surface of the ingestion service: the activity-log write endpoint,
//! security intake, batch control and the usual health/metrics routes.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::net::TcpListener;

use crate::activity::{ActivityLogService, LogOutcome};
use crate::batch::FlushOutcome;
use crate::error::LogError;
use crate::model::{NewActivityLog, ResourceType, UNKNOWN_USER};
use crate::observability::metrics::Metrics;
use crate::security::{LoginAttempt, SecurityLogger};

#[derive(Clone)]
pub struct AppState {
    pub activity: ActivityLogService,
    pub security: SecurityLogger,
    pub metrics: Arc<Metrics>,
    pub api_token: Arc<str>,
    pub version: String,
    pub readiness: Arc<AtomicBool>,
    pub draining: Arc<AtomicBool>,
}

const ACTIVITY_LOGS: &str = crate::sink::http::ACTIVITY_LOGS_PATH;
const LOGIN_ATTEMPTS: &str = "/api/security/login-attempts";
const INSPECT: &str = "/api/security/inspect";
const ALERTS: &str = "/api/security/alerts";
const BATCH_FLUSH: &str = "/batch/flush";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(ACTIVITY_LOGS, post(create_activity_log))
        .route(LOGIN_ATTEMPTS, post(login_attempt))
        .route(INSPECT, post(inspect_request))
        .route(ALERTS, get(list_alerts).delete(clear_alerts))
        .route("/batch/status", get(batch_status))
        .route(BATCH_FLUSH, post(flush_batch))
        .route("/_health", get(health_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/_build", get(build_handler))
        .with_state(state)
}

pub async fn start_server(bind_addr: String, state: AppState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state);
    let listener = TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub enum ApiError {
    Unauthorized,
    Upstream(LogError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
            }
            ApiError::Upstream(e) => {
                (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response()
            }
        }
    }
}

/// Checks the bearer token; rejected calls are recorded as unauthorized
/// access to `route`.
async fn authorize(state: &AppState, headers: &HeaderMap, route: &str) -> Result<(), ApiError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let accepted = match presented {
        Some(token) if !token.is_empty() => bool::from(token.as_bytes().ct_eq(state.api_token.as_bytes())),
        _ => false,
    };
    if accepted {
        return Ok(());
    }

    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    let _ = state
        .security
        .log_unauthorized_access(UNKNOWN_USER, ResourceType::System, Some(route), ip_address)
        .await;
    Err(ApiError::Unauthorized)
}

async fn create_activity_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewActivityLog>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, ACTIVITY_LOGS).await?;
    match state.activity.create_activity_log(req).await {
        Ok(LogOutcome::Persisted(entry)) => Ok((StatusCode::CREATED, Json(entry)).into_response()),
        Ok(LogOutcome::Queued(entry)) => Ok((StatusCode::ACCEPTED, Json(entry)).into_response()),
        Ok(LogOutcome::Filtered(_)) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(ApiError::Upstream(e)),
    }
}

async fn login_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(attempt): Json<LoginAttempt>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, LOGIN_ATTEMPTS).await?;
    let events = state.security.log_login_attempt(attempt).await;
    Ok(Json(events).into_response())
}

#[derive(Debug, Deserialize)]
struct InspectRequest {
    user_id: String,
    #[serde(default)]
    ip_address: Option<String>,
    request: Value,
}

async fn inspect_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InspectRequest>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, INSPECT).await?;
    let event = state
        .security
        .detect_malicious_request(&body.user_id, &body.request, body.ip_address.as_deref())
        .await;
    Ok(Json(json!({
        "malicious": event.is_some(),
        "event": event,
    }))
    .into_response())
}

async fn list_alerts(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    authorize(&state, &headers, ALERTS).await?;
    Ok(Json(state.security.get_alerts()).into_response())
}

async fn clear_alerts(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    authorize(&state, &headers, ALERTS).await?;
    state.security.clear_alerts();
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn batch_status(State(state): State<AppState>) -> Response {
    Json(state.activity.batch_status()).into_response()
}

async fn flush_batch(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    authorize(&state, &headers, BATCH_FLUSH).await?;
    let body = match state.activity.batch().force_batch().await {
        FlushOutcome::Skipped => json!({ "outcome": "skipped" }),
        FlushOutcome::Flushed { count } => json!({ "outcome": "flushed", "count": count }),
        FlushOutcome::Requeued { count, error } => {
            return Err(ApiError::Upstream(LogError::persistence(format!(
                "{} entries re-queued: {}",
                count, error
            ))));
        }
    };
    Ok(Json(body).into_response())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.draining.load(Ordering::SeqCst) {
        (StatusCode::SERVICE_UNAVAILABLE, "DRAINING")
    } else if state.readiness.load(Ordering::SeqCst) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

async fn build_handler(State(state): State<AppState>) -> String {
    state.version.clone()
}

async fn metrics_handler(State(state): State<AppState>) -> (StatusCode, String) {
    let data = state.metrics.encode();
    (StatusCode::OK, String::from_utf8_lossy(&data).to_string())
}
