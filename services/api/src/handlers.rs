//! Axum Handlers for the REST API
//!
//! `/api/chat` admits a request through the [`Gatekeeper`](crate::guard::Gatekeeper),
//! strips the session id and relays the provider's answer.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::{
    guard::Admission,
    models::{
        ChatRequest, ErrorResponse, ExpiredResponse, HealthResponse, LimitReachedResponse,
        ThrottledResponse,
    },
    state::AppState,
    upstream::UpstreamError,
};

const ANON_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub enum ApiError {
    BadRequest(String),
    Throttled(Duration),
    LimitReached,
    Expired,
    BadGateway(String),
    GatewayTimeout,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
            }
            ApiError::Throttled(retry_after) => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ThrottledResponse {
                    retry_after: retry_after.as_secs_f64(),
                }),
            )
                .into_response(),
            ApiError::LimitReached => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(LimitReachedResponse {
                    limit_reached: true,
                }),
            )
                .into_response(),
            ApiError::Expired => {
                (StatusCode::GONE, Json(ExpiredResponse { expired: true })).into_response()
            }
            ApiError::BadGateway(error) => {
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { error })).into_response()
            }
            ApiError::GatewayTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ErrorResponse {
                    error: "Request timeout".to_string(),
                }),
            )
                .into_response(),
        }
    }
}

fn anonymous_session_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..7)
        .map(|_| ANON_ALPHABET[rng.random_range(0..ANON_ALPHABET.len())] as char)
        .collect();
    format!("anon_{suffix}")
}

/// Forward a chat-completion request under per-session protection.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Provider reply, relayed unchanged"),
        (status = 400, description = "Body is not a chat request", body = ErrorResponse),
        (status = 410, description = "Session expired", body = ExpiredResponse),
        (status = 429, description = "Throttled (retryAfter) or message limit reached (limitReached)", body = ThrottledResponse),
        (status = 502, description = "Provider unreachable", body = ErrorResponse),
        (status = 504, description = "Provider timed out", body = ErrorResponse)
    )
)]
#[instrument(skip_all)]
pub async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let mut payload: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid JSON".to_string()))?;
    let request: ChatRequest = serde_json::from_value(payload.clone())
        .map_err(|e| ApiError::BadRequest(format!("Invalid chat request: {e}")))?;

    let session_id = request
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(anonymous_session_id);

    match state.gatekeeper.admit(&session_id, Instant::now()) {
        Admission::Allowed { message_count } => {
            info!(%session_id, message_count, model = %request.model, "Request admitted");
        }
        Admission::Throttled { retry_after } => {
            warn!(%session_id, ?retry_after, "Request throttled");
            return Err(ApiError::Throttled(retry_after));
        }
        Admission::LimitReached => {
            warn!(%session_id, "Message limit reached");
            return Err(ApiError::LimitReached);
        }
        Admission::Expired => {
            warn!(%session_id, "Session expired");
            return Err(ApiError::Expired);
        }
    }

    if let Some(fields) = payload.as_object_mut() {
        fields.remove("sessionId");
    }

    let reply = state.upstream.forward(&payload).await.map_err(|e| match e {
        UpstreamError::Timeout => ApiError::GatewayTimeout,
        UpstreamError::Request(err) => {
            error!(%session_id, error = %err, "Upstream request failed");
            ApiError::BadGateway(err.to_string())
        }
    })?;

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, Json(reply.body)).into_response())
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Gateway running".to_string(),
    })
}
