//! Request and response bodies of the gateway API, with their OpenAPI schemas.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ChatMessagePayload {
    #[schema(example = "user")]
    pub role: String,
    #[schema(example = "Am Samstag habe ich Zeit.")]
    pub content: String,
}

/// A chat-completion request plus the session it is counted against.
///
/// Fields other than `sessionId` are forwarded to the provider unchanged,
/// including ones not listed here.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ChatRequest {
    #[schema(example = "gpt-4o-mini")]
    pub model: String,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "session_1718000000000_k3j9x0a2b1c")]
    pub session_id: Option<String>,
    pub messages: Vec<ChatMessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ThrottledResponse {
    /// Seconds to wait before resubmitting the same request.
    #[serde(rename = "retryAfter")]
    pub retry_after: f64,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct LimitReachedResponse {
    #[serde(rename = "limitReached")]
    pub limit_reached: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ExpiredResponse {
    pub expired: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub message: String,
}
