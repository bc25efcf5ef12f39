//! Axum Router Configuration
//!
//! This module defines the HTTP routing for the gateway: the chat relay, a
//! health probe and the OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ChatMessagePayload, ChatRequest, ErrorResponse, ExpiredResponse, HealthResponse,
        LimitReachedResponse, ThrottledResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::chat, handlers::health),
    components(
        schemas(ChatRequest, ChatMessagePayload, ErrorResponse, ThrottledResponse, LimitReachedResponse, ExpiredResponse, HealthResponse)
    ),
    tags(
        (name = "Sprechen Gateway", description = "Session-protected relay to the text-generation provider")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/health", get(handlers::health))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
