//! Route configuration.

use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::handlers;
use super::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(state.cors_origin.as_deref());

    Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/token", get(handlers::issue_token))
        .route("/chat", post(handlers::chat))
        .route(
            "/conversation/{conversation_id}/messages",
            get(handlers::get_conversation_messages),
        )
        .route(
            "/conversation/{conversation_id}/export",
            post(handlers::export_conversation),
        )
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn fallback() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

/// Credentialed CORS for the configured client origin; permissive methods and
/// headers, no CORS layer restrictions beyond the origin itself.
fn build_cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::COOKIE]);

    match origin.and_then(|o| match o.parse::<HeaderValue>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(origin = o, "invalid CORS origin, ignoring");
            None
        }
    }) {
        Some(value) => layer
            .allow_origin(AllowOrigin::exact(value))
            .allow_credentials(true),
        None => layer,
    }
}
