// HTTP/JSON API module

pub mod error;
pub mod health;
pub mod stream;

use std::sync::Arc;

use axum::{
    http::{StatusCode, Uri},
    response::IntoResponse,
    Json, Router,
};
use serde_json::json;
use streamflow_core::Config;
use streamflow_proxy::{ProxyError, Relay};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build the shared relay (and its upstream clients) from configuration.
    pub fn new(config: Config) -> Result<Self, ProxyError> {
        let relay = Relay::new(config.relay.clone())?;
        Ok(Self {
            relay,
            config: Arc::new(config),
        })
    }
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        // Health check and banner
        .merge(health::create_health_router())
        // Relay, resolve and diagnostics
        .nest("/api/stream", stream::create_stream_router())
        .fallback(route_not_found);

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}

async fn route_not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "message": format!("Route {} not found on this server", uri.path()),
        })),
    )
}
