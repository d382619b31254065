//! API Routes
//!
//! - `/` - Single-page form that renders the session event stream
//! - `/api/health` - Health check
//! - `/api/sources/remote` - The configured fixed-remote file list
//! - `/api/query` - Run a session; responds with server-sent events

pub mod health;
pub mod query;
pub mod ui;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(query::router(state.clone()))
        .merge(health::router(state))
        .merge(ui::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
