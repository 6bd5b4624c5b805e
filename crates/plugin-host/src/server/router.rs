//! HTTP Router
//!
//! Fixed administrative routes accept any method, as does the fallback that
//! dispatches every other path to a plugin.

use axum::routing::any;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handler::{dispatch, status, upload_environment_variables, upload_plugin_info};
use super::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check, independent of registry state
        .route("/status", any(status))
        .route("/uploadPluginInfo", any(upload_plugin_info))
        .route("/uploadEnvironmentVariables", any(upload_environment_variables))
        // Everything else is a plugin path
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
