// Library exports for Conduit
// The binary and the integration tests both build the router from here.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod feed;
pub mod identity;
pub mod routes;
pub mod state;
pub mod store;

use axum::error_handling::HandleErrorLayer;
use axum::{BoxError, Router};
use tower::timeout::error::Elapsed;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::AppState;

/// The full HTTP application with its middleware stack.
pub fn app(state: AppState) -> Router {
    let timeout = state.config.request_timeout();

    routes::router()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(middleware_error))
                .timeout(timeout)
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Middleware failures render the same error envelope as handlers.
async fn middleware_error(err: BoxError) -> AppError {
    if err.is::<Elapsed>() {
        AppError::Timeout
    } else {
        AppError::Internal(err.to_string())
    }
}
