pub mod articles;
pub mod profiles;
pub mod tags;
pub mod users;

use axum::http::Uri;
use axum::Router;

use crate::error::AppError;
use crate::state::AppState;

/// Every `/api` route.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(users::router())
        .merge(profiles::router())
        .merge(articles::router())
        .merge(tags::router())
        .fallback(unknown_route)
}

async fn unknown_route(uri: Uri) -> AppError {
    AppError::NotFound(format!("no route for {}", uri.path()))
}
