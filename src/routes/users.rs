use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extractors::{ApiJson, Session};
use crate::identity::{AuthenticatedUser, LoginRequest, Registration, UserUpdate};
use crate::state::AppState;

/// `{"user": ...}` in both directions.
#[derive(Debug, Deserialize, Serialize)]
pub struct UserBody<T> {
    pub user: T,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", post(register))
        .route("/api/users/login", post(login))
        .route("/api/user", get(current_user).put(update_user))
}

async fn register(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiJson(body): ApiJson<UserBody<Registration>>,
) -> AppResult<Json<UserBody<AuthenticatedUser>>> {
    let user = state.identity.register(&cx, body.user).await?;
    Ok(Json(UserBody { user }))
}

async fn login(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiJson(body): ApiJson<UserBody<LoginRequest>>,
) -> AppResult<Json<UserBody<AuthenticatedUser>>> {
    let user = state.identity.login(&cx, body.user).await?;
    Ok(Json(UserBody { user }))
}

async fn current_user(
    State(state): State<AppState>,
    Session(cx): Session,
) -> AppResult<Json<UserBody<AuthenticatedUser>>> {
    let user = state.identity.current_user(&cx).await?;
    Ok(Json(UserBody { user }))
}

async fn update_user(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiJson(body): ApiJson<UserBody<UserUpdate>>,
) -> AppResult<Json<UserBody<AuthenticatedUser>>> {
    let user = state.identity.update_user(&cx, body.user).await?;
    Ok(Json(UserBody { user }))
}
