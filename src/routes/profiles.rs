use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::db::models::Profile;
use crate::error::AppResult;
use crate::extractors::{ApiPath, Session};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProfileBody {
    pub profile: Profile,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/profiles/{username}", get(get_profile))
        .route(
            "/api/profiles/{username}/follow",
            post(follow).delete(unfollow),
        )
}

async fn get_profile(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiPath(username): ApiPath<String>,
) -> AppResult<Json<ProfileBody>> {
    let profile = state.identity.profile(&cx, &username).await?;
    Ok(Json(ProfileBody { profile }))
}

async fn follow(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiPath(username): ApiPath<String>,
) -> AppResult<Json<ProfileBody>> {
    let profile = state.identity.follow(&cx, &username).await?;
    Ok(Json(ProfileBody { profile }))
}

async fn unfollow(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiPath(username): ApiPath<String>,
) -> AppResult<Json<ProfileBody>> {
    let profile = state.identity.unfollow(&cx, &username).await?;
    Ok(Json(ProfileBody { profile }))
}
