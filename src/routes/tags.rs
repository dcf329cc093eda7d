use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::AppResult;
use crate::extractors::Session;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TagsBody {
    pub tags: Vec<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/tags", get(list_tags))
}

async fn list_tags(
    State(state): State<AppState>,
    Session(cx): Session,
) -> AppResult<Json<TagsBody>> {
    let tags = state.catalog.list_tags(&cx).await?;
    Ok(Json(TagsBody { tags }))
}
