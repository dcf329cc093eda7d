use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::catalog::{ArticleDraft, ArticleUpdate, ListQuery};
use crate::error::AppResult;
use crate::extractors::{ApiJson, ApiPath, ApiQuery, Session};
use crate::feed::{ArticleView, FeedPage};
use crate::state::AppState;

/// `{"article": ...}` in both directions.
#[derive(Debug, Deserialize, Serialize)]
pub struct ArticleBody<T> {
    pub article: T,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/articles", get(list_articles).post(create_article))
        .route(
            "/api/articles/{slug}",
            get(get_article).put(update_article).delete(delete_article),
        )
        .route(
            "/api/articles/{slug}/favorite",
            post(favorite).delete(unfavorite),
        )
}

async fn list_articles(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> AppResult<Json<FeedPage>> {
    let page = state.catalog.list_articles(&cx, query).await?;
    Ok(Json(page))
}

async fn create_article(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiJson(body): ApiJson<ArticleBody<ArticleDraft>>,
) -> AppResult<Json<ArticleBody<ArticleView>>> {
    let article = state.catalog.create_article(&cx, body.article).await?;
    Ok(Json(ArticleBody { article }))
}

async fn get_article(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiPath(slug): ApiPath<String>,
) -> AppResult<Json<ArticleBody<ArticleView>>> {
    let article = state.catalog.get_article(&cx, &slug).await?;
    Ok(Json(ArticleBody { article }))
}

async fn update_article(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiPath(slug): ApiPath<String>,
    ApiJson(body): ApiJson<ArticleBody<ArticleUpdate>>,
) -> AppResult<Json<ArticleBody<ArticleView>>> {
    let article = state.catalog.update_article(&cx, &slug, body.article).await?;
    Ok(Json(ArticleBody { article }))
}

async fn delete_article(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiPath(slug): ApiPath<String>,
) -> AppResult<Json<serde_json::Value>> {
    state.catalog.delete_article(&cx, &slug).await?;
    Ok(Json(serde_json::json!({})))
}

async fn favorite(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiPath(slug): ApiPath<String>,
) -> AppResult<Json<ArticleBody<ArticleView>>> {
    let article = state.catalog.favorite(&cx, &slug).await?;
    Ok(Json(ArticleBody { article }))
}

async fn unfavorite(
    State(state): State<AppState>,
    Session(cx): Session,
    ApiPath(slug): ApiPath<String>,
) -> AppResult<Json<ArticleBody<ArticleView>>> {
    let article = state.catalog.unfavorite(&cx, &slug).await?;
    Ok(Json(ArticleBody { article }))
}
