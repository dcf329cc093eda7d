// Listing composition: count, page, then enrich the page in three bulk passes.
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::FeedConfig;
use crate::db::models::{Article, Profile};
use crate::store::{ArticleFilter, FeedSource, Page, StoreError, StoreResult};

/// An article as seen by one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub tag_list: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub favorited: bool,
    pub favorites_count: u64,
    pub author: Profile,
}

/// One page of a listing plus the total number of matches before paging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub articles: Vec<ArticleView>,
    pub articles_count: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FeedComposer {
    default_limit: u32,
    max_limit: u32,
}

impl FeedComposer {
    pub fn new(default_limit: u32, max_limit: u32) -> Self {
        let max_limit = max_limit.max(1);
        Self {
            default_limit: default_limit.clamp(1, max_limit),
            max_limit,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.default_limit, config.max_limit)
    }

    /// A zero limit means "use the default"; anything above the cap is clamped.
    pub fn page(&self, limit: u32, offset: u32) -> Page {
        let limit = match limit {
            0 => self.default_limit,
            n => n.min(self.max_limit),
        };
        Page { limit, offset }
    }

    pub fn compose(
        &self,
        source: &dyn FeedSource,
        filter: &ArticleFilter,
        page: Page,
        viewer: Option<i64>,
    ) -> StoreResult<FeedPage> {
        let total = source.count_matching(filter)?;
        if total == 0 {
            tracing::debug!(?filter, "No articles match");
            return Ok(FeedPage::default());
        }

        let articles = source.page(filter, page)?;
        tracing::debug!(
            ?filter,
            total,
            returned = articles.len(),
            limit = page.limit,
            offset = page.offset,
            "Composing feed page"
        );

        Ok(FeedPage {
            articles: enrich(source, articles, viewer)?,
            articles_count: total,
        })
    }

    /// Single-article path; runs the same three passes over a page of one.
    pub fn enrich_one(
        &self,
        source: &dyn FeedSource,
        article: Article,
        viewer: Option<i64>,
    ) -> StoreResult<ArticleView> {
        let slug = article.slug.clone();
        enrich(source, vec![article], viewer)?
            .pop()
            .ok_or_else(|| StoreError::Inconsistent(format!("article {} vanished", slug)))
    }
}

fn enrich(
    source: &dyn FeedSource,
    articles: Vec<Article>,
    viewer: Option<i64>,
) -> StoreResult<Vec<ArticleView>> {
    if articles.is_empty() {
        return Ok(Vec::new());
    }

    let article_ids: Vec<i64> = articles.iter().map(|a| a.id).collect();
    let mut seen = HashSet::new();
    let author_ids: Vec<i64> = articles
        .iter()
        .map(|a| a.author_id)
        .filter(|id| seen.insert(*id))
        .collect();

    let mut tags = source.tags_for(&article_ids)?;
    let authors = source.authors_for(viewer, &author_ids)?;
    let favorites = source.favorites_for(viewer, &article_ids)?;

    articles
        .into_iter()
        .map(|article| {
            let author = authors.get(&article.author_id).cloned().ok_or_else(|| {
                StoreError::Inconsistent(format!(
                    "author {} of article {} not found",
                    article.author_id, article.slug
                ))
            })?;
            let overlay = favorites.get(&article.id).copied().unwrap_or_default();

            Ok(ArticleView {
                tag_list: tags.remove(&article.id).unwrap_or_default(),
                favorited: overlay.favorited,
                favorites_count: overlay.count,
                author,
                slug: article.slug,
                title: article.title,
                description: article.description,
                body: article.body,
                created_at: article.created_at,
                updated_at: article.updated_at,
            })
        })
        .collect()
}
