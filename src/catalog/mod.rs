// Articles, tags and favorites.
use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::auth::{Identity, SessionContext};
use crate::config::OwnershipPolicy;
use crate::db::models::{non_empty, Article, ArticleChanges, NewArticle};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::feed::{ArticleView, FeedComposer, FeedPage};
use crate::store::{
    ArticleFilter, ArticleRepository, Deadline, DynStore, FeedSource, SocialGraph,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tag_list: Vec<String>,
}

/// Partial article edit. Empty strings leave the stored value alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub tag: Option<String>,
    pub author: Option<String>,
    pub favorited: Option<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

/// Hex md5 of the title followed by the creation instant.
pub fn derive_slug(title: &str, created_at: DateTime<Utc>) -> String {
    let seed = format!(
        "{}{}",
        title,
        created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    );
    format!("{:x}", md5::compute(seed.as_bytes()))
}

/// Trims names, drops blanks and keeps the first occurrence of each tag.
fn unique_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

pub struct CatalogService {
    store: DynStore,
    composer: FeedComposer,
    ownership: OwnershipPolicy,
}

impl CatalogService {
    pub fn new(store: DynStore, composer: FeedComposer, ownership: OwnershipPolicy) -> Self {
        Self {
            store,
            composer,
            ownership,
        }
    }

    pub async fn create_article(
        &self,
        cx: &SessionContext,
        draft: ArticleDraft,
    ) -> AppResult<ArticleView> {
        let identity = cx.require_identity()?;

        let mut errors = FieldErrors::default();
        if draft.title.trim().is_empty() {
            errors.add("title", "can't be blank");
        }
        if draft.description.trim().is_empty() {
            errors.add("description", "can't be blank");
        }
        if draft.body.trim().is_empty() {
            errors.add("body", "can't be blank");
        }
        errors.into_result()?;

        let created_at = Utc::now();
        let article = self
            .store
            .create_article(
                cx.deadline(),
                &NewArticle {
                    slug: derive_slug(&draft.title, created_at),
                    title: draft.title,
                    description: draft.description,
                    body: draft.body,
                    author_id: identity.user_id,
                    tags: unique_tags(draft.tag_list),
                    created_at,
                },
            )
            .await?;

        tracing::info!(slug = %article.slug, author_id = identity.user_id, "Created article");
        self.view(cx, article).await
    }

    pub async fn get_article(&self, cx: &SessionContext, slug: &str) -> AppResult<ArticleView> {
        let snapshot = self.store.snapshot(cx.deadline()).await?;
        let article = snapshot
            .article_by_slug(slug)?
            .ok_or_else(|| article_not_found(slug))?;
        Ok(self
            .composer
            .enrich_one(snapshot.as_ref(), article, cx.viewer_id())?)
    }

    /// The slug never changes, even when the title does.
    pub async fn update_article(
        &self,
        cx: &SessionContext,
        slug: &str,
        update: ArticleUpdate,
    ) -> AppResult<ArticleView> {
        let identity = cx.require_identity()?;
        let article = self.find_for_edit(cx, identity, slug).await?;

        let changes = ArticleChanges {
            title: non_empty(update.title),
            description: non_empty(update.description),
            body: non_empty(update.body),
        };
        let article = if changes.is_empty() {
            article
        } else {
            self.store
                .update_article(cx.deadline(), article.id, &changes, Utc::now())
                .await?
        };

        self.view(cx, article).await
    }

    pub async fn delete_article(&self, cx: &SessionContext, slug: &str) -> AppResult<()> {
        let identity = cx.require_identity()?;
        let article = self.find_for_edit(cx, identity, slug).await?;

        self.store.delete_article(cx.deadline(), article.id).await?;
        tracing::info!(slug = %article.slug, user_id = identity.user_id, "Deleted article");
        Ok(())
    }

    pub async fn favorite(&self, cx: &SessionContext, slug: &str) -> AppResult<ArticleView> {
        let identity = cx.require_identity()?;
        let article = self.find(cx, slug).await?;

        self.store
            .favorite(cx.deadline(), identity.user_id, article.id)
            .await?;
        self.view(cx, article).await
    }

    pub async fn unfavorite(&self, cx: &SessionContext, slug: &str) -> AppResult<ArticleView> {
        let identity = cx.require_identity()?;
        let article = self.find(cx, slug).await?;

        self.store
            .unfavorite(cx.deadline(), identity.user_id, article.id)
            .await?;
        self.view(cx, article).await
    }

    pub async fn list_articles(&self, cx: &SessionContext, query: ListQuery) -> AppResult<FeedPage> {
        let filter = ArticleFilter {
            tag: non_empty(query.tag),
            author: non_empty(query.author),
            favorited_by: non_empty(query.favorited),
        };
        let page = self.composer.page(query.limit, query.offset);

        let snapshot = self.store.snapshot(cx.deadline()).await?;
        Ok(self
            .composer
            .compose(snapshot.as_ref(), &filter, page, cx.viewer_id())?)
    }

    pub async fn list_tags(&self, cx: &SessionContext) -> AppResult<Vec<String>> {
        Ok(self.store.all_tags(cx.deadline()).await?)
    }

    async fn find(&self, cx: &SessionContext, slug: &str) -> AppResult<Article> {
        if slug.is_empty() {
            return Err(AppError::validation("slug", "can't be blank"));
        }
        self.store
            .find_article(cx.deadline(), slug)
            .await?
            .ok_or_else(|| article_not_found(slug))
    }

    async fn find_for_edit(
        &self,
        cx: &SessionContext,
        identity: &Identity,
        slug: &str,
    ) -> AppResult<Article> {
        let article = self.find(cx, slug).await?;
        match self.ownership {
            OwnershipPolicy::AnyUser => Ok(article),
            OwnershipPolicy::AuthorOnly if article.author_id == identity.user_id => Ok(article),
            OwnershipPolicy::AuthorOnly => {
                tracing::debug!(
                    slug,
                    user_id = identity.user_id,
                    "Rejected edit by non-author"
                );
                Err(AppError::Forbidden(
                    "only the author may modify this article".into(),
                ))
            }
        }
    }

    /// Enrichment after a committed write ignores the request deadline, so
    /// the caller never sees a failure for a change that already happened.
    async fn view(&self, cx: &SessionContext, article: Article) -> AppResult<ArticleView> {
        let snapshot = self.store.snapshot(Deadline::none()).await?;
        Ok(self
            .composer
            .enrich_one(snapshot.as_ref(), article, cx.viewer_id())?)
    }
}

fn article_not_found(slug: &str) -> AppError {
    AppError::NotFound(format!("article {} not found", slug))
}
