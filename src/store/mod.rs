// Persistence seams. Use cases only see these traits; `sqlite` is the one
// production implementation.
pub mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::models::{
    Article, ArticleChanges, FavoriteOverlay, NewArticle, NewUser, Profile, User, UserChanges,
};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(rusqlite::Error),

    #[error("Conflict on {field}: {message}")]
    Conflict { field: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Inconsistent read: {0}")]
    Inconsistent(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, Some(msg)) = &err {
            let unique = code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY;
            if unique {
                return StoreError::Conflict {
                    field: conflicting_column(msg),
                    message: "has already been taken".to_string(),
                };
            }
        }
        StoreError::Sql(err)
    }
}

/// `"UNIQUE constraint failed: users.email"` -> `"email"`.
fn conflicting_column(msg: &str) -> String {
    msg.rsplit(": ")
        .next()
        .and_then(|cols| cols.split(',').next())
        .and_then(|col| col.trim().rsplit('.').next())
        .filter(|col| !col.is_empty())
        .unwrap_or("body")
        .to_string()
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Point in time after which store calls fail fast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub fn check(&self) -> StoreResult<()> {
        match self.0 {
            Some(at) if Instant::now() >= at => Err(StoreError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Conjunctive listing filters. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleFilter {
    pub tag: Option<String>,
    pub author: Option<String>,
    pub favorited_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when username or email is taken.
    async fn insert_user(&self, deadline: Deadline, user: &NewUser) -> StoreResult<User>;

    async fn update_user(
        &self,
        deadline: Deadline,
        id: i64,
        changes: &UserChanges,
    ) -> StoreResult<User>;

    async fn user_by_id(&self, deadline: Deadline, id: i64) -> StoreResult<Option<User>>;

    async fn user_by_username(&self, deadline: Deadline, username: &str)
        -> StoreResult<Option<User>>;

    async fn user_by_email(&self, deadline: Deadline, email: &str) -> StoreResult<Option<User>>;
}

/// Directed follow edges and user -> article favorite edges.
///
/// Writes are idempotent: adding an existing edge or removing a missing one
/// succeeds without change.
#[async_trait]
pub trait SocialGraph: Send + Sync {
    async fn follow(&self, deadline: Deadline, follower: i64, followee: i64) -> StoreResult<()>;

    async fn unfollow(&self, deadline: Deadline, follower: i64, followee: i64)
        -> StoreResult<()>;

    async fn is_following(&self, deadline: Deadline, follower: i64, followee: i64)
        -> StoreResult<bool>;

    async fn favorite(&self, deadline: Deadline, user: i64, article: i64) -> StoreResult<()>;

    async fn unfavorite(&self, deadline: Deadline, user: i64, article: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait ArticleRepository: Send + Sync {
    /// Article row and its tag rows commit together or not at all.
    async fn create_article(&self, deadline: Deadline, article: &NewArticle)
        -> StoreResult<Article>;

    async fn find_article(&self, deadline: Deadline, slug: &str) -> StoreResult<Option<Article>>;

    async fn update_article(
        &self,
        deadline: Deadline,
        id: i64,
        changes: &ArticleChanges,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Article>;

    /// Removes the article with its tags and favorite edges in one transaction.
    async fn delete_article(&self, deadline: Deadline, id: i64) -> StoreResult<()>;

    async fn all_tags(&self, deadline: Deadline) -> StoreResult<Vec<String>>;

    /// Open a consistent read view for composing listings.
    async fn snapshot(&self, deadline: Deadline) -> StoreResult<Box<dyn FeedSource + Send>>;
}

/// Reads served from one point-in-time view of the store.
///
/// The batch lookups take the ids of a single page and answer with one query
/// each.
pub trait FeedSource {
    fn article_by_slug(&self, slug: &str) -> StoreResult<Option<Article>>;

    fn count_matching(&self, filter: &ArticleFilter) -> StoreResult<u64>;

    fn page(&self, filter: &ArticleFilter, page: Page) -> StoreResult<Vec<Article>>;

    fn tags_for(&self, article_ids: &[i64]) -> StoreResult<HashMap<i64, Vec<String>>>;

    fn authors_for(
        &self,
        viewer: Option<i64>,
        author_ids: &[i64],
    ) -> StoreResult<HashMap<i64, Profile>>;

    fn favorites_for(
        &self,
        viewer: Option<i64>,
        article_ids: &[i64],
    ) -> StoreResult<HashMap<i64, FavoriteOverlay>>;
}

pub trait Store: UserRepository + SocialGraph + ArticleRepository {}

impl<T> Store for T where T: UserRepository + SocialGraph + ArticleRepository {}

pub type DynStore = Arc<dyn Store>;
