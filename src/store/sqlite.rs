use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, TransactionBehavior};

use super::{
    ArticleFilter, ArticleRepository, Deadline, FeedSource, Page, SocialGraph, StoreError,
    StoreResult, UserRepository,
};
use crate::db::models::{
    Article, ArticleChanges, FavoriteOverlay, NewArticle, NewUser, Profile, User, UserChanges,
};
use crate::state::DbPool;

type Conn = PooledConnection<SqliteConnectionManager>;

const USER_COLUMNS: &str = "id, username, email, password_hash, image, bio";

const ARTICLE_COLUMNS: &str = "id, slug, title, description, body, author_id, created_at, updated_at";

const ARTICLE_COLUMNS_A: &str =
    "a.id, a.slug, a.title, a.description, a.body, a.author_id, a.created_at, a.updated_at";

// ?1 tag, ?2 author username, ?3 favoriter username; NULL disables a filter.
const FILTERED_ARTICLES: &str = "FROM articles a
    JOIN users u ON u.id = a.author_id
    WHERE (?1 IS NULL OR EXISTS (
            SELECT 1 FROM tags t WHERE t.article_id = a.id AND t.name = ?1))
      AND (?2 IS NULL OR u.username = ?2)
      AND (?3 IS NULL OR EXISTS (
            SELECT 1 FROM favorites f JOIN users fu ON fu.id = f.user_id
            WHERE f.article_id = a.id AND fu.username = ?3))";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        image: row.get(4)?,
        bio: row.get(5)?,
    })
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        slug: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        body: row.get(4)?,
        author_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn viewer_param(viewer: Option<i64>) -> Value {
    viewer.map(Value::Integer).unwrap_or(Value::Null)
}

/// SQLite-backed store over an r2d2 pool.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn conn(&self, deadline: Deadline) -> StoreResult<Conn> {
        deadline.check()?;
        Ok(self.pool.get()?)
    }

    fn find_user(&self, deadline: Deadline, column: &str, value: &dyn rusqlite::ToSql)
        -> StoreResult<Option<User>> {
        let conn = self.conn(deadline)?;
        let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
        Ok(conn.query_row(&sql, [value], user_from_row).optional()?)
    }
}

#[async_trait]
impl UserRepository for SqliteStore {
    async fn insert_user(&self, deadline: Deadline, user: &NewUser) -> StoreResult<User> {
        let conn = self.conn(deadline)?;
        let sql = format!(
            "INSERT INTO users (username, email, password_hash) VALUES (?1, ?2, ?3) RETURNING {}",
            USER_COLUMNS
        );
        Ok(conn.query_row(
            &sql,
            params![user.username, user.email, user.password_hash],
            user_from_row,
        )?)
    }

    async fn update_user(
        &self,
        deadline: Deadline,
        id: i64,
        changes: &UserChanges,
    ) -> StoreResult<User> {
        let conn = self.conn(deadline)?;
        let sql = format!(
            "UPDATE users SET
                username = COALESCE(?2, username),
                email = COALESCE(?3, email),
                password_hash = COALESCE(?4, password_hash),
                image = COALESCE(?5, image),
                bio = COALESCE(?6, bio)
             WHERE id = ?1
             RETURNING {}",
            USER_COLUMNS
        );
        conn.query_row(
            &sql,
            params![
                id,
                changes.username,
                changes.email,
                changes.password_hash,
                changes.image,
                changes.bio
            ],
            user_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }

    async fn user_by_id(&self, deadline: Deadline, id: i64) -> StoreResult<Option<User>> {
        self.find_user(deadline, "id", &id)
    }

    async fn user_by_username(
        &self,
        deadline: Deadline,
        username: &str,
    ) -> StoreResult<Option<User>> {
        self.find_user(deadline, "username", &username)
    }

    async fn user_by_email(&self, deadline: Deadline, email: &str) -> StoreResult<Option<User>> {
        self.find_user(deadline, "email", &email)
    }
}

#[async_trait]
impl SocialGraph for SqliteStore {
    async fn follow(&self, deadline: Deadline, follower: i64, followee: i64) -> StoreResult<()> {
        let conn = self.conn(deadline)?;
        conn.execute(
            "INSERT INTO follows (follower_id, followee_id) VALUES (?1, ?2)
             ON CONFLICT (follower_id, followee_id) DO NOTHING",
            params![follower, followee],
        )?;
        Ok(())
    }

    async fn unfollow(&self, deadline: Deadline, follower: i64, followee: i64) -> StoreResult<()> {
        let conn = self.conn(deadline)?;
        conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower, followee],
        )?;
        Ok(())
    }

    async fn is_following(
        &self,
        deadline: Deadline,
        follower: i64,
        followee: i64,
    ) -> StoreResult<bool> {
        let conn = self.conn(deadline)?;
        Ok(conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2)",
            params![follower, followee],
            |row| row.get(0),
        )?)
    }

    async fn favorite(&self, deadline: Deadline, user: i64, article: i64) -> StoreResult<()> {
        let conn = self.conn(deadline)?;
        conn.execute(
            "INSERT INTO favorites (user_id, article_id) VALUES (?1, ?2)
             ON CONFLICT (user_id, article_id) DO NOTHING",
            params![user, article],
        )?;
        Ok(())
    }

    async fn unfavorite(&self, deadline: Deadline, user: i64, article: i64) -> StoreResult<()> {
        let conn = self.conn(deadline)?;
        conn.execute(
            "DELETE FROM favorites WHERE user_id = ?1 AND article_id = ?2",
            params![user, article],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ArticleRepository for SqliteStore {
    async fn create_article(
        &self,
        deadline: Deadline,
        article: &NewArticle,
    ) -> StoreResult<Article> {
        let mut conn = self.conn(deadline)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!(
            "INSERT INTO articles (slug, title, description, body, author_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             RETURNING {}",
            ARTICLE_COLUMNS
        );
        let created = tx.query_row(
            &sql,
            params![
                article.slug,
                article.title,
                article.description,
                article.body,
                article.author_id,
                article.created_at
            ],
            article_from_row,
        )?;

        {
            let mut stmt =
                tx.prepare("INSERT INTO tags (article_id, name, position) VALUES (?1, ?2, ?3)")?;
            for (position, name) in article.tags.iter().enumerate() {
                stmt.execute(params![created.id, name, position as i64])?;
            }
        }

        // Dropping `tx` on any early return above rolls everything back.
        tx.commit()?;
        Ok(created)
    }

    async fn find_article(&self, deadline: Deadline, slug: &str) -> StoreResult<Option<Article>> {
        let conn = self.conn(deadline)?;
        let sql = format!("SELECT {} FROM articles WHERE slug = ?1", ARTICLE_COLUMNS);
        Ok(conn
            .query_row(&sql, params![slug], article_from_row)
            .optional()?)
    }

    async fn update_article(
        &self,
        deadline: Deadline,
        id: i64,
        changes: &ArticleChanges,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Article> {
        let conn = self.conn(deadline)?;
        let sql = format!(
            "UPDATE articles SET
                title = COALESCE(?2, title),
                description = COALESCE(?3, description),
                body = COALESCE(?4, body),
                updated_at = ?5
             WHERE id = ?1
             RETURNING {}",
            ARTICLE_COLUMNS
        );
        conn.query_row(
            &sql,
            params![
                id,
                changes.title,
                changes.description,
                changes.body,
                updated_at
            ],
            article_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("article {}", id)))
    }

    async fn delete_article(&self, deadline: Deadline, id: i64) -> StoreResult<()> {
        let mut conn = self.conn(deadline)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM tags WHERE article_id = ?1", params![id])?;
        tx.execute("DELETE FROM favorites WHERE article_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("article {}", id)));
        }

        tx.commit()?;
        Ok(())
    }

    async fn all_tags(&self, deadline: Deadline) -> StoreResult<Vec<String>> {
        let conn = self.conn(deadline)?;
        let mut stmt = conn.prepare("SELECT DISTINCT name FROM tags ORDER BY name")?;
        let tags = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    async fn snapshot(&self, deadline: Deadline) -> StoreResult<Box<dyn FeedSource + Send>> {
        let conn = self.conn(deadline)?;
        Ok(Box::new(SqliteSnapshot::begin(conn, deadline)?))
    }
}

/// One pooled connection held inside a read transaction.
///
/// Every query issued through it observes the same database state; the
/// transaction ends when the snapshot is dropped.
pub struct SqliteSnapshot {
    conn: Conn,
    deadline: Deadline,
}

impl SqliteSnapshot {
    fn begin(conn: Conn, deadline: Deadline) -> StoreResult<Self> {
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Self { conn, deadline })
    }
}

impl Drop for SqliteSnapshot {
    fn drop(&mut self) {
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            tracing::warn!("Failed to close read snapshot: {}", e);
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!("Failed to roll back read snapshot: {}", e);
            }
        }
    }
}

impl FeedSource for SqliteSnapshot {
    fn article_by_slug(&self, slug: &str) -> StoreResult<Option<Article>> {
        self.deadline.check()?;
        let sql = format!("SELECT {} FROM articles WHERE slug = ?1", ARTICLE_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![slug], article_from_row)
            .optional()?)
    }

    fn count_matching(&self, filter: &ArticleFilter) -> StoreResult<u64> {
        self.deadline.check()?;
        let sql = format!("SELECT COUNT(*) {}", FILTERED_ARTICLES);
        let count: i64 = self.conn.query_row(
            &sql,
            params![filter.tag, filter.author, filter.favorited_by],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn page(&self, filter: &ArticleFilter, page: Page) -> StoreResult<Vec<Article>> {
        self.deadline.check()?;
        let sql = format!(
            "SELECT {} {} ORDER BY a.created_at DESC, a.id DESC LIMIT ?4 OFFSET ?5",
            ARTICLE_COLUMNS_A, FILTERED_ARTICLES
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let articles = stmt
            .query_map(
                params![
                    filter.tag,
                    filter.author,
                    filter.favorited_by,
                    page.limit,
                    page.offset
                ],
                article_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(articles)
    }

    fn tags_for(&self, article_ids: &[i64]) -> StoreResult<HashMap<i64, Vec<String>>> {
        self.deadline.check()?;
        let mut tags: HashMap<i64, Vec<String>> = HashMap::new();
        if article_ids.is_empty() {
            return Ok(tags);
        }

        let sql = format!(
            "SELECT article_id, name FROM tags WHERE article_id IN ({})
             ORDER BY article_id, position",
            placeholders(article_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(article_ids.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (article_id, name) = row?;
            tags.entry(article_id).or_default().push(name);
        }
        Ok(tags)
    }

    fn authors_for(
        &self,
        viewer: Option<i64>,
        author_ids: &[i64],
    ) -> StoreResult<HashMap<i64, Profile>> {
        self.deadline.check()?;
        if author_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT u.id, u.username, u.bio, u.image,
                    EXISTS (SELECT 1 FROM follows f WHERE f.follower_id = ? AND f.followee_id = u.id)
             FROM users u WHERE u.id IN ({})",
            placeholders(author_ids.len())
        );
        let values = std::iter::once(viewer_param(viewer))
            .chain(author_ids.iter().copied().map(Value::Integer));
        let mut stmt = self.conn.prepare(&sql)?;
        let profiles = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    Profile {
                        username: row.get(1)?,
                        bio: row.get(2)?,
                        image: row.get(3)?,
                        following: row.get(4)?,
                    },
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(profiles)
    }

    fn favorites_for(
        &self,
        viewer: Option<i64>,
        article_ids: &[i64],
    ) -> StoreResult<HashMap<i64, FavoriteOverlay>> {
        self.deadline.check()?;
        if article_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT article_id, COUNT(*), COALESCE(MAX(user_id = ?), 0)
             FROM favorites WHERE article_id IN ({})
             GROUP BY article_id",
            placeholders(article_ids.len())
        );
        let values = std::iter::once(viewer_param(viewer))
            .chain(article_ids.iter().copied().map(Value::Integer));
        let mut stmt = self.conn.prepare(&sql)?;
        let overlays = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    FavoriteOverlay {
                        count: row.get::<_, i64>(1)? as u64,
                        favorited: row.get(2)?,
                    },
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(overlays)
    }
}

#[cfg(test)]
pub(crate) fn test_store() -> (SqliteStore, tempfile::TempDir) {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let pool = crate::db::create_pool(&temp_dir.path().join("test.db")).unwrap();
    crate::db::run_migrations(&pool).unwrap();
    (SqliteStore::new(pool), temp_dir)
}
