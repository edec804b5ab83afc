use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use herald_core::error::AppError;
use herald_core::models::{Article, ExtractionTier, NewArticle};
use herald_core::traits::ArticleStore;

/// Repository for article persistence in PostgreSQL.
///
/// Articles are keyed by item id, so storing the same item twice is a no-op.
#[derive(Clone)]
pub struct ArticleRepository {
    pool: Pool<Postgres>,
}

impl ArticleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Insert an article. Returns false if one with the same item id exists.
    pub async fn save(&self, article: &NewArticle) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO articles
                (item_id, source, title, url, published_at, author, tags,
                 content, content_hash, tier, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (item_id) DO NOTHING
            "#,
        )
        .bind(&article.item_id)
        .bind(&article.source)
        .bind(&article.title)
        .bind(&article.url)
        .bind(article.published_at)
        .bind(&article.author)
        .bind(&article.tags)
        .bind(&article.content)
        .bind(&article.content_hash)
        .bind(article.tier.as_str())
        .bind(&article.metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<Article>, AppError> {
        let row = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT item_id, source, title, url, published_at, author, tags,
                   content, content_hash, tier, metadata, created_at
            FROM articles
            WHERE item_id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    /// Most recently stored articles, newest first, optionally for one source.
    pub async fn list_recent(
        &self,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Article>, AppError> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT item_id, source, title, url, published_at, author, tags,
                   content, content_hash, tier, metadata, created_at
            FROM articles
            WHERE $1::VARCHAR IS NULL OR source = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(source)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Article counts per source, largest first.
    pub async fn count_by_source(&self) -> Result<Vec<(String, i64)>, AppError> {
        sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT source, COUNT(*)
            FROM articles
            GROUP BY source
            ORDER BY COUNT(*) DESC, source
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

impl ArticleStore for ArticleRepository {
    async fn store(&self, article: &NewArticle) -> Result<(), AppError> {
        let inserted = self
            .save(article)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        if !inserted {
            tracing::debug!(item_id = %article.item_id, "Article already stored");
        }
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ArticleRow {
    item_id: String,
    source: String,
    title: String,
    url: String,
    published_at: Option<DateTime<Utc>>,
    author: Option<String>,
    tags: Vec<String>,
    content: String,
    content_hash: String,
    tier: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        let tier = row.tier.parse().unwrap_or_else(|_| {
            tracing::warn!(tier = %row.tier, item_id = %row.item_id, "Unknown stored tier");
            ExtractionTier::FeedFallback
        });
        Article {
            item_id: row.item_id,
            source: row.source,
            title: row.title,
            url: row.url,
            published_at: row.published_at,
            author: row.author,
            tags: row.tags,
            content: row.content,
            content_hash: row.content_hash,
            tier,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}
