use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::info;

/// Ids handled by earlier runs, used for cross-run deduplication.
///
/// The pipeline reads a snapshot at run start and records the newly seen ids
/// at run end; persistence and locking belong to the implementation.
#[async_trait::async_trait]
pub trait RunHistory: Send + Sync {
    async fn prior_ids(&self, window: Duration) -> Result<HashSet<String>>;

    async fn record(&self, ids: &HashSet<String>, at: DateTime<Utc>) -> Result<()>;
}

/// History kept in process memory; forgotten when the process exits.
/// Entries older than the retention window are pruned on record.
pub struct MemoryRunHistory {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    retention: Duration,
}

impl MemoryRunHistory {
    pub fn new() -> Self {
        Self::with_retention(Duration::hours(48))
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Number of ids currently retained.
    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryRunHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunHistory for MemoryRunHistory {
    async fn prior_ids(&self, window: Duration) -> Result<HashSet<String>> {
        let cutoff = Utc::now() - window;
        let seen = self.seen.lock().await;
        Ok(seen
            .iter()
            .filter(|(_, at)| **at >= cutoff)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn record(&self, ids: &HashSet<String>, at: DateTime<Utc>) -> Result<()> {
        let mut seen = self.seen.lock().await;
        for id in ids {
            seen.insert(id.clone(), at);
        }

        let cutoff = at - self.retention;
        let before = seen.len();
        seen.retain(|_, seen_at| *seen_at >= cutoff);
        let pruned = before - seen.len();
        if pruned > 0 {
            info!(pruned, "pruned expired in-memory history entries");
        }
        Ok(())
    }
}

/// SQLite-backed history. Rows older than the retention window are pruned on record.
pub struct SqliteRunHistory {
    pool: SqlitePool,
    retention: Duration,
}

impl SqliteRunHistory {
    /// Wrap a pool, creating the schema if needed.
    pub async fn new(pool: SqlitePool, retention: Duration) -> Result<Self> {
        ensure_schema(&pool).await?;
        Ok(Self { pool, retention })
    }
}

/// Create the seen-articles table (CREATE TABLE IF NOT EXISTS ...)
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS seen_articles (
            article_id TEXT PRIMARY KEY,
            seen_at INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create seen_articles table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_seen_articles_seen_at ON seen_articles (seen_at)")
        .execute(pool)
        .await
        .context("failed to create seen_articles index")?;

    Ok(())
}

#[async_trait::async_trait]
impl RunHistory for SqliteRunHistory {
    async fn prior_ids(&self, window: Duration) -> Result<HashSet<String>> {
        let cutoff = (Utc::now() - window).timestamp();
        let rows = sqlx::query("SELECT article_id FROM seen_articles WHERE seen_at >= ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .context("failed to load prior article ids")?;

        Ok(rows.iter().map(|r| r.get::<String, _>("article_id")).collect())
    }

    async fn record(&self, ids: &HashSet<String>, at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin history transaction")?;

        for id in ids {
            // Re-seeing an article refreshes its timestamp
            sqlx::query("INSERT OR REPLACE INTO seen_articles (article_id, seen_at) VALUES (?, ?)")
                .bind(id)
                .bind(at.timestamp())
                .execute(&mut tx)
                .await
                .with_context(|| format!("failed to record article {}", id))?;
        }

        let pruned = sqlx::query("DELETE FROM seen_articles WHERE seen_at < ?")
            .bind((at - self.retention).timestamp())
            .execute(&mut tx)
            .await
            .context("failed to prune history")?
            .rows_affected();

        tx.commit().await.context("failed to commit history")?;
        info!(recorded = ids.len(), pruned, "run history updated");
        Ok(())
    }
}
