use crate::types::{Post, PostItem, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

/// SQLite-backed store shared between the poller (writes) and the serving
/// collaborator (reads). A cycle's items are inserted in one transaction so
/// the serving side never observes a partial batch.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn connect(path: &str) -> Result<Self> {
        info!("Opening database at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| crate::types::RelayError::General(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// In-memory database, used by tests.
    pub async fn in_memory() -> Result<Self> {
        debug!("Opening in-memory database");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS post (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                read_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS post_item (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                feed_title TEXT NOT NULL,
                content TEXT NOT NULL,
                memo_id TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_post(&self, id: &str, title: &str) -> Result<()> {
        sqlx::query("INSERT INTO post (id, title, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(title)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        debug!("Inserted post {} ({})", id, title);
        Ok(())
    }

    /// Insert a cycle's items all-or-nothing.
    pub async fn insert_post_items(&self, items: &[PostItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for item in items {
            sqlx::query(
                "INSERT INTO post_item (id, post_id, feed_title, content, memo_id) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&item.id)
            .bind(&item.post_id)
            .bind(&item.feed_title)
            .bind(&item.content)
            .bind(&item.memo_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Stored {} items", items.len());
        Ok(())
    }

    /// Record the reference a downstream note service returned for an item.
    pub async fn update_delivery_ref(&self, item_id: &str, delivery_ref: &str) -> Result<()> {
        sqlx::query("UPDATE post_item SET memo_id = ? WHERE id = ?")
            .bind(delivery_ref)
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn recent_posts(&self, limit: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            "SELECT id, title, created_at, read_at FROM post ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Post {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    created_at: row.try_get("created_at")?,
                    read_at: row.try_get("read_at")?,
                })
            })
            .collect()
    }

    pub async fn items_for_post(&self, post_id: &str) -> Result<Vec<PostItem>> {
        let rows = sqlx::query(
            "SELECT id, post_id, feed_title, content, memo_id FROM post_item WHERE post_id = ? ORDER BY id",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PostItem {
                    id: row.try_get("id")?,
                    post_id: row.try_get("post_id")?,
                    feed_title: row.try_get("feed_title")?,
                    content: row.try_get("content")?,
                    memo_id: row.try_get("memo_id")?,
                })
            })
            .collect()
    }

    pub async fn mark_post_read(&self, post_id: &str) -> Result<()> {
        sqlx::query("UPDATE post SET read_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
