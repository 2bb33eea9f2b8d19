//! SQLite-backed document store via SQLx.
//!
//! Documents are stored as JSON rows in a single `documents` table; filters
//! are evaluated after deserialization. Upsert and delete run inside a
//! transaction, which gives the per-document atomicity the contract asks
//! for without assuming anything across documents.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use super::{Document, Filter, Store};
use crate::error::StoreFault;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

const SELECT_COLLECTION: &str = r#"
    SELECT id, body
    FROM documents
    WHERE collection = ?
    ORDER BY id ASC
"#;

/// SQLite-backed [`Store`] with connection pooling.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    /// Serializes mutations: the rows a mutation matched must not go stale
    /// between the read and the delete+insert, or two concurrent upserts
    /// with the same filter can both insert.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SqliteStore {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open a store at `path`, running migrations if needed.
    ///
    /// Pass `":memory:"` for a private in-memory database.
    pub async fn new(path: &str) -> Result<Self, StoreFault> {
        let pool = if path == ":memory:" {
            // Use a uniquely named shared-cache memory database per call so
            // parallel tests never collide on the global `file::memory:` name.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:turnstile-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await
                .map_err(classify)?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create store directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await
                .map_err(classify)?
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreFault::Fatal(format!("migration failed: {e}")))?;

        // WAL lets reads proceed while a write is in progress.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await
            .map_err(classify)?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await
            .map_err(classify)?;

        info!(path = %path, "Document store connected");

        Ok(Self {
            pool,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load every row of a collection with its rowid, oldest first.
    async fn load(&self, collection: &str) -> Result<Vec<(i64, Document)>, StoreFault> {
        let rows = sqlx::query_as::<_, (i64, String)>(SELECT_COLLECTION)
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        decode_rows(rows)
    }
}

fn decode_rows(rows: Vec<(i64, String)>) -> Result<Vec<(i64, Document)>, StoreFault> {
    rows.into_iter()
        .map(|(id, body)| {
            serde_json::from_str(&body)
                .map(|doc| (id, doc))
                .map_err(|e| StoreFault::Fatal(format!("undecodable document {id}: {e}")))
        })
        .collect()
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreFault> {
        let rows = self.load(collection).await?;
        Ok(rows.into_iter().map(|(_, doc)| doc).find(|doc| filter.matches(doc)))
    }

    async fn find_all(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreFault> {
        let rows = self.load(collection).await?;
        Ok(rows
            .into_iter()
            .map(|(_, doc)| doc)
            .filter(|doc| filter.matches(doc))
            .collect())
    }

    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
    ) -> Result<bool, StoreFault> {
        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let rows = sqlx::query_as::<_, (i64, String)>(SELECT_COLLECTION)
            .bind(collection)
            .fetch_all(&mut *tx)
            .await
            .map_err(classify)?;
        let matching: Vec<i64> = decode_rows(rows)?
            .into_iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(id, _)| id)
            .collect();

        let body = document.to_string();
        for id in &matching {
            sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        sqlx::query("INSERT INTO documents (collection, body) VALUES (?, ?)")
            .bind(collection)
            .bind(&body)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(!matching.is_empty())
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, StoreFault> {
        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let rows = sqlx::query_as::<_, (i64, String)>(SELECT_COLLECTION)
            .bind(collection)
            .fetch_all(&mut *tx)
            .await
            .map_err(classify)?;
        let matching: Vec<i64> = decode_rows(rows)?
            .into_iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(id, _)| id)
            .collect();

        let mut removed = 0u64;
        for id in &matching {
            let result = sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
            removed += result.rows_affected();
        }
        tx.commit().await.map_err(classify)?;

        Ok(removed)
    }
}

/// Normalize SQLx errors into the closed fault taxonomy.
fn classify(err: sqlx::Error) -> StoreFault {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreFault::Transient(err.to_string()),
        sqlx::Error::Database(db) if db.message().contains("locked") => {
            StoreFault::Transient(err.to_string())
        }
        _ => StoreFault::Fatal(err.to_string()),
    }
}
