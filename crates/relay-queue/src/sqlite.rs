//! `SQLite` [`KeyValueStore`] over an `r2d2` connection pool.
//!
//! Lists live in `kv_lists` ordered by an autoincrement sequence, plain values
//! in `kv_values`, and deadlines (wall-clock epoch ms) in `kv_expiry`. Every
//! operation runs on the blocking pool; `pop_front` takes an `IMMEDIATE`
//! transaction so two pools on the same file cannot pop the same row.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use relay_core::StorageError;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use crate::kv::{KeyValueStore, KvResult};

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv_lists (
    seq   INTEGER PRIMARY KEY AUTOINCREMENT,
    key   TEXT NOT NULL,
    value TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_kv_lists_key_seq ON kv_lists(key, seq);
CREATE TABLE IF NOT EXISTS kv_values (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS kv_expiry (
    key           TEXT PRIMARY KEY,
    expires_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_kv_expiry_at ON kv_expiry(expires_at_ms);
";

/// Configuration for the connection pool.
#[derive(Clone, Debug)]
pub struct SqliteConfig {
    /// Maximum pool size (default: 4).
    pub pool_size: u32,
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            busy_timeout_ms: 5000,
        }
    }
}

/// `SQLite` pragma customizer that runs on each new connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))?;
        Ok(())
    }
}

fn storage_err(context: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::new(format!("{context}: {err}"))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn deadline_ms(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

/// Durable store in a single `SQLite` database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: &Path, config: &SqliteConfig) -> KvResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| storage_err("create data dir", e))?;
        }
        debug!(?path, "opening sqlite store");
        Self::from_manager(SqliteConnectionManager::file(path), config.pool_size, config)
    }

    /// Private in-memory database.
    ///
    /// Each `SQLite` memory connection is its own database, so the pool is
    /// pinned to a single connection.
    pub fn in_memory() -> KvResult<Self> {
        let config = SqliteConfig::default();
        Self::from_manager(SqliteConnectionManager::memory(), 1, &config)
    }

    fn from_manager(
        manager: SqliteConnectionManager,
        pool_size: u32,
        config: &SqliteConfig,
    ) -> KvResult<Self> {
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(manager)
            .map_err(|e| storage_err("connection pool", e))?;
        let conn = pool.get().map_err(|e| storage_err("connection pool", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| storage_err("create schema", e))?;
        Ok(Self { pool })
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> KvResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| storage_err("connection pool", e))?;
            f(&mut conn).map_err(|e| storage_err("sqlite", e))
        })
        .await
        .map_err(|e| storage_err("blocking task", e))?
    }
}

/// Delete every trace of `key` if its deadline has passed.
fn evict_if_expired(conn: &Connection, key: &str) -> rusqlite::Result<()> {
    let expired: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM kv_expiry WHERE key = ?1 AND expires_at_ms <= ?2",
            params![key, now_ms()],
            |row| row.get(0),
        )
        .optional()?;
    if expired.is_some() {
        let _ = delete_key(conn, key)?;
    }
    Ok(())
}

fn delete_key(conn: &Connection, key: &str) -> rusqlite::Result<usize> {
    let lists = conn.execute("DELETE FROM kv_lists WHERE key = ?1", params![key])?;
    let values = conn.execute("DELETE FROM kv_values WHERE key = ?1", params![key])?;
    let _ = conn.execute("DELETE FROM kv_expiry WHERE key = ?1", params![key])?;
    Ok(lists + values)
}

fn set_deadline(conn: &Connection, key: &str, ttl: Option<Duration>) -> rusqlite::Result<()> {
    match ttl {
        Some(ttl) => {
            let _ = conn.execute(
                "INSERT INTO kv_expiry (key, expires_at_ms) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET expires_at_ms = excluded.expires_at_ms",
                params![key, deadline_ms(ttl)],
            )?;
        }
        None => {
            let _ = conn.execute("DELETE FROM kv_expiry WHERE key = ?1", params![key])?;
        }
    }
    Ok(())
}

fn key_exists(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM kv_lists WHERE key = ?1)
             OR EXISTS(SELECT 1 FROM kv_values WHERE key = ?1)",
        params![key],
        |row| row.get(0),
    )
}

fn count_list(conn: &Connection, key: &str) -> rusqlite::Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM kv_lists WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(n).unwrap_or(0))
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn push_back(&self, key: &str, value: String, ttl: Option<Duration>) -> KvResult<usize> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            evict_if_expired(&tx, &key)?;
            let _ = tx.execute(
                "INSERT INTO kv_lists (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            if ttl.is_some() {
                set_deadline(&tx, &key, ttl)?;
            }
            let len = count_list(&tx, &key)?;
            tx.commit()?;
            Ok(len)
        })
        .await
    }

    async fn pop_front(&self, key: &str) -> KvResult<Option<String>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            evict_if_expired(&tx, &key)?;
            let head: Option<(i64, String)> = tx
                .query_row(
                    "SELECT seq, value FROM kv_lists WHERE key = ?1 ORDER BY seq LIMIT 1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((seq, value)) = head else {
                tx.commit()?;
                return Ok(None);
            };
            let _ = tx.execute("DELETE FROM kv_lists WHERE seq = ?1", params![seq])?;
            if count_list(&tx, &key)? == 0 {
                let _ = tx.execute("DELETE FROM kv_expiry WHERE key = ?1", params![key])?;
            }
            tx.commit()?;
            Ok(Some(value))
        })
        .await
    }

    async fn list_len(&self, key: &str) -> KvResult<usize> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            evict_if_expired(conn, &key)?;
            count_list(conn, &key)
        })
        .await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> KvResult<()> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let _ = tx.execute(
                "INSERT INTO kv_values (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            set_deadline(&tx, &key, ttl)?;
            tx.commit()
        })
        .await
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            evict_if_expired(conn, &key)?;
            conn.query_row(
                "SELECT value FROM kv_values WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn take(&self, key: &str) -> KvResult<Option<String>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            evict_if_expired(&tx, &key)?;
            let value: Option<String> = tx
                .query_row(
                    "SELECT value FROM kv_values WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            if value.is_some() {
                let _ = delete_key(&tx, &key)?;
            }
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            evict_if_expired(&tx, &key)?;
            let removed = delete_key(&tx, &key)?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            evict_if_expired(&tx, &key)?;
            let exists = key_exists(&tx, &key)?;
            if exists {
                set_deadline(&tx, &key, Some(ttl))?;
            }
            tx.commit()?;
            Ok(exists)
        })
        .await
    }

    async fn purge_expired(&self) -> KvResult<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let now = now_ms();
            let keys: Vec<String> = {
                let mut stmt = tx.prepare("SELECT key FROM kv_expiry WHERE expires_at_ms <= ?1")?;
                let rows = stmt.query_map(params![now], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            for key in &keys {
                let _ = delete_key(&tx, key)?;
            }
            tx.commit()?;
            Ok(keys.len())
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
