//! Storage: the single embedded relational store plus a blob
//! directory. All mutating, multi-row operations run
//! inside one transaction; a process-wide write permit serializes writers
//! (and readers too — this is deliberately not a
//! readers/writer lock).
//!
//! Connection pooling is handled by `r2d2`/`r2d2_sqlite`.

use std::path::Path;

use anyhow::{Context as _, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tokio::sync::Mutex as AsyncMutex;

const SCHEMA: &str = include_str!("sql_schema.sql");
const CURRENT_DBVERSION: i64 = 1;

pub struct Sql {
    pool: Pool<SqliteConnectionManager>,
    /// Held for the duration of any operation that writes more than one
    /// row, so writers (and, by design, readers too) never interleave.
    write_permit: AsyncMutex<()>,
}

impl Sql {
    pub fn open(path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder().max_size(4).build(manager).context("opening database pool")?;
        let sql = Sql {
            pool,
            write_permit: AsyncMutex::new(()),
        };
        sql.migrate()?;
        Ok(sql)
    }

    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1) // a shared in-memory db only exists per-connection otherwise
            .build(manager)
            .context("opening in-memory database pool")?;
        let sql = Sql {
            pool,
            write_permit: AsyncMutex::new(()),
        };
        sql.migrate()?;
        Ok(sql)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.pool.get()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap_or(0);
        if version < CURRENT_DBVERSION {
            conn.execute_batch(SCHEMA).context("applying schema")?;
            conn.pragma_update(None, "user_version", CURRENT_DBVERSION)?;
        }
        Ok(())
    }

    /// Runs `f` against a pooled connection on a blocking thread, holding
    /// the write permit for its duration. Use for any operation that
    /// touches more than one row or otherwise needs transactional
    /// isolation from concurrent writers/readers.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.write_permit.lock().await;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .await
        .context("database task panicked")?
    }

    /// A single-statement read or write that doesn't need an explicit
    /// transaction (SQLite wraps it in an implicit one anyway). Still
    /// takes the write permit so readers observe a consistent order
    /// relative to in-flight transactions.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.write_permit.lock().await;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .context("database task panicked")?
    }

    pub async fn get_raw_config(&self, key: &str) -> Option<String> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM config WHERE key=?1", [&key], |row| row.get(0))
                .ok())
        })
        .await
        .unwrap_or(None)
    }

    pub async fn set_raw_config(&self, key: &str, value: Option<&str>) -> Result<()> {
        let key = key.to_string();
        let value = value.map(|v| v.to_string());
        self.with_conn(move |conn| {
            match &value {
                Some(v) => conn.execute(
                    "INSERT INTO config (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                    rusqlite::params![key, v],
                )?,
                None => conn.execute("DELETE FROM config WHERE key=?1", [key])?,
            };
            Ok(())
        })
        .await
    }
}
