pub mod config;
pub mod locks;
pub mod schema;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use crate::db::config::DbConfig;
use crate::db::locks::{RecordGuard, RecordLocks};
use crate::db::schema::{split_sql_statements, SCHEMA_SQL, SCHEMA_VERSION};

/// Handle to the scheduler's SQLite database plus the in-process record
/// locks. Cheap to clone.
#[derive(Clone)]
pub struct ReviewStore {
    pool: SqlitePool,
    locks: Arc<RecordLocks>,
}

impl ReviewStore {
    pub async fn open(config: &DbConfig) -> Result<Self, DbInitError> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            locks: Arc::new(RecordLocks::new()),
        };
        store.migrate().await?;

        tracing::info!(path = %config.path.display(), "review store ready");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Exclusive in-process lock on one record. Always taken before
    /// [`ReviewStore::begin_write`], never after.
    pub async fn lock_record(&self, record_id: &str) -> RecordGuard {
        self.locks.acquire(record_id).await
    }

    /// Starts a transaction that already holds the database write lock.
    ///
    /// The first statement is a write, so SQLite takes the lock up front and
    /// waits out the busy timeout instead of failing a later read-to-write
    /// upgrade on a stale snapshot.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(r#"UPDATE "_db_metadata" SET "value" = "value" WHERE "key" = 'schema_version'"#)
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<(), DbInitError> {
        for statement in split_sql_statements(SCHEMA_SQL) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#,
        )
        .bind(SCHEMA_VERSION)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub fn format_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, sqlx::Error> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

/// Drops sub-millisecond precision so snapshots compare equal to what the
/// database hands back.
pub fn truncate_to_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value.timestamp_millis()).unwrap_or(value)
}
