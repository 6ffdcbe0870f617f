//! src/services/upload_cache.rs
//!
//! UploadCache — durable upload history backed by SQLite. It knows nothing
//! about the network or the files themselves: callers hand it hashes, names
//! and URLs, and settle liveness checks through `mark_valid`/`mark_invalid`.
//!
//! Every statement is its own short transaction. Lock contention between
//! cooperating processes is absorbed by a bounded retry loop and surfaces as
//! `CacheError::Busy` once the retries run out.

use crate::models::{
    stats::{CacheStats, StatsRow},
    upload::{NewUpload, UploadRecord, UploadRow},
};
use chrono::Utc;
use futures::{StreamExt, stream::BoxStream};
use sqlx::{
    SqlitePool,
    migrate::{MigrateError, Migrator},
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::{future::Future, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument, warn};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const MAX_CONNECTIONS: u32 = 5;
// Kept short so contention is handled by `retry` with backoff rather than
// inside SQLite.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);
const SEARCH_LIMIT_MAX: i64 = 1000;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("upload record {0} not found")]
    NotFound(i64),
    #[error("cache database still busy after {attempts} attempts")]
    Busy { attempts: u32 },
    #[error("invalid cache data in `{0}`")]
    InvalidData(&'static str),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] MigrateError),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Outcome of a keyed lookup. The newest valid row for the key is preferred;
/// a tombstone is only returned when no valid row remains.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// No row carries the key.
    Miss,
    /// Every row for the key is a tombstone; this is the newest of them.
    Stale(UploadRecord),
    /// The newest valid row, whose URL still has to be probed. The caller
    /// must settle it with `mark_valid` or `mark_invalid`.
    Unverified(UploadRecord),
    /// The newest valid row, and no probe was requested.
    Hit(UploadRecord),
}

impl Lookup {
    fn from_latest(record: Option<UploadRecord>, verify_liveness: bool) -> Self {
        match record {
            None => Self::Miss,
            Some(record) if !record.is_valid => Self::Stale(record),
            Some(record) if verify_liveness => Self::Unverified(record),
            Some(record) => Self::Hit(record),
        }
    }

    /// The row the lookup landed on, whatever its state.
    pub fn record(&self) -> Option<&UploadRecord> {
        match self {
            Self::Miss => None,
            Self::Stale(record) | Self::Unverified(record) | Self::Hit(record) => Some(record),
        }
    }
}

/// How hard to push against a locked database before giving up.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(25),
        }
    }
}

/// Handle on the upload history database.
///
/// Opened once per process and released with [`UploadCache::close`].
#[derive(Clone, Debug)]
pub struct UploadCache {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl UploadCache {
    /// Open (creating if needed) the database at `database_url` and apply the
    /// schema.
    pub async fn open(database_url: &str, retry: RetryPolicy) -> CacheResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        Self::connect(options, MAX_CONNECTIONS, retry).await
    }

    /// In-memory database on a single connection; every test gets a fresh one.
    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> CacheResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options, 1, RetryPolicy::default()).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        max_connections: u32,
        retry: RetryPolicy,
    ) -> CacheResult<Self> {
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let cache = Self { pool, retry };
        cache.migrate().await?;
        Ok(cache)
    }

    #[instrument(skip(self))]
    async fn migrate(&self) -> CacheResult<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush planner statistics and close every pooled connection.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }

    /// Run `op` until it stops failing on lock contention.
    ///
    /// The delay doubles after every busy attempt. Non-contention errors are
    /// returned immediately.
    async fn retry<T, F, Fut>(&self, label: &'static str, mut op: F) -> CacheResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = sqlx::Result<T>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut delay = self.retry.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_busy(&err) => {
                    if attempt >= attempts {
                        return Err(CacheError::Busy { attempts: attempt });
                    }
                    warn!(label, attempt, ?delay, "cache database busy, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(CacheError::Storage(err)),
            }
        }
    }

    /// Newest valid record for `hash`, or the newest tombstone when none is
    /// valid. This is the dedup path: identical bytes
    /// under any name or path land here.
    pub async fn find_by_hash(&self, hash: &str, verify_liveness: bool) -> CacheResult<Lookup> {
        let pool = &self.pool;
        let row = self
            .retry("find_by_hash", move || {
                sqlx::query_as::<_, UploadRow>(include_str!("../../queries/latest_by_hash.sql"))
                    .bind(hash)
                    .fetch_optional(pool)
            })
            .await?;
        let record = row.map(UploadRecord::try_from).transpose()?;
        debug!(hash, found = record.is_some(), "looked up by content hash");
        Ok(Lookup::from_latest(record, verify_liveness))
    }

    /// Newest valid record uploaded under `name`, or the newest tombstone.
    pub async fn find_by_filename(&self, name: &str, verify_liveness: bool) -> CacheResult<Lookup> {
        let pool = &self.pool;
        let row = self
            .retry("find_by_filename", move || {
                sqlx::query_as::<_, UploadRow>(include_str!("../../queries/latest_by_filename.sql"))
                    .bind(name)
                    .fetch_optional(pool)
            })
            .await?;
        let record = row.map(UploadRecord::try_from).transpose()?;
        debug!(name, found = record.is_some(), "looked up by filename");
        Ok(Lookup::from_latest(record, verify_liveness))
    }

    /// Fetch a single record by id.
    pub async fn record(&self, id: i64) -> CacheResult<UploadRecord> {
        let pool = &self.pool;
        let row = self
            .retry("record", move || {
                sqlx::query_as::<_, UploadRow>(include_str!("../../queries/get_by_id.sql"))
                    .bind(id)
                    .fetch_optional(pool)
            })
            .await?;
        row.ok_or(CacheError::NotFound(id))?.try_into()
    }

    /// Append a fresh record. Existing rows with the same hash or name are
    /// left alone; the newest row wins at read time.
    #[instrument(skip(self, upload), fields(filename = %upload.filename))]
    pub async fn insert(&self, upload: &NewUpload) -> CacheResult<UploadRecord> {
        let size_bytes =
            i64::try_from(upload.size_bytes).map_err(|_| CacheError::InvalidData("size_bytes"))?;
        let metadata = upload
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|_| CacheError::InvalidData("metadata"))?;
        let metadata = metadata.as_deref();
        let pool = &self.pool;
        let row = self
            .retry("insert", move || {
                let now = Utc::now().timestamp_millis();
                sqlx::query_as::<_, UploadRow>(include_str!("../../queries/insert_upload.sql"))
                    .bind(upload.filename.as_str())
                    .bind(upload.content_hash.as_str())
                    .bind(upload.reference_url.as_str())
                    .bind(upload.source_path.as_str())
                    .bind(size_bytes)
                    .bind(now)
                    .bind(now)
                    .bind(now)
                    .bind(metadata)
                    .fetch_one(pool)
            })
            .await?;
        let record = UploadRecord::try_from(row)?;
        debug!(id = record.id, "recorded upload");
        Ok(record)
    }

    /// Refresh `last_verified_at` after a successful probe.
    pub async fn mark_valid(&self, id: i64) -> CacheResult<()> {
        self.touch(id, include_str!("../../queries/mark_valid.sql"), "mark_valid")
            .await
    }

    /// Tombstone a record whose URL failed its probe. The row is kept.
    pub async fn mark_invalid(&self, id: i64) -> CacheResult<()> {
        self.touch(id, include_str!("../../queries/mark_invalid.sql"), "mark_invalid")
            .await
    }

    async fn touch(&self, id: i64, sql: &'static str, label: &'static str) -> CacheResult<()> {
        let pool = &self.pool;
        let result = self
            .retry(label, move || {
                sqlx::query(sql)
                    .bind(Utc::now().timestamp_millis())
                    .bind(id)
                    .execute(pool)
            })
            .await?;
        if result.rows_affected() == 0 {
            return Err(CacheError::NotFound(id));
        }
        debug!(id, label, "updated verification state");
        Ok(())
    }

    /// Aggregate counters, computed in one statement so the totals agree with
    /// each other.
    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let pool = &self.pool;
        let row = self
            .retry("stats", move || {
                sqlx::query_as::<_, StatsRow>(include_str!("../../queries/stats.sql"))
                    .fetch_one(pool)
            })
            .await?;
        row.try_into()
    }

    /// Valid records with `id > after_id`, oldest id first.
    pub async fn valid_batch(&self, after_id: i64, limit: u32) -> CacheResult<Vec<UploadRecord>> {
        let pool = &self.pool;
        let rows = self
            .retry("valid_batch", move || {
                sqlx::query_as::<_, UploadRow>(include_str!("../../queries/valid_batch.sql"))
                    .bind(after_id)
                    .bind(i64::from(limit))
                    .fetch_all(pool)
            })
            .await?;
        rows.into_iter().map(UploadRecord::try_from).collect()
    }

    /// Valid records whose filename or source path contains `query`, newest
    /// first, at most `limit` of them.
    ///
    /// Rows are pulled lazily as the stream is polled; call again to restart.
    /// A `limit` of zero or less yields nothing.
    pub fn search(&self, query: &str, limit: i64) -> BoxStream<'_, CacheResult<UploadRecord>> {
        let pattern = format!("%{}%", escape_like(query));
        // SQLite reads a negative LIMIT as unbounded
        sqlx::query_as::<_, UploadRow>(include_str!("../../queries/search.sql"))
            .bind(pattern)
            .bind(limit.clamp(0, SEARCH_LIMIT_MAX))
            .fetch(&self.pool)
            .map(|row| row.map_err(storage_error).and_then(UploadRecord::try_from))
            .boxed()
    }
}

/// True when SQLite reported lock contention (`SQLITE_BUSY`, `SQLITE_LOCKED`
/// or one of their extended codes), or the pool could not hand out a
/// connection in time.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}

/// Classify a driver error that was not retried. Contention still reports as
/// `Busy` so callers see one error for a locked database.
fn storage_error(err: sqlx::Error) -> CacheError {
    if is_busy(&err) {
        CacheError::Busy { attempts: 1 }
    } else {
        CacheError::Storage(err)
    }
}

/// Escape `LIKE` wildcards so the query is matched literally.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
