//! Represents one historical upload result recorded in the cache.

use crate::services::upload_cache::CacheError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A single row of upload history.
///
/// Everything except `last_verified_at`, `updated_at` and `is_valid` is fixed
/// when the record is created. Records are never deleted: a dead reference URL
/// turns the record into a tombstone (`is_valid = false`).
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct UploadRecord {
    /// Surrogate key assigned by the store, never reused.
    pub id: i64,

    /// Base name of the source file at upload time.
    pub filename: String,

    /// Hex-encoded SHA-256 of the uploaded bytes.
    pub content_hash: String,

    /// Opaque locator returned by the uploader.
    pub reference_url: String,

    /// Path the file was uploaded from. Advisory only.
    pub source_path: String,

    /// Byte length of the uploaded content.
    pub size_bytes: u64,

    pub uploaded_at: DateTime<Utc>,

    /// Last time `reference_url` was probed, successfully or not.
    pub last_verified_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// `false` once a liveness probe has failed. One-way.
    pub is_valid: bool,

    /// Caller-supplied annotation, passed through untouched.
    pub metadata: Option<Value>,
}

/// Fields supplied by the caller when recording a fresh upload.
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub filename: String,
    pub reference_url: String,
    pub source_path: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub metadata: Option<Value>,
}

/// Raw `uploads` row as SQLite hands it back.
#[derive(sqlx::FromRow)]
pub(crate) struct UploadRow {
    id: i64,
    filename: String,
    content_hash: String,
    reference_url: String,
    source_path: String,
    size_bytes: i64,
    uploaded_at: i64,
    last_verified_at: i64,
    updated_at: i64,
    is_valid: bool,
    metadata: Option<String>,
}

pub(crate) fn from_millis(millis: i64, field: &'static str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or(CacheError::InvalidData(field))
}

impl TryFrom<UploadRow> for UploadRecord {
    type Error = CacheError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        let metadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|_| CacheError::InvalidData("metadata"))?;
        Ok(Self {
            id: row.id,
            filename: row.filename,
            content_hash: row.content_hash,
            reference_url: row.reference_url,
            source_path: row.source_path,
            size_bytes: u64::try_from(row.size_bytes)
                .map_err(|_| CacheError::InvalidData("size_bytes"))?,
            uploaded_at: from_millis(row.uploaded_at, "uploaded_at")?,
            last_verified_at: from_millis(row.last_verified_at, "last_verified_at")?,
            updated_at: from_millis(row.updated_at, "updated_at")?,
            is_valid: row.is_valid,
            metadata,
        })
    }
}
