//! Aggregate view over the upload history.

use super::upload::from_millis;
use crate::services::upload_cache::CacheError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters returned by `UploadCache::stats`.
///
/// `total_records == valid_records + invalid_records` for every snapshot.
/// Size and date range only consider valid records.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CacheStats {
    pub total_records: u64,
    pub valid_records: u64,
    pub invalid_records: u64,
    pub total_size_bytes: u64,
    pub earliest_upload: Option<DateTime<Utc>>,
    pub latest_upload: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct StatsRow {
    total_records: i64,
    valid_records: i64,
    invalid_records: i64,
    total_size_bytes: i64,
    earliest_upload: Option<i64>,
    latest_upload: Option<i64>,
}

impl TryFrom<StatsRow> for CacheStats {
    type Error = CacheError;

    fn try_from(row: StatsRow) -> Result<Self, Self::Error> {
        let count = |value: i64, field: &'static str| {
            u64::try_from(value).map_err(|_| CacheError::InvalidData(field))
        };
        Ok(Self {
            total_records: count(row.total_records, "total_records")?,
            valid_records: count(row.valid_records, "valid_records")?,
            invalid_records: count(row.invalid_records, "invalid_records")?,
            total_size_bytes: count(row.total_size_bytes, "total_size_bytes")?,
            earliest_upload: row
                .earliest_upload
                .map(|millis| from_millis(millis, "earliest_upload"))
                .transpose()?,
            latest_upload: row
                .latest_upload
                .map(|millis| from_millis(millis, "latest_upload"))
                .transpose()?,
        })
    }
}
