//! Liveness policy: probe a record's reference URL and write the verdict back
//! to the cache.

use crate::{
    clients::probe::LivenessProbe,
    models::upload::UploadRecord,
    services::upload_cache::{CacheResult, UploadCache},
};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

/// Totals from a full cleanup sweep.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub checked: u64,
    pub invalidated: u64,
}

pub struct Revalidator<'a, P> {
    cache: &'a UploadCache,
    probe: P,
    probe_timeout: Duration,
}

impl<'a, P: LivenessProbe> Revalidator<'a, P> {
    pub fn new(cache: &'a UploadCache, probe: P, probe_timeout: Duration) -> Self {
        Self {
            cache,
            probe,
            probe_timeout,
        }
    }

    /// Probe `record.reference_url` and record the outcome: `mark_valid` when
    /// alive, `mark_invalid` otherwise. A probe that outlives the timeout is
    /// dead.
    pub async fn verify(&self, record: &UploadRecord) -> CacheResult<bool> {
        let alive = match timeout(self.probe_timeout, self.probe.probe(&record.reference_url)).await
        {
            Ok(alive) => alive,
            Err(_) => {
                debug!(id = record.id, url = %record.reference_url, "probe timed out");
                false
            }
        };
        if alive {
            self.cache.mark_valid(record.id).await?;
        } else {
            info!(id = record.id, url = %record.reference_url, "reference URL is dead, invalidating record");
            self.cache.mark_invalid(record.id).await?;
        }
        Ok(alive)
    }

    /// Verify every currently-valid record, `batch_size` at a time.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, batch_size: u32) -> CacheResult<CleanupReport> {
        let mut report = CleanupReport::default();
        let mut after_id = 0;
        loop {
            let batch = self.cache.valid_batch(after_id, batch_size.max(1)).await?;
            let Some(last) = batch.last() else {
                break;
            };
            after_id = last.id;
            for record in &batch {
                report.checked += 1;
                if !self.verify(record).await? {
                    report.invalidated += 1;
                }
            }
        }
        info!(
            checked = report.checked,
            invalidated = report.invalidated,
            "cleanup finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fakes::FakeProbe, models::upload::NewUpload};

    async fn seed(cache: &UploadCache, count: usize) -> Vec<UploadRecord> {
        let mut records = Vec::new();
        for i in 0..count {
            let record = cache
                .insert(&NewUpload {
                    filename: format!("{i}.png"),
                    reference_url: format!("https://cdn.example.com/{i}"),
                    source_path: format!("/tmp/{i}.png"),
                    size_bytes: 10,
                    content_hash: format!("{i:064x}"),
                    metadata: None,
                })
                .await
                .unwrap();
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_verify_alive_refreshes_timestamp() {
        let cache = UploadCache::open_in_memory().await.unwrap();
        let record = seed(&cache, 1).await.remove(0);
        let revalidator = Revalidator::new(&cache, FakeProbe::alive(), Duration::from_secs(1));

        assert!(revalidator.verify(&record).await.unwrap());
        let stored = cache.record(record.id).await.unwrap();
        assert!(stored.is_valid);
        assert!(stored.last_verified_at >= record.last_verified_at);
    }

    #[tokio::test]
    async fn test_verify_dead_tombstones() {
        let cache = UploadCache::open_in_memory().await.unwrap();
        let record = seed(&cache, 1).await.remove(0);
        let probe = FakeProbe::alive();
        probe.kill(&record.reference_url);
        let revalidator = Revalidator::new(&cache, probe, Duration::from_secs(1));

        assert!(!revalidator.verify(&record).await.unwrap());
        assert!(!cache.record(record.id).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_slow_probe_counts_as_dead() {
        let cache = UploadCache::open_in_memory().await.unwrap();
        let record = seed(&cache, 1).await.remove(0);
        let revalidator = Revalidator::new(
            &cache,
            FakeProbe::slow(Duration::from_secs(30)),
            Duration::from_millis(20),
        );

        assert!(!revalidator.verify(&record).await.unwrap());
        assert!(!cache.record(record.id).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_all_batches() {
        let cache = UploadCache::open_in_memory().await.unwrap();
        let records = seed(&cache, 5).await;
        cache.mark_invalid(records[0].id).await.unwrap();
        let probe = FakeProbe::alive();
        probe.kill(&records[2].reference_url);
        probe.kill(&records[4].reference_url);
        let calls = probe.calls();
        let revalidator = Revalidator::new(&cache, probe, Duration::from_secs(1));

        let report = revalidator.cleanup(2).await.unwrap();
        assert_eq!(
            report,
            CleanupReport {
                checked: 4,
                invalidated: 2
            }
        );
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 4);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.valid_records, 2);
        assert_eq!(stats.invalid_records, 3);
    }

    #[tokio::test]
    async fn test_cleanup_on_empty_cache() {
        let cache = UploadCache::open_in_memory().await.unwrap();
        let revalidator = Revalidator::new(&cache, FakeProbe::alive(), Duration::from_secs(1));
        assert_eq!(revalidator.cleanup(100).await.unwrap(), CleanupReport::default());
    }
}
