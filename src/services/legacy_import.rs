//! Import of the legacy `{ "<filename>": "<url>" }` JSON upload log.
//!
//! The old log only knew names and URLs. Each entry is matched to a file
//! under a base directory so the imported record carries a real content hash;
//! entries whose file is gone are skipped.

use crate::{
    models::upload::NewUpload,
    services::{
        dedup_coordinator::{DedupError, DedupResult},
        hashing::hash_file,
        upload_cache::{Lookup, UploadCache},
    },
};
use serde::Serialize;
use serde_json::json;
use std::{collections::BTreeMap, path::Path};
use tracing::{debug, info, instrument, warn};

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: u64,
    /// Entries whose filename is already in the cache.
    pub existing: u64,
    /// Entries with no readable file under the base directory.
    pub skipped: u64,
}

#[instrument(skip(cache))]
pub async fn import_json(
    cache: &UploadCache,
    json_path: &Path,
    base_dir: &Path,
) -> DedupResult<ImportReport> {
    let raw = tokio::fs::read_to_string(json_path)
        .await
        .map_err(|source| DedupError::FileRead {
            path: json_path.to_path_buf(),
            source,
        })?;
    let entries: BTreeMap<String, String> =
        serde_json::from_str(&raw).map_err(|err| DedupError::Import {
            path: json_path.to_path_buf(),
            reason: err.to_string(),
        })?;

    let mut report = ImportReport::default();
    for (filename, url) in entries {
        if cache.find_by_filename(&filename, false).await? != Lookup::Miss {
            debug!(%filename, "already recorded");
            report.existing += 1;
            continue;
        }
        let path = base_dir.join(&filename);
        let digest = match hash_file(&path).await {
            Ok(digest) => digest,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping entry without a readable file");
                report.skipped += 1;
                continue;
            }
        };
        cache
            .insert(&NewUpload {
                filename,
                reference_url: url,
                source_path: path.to_string_lossy().into_owned(),
                size_bytes: digest.size_bytes,
                content_hash: digest.hash,
                metadata: Some(json!({ "imported_from": json_path.to_string_lossy() })),
            })
            .await?;
        report.imported += 1;
    }
    info!(
        imported = report.imported,
        existing = report.existing,
        skipped = report.skipped,
        "legacy import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_import_hashes_present_files() {
        let cache = UploadCache::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.png"), b"hello").await.unwrap();
        tokio::fs::write(dir.path().join("b.png"), b"bytes").await.unwrap();
        let log = dir.path().join("uploads.json");
        tokio::fs::write(
            &log,
            r#"{
                "a.png": "https://cdn.example.com/a.png",
                "b.png": "https://cdn.example.com/b.png",
                "gone.png": "https://cdn.example.com/gone.png"
            }"#,
        )
        .await
        .unwrap();

        let report = import_json(&cache, &log, dir.path()).await.unwrap();
        assert_eq!(
            report,
            ImportReport {
                imported: 2,
                existing: 0,
                skipped: 1
            }
        );

        let Lookup::Hit(record) = cache
            .find_by_hash(
                "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
                false,
            )
            .await
            .unwrap()
        else {
            panic!("imported record should be found by hash");
        };
        assert_eq!(record.reference_url, "https://cdn.example.com/a.png");

        // running it again finds everything already recorded
        let rerun = import_json(&cache, &log, dir.path()).await.unwrap();
        assert_eq!(rerun.imported, 0);
        assert_eq!(rerun.existing, 2);
        assert_eq!(rerun.skipped, 1);
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_json() {
        let cache = UploadCache::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("uploads.json");
        tokio::fs::write(&log, "[1, 2, 3]").await.unwrap();

        let err = import_json(&cache, &log, dir.path()).await.unwrap_err();
        assert!(matches!(err, DedupError::Import { .. }));
    }

    #[tokio::test]
    async fn test_import_missing_log_is_file_read_error() {
        let cache = UploadCache::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = import_json(&cache, &dir.path().join("nope.json"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::FileRead { .. }));
    }
}
