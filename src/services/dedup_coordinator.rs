//! src/services/dedup_coordinator.rs
//!
//! DedupCoordinator — decides whether a file needs uploading. A request moves
//! through hashing, lookup, then either reuses the cached URL or uploads and
//! persists a fresh record. The record is only written after the uploader
//! has returned a URL, so an interrupted run leaves no partial row behind.

use crate::{
    clients::{
        probe::LivenessProbe,
        uploader::{UploadError, Uploader},
    },
    models::upload::{NewUpload, UploadRecord},
    services::{
        hashing::hash_file,
        revalidation::Revalidator,
        upload_cache::{CacheError, Lookup, UploadCache},
    },
};
use serde_json::Value;
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("cannot read `{}`: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("cannot import `{}`: {reason}", path.display())]
    Import { path: PathBuf, reason: String },
}

pub type DedupResult<T> = Result<T, DedupError>;

/// How a request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Identical content was already uploaded and its URL is still alive.
    Reused,
    /// A new upload was made because no live record matched.
    Uploaded {
        /// Record that matched by hash but whose URL turned out to be dead.
        replaced: Option<i64>,
        /// Record sharing the filename but holding different content.
        name_conflict: Option<i64>,
    },
    /// The caller bypassed dedup.
    Forced,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: UploadRecord,
    pub outcome: Outcome,
}

impl Resolution {
    pub fn url(&self) -> &str {
        &self.record.reference_url
    }
}

pub struct DedupCoordinator<'a, U, P> {
    cache: &'a UploadCache,
    uploader: U,
    revalidator: Revalidator<'a, P>,
}

impl<'a, U: Uploader, P: LivenessProbe> DedupCoordinator<'a, U, P> {
    pub fn new(cache: &'a UploadCache, uploader: U, probe: P, probe_timeout: Duration) -> Self {
        Self {
            cache,
            uploader,
            revalidator: Revalidator::new(cache, probe, probe_timeout),
        }
    }

    /// Return a reference URL for the file at `path`, uploading only when no
    /// live record holds the same content. `force` skips the lookup: the file
    /// is uploaded and recorded even when a duplicate exists.
    #[instrument(skip(self, path, metadata), fields(path = %path.display()))]
    pub async fn resolve(
        &self,
        path: &Path,
        force: bool,
        metadata: Option<Value>,
    ) -> DedupResult<Resolution> {
        let digest = hash_file(path)
            .await
            .map_err(|source| DedupError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        let filename = display_name(path);
        debug!(hash = %digest.hash, size = digest.size_bytes, "hashed file");

        let mut replaced = None;
        let mut name_conflict = None;
        if force {
            info!("forced upload, skipping dedup lookup");
        } else {
            match self.cache.find_by_hash(&digest.hash, true).await? {
                Lookup::Hit(record) => return Ok(Self::reuse(record)),
                Lookup::Unverified(record) => {
                    if self.revalidator.verify(&record).await? {
                        let record = self.cache.record(record.id).await?;
                        return Ok(Self::reuse(record));
                    }
                    replaced = Some(record.id);
                }
                Lookup::Stale(_) | Lookup::Miss => {
                    // Filename is informational only; a different hash is not a duplicate.
                    if let Some(other) = self.cache.find_by_filename(&filename, false).await?.record()
                    {
                        if other.content_hash != digest.hash {
                            info!(
                                other_id = other.id,
                                "same filename was uploaded before with different content"
                            );
                            name_conflict = Some(other.id);
                        }
                    }
                }
            }
        }

        let reference_url = self.uploader.upload(path).await?;
        let source_path = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        let record = self
            .cache
            .insert(&NewUpload {
                filename,
                reference_url,
                source_path: source_path.to_string_lossy().into_owned(),
                size_bytes: digest.size_bytes,
                content_hash: digest.hash,
                metadata,
            })
            .await?;
        info!(id = record.id, url = %record.reference_url, "uploaded and recorded");

        let outcome = if force {
            Outcome::Forced
        } else {
            Outcome::Uploaded {
                replaced,
                name_conflict,
            }
        };
        Ok(Resolution { record, outcome })
    }

    fn reuse(record: UploadRecord) -> Resolution {
        info!(id = record.id, url = %record.reference_url, "reusing existing upload");
        Resolution {
            record,
            outcome: Outcome::Reused,
        }
    }
}

/// Base name of `path`, falling back to the whole path when it has none.
fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
