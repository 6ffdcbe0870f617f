//! Counting stand-ins for the uploader and the liveness probe.

use crate::clients::{
    probe::LivenessProbe,
    uploader::{UploadError, Uploader},
};
use async_trait::async_trait;
use std::{
    collections::HashSet,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Hands out `https://cdn.example.com/u{n}/{filename}` for the n-th call.
#[derive(Clone, Default)]
pub struct FakeUploader {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(UploadError::MissingUrl);
        }
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        Ok(format!("https://cdn.example.com/u{n}/{name}"))
    }
}

/// Every URL is alive unless it was passed to [`FakeProbe::kill`].
#[derive(Clone, Default)]
pub struct FakeProbe {
    dead: Arc<Mutex<HashSet<String>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl FakeProbe {
    pub fn alive() -> Self {
        Self::default()
    }

    /// Never answers within any sane timeout.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn kill(&self, url: &str) {
        self.dead.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl LivenessProbe for FakeProbe {
    async fn probe(&self, url: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        !self.dead.lock().unwrap().contains(url)
    }
}
