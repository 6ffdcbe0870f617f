//! Liveness probe for reference URLs.

use async_trait::async_trait;
use reqwest::{Client, redirect::Policy};
use std::time::Duration;
use tracing::debug;

const MAX_REDIRECTS: usize = 10;

/// Answers "does this URL still resolve?".
///
/// Probing is best effort: every failure, including timeouts, is `false`.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

/// Issues an HTTP `HEAD` request; any 2xx after redirects counts as alive.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(url, %status, "probed reference URL");
                status.is_success()
            }
            Err(err) => {
                debug!(url, error = %err, "probe failed");
                false
            }
        }
    }
}
