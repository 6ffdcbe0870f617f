//! Uploader capability: push a local file, get back its reference URL.

use async_trait::async_trait;
use std::{
    io,
    path::Path,
    process::{ExitStatus, Stdio},
};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to launch uploader `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("uploader exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("uploader output contained no URL")]
    MissingUrl,
}

/// Anything that can put a file in remote storage.
///
/// Implementations either return the final URL or fail; they never report
/// partial success.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<String, UploadError>;
}

/// Runs an external program with the file path as its last argument and
/// reads the reference URL from its stdout.
#[derive(Debug, Clone)]
pub struct CommandUploader {
    program: String,
    args: Vec<String>,
}

impl CommandUploader {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line into program and arguments.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Uploader for CommandUploader {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            // an interrupted run must not leave the upload going in the background
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| UploadError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(UploadError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let url = extract_url(&stdout).ok_or(UploadError::MissingUrl)?;
        debug!(%url, "uploader returned URL");
        Ok(url)
    }
}

/// Last `http(s)://` token printed, with surrounding quotes or brackets
/// stripped. Upload tools tend to log progress before the final URL, e.g.
/// `[SUCCESS] upload complete: https://...`.
fn extract_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .flat_map(|line| line.split_whitespace().rev())
        .map(|token| token.trim_matches(|c| matches!(c, '"' | '\'' | '<' | '>' | '(' | ')')))
        .find(|token| token.starts_with("https://") || token.starts_with("http://"))
        .map(str::to_string)
}
