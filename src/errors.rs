use crate::services::{dedup_coordinator::DedupError, upload_cache::CacheError};
use std::{fmt, process::ExitCode};

pub const EXIT_USAGE: u8 = 1;
pub const EXIT_FILE_READ: u8 = 2;
pub const EXIT_UPLOAD: u8 = 3;
pub const EXIT_STORAGE: u8 = 4;
pub const EXIT_STORAGE_BUSY: u8 = 5;
pub const EXIT_NOT_FOUND: u8 = 6;

/// A failed command: the message for stderr and the exit status for scripts.
#[derive(Debug)]
pub struct AppError {
    pub code: u8,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific exit code and message.
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for configuration and usage problems.
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<DedupError> for AppError {
    fn from(err: DedupError) -> Self {
        let code = match &err {
            DedupError::FileRead { .. } | DedupError::Import { .. } => EXIT_FILE_READ,
            DedupError::Upload(_) => EXIT_UPLOAD,
            DedupError::Cache(CacheError::Busy { .. }) => EXIT_STORAGE_BUSY,
            DedupError::Cache(CacheError::NotFound(_)) => EXIT_NOT_FOUND,
            DedupError::Cache(_) => EXIT_STORAGE,
        };
        AppError::new(code, err.to_string())
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        DedupError::from(err).into()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::usage(format!("{err:#}"))
    }
}
