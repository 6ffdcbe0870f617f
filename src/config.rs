use crate::{clients::uploader::CommandUploader, services::upload_cache::RetryPolicy};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::{env, path::PathBuf, time::Duration};

const DEFAULT_DATABASE_URL: &str = "sqlite://./upload_cache.db";
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BUSY_RETRIES: u32 = 5;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Uploader command line; only needed by `resolve`.
    pub uploader: Option<String>,
    pub probe_timeout: Duration,
    pub busy_retries: u32,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Content-addressed upload dedup cache")]
pub struct Args {
    /// Database URL (overrides UPLOAD_CACHE_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Uploader program and arguments; the file path is appended (overrides UPLOAD_CACHE_UPLOADER)
    #[arg(long, global = true)]
    pub uploader: Option<String>,

    /// Seconds to wait for a liveness probe (overrides UPLOAD_CACHE_PROBE_TIMEOUT_SECS)
    #[arg(long, global = true)]
    pub probe_timeout: Option<u64>,

    /// Attempts before giving up on a locked database (overrides UPLOAD_CACHE_BUSY_RETRIES)
    #[arg(long, global = true)]
    pub busy_retries: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print a reference URL for a file, uploading only if needed
    Resolve {
        path: PathBuf,
        /// Upload even if identical content is already recorded
        #[arg(long)]
        force: bool,
        /// JSON annotation stored with a new record
        #[arg(long, value_parser = parse_metadata)]
        metadata: Option<Value>,
    },
    /// Print aggregate statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// List valid records whose name or path contains QUERY, newest first
    Search {
        #[arg(default_value = "")]
        query: String,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// Probe every valid record and invalidate dead URLs
    Cleanup {
        #[arg(long, default_value_t = 100)]
        batch_size: u32,
    },
    /// Import a legacy `{ "<filename>": "<url>" }` JSON log
    Import {
        json_file: PathBuf,
        /// Directory holding the files named in the log
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
}

fn parse_metadata(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(raw)
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args(args: Args) -> Result<(Self, Command)> {
        Self::merge(args, |key| env::var(key).ok())
    }

    fn merge(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<(Self, Command)> {
        // --- Environment fallback ---
        let env_db = env("UPLOAD_CACHE_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into());
        let env_uploader = env("UPLOAD_CACHE_UPLOADER");
        let env_timeout = match env("UPLOAD_CACHE_PROBE_TIMEOUT_SECS") {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("parsing UPLOAD_CACHE_PROBE_TIMEOUT_SECS value `{}`", value))?,
            None => DEFAULT_PROBE_TIMEOUT_SECS,
        };
        let env_retries = match env("UPLOAD_CACHE_BUSY_RETRIES") {
            Some(value) => value
                .parse::<u32>()
                .with_context(|| format!("parsing UPLOAD_CACHE_BUSY_RETRIES value `{}`", value))?,
            None => DEFAULT_BUSY_RETRIES,
        };

        // --- Merge ---
        let cfg = Self {
            database_url: args.database_url.unwrap_or(env_db),
            uploader: args.uploader.or(env_uploader),
            probe_timeout: Duration::from_secs(args.probe_timeout.unwrap_or(env_timeout)),
            busy_retries: args.busy_retries.unwrap_or(env_retries),
        };

        Ok((cfg, args.command))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.busy_retries,
            ..RetryPolicy::default()
        }
    }

    pub fn command_uploader(&self) -> Result<CommandUploader> {
        self.uploader
            .as_deref()
            .and_then(CommandUploader::from_command_line)
            .ok_or_else(|| anyhow!("no uploader configured; set --uploader or UPLOAD_CACHE_UPLOADER"))
    }

    /// Local file behind `database_url`, if it names one.
    pub fn database_path(&self) -> Option<PathBuf> {
        let path = self
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .split('?')
            .next()
            .unwrap_or_default();
        if path.is_empty() || path == ":memory:" {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::HashMap;

    fn parse(argv: &[&str], env: &[(&str, &str)]) -> Result<(AppConfig, Command)> {
        let args = Args::try_parse_from(argv).unwrap();
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::merge(args, |key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let (cfg, command) = parse(&["upload-cache", "stats"], &[]).unwrap();
        assert_eq!(cfg.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(cfg.uploader, None);
        assert_eq!(cfg.probe_timeout, Duration::from_secs(5));
        assert_eq!(cfg.busy_retries, 5);
        assert_eq!(command, Command::Stats { json: false });
    }

    #[test]
    fn test_args_override_env() {
        let (cfg, _) = parse(
            &["upload-cache", "cleanup", "--database-url", "sqlite://cli.db", "--probe-timeout", "2"],
            &[
                ("UPLOAD_CACHE_DATABASE_URL", "sqlite://env.db"),
                ("UPLOAD_CACHE_PROBE_TIMEOUT_SECS", "9"),
                ("UPLOAD_CACHE_BUSY_RETRIES", "3"),
                ("UPLOAD_CACHE_UPLOADER", "fal-upload --quiet"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.database_url, "sqlite://cli.db");
        assert_eq!(cfg.probe_timeout, Duration::from_secs(2));
        assert_eq!(cfg.busy_retries, 3);
        assert!(cfg.command_uploader().is_ok());
    }

    #[test]
    fn test_bad_env_number_is_an_error() {
        let err = parse(
            &["upload-cache", "stats"],
            &[("UPLOAD_CACHE_PROBE_TIMEOUT_SECS", "soon")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("UPLOAD_CACHE_PROBE_TIMEOUT_SECS"));
    }

    #[test]
    fn test_resolve_arguments() {
        let (cfg, command) = parse(
            &["upload-cache", "resolve", "cat.png", "--force", "--metadata", r#"{"seed":3}"#],
            &[],
        )
        .unwrap();
        assert_eq!(
            command,
            Command::Resolve {
                path: PathBuf::from("cat.png"),
                force: true,
                metadata: Some(json!({"seed": 3})),
            }
        );
        assert!(cfg.command_uploader().is_err());
    }

    #[test]
    fn test_invalid_metadata_is_rejected() {
        assert!(Args::try_parse_from(["upload-cache", "resolve", "a.png", "--metadata", "{"]).is_err());
    }

    #[rstest]
    #[case("sqlite://./data/uploads.db", Some("./data/uploads.db"))]
    #[case("sqlite:uploads.db?mode=rwc", Some("uploads.db"))]
    #[case("sqlite::memory:", None)]
    fn test_database_path(#[case] url: &str, #[case] expected: Option<&str>) {
        let (cfg, _) = parse(&["upload-cache", "--database-url", url, "stats"], &[]).unwrap();
        assert_eq!(cfg.database_path(), expected.map(PathBuf::from));
    }
}
