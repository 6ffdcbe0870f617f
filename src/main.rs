use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod clients;
mod config;
mod errors;
#[cfg(test)]
mod fakes;
mod handlers;
mod models;
mod routes;
mod services;

use errors::{AppError, EXIT_STORAGE, EXIT_USAGE};
use services::upload_cache::UploadCache;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // --- Logging setup (stderr, so stdout only carries command output) ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // clap's own exit status would collide with the file-read code
    let args = match config::Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

async fn run(args: config::Args) -> Result<(), AppError> {
    let (cfg, command) = config::AppConfig::from_env_and_args(args)?;
    tracing::debug!("Starting upload-cache with config: {:?}", cfg);

    // Create parent directory if needed
    if let Some(db_path) = cfg.database_path() {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    AppError::new(
                        EXIT_STORAGE,
                        format!("cannot create {}: {err}", parent.display()),
                    )
                })?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let cache = UploadCache::open(&cfg.database_url, cfg.retry_policy()).await?;
    let result = routes::dispatch(&cfg, &cache, command).await;
    cache.close().await;
    result
}
