//! Routes each subcommand to its handler.
//!
//! - `resolve <path> [--force] [--metadata <json>]`
//! - `stats [--json]`
//! - `search [query] [--limit N] [--json]`
//! - `cleanup [--batch-size N]`
//! - `import <json> [--base-dir DIR]`

use crate::{
    config::{AppConfig, Command},
    errors::AppError,
    handlers::command_handlers,
    services::upload_cache::UploadCache,
};

pub async fn dispatch(cfg: &AppConfig, cache: &UploadCache, command: Command) -> Result<(), AppError> {
    match command {
        Command::Resolve {
            path,
            force,
            metadata,
        } => command_handlers::resolve(cfg, cache, &path, force, metadata).await,
        Command::Stats { json } => command_handlers::stats(cache, json).await,
        Command::Search { query, limit, json } => {
            command_handlers::search(cache, &query, limit, json).await
        }
        Command::Cleanup { batch_size } => command_handlers::cleanup(cfg, cache, batch_size).await,
        Command::Import {
            json_file,
            base_dir,
        } => command_handlers::import(cache, &json_file, &base_dir).await,
    }
}
