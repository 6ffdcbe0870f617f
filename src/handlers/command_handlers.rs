//! Command handlers: wire the configured collaborators into the services and
//! print results. Human-readable output goes to stdout; logs go to stderr.

use crate::{
    clients::probe::HttpProbe,
    config::AppConfig,
    errors::AppError,
    models::upload::UploadRecord,
    services::{
        dedup_coordinator::DedupCoordinator,
        legacy_import,
        revalidation::Revalidator,
        upload_cache::UploadCache,
    },
};
use chrono::SecondsFormat;
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

fn http_probe(cfg: &AppConfig) -> Result<HttpProbe, AppError> {
    HttpProbe::new(cfg.probe_timeout)
        .map_err(|err| AppError::usage(format!("cannot build HTTP client: {err}")))
}

fn print_json(value: &impl Serialize) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::usage(format!("cannot render JSON: {err}")))?;
    println!("{text}");
    Ok(())
}

/// `resolve <path> [--force]` — prints the reference URL.
pub async fn resolve(
    cfg: &AppConfig,
    cache: &UploadCache,
    path: &Path,
    force: bool,
    metadata: Option<Value>,
) -> Result<(), AppError> {
    let uploader = cfg.command_uploader()?;
    let coordinator = DedupCoordinator::new(cache, uploader, http_probe(cfg)?, cfg.probe_timeout);
    let resolution = coordinator.resolve(path, force, metadata).await?;
    debug!(id = resolution.record.id, outcome = ?resolution.outcome, "resolved");
    println!("{}", resolution.url());
    Ok(())
}

pub async fn stats(cache: &UploadCache, json: bool) -> Result<(), AppError> {
    let stats = cache.stats().await?;
    if json {
        return print_json(&stats);
    }
    let date = |value: Option<chrono::DateTime<chrono::Utc>>| {
        value.map_or_else(
            || "-".to_string(),
            |d| d.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    };
    println!("total_records: {}", stats.total_records);
    println!("valid_records: {}", stats.valid_records);
    println!("invalid_records: {}", stats.invalid_records);
    println!("total_size_bytes: {}", stats.total_size_bytes);
    println!("earliest_upload: {}", date(stats.earliest_upload));
    println!("latest_upload: {}", date(stats.latest_upload));
    Ok(())
}

pub async fn search(
    cache: &UploadCache,
    query: &str,
    limit: i64,
    json: bool,
) -> Result<(), AppError> {
    let mut records = cache.search(query, limit);
    if json {
        let all: Vec<UploadRecord> = records.try_collect().await?;
        return print_json(&all);
    }
    while let Some(record) = records.try_next().await? {
        println!(
            "{}\t{}\t{}\t{}",
            record.id,
            record.uploaded_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            record.filename,
            record.reference_url
        );
    }
    Ok(())
}

pub async fn cleanup(cfg: &AppConfig, cache: &UploadCache, batch_size: u32) -> Result<(), AppError> {
    let revalidator = Revalidator::new(cache, http_probe(cfg)?, cfg.probe_timeout);
    let report = revalidator.cleanup(batch_size).await?;
    println!(
        "checked {} records, invalidated {}",
        report.checked, report.invalidated
    );
    Ok(())
}

pub async fn import(cache: &UploadCache, json_file: &Path, base_dir: &Path) -> Result<(), AppError> {
    let report = legacy_import::import_json(cache, json_file, base_dir).await?;
    println!(
        "imported {}, already recorded {}, skipped {}",
        report.imported, report.existing, report.skipped
    );
    Ok(())
}
