//! devimg-sync — syncs a local image asset cache against the Meshtastic
//! device hardware catalog.
//!
//! Fetches the device list, derives the set of referenced image filenames,
//! downloads anything new or changed (validated per asset via ETag /
//! Last-Modified), prunes assets no longer referenced, and persists a
//! manifest so that repeated runs against an unchanged catalog are
//! near-zero-cost.

#![warn(clippy::all)]

mod catalog;
mod cli;
mod config;
mod manifest;
mod sink;
mod sync;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use catalog::CatalogError;
use manifest::{Manifest, MANIFEST_FILENAME};
use sync::SyncOptions;

/// Whether the run should proceed past the catalog-hash check.
fn should_sync(force: bool, previous_hash: Option<&str>, new_hash: &str) -> bool {
    force || previous_hash != Some(new_hash)
}

/// Pretty-print the catalog payload to `path`. A dump failure is logged but
/// never aborts the sync; the dump is a convenience side channel.
async fn dump_catalog_json(path: &std::path::Path, raw: &serde_json::Value) {
    tracing::debug!("Saving catalog JSON to {}", path.display());
    let result = match serde_json::to_vec_pretty(raw) {
        Ok(json) => tokio::fs::write(path, json).await,
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
    };
    if let Err(e) = result {
        tracing::error!("Failed to save catalog JSON to {}: {}", path.display(), e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = config::Config::from_cli(cli)?;
    tracing::debug!(
        target = %config.target_root.display(),
        layout = ?config.layout,
        concurrency = config.concurrency,
        "Starting image asset sync"
    );

    tokio::fs::create_dir_all(&config.target_root).await?;
    let manifest_path = config.target_root.join(MANIFEST_FILENAME);
    let previous = Manifest::load(&manifest_path).await;

    let client = reqwest::Client::builder()
        .user_agent(concat!("devimg-sync/", env!("CARGO_PKG_VERSION")))
        .build()?;

    tracing::debug!("Fetching device list from {}", config.api_url);
    let fetched = match catalog::fetch_catalog(&client, &config.api_url, config.timeout).await {
        Ok(fetched) => fetched,
        Err(e @ CatalogError::Network { .. }) => {
            // Offline is an expected condition (build machines without
            // network); the cache simply stays as-is.
            tracing::error!("{}", e);
            return Ok(());
        }
        Err(e @ CatalogError::Parse(_)) => return Err(e.into()),
    };

    if !should_sync(config.force, previous.api_hash.as_deref(), &fetched.api_hash) {
        tracing::info!("API data has not changed. Nothing to do. Use --force to override.");
        return Ok(());
    }
    if config.force {
        tracing::debug!("Force flag set, skipping API hash check");
    }

    if let Some(path) = &config.output_json {
        dump_catalog_json(path, &fetched.raw).await;
    }

    let required = catalog::required_images(&fetched.devices);
    tracing::info!(
        "Syncing {} unique assets from {} devices (up to {} in flight)",
        required.len(),
        fetched.devices.len(),
        config.concurrency
    );

    let sink = sink::open_sink(config.layout, &config.target_root);
    let options = SyncOptions {
        image_base_url: config.image_base_url.clone(),
        timeout: config.timeout,
        concurrency: config.concurrency,
        no_progress_bar: config.no_progress_bar,
    };

    let (mut stats, files) =
        sync::run_sync_pass(&client, &options, &previous, sink.clone(), &required).await;

    stats.pruned = sync::prune(&previous, &required, sink.as_ref()).await;

    let new_manifest = Manifest {
        files,
        api_hash: Some(fetched.api_hash),
    };
    if let Err(e) = new_manifest.save(&manifest_path).await {
        tracing::error!(
            "Failed to save manifest to {}: {}",
            manifest_path.display(),
            e
        );
    }

    tracing::info!(
        "Sync complete: {} new, {} updated, {} skipped, {} failed, {} pruned",
        stats.new,
        stats.updated,
        stats.skipped,
        stats.failed,
        stats.pruned
    );
    if stats.failed > 0 {
        tracing::warn!("{} image(s) failed to sync. Check the log for details.", stats.failed);
    }

    Ok(())
}
