//! tiered-cache: maintenance CLI for a tiered key/value cache.
//!
//! Opens the cache described by the config file, runs a single command and
//! prints the result as JSON.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;

use tiered_cache::config::{CacheConfig, Cli, Command};
use tiered_cache::{CacheBuilder, GetOptions, SetOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tiered_cache=debug"
    } else {
        "tiered_cache=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("tiered-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = CacheConfig::load(&cli.config)?;
    info!(
        disk = %config.disk.path.display(),
        disk_enabled = config.disk.enabled,
        remote_enabled = config.remote.enabled,
        max_keys = config.memory.max_keys,
        "Configuration loaded"
    );

    // One-shot process: no background maintenance.
    let cache = CacheBuilder::new(config)
        .janitor(false)
        .open()
        .await
        .context("failed to open cache")?;

    let output = match cli.command {
        Command::Get { key } => cache
            .get(&key, GetOptions::default())
            .await
            .unwrap_or(Value::Null),
        Command::Set { key, value, ttl } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let stored = cache
                .set(&key, value, ttl.map(Duration::from_secs), SetOptions::default())
                .await;
            json!({ "stored": stored })
        }
        Command::Delete { key } => json!({ "deleted": cache.delete(&key).await }),
        Command::Has { key } => json!({ "present": cache.has(&key).await }),
        Command::Flush => {
            cache.flush().await;
            json!({ "flushed": true })
        }
        Command::Stats => serde_json::to_value(cache.stats())?,
        Command::Cleanup => match cache.cleanup().await {
            Some(report) => json!({
                "expired": report.expired,
                "evicted": report.evicted,
                "temp_removed": report.temp_removed,
                "bytes_used": report.bytes_used,
            }),
            None => json!({ "skipped": true }),
        },
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    cache.close().await?;
    Ok(())
}
