use anyhow::{Context, Result};
use relay_core::clock;
use relay_core::relay::ReindexSummary;
use relay_core::transport::Transport;
use relay_core::{Relay, RelayConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// File, then `RELAY_*` environment, then the command-line data dir.
pub fn load_config(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<RelayConfig> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => relay_core::paths::default_config_path()?,
    };
    let mut config = RelayConfig::load(&path)?;
    config.apply_env()?;
    if let Some(dir) = data_dir {
        config.storage_dir = dir;
    }
    config.validate()?;
    Ok(config)
}

/// Open the relay over `transport`, reconciling indexes first when asked to.
pub fn open_relay(config: &RelayConfig, transport: Arc<dyn Transport>) -> Result<Relay> {
    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("create storage dir {}", config.storage_dir.display()))?;
    let relay = Relay::open(config, transport, clock::system()).context("open relay stores")?;
    if config.reindex_on_start {
        let summary = relay.reindex().context("reindex on start")?;
        log_summary(&summary);
    }
    Ok(relay)
}

/// Offline rebuild of both indexes from their logs.
pub fn reindex_stores(config: &RelayConfig, transport: Arc<dyn Transport>) -> Result<ReindexSummary> {
    let relay = Relay::open(config, transport, clock::system()).context("open relay stores")?;
    let summary = relay.reindex().context("reindex")?;
    log_summary(&summary);
    Ok(summary)
}

fn log_summary(summary: &ReindexSummary) {
    info!(
        conversations = summary.conversations.records,
        conversations_skipped = summary.conversations.skipped,
        messages = summary.messages.records,
        messages_skipped = summary.messages.skipped,
        "indexes rebuilt from logs"
    );
}
