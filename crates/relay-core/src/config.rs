use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

pub const DEFAULT_MAX_ENVELOPE_BYTES: usize = 4096;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 15 * 60;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

pub const ENV_STORAGE_DIR: &str = "RELAY_STORAGE_DIR";
pub const ENV_MAX_ENVELOPE_BYTES: &str = "RELAY_MAX_ENVELOPE_BYTES";
pub const ENV_SESSION_TTL_SECS: &str = "RELAY_SESSION_TTL_SECS";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "RELAY_CLEANUP_INTERVAL_SECS";
pub const ENV_REINDEX_ON_START: &str = "RELAY_REINDEX_ON_START";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub storage_dir: PathBuf,
    pub max_envelope_bytes: usize,
    pub session_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub reindex_on_start: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            storage_dir: paths::data_dir().unwrap_or_else(|_| PathBuf::from("relay-data")),
            max_envelope_bytes: DEFAULT_MAX_ENVELOPE_BYTES,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            reindex_on_start: false,
        }
    }
}

impl RelayConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Overlay `RELAY_*` environment variables on top of the current values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            self.storage_dir = PathBuf::from(dir.trim());
        }
        if let Some(v) = lookup(ENV_MAX_ENVELOPE_BYTES) {
            self.max_envelope_bytes = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_ENVELOPE_BYTES} must be an integer"))?;
        }
        if let Some(v) = lookup(ENV_SESSION_TTL_SECS) {
            self.session_ttl_secs = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_SESSION_TTL_SECS} must be an integer"))?;
        }
        if let Some(v) = lookup(ENV_CLEANUP_INTERVAL_SECS) {
            self.cleanup_interval_secs = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_CLEANUP_INTERVAL_SECS} must be an integer"))?;
        }
        if let Some(v) = lookup(ENV_REINDEX_ON_START) {
            self.reindex_on_start = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.as_os_str().is_empty() {
            anyhow::bail!("storage_dir must not be empty");
        }
        if self.max_envelope_bytes == 0 {
            anyhow::bail!("max_envelope_bytes must be greater than zero");
        }
        if self.session_ttl_secs == 0 {
            anyhow::bail!("session_ttl_secs must be greater than zero");
        }
        if self.cleanup_interval_secs == 0 {
            anyhow::bail!("cleanup_interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.storage_dir.join(paths::CONVERSATIONS_STORE)
    }

    pub fn messages_dir(&self) -> PathBuf {
        self.storage_dir.join(paths::MESSAGES_STORE)
    }
}
