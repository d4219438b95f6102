//! Server configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use notevault_realtime::RealtimeConfig;
use notevault_sync::SyncConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// SQLite document store. Without it everything lives in memory.
    pub storage_path: Option<PathBuf>,
    pub log_level: String,
    pub max_body_bytes: usize,
    pub realtime: RealtimeConfig,
    pub sync: SyncConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            storage_path: None,
            log_level: "info".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
            realtime: RealtimeConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.realtime.validate()?;
        if self.max_body_bytes == 0 {
            anyhow::bail!("max_body_bytes must be at least 1");
        }
        Ok(())
    }
}
