//! Config file loading and command-line overrides.

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use zilindex_core::indexer::IndexerConfig;

use crate::logging::LogConfig;

/// Contents of the `--config` JSON file. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub indexer: IndexerConfig,
    pub log: LogConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Options shared by every command that talks to the chain or the store.
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Zilliqa JSON-RPC endpoint
    #[arg(long)]
    pub rpc: Option<String>,
    /// Document store endpoint
    #[arg(long)]
    pub store: Option<String>,
    /// Network name (collection namespace)
    #[arg(long)]
    pub network: Option<String>,
    /// Deployment name (collection namespace)
    #[arg(long)]
    pub deployment: Option<String>,
    /// Global log level
    #[arg(long)]
    pub log_level: Option<String>,
    /// Emit JSON logs
    #[arg(long)]
    pub json_logs: bool,
}

impl CommonArgs {
    /// Load the config file (if any), then apply the flags on top.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut Settings) {
        let cfg = &mut settings.indexer;
        if let Some(rpc) = &self.rpc {
            cfg.rpc_url = rpc.clone();
        }
        if let Some(store) = &self.store {
            cfg.store_url = store.clone();
        }
        if let Some(network) = &self.network {
            cfg.network = network.clone();
        }
        if let Some(deployment) = &self.deployment {
            cfg.deployment = deployment.clone();
        }
        if let Some(level) = &self.log_level {
            settings.log.level = level.clone();
        }
        if self.json_logs {
            settings.log.json = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let mut settings: Settings = serde_json::from_str(
            r#"{"indexer": {"network": "testnet", "rpc_url": "http://file"}, "log": {"level": "debug"}}"#,
        )
        .unwrap();
        let args = CommonArgs {
            rpc: Some("http://flag".into()),
            json_logs: true,
            ..Default::default()
        };
        args.apply(&mut settings);

        assert_eq!(settings.indexer.network, "testnet");
        assert_eq!(settings.indexer.rpc_url, "http://flag");
        assert_eq!(settings.log.level, "debug");
        assert!(settings.log.json);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.indexer, IndexerConfig::default());
        assert_eq!(settings.log.level, "info");
    }
}
