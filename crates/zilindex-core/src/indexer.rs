//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};

use crate::document::Action;
use crate::retry::RetryConfig;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Network name, used to namespace collections (e.g. `"mainnet"`).
    pub network: String,
    /// Deployment name, used to namespace collections.
    pub deployment: String,
    /// Chain JSON-RPC endpoint.
    pub rpc_url: String,
    /// Document store endpoint.
    pub store_url: String,
    /// First height to index when nothing has been indexed yet.
    pub start_height: u64,
    /// Explicit rewind height; overrides the computed target.
    pub rewind_to: Option<u64>,
    /// How many heights below the last indexed one to rewind on startup.
    pub rewind_margin: u64,
    /// Heights per bulk-mode step.
    pub bulk_size: u64,
    /// Live-mode polling interval (milliseconds).
    pub poll_interval_ms: u64,
    /// Stop once this height is indexed. `None` = run forever.
    pub stop_at: Option<u64>,
    /// Addresses classified as ZRC-1 regardless of their source.
    pub zrc1_overrides: Vec<String>,
    pub rpc: RpcConfig,
    pub cache: CacheConfig,
    pub nft: NftConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            network: "mainnet".into(),
            deployment: "default".into(),
            rpc_url: "https://api.zilliqa.com".into(),
            store_url: "http://localhost:9200".into(),
            start_height: 0,
            rewind_to: None,
            rewind_margin: 10,
            bulk_size: 100,
            poll_interval_ms: 2000,
            stop_at: None,
            zrc1_overrides: Vec::new(),
            rpc: RpcConfig::default(),
            cache: CacheConfig::default(),
            nft: NftConfig::default(),
        }
    }
}

/// Chain RPC client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Per-call timeout (milliseconds).
    pub timeout_ms: u64,
    /// Retries on transport errors and timeouts.
    pub max_retries: u32,
    /// Fixed delay between retries (milliseconds).
    pub backoff_ms: u64,
    /// Maximum requests per JSON-RPC batch.
    pub batch_size: usize,
}

impl RpcConfig {
    /// Fixed-delay retries for transport errors and timeouts.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::fixed(self.max_retries, self.backoff_ms)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            backoff_ms: 500,
            batch_size: 50,
        }
    }
}

/// Write-buffer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Pending-request count at which `maybe_flush` flushes.
    pub flush_threshold: usize,
    /// Maximum documents per backend bulk call.
    pub bulk_chunk_size: usize,
    /// Backoff for overloaded-backend retries (after one immediate retry).
    pub retry: RetryConfig,
    /// Per-document retries for items a bulk call rejected.
    pub item_retries: u32,
    /// Actions that publish an event after a successful flush.
    pub event_actions: Vec<Action>,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 1000,
            bulk_chunk_size: 500,
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 1000,
                max_backoff_ms: 30_000,
                multiplier: 2.0,
                jitter_fraction: 0.1,
            },
            item_retries: 3,
            event_actions: vec![Action::Mint, Action::SetBaseUri, Action::MetadataRefreshed],
            event_capacity: 1024,
        }
    }
}

/// NFT indexer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NftConfig {
    /// Delay before the single retry of an NFT lookup miss (milliseconds).
    pub lookup_retry_delay_ms: u64,
    /// Transactions per page when bulk-indexing one contract.
    pub contract_page_size: usize,
    /// Concurrent metadata fetches.
    pub metadata_concurrency: usize,
}

impl Default for NftConfig {
    fn default() -> Self {
        Self {
            lookup_retry_delay_ms: 250,
            contract_page_size: 100,
            metadata_concurrency: 10,
        }
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Deleting state above the rewind target.
    Rewinding,
    /// Catching up in fixed-size height ranges.
    Bulk,
    /// Following the chain tip one height at a time.
    Live,
    /// Reached `stop_at`.
    Stopped,
    /// Encountered an unrecoverable error.
    Error,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Rewinding => write!(f, "rewinding"),
            Self::Bulk => write!(f, "bulk"),
            Self::Live => write!(f, "live"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}
