//! Fluent builder API for creating Zilliqa indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use zilindex_zilliqa::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .network("mainnet")
//!     .deployment("nft-v2")
//!     .start_height(1_000_000)
//!     .bulk_size(200)
//!     .zrc1_override("0x9bfec715a6bd658fcb62b0f8cc9bfa2ade71434a")
//!     .build_config();
//! ```

use std::sync::Arc;

use zilindex_core::indexer::{CacheConfig, IndexerConfig, NftConfig, RpcConfig};
use zilindex_storage::DocumentStore;

use crate::fetcher::ZilliqaRpcClient;
use crate::index_loop::IndexLoop;
use crate::metadata::MetadataFetcher;

/// Fluent builder for `IndexerConfig` and [`IndexLoop`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    metadata: Option<Arc<dyn MetadataFetcher>>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            metadata: None,
        }
    }

    /// Set the network name (collection namespace).
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.config.network = network.into();
        self
    }

    /// Set the deployment name (collection namespace).
    pub fn deployment(mut self, deployment: impl Into<String>) -> Self {
        self.config.deployment = deployment.into();
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.config.store_url = url.into();
        self
    }

    /// Set the first height indexed on an empty store.
    pub fn start_height(mut self, height: u64) -> Self {
        self.config.start_height = height;
        self
    }

    /// Rewind to exactly this height on startup.
    pub fn rewind_to(mut self, height: u64) -> Self {
        self.config.rewind_to = Some(height);
        self
    }

    /// Set how many heights below the last indexed one are re-indexed.
    pub fn rewind_margin(mut self, margin: u64) -> Self {
        self.config.rewind_margin = margin;
        self
    }

    /// Set the number of heights per bulk step.
    pub fn bulk_size(mut self, size: u64) -> Self {
        self.config.bulk_size = size;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Stop once this height is indexed.
    pub fn stop_at(mut self, height: u64) -> Self {
        self.config.stop_at = Some(height);
        self
    }

    /// Classify this address as ZRC-1 regardless of its source.
    pub fn zrc1_override(mut self, address: impl Into<String>) -> Self {
        self.config.zrc1_overrides.push(address.into());
        self
    }

    pub fn rpc(mut self, rpc: RpcConfig) -> Self {
        self.config.rpc = rpc;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn nft(mut self, nft: NftConfig) -> Self {
        self.config.nft = nft;
        self
    }

    /// Enrich minted NFTs with metadata from `fetcher`.
    pub fn metadata_fetcher(mut self, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        self.metadata = Some(fetcher);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build an [`IndexLoop`] over `client` and `store`.
    pub fn build(self, client: Arc<dyn ZilliqaRpcClient>, store: Arc<dyn DocumentStore>) -> IndexLoop {
        let index_loop = IndexLoop::new(self.config, client, store);
        match self.metadata {
            Some(fetcher) => index_loop.with_metadata_fetcher(fetcher),
            None => index_loop,
        }
    }
}
