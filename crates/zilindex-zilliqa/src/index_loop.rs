//! The main index loop: rewind, then bulk catch-up, then live polling.
//!
//! # Startup
//! Ensure every collection exists, recover the cursor from the highest
//! stored transaction height and rewind below it (see [`crate::rewind`]).
//!
//! # Bulk
//! Index `bulk_size` heights per step up to the chain height observed at
//! startup (or `stop_at`, if lower). Every error aborts the run.
//!
//! # Live
//! Index one height per poll. RPC failures retry the same height at the
//! next poll; other failures are logged, the buffer is flushed and the
//! height is skipped. Fatal errors still abort.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use zilindex_core::classifier::{Classifier, OverrideTable};
use zilindex_core::cursor::Cursor;
use zilindex_core::document::{Action, Collection, Document, IndexRequest};
use zilindex_core::error::IndexerError;
use zilindex_core::events::EventBus;
use zilindex_core::indexer::{IndexerConfig, IndexerState};
use zilindex_core::types::{Contract, Transaction};
use zilindex_storage::{CacheError, DocumentStore, IndexCache, StoreError};

use crate::contract::ContractIndexer;
use crate::fetcher::{Fetcher, ZilliqaRpcClient};
use crate::metadata::{refresh_metadata, MetadataFetcher};
use crate::nft::{NftContext, NftError, NftIndexer, Zrc1Indexer, Zrc6Indexer};
use crate::rewind::Rewinder;

/// Actions whose NFTs get their metadata fetched before a flush.
const METADATA_ACTIONS: [Action; 2] = [Action::Mint, Action::SetBaseUri];

pub(crate) fn storage_error(e: StoreError) -> IndexerError {
    if e.is_transient() {
        IndexerError::Storage(e.to_string())
    } else {
        IndexerError::Fatal { reason: e.to_string() }
    }
}

pub(crate) fn cache_error(e: CacheError) -> IndexerError {
    IndexerError::Fatal { reason: e.to_string() }
}

fn nft_error(e: NftError) -> IndexerError {
    match e {
        NftError::Store(e) => storage_error(e),
        NftError::Cache(e) => cache_error(e),
        other => IndexerError::Other(other.to_string()),
    }
}

pub struct IndexLoop {
    config: IndexerConfig,
    fetcher: Fetcher,
    cache: Arc<IndexCache>,
    contracts: ContractIndexer,
    nft_indexers: Vec<Arc<dyn NftIndexer>>,
    metadata: Option<Arc<dyn MetadataFetcher>>,
    rewinder: Rewinder,
    cursor: Cursor,
    state: IndexerState,
    /// Event emitters found not to be NFT contracts in the current range.
    not_nft: HashSet<String>,
}

impl IndexLoop {
    pub fn new(config: IndexerConfig, client: Arc<dyn ZilliqaRpcClient>, store: Arc<dyn DocumentStore>) -> Self {
        let events = EventBus::new(config.cache.event_capacity);
        let cache = Arc::new(IndexCache::new(store.clone(), events, config.cache.clone()));
        let classifier = Classifier::new(OverrideTable::new(config.zrc1_overrides.iter().cloned()));
        let ctx = NftContext::new(cache.clone(), config.nft.clone());
        let nft_indexers: Vec<Arc<dyn NftIndexer>> = vec![
            Arc::new(Zrc1Indexer::new(ctx.clone())),
            Arc::new(Zrc6Indexer::new(ctx)),
        ];

        Self {
            fetcher: Fetcher::new(client.clone()),
            contracts: ContractIndexer::new(client, cache.clone(), classifier),
            rewinder: Rewinder::new(store, config.rewind_margin, config.start_height),
            cursor: Cursor::new(None, config.start_height),
            state: IndexerState::Idle,
            not_nft: HashSet::new(),
            metadata: None,
            nft_indexers,
            cache,
            config,
        }
    }

    /// Fetch metadata for minted and re-based NFTs before each flush.
    pub fn with_metadata_fetcher(mut self, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        self.metadata = Some(fetcher);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    /// The bus flushed documents are announced on.
    pub fn events(&self) -> &EventBus {
        self.cache.events()
    }

    /// Run until `stop_at` is reached or a fatal error occurs. Without
    /// `stop_at` this only returns on error.
    pub async fn run(&mut self) -> Result<(), IndexerError> {
        let result = self.run_phases().await;
        if let Err(e) = &result {
            self.state = IndexerState::Error;
            error!(error = %e, last_indexed = ?self.cursor.last_indexed(), "indexer stopped");
        }
        result
    }

    async fn run_phases(&mut self) -> Result<(), IndexerError> {
        let store = self.cache.store().clone();
        for collection in Collection::ALL {
            store.ensure_collection(collection).await.map_err(storage_error)?;
        }

        self.state = IndexerState::Rewinding;
        self.cursor = self
            .rewinder
            .startup(self.config.rewind_to)
            .await
            .map_err(storage_error)?;

        self.state = IndexerState::Bulk;
        let head = self.fetcher.latest_height().await?;
        let target = self.config.stop_at.map_or(head, |stop| stop.min(head));
        info!(from = self.cursor.next_height(), target, head, "starting bulk indexing");
        self.bulk(target).await?;

        if self.reached_stop() {
            self.state = IndexerState::Stopped;
            info!(height = ?self.cursor.last_indexed(), "stop height reached");
            return Ok(());
        }

        self.state = IndexerState::Live;
        info!(next = self.cursor.next_height(), "switching to live indexing");
        self.live().await
    }

    fn reached_stop(&self) -> bool {
        match (self.config.stop_at, self.cursor.last_indexed()) {
            (Some(stop), Some(last)) => last >= stop,
            _ => false,
        }
    }

    async fn bulk(&mut self, target: u64) -> Result<(), IndexerError> {
        let step = self.config.bulk_size.max(1);
        while self.cursor.next_height() <= target {
            let from = self.cursor.next_height();
            let to = from.saturating_add(step - 1).min(target);
            self.index_range(from, to).await?;
            self.cursor.advance(to);
            info!(from, to, target, "bulk range indexed");
        }
        Ok(())
    }

    async fn live(&mut self) -> Result<(), IndexerError> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if self.reached_stop() {
                self.state = IndexerState::Stopped;
                info!(height = ?self.cursor.last_indexed(), "stop height reached");
                return Ok(());
            }
            if let Err(e) = self.live_step().await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(error = %e, next = self.cursor.next_height(), "live poll failed");
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Index the next height if the chain has it.
    async fn live_step(&mut self) -> Result<(), IndexerError> {
        let head = self.fetcher.latest_height().await?;
        let height = self.cursor.next_height();
        if height > head {
            debug!(height, head, "waiting for next block");
            return Ok(());
        }

        match self.index_range(height, height).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(IndexerError::Rpc(reason)) => {
                warn!(height, %reason, "RPC failed, retrying height at next poll");
                return Ok(());
            }
            Err(e) => {
                error!(height, error = %e, "skipping height");
                self.flush().await?;
            }
        }
        self.cursor.advance(height);
        debug!(height, "live height indexed");
        Ok(())
    }

    /// Index `[from, to]`: store contract creations and executions, then
    /// derive contracts, then NFTs, then flush. Plain payments are dropped.
    pub async fn index_range(&mut self, from: u64, to: u64) -> Result<(), IndexerError> {
        self.not_nft.clear();
        let mut txs = self.fetcher.transactions(from, to).await?;
        self.contracts.resolve_addresses(&mut txs).await?;

        for tx in txs
            .iter()
            .filter(|tx| tx.is_contract_execution || tx.is_contract_creation)
        {
            self.cache.put(IndexRequest::create(tx.clone(), Action::Index));
        }

        self.contracts.index(&txs).await?;
        self.maybe_flush().await?;

        for tx in txs.iter().filter(|tx| tx.receipt.success && tx.is_contract_execution) {
            self.index_nfts(tx).await?;
            self.maybe_flush().await?;
        }

        let written = self.flush().await?;
        debug!(from, to, transactions = txs.len(), written, "range indexed");
        Ok(())
    }

    /// Apply `tx` to every NFT contract that emitted an event in it.
    async fn index_nfts(&mut self, tx: &Transaction) -> Result<(), IndexerError> {
        for address in tx.event_addresses() {
            if self.not_nft.contains(&address) {
                continue;
            }
            let contract = self
                .cache
                .get_or_load(Collection::Contracts, &address)
                .await
                .map_err(storage_error)?
                .and_then(Document::into_contract);
            let Some(contract) = contract.filter(Contract::is_nft) else {
                self.not_nft.insert(address);
                continue;
            };

            for indexer in self.nft_indexers.iter().filter(|ix| ix.handles(&contract)) {
                match indexer.index_transaction(tx, &contract).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(nft_error(e)),
                    Err(e) => warn!(
                        tx_id = %tx.id,
                        contract = %contract.address,
                        height = tx.block_num,
                        error = %e,
                        "NFT effects of transaction skipped"
                    ),
                }
            }
        }
        Ok(())
    }

    /// Replay the stored history of one NFT contract. Returns the number of
    /// transactions replayed.
    pub async fn reindex_contract(&self, address: &str) -> Result<usize, IndexerError> {
        let contract = self
            .cache
            .get_or_load(Collection::Contracts, address)
            .await
            .map_err(storage_error)?
            .and_then(Document::into_contract)
            .ok_or_else(|| IndexerError::Other(format!("contract {address} is not indexed")))?;

        let mut replayed = 0;
        for indexer in self.nft_indexers.iter().filter(|ix| ix.handles(&contract)) {
            replayed += indexer.index_contract(&contract).await.map_err(nft_error)?;
        }
        if replayed == 0 && !contract.is_nft() {
            warn!(contract = %contract.address, "contract matches no NFT standard");
        }
        Ok(replayed)
    }

    async fn maybe_flush(&self) -> Result<usize, IndexerError> {
        if self.cache.should_flush() {
            self.flush().await
        } else {
            Ok(0)
        }
    }

    /// Refresh metadata for pending mints, then flush.
    async fn flush(&self) -> Result<usize, IndexerError> {
        if let Some(fetcher) = &self.metadata {
            let nfts: Vec<_> = self
                .cache
                .pending_with_actions(Collection::Nfts, &METADATA_ACTIONS)
                .into_iter()
                .filter_map(Document::into_nft)
                .collect();
            refresh_metadata(&self.cache, fetcher.as_ref(), nfts, self.config.nft.metadata_concurrency).await;
        }
        self.cache.flush().await.map_err(cache_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_store_errors_are_not_fatal() {
        assert!(!storage_error(StoreError::Overloaded("429".into())).is_fatal());
        assert!(!storage_error(StoreError::Http("reset".into())).is_fatal());
        assert!(storage_error(StoreError::Backend("mapping".into())).is_fatal());
    }

    #[test]
    fn buffer_errors_are_fatal() {
        let e = cache_error(CacheError::Document {
            collection: Collection::Nfts,
            id: "0xabc-1".into(),
            attempts: 3,
            reason: "rejected".into(),
        });
        assert!(e.is_fatal());
    }

    #[test]
    fn lookup_misses_are_not_fatal() {
        let e = nft_error(NftError::NotFound {
            contract: "0xabc".into(),
            token_id: 1,
        });
        assert!(!e.is_fatal());
    }
}
