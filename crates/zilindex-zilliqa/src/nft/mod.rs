//! NFT state indexers.
//!
//! One indexer per token standard. Each turns the event logs a contract
//! emitted in a transaction into mint, transfer, burn and update requests
//! on the write buffer.
//!
//! Failure isolation:
//! - a missing param or unparsable token ID skips that one event,
//! - an NFT that is neither buffered nor stored (after one delayed retry)
//!   skips the rest of the transaction,
//! - store and buffer failures propagate.

pub mod zrc1;
pub mod zrc6;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use zilindex_core::address;
use zilindex_core::document::{Action, Collection, Document, IndexRequest};
use zilindex_core::indexer::NftConfig;
use zilindex_core::types::{Contract, EventLog, Nft, Standard, Transaction};
use zilindex_core::value::Params;
use zilindex_storage::{CacheError, IndexCache, Page, Query, Sort, StoreError};

pub use zrc1::Zrc1Indexer;
pub use zrc6::Zrc6Indexer;

/// Param names holding the receiving address, in lookup order.
pub const RECIPIENT_PARAMS: &[&str] = &["recipient", "to"];

/// Param names holding the token ID, in lookup order.
pub const TOKEN_ID_PARAMS: &[&str] = &["token_id", "token"];

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NftError {
    #[error("event {event} in tx {tx_id} has no '{param}' param")]
    MissingParam {
        event: String,
        param: String,
        tx_id: String,
    },

    #[error("invalid token id '{value}' in tx {tx_id}")]
    InvalidTokenId { value: String, tx_id: String },

    #[error("NFT {contract}-{token_id} not found")]
    NotFound { contract: String, token_id: u64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("write buffer error: {0}")]
    Cache(#[from] CacheError),
}

impl NftError {
    /// Errors confined to a single mint/transfer/burn instance.
    pub fn is_instance_local(&self) -> bool {
        matches!(self, Self::MissingParam { .. } | Self::InvalidTokenId { .. })
    }

    /// Errors that must stop the pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Cache(_))
    }
}

// ─── Param helpers ────────────────────────────────────────────────────────────

/// Parse a token ID: decimal, or `0x`-prefixed hex.
pub fn parse_token_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// Lowercase `0x` form of an address param. Values that are not valid
/// addresses are kept, lowercased.
pub fn normalize_owner(raw: &str) -> String {
    address::normalize(raw).unwrap_or_else(|_| raw.to_ascii_lowercase())
}

pub(crate) fn str_param(log: &EventLog, names: &[&str], tx: &Transaction) -> Result<String, NftError> {
    log.params
        .first_str_value(names)
        .map(str::to_string)
        .ok_or_else(|| NftError::MissingParam {
            event: log.event_name.clone(),
            param: names[0].to_string(),
            tx_id: tx.id.clone(),
        })
}

pub(crate) fn token_id_param(log: &EventLog, tx: &Transaction) -> Result<u64, NftError> {
    let raw = str_param(log, TOKEN_ID_PARAMS, tx)?;
    parse_token_id(&raw).ok_or(NftError::InvalidTokenId {
        value: raw,
        tx_id: tx.id.clone(),
    })
}

pub(crate) fn recipient_param(log: &EventLog, tx: &Transaction) -> Result<String, NftError> {
    str_param(log, RECIPIENT_PARAMS, tx).map(|r| normalize_owner(&r))
}

/// Log and swallow instance-local failures.
pub(crate) fn isolate(
    result: Result<(), NftError>,
    tx: &Transaction,
    contract: &Contract,
    event: &str,
) -> Result<(), NftError> {
    match result {
        Err(e) if e.is_instance_local() => {
            warn!(
                tx_id = %tx.id,
                contract = %contract.address,
                event,
                error = %e,
                "skipping event"
            );
            Ok(())
        }
        other => other,
    }
}

// ─── Shared context ───────────────────────────────────────────────────────────

/// Buffer access and lookups shared by every standard.
#[derive(Clone)]
pub struct NftContext {
    cache: Arc<IndexCache>,
    config: NftConfig,
}

impl NftContext {
    pub fn new(cache: Arc<IndexCache>, config: NftConfig) -> Self {
        Self { cache, config }
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    pub fn config(&self) -> &NftConfig {
        &self.config
    }

    pub fn put(&self, request: IndexRequest) {
        self.cache.put(request);
    }

    /// The NFT from the buffer, else from the store.
    pub async fn find(&self, contract: &str, token_id: u64) -> Result<Option<Nft>, NftError> {
        let slug = Nft::slug_for(contract, token_id);
        Ok(self
            .cache
            .get_or_load(Collection::Nfts, &slug)
            .await?
            .and_then(Document::into_nft))
    }

    /// Like [`find`](Self::find), but a miss is retried once after a short
    /// delay and then reported as [`NftError::NotFound`].
    pub async fn lookup(&self, contract: &str, token_id: u64) -> Result<Nft, NftError> {
        if let Some(nft) = self.find(contract, token_id).await? {
            return Ok(nft);
        }
        debug!(contract, token_id, "NFT not found, retrying once");
        tokio::time::sleep(Duration::from_millis(self.config.lookup_retry_delay_ms)).await;
        self.find(contract, token_id)
            .await?
            .ok_or_else(|| NftError::NotFound {
                contract: contract.to_string(),
                token_id,
            })
    }

    /// The latest state of `contract`: buffered, stored, or the given copy.
    pub async fn load_contract(&self, contract: &Contract) -> Result<Contract, NftError> {
        Ok(self
            .cache
            .get_or_load(Collection::Contracts, &contract.slug())
            .await?
            .and_then(Document::into_contract)
            .unwrap_or_else(|| contract.clone()))
    }

    /// Buffer a mint unless the token already exists. Returns `true` if a
    /// mint was buffered.
    pub async fn mint(
        &self,
        contract: &Contract,
        tx: &Transaction,
        token_id: u64,
        owner: String,
        token_uri: String,
        standard: Standard,
    ) -> Result<bool, NftError> {
        if self.find(&contract.address, token_id).await?.is_some() {
            debug!(contract = %contract.address, token_id, tx_id = %tx.id, "already minted, skipping");
            return Ok(false);
        }
        info!(contract = %contract.address, token_id, owner = %owner, tx_id = %tx.id, "mint");
        self.put(IndexRequest::create(
            Nft {
                contract: contract.address.clone(),
                token_id,
                owner,
                token_uri,
                base_uri: contract.base_uri.clone(),
                tx_id: tx.id.clone(),
                block_num: tx.block_num,
                burned_at: 0,
                standard,
                metadata: None,
            },
            Action::Mint,
        ));
        Ok(true)
    }

    pub async fn transfer(&self, contract: &Contract, token_id: u64, recipient: String) -> Result<(), NftError> {
        let mut nft = self.lookup(&contract.address, token_id).await?;
        if nft.owner == recipient {
            return Ok(());
        }
        debug!(contract = %contract.address, token_id, from = %nft.owner, to = %recipient, "transfer");
        nft.owner = recipient;
        self.put(IndexRequest::update(nft, Action::Transfer));
        Ok(())
    }

    pub async fn burn(&self, contract: &Contract, token_id: u64, height: u64) -> Result<(), NftError> {
        let mut nft = self.lookup(&contract.address, token_id).await?;
        debug!(contract = %contract.address, token_id, height, "burn");
        nft.burn(height);
        self.put(IndexRequest::update(nft, Action::Burn));
        Ok(())
    }

    /// Highest token ID known for `contract`, buffered or stored.
    pub async fn max_token_id(&self, contract: &str) -> Result<Option<u64>, NftError> {
        let pending = self
            .cache
            .pending_where(Collection::Nfts, |d| d.as_nft().map_or(false, |n| n.contract == contract))
            .iter()
            .filter_map(|d| d.as_nft().map(|n| n.token_id))
            .max();
        let stored = self
            .cache
            .store()
            .search(
                Collection::Nfts,
                &Query::term("contract", contract),
                Some(&Sort::desc("tokenId")),
                Page::first(1),
            )
            .await?
            .first()
            .and_then(|d| d.as_nft().map(|n| n.token_id));
        Ok(pending.max(stored))
    }

    /// Returns `true` if `tx_id` already minted a token of `contract`,
    /// buffered or stored.
    pub async fn minted_in(&self, contract: &str, tx_id: &str) -> Result<bool, NftError> {
        let pending = self.cache.pending_where(Collection::Nfts, |d| {
            d.as_nft().map_or(false, |n| n.contract == contract && n.tx_id == tx_id)
        });
        if !pending.is_empty() {
            return Ok(true);
        }
        let stored = self
            .cache
            .store()
            .search(
                Collection::Nfts,
                &Query::all([Query::term("contract", contract), Query::term("txId", tx_id)]),
                None,
                Page::first(1),
            )
            .await?;
        Ok(!stored.is_empty())
    }

    /// Point every known token of `contract` at `base_uri`. Returns the
    /// number of tokens updated.
    pub async fn cascade_base_uri(&self, contract: &str, base_uri: &str) -> Result<usize, NftError> {
        let mut seen = HashSet::new();
        let pending = self
            .cache
            .pending_where(Collection::Nfts, |d| d.as_nft().map_or(false, |n| n.contract == contract));
        for doc in pending {
            if let Some(mut nft) = doc.into_nft() {
                seen.insert(nft.token_id);
                nft.base_uri = base_uri.to_string();
                self.put(IndexRequest::update(nft, Action::SetBaseUri));
            }
        }

        let query = Query::term("contract", contract);
        let sort = Sort::asc("tokenId");
        let mut page = Page::first(self.config.contract_page_size.max(1));
        loop {
            let docs = self
                .cache
                .store()
                .search(Collection::Nfts, &query, Some(&sort), page.clone())
                .await?;
            let Some(last) = docs.last() else { break };
            page = page.after(&sort, last)?;
            for doc in docs {
                if let Some(mut nft) = doc.into_nft() {
                    if seen.insert(nft.token_id) {
                        nft.base_uri = base_uri.to_string();
                        self.put(IndexRequest::update(nft, Action::SetBaseUri));
                    }
                }
            }
        }
        Ok(seen.len())
    }
}

// ─── NftIndexer ───────────────────────────────────────────────────────────────

/// Derives NFT state for one token standard.
#[async_trait]
pub trait NftIndexer: Send + Sync {
    fn standard(&self) -> Standard;

    fn context(&self) -> &NftContext;

    /// Returns `true` if the contract was classified under this standard.
    fn handles(&self, contract: &Contract) -> bool {
        match self.standard() {
            Standard::Zrc1 => contract.zrc1,
            Standard::Zrc6 => contract.zrc6,
        }
    }

    /// Apply the NFT effects of `tx` on `contract`.
    async fn index_transaction(&self, tx: &Transaction, contract: &Contract) -> Result<(), NftError>;

    /// Replay the stored execution history of `contract` and its minters
    /// in chain order, page by page, flushing after each page. Returns the
    /// number of transactions replayed.
    async fn index_contract(&self, contract: &Contract) -> Result<usize, NftError> {
        let ctx = self.context();
        let query = Query::all([
            Query::terms("contractAddress", contract.history_addresses()),
            Query::term("receipt.success", true),
        ]);
        let sort = Sort::asc("blockNum").then_asc("index").then_asc("id");
        let mut page = Page::first(ctx.config().contract_page_size.max(1));
        let mut replayed = 0usize;

        loop {
            let docs = ctx
                .cache()
                .store()
                .search(Collection::Transactions, &query, Some(&sort), page.clone())
                .await?;
            let Some(last) = docs.last() else { break };
            page = page.after(&sort, last)?;
            for doc in &docs {
                let Some(tx) = doc.as_transaction() else { continue };
                match self.index_transaction(tx, contract).await {
                    Ok(()) => replayed += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(
                        tx_id = %tx.id,
                        contract = %contract.address,
                        error = %e,
                        "skipping transaction"
                    ),
                }
            }
            ctx.cache().flush().await?;
        }

        ctx.cache().flush().await?;
        info!(
            contract = %contract.address,
            standard = %self.standard(),
            transactions = replayed,
            "contract indexed"
        );
        Ok(replayed)
    }
}
