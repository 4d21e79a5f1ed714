//! Zilliqa block fetcher.
//!
//! Pulls raw transaction bodies for height ranges through a
//! [`ZilliqaRpcClient`] and decodes them into [`Transaction`]s.

use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::Arc;

use zilindex_core::decoder::decode_transaction_json;
use zilindex_core::error::IndexerError;
use zilindex_core::types::Transaction;

use crate::rpc::RpcError;

/// The chain RPC calls the indexer consumes.
#[async_trait]
pub trait ZilliqaRpcClient: Send + Sync {
    /// Height of the latest transaction block.
    async fn latest_height(&self) -> Result<u64, RpcError>;

    /// Raw transaction bodies for each height, in input order. A block
    /// without transactions yields an empty list.
    async fn tx_bodies(&self, heights: &[u64]) -> Result<Vec<Vec<Json>>, RpcError>;

    /// Deployed contract address for each deployment transaction, in input
    /// order. `None` when the node knows of no contract for that ID.
    async fn contract_addresses(&self, tx_ids: &[String]) -> Result<Vec<Option<String>>, RpcError>;

    /// Deploy-time init values of a contract.
    async fn contract_init(&self, address: &str) -> Result<Json, RpcError>;
}

pub(crate) fn rpc_error(e: RpcError) -> IndexerError {
    IndexerError::Rpc(e.to_string())
}

/// Fetcher that wraps a [`ZilliqaRpcClient`] and adds range and decoding
/// logic.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn ZilliqaRpcClient>,
}

impl Fetcher {
    pub fn new(client: Arc<dyn ZilliqaRpcClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn ZilliqaRpcClient> {
        &self.client
    }

    /// Fetch the current chain height.
    pub async fn latest_height(&self) -> Result<u64, IndexerError> {
        self.client.latest_height().await.map_err(rpc_error)
    }

    /// Fetch and decode every transaction in `[from, to]`, ordered by height
    /// and then by position in the block. Any decode failure fails the
    /// whole range.
    pub async fn transactions(&self, from: u64, to: u64) -> Result<Vec<Transaction>, IndexerError> {
        if to < from {
            return Ok(vec![]);
        }
        let heights: Vec<u64> = (from..=to).collect();
        let blocks = self.client.tx_bodies(&heights).await.map_err(rpc_error)?;

        let mut txs = Vec::new();
        for (height, bodies) in heights.into_iter().zip(blocks) {
            for (position, body) in bodies.iter().enumerate() {
                let mut tx = decode_transaction_json(body, height)
                    .map_err(|source| IndexerError::Decode { height, source })?;
                tx.index = position as u32;
                txs.push(tx);
            }
        }
        tracing::debug!(from, to, transactions = txs.len(), "fetched range");
        Ok(txs)
    }
}
