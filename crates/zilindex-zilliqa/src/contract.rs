//! Contract indexer.
//!
//! For every successful deployment in a range: resolve the contract address,
//! fetch the init values, extract the source shape, classify it, and buffer
//! the contract document as a create.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use zilindex_core::address;
use zilindex_core::classifier::{apply_source, Classifier, PatternParser, SourceParser};
use zilindex_core::decoder::decode_init;
use zilindex_core::document::{Action, IndexRequest};
use zilindex_core::error::{DecodeError, IndexerError};
use zilindex_core::types::{Contract, Transaction};
use zilindex_core::value::{Param, Params};
use zilindex_storage::IndexCache;

use crate::fetcher::{rpc_error, ZilliqaRpcClient};

fn is_deployment(tx: &Transaction) -> bool {
    tx.is_contract_creation && tx.receipt.success
}

pub struct ContractIndexer {
    client: Arc<dyn ZilliqaRpcClient>,
    cache: Arc<IndexCache>,
    classifier: Classifier,
    parser: Arc<dyn SourceParser>,
}

impl ContractIndexer {
    pub fn new(client: Arc<dyn ZilliqaRpcClient>, cache: Arc<IndexCache>, classifier: Classifier) -> Self {
        Self {
            client,
            cache,
            classifier,
            parser: Arc::new(PatternParser),
        }
    }

    /// Replace the source parser.
    pub fn with_parser(mut self, parser: Arc<dyn SourceParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Fill in the deployed address of every successful deployment, using
    /// one batched lookup.
    pub async fn resolve_addresses(&self, txs: &mut [Transaction]) -> Result<(), IndexerError> {
        let ids: Vec<String> = txs
            .iter()
            .filter(|tx| is_deployment(tx) && tx.contract_address.is_none())
            .map(|tx| tx.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let addresses = self.client.contract_addresses(&ids).await.map_err(rpc_error)?;
        let resolved: HashMap<String, String> = ids
            .into_iter()
            .zip(addresses)
            .filter_map(|(id, addr)| addr.map(|a| (id, a)))
            .collect();

        for tx in txs.iter_mut() {
            if let Some(addr) = resolved.get(&tx.id) {
                tx.contract_address_bech32 = address::to_bech32(addr).ok();
                tx.contract_address = Some(addr.clone());
            }
        }
        Ok(())
    }

    /// Build, classify and buffer the contracts deployed by `txs`.
    /// Returns the contracts created.
    pub async fn index(&self, txs: &[Transaction]) -> Result<Vec<Contract>, IndexerError> {
        let mut created = Vec::new();
        for tx in txs.iter().filter(|tx| is_deployment(tx)) {
            let Some(addr) = tx.contract_address.as_deref() else {
                warn!(tx_id = %tx.id, height = tx.block_num, "deployment without a resolvable contract address");
                continue;
            };
            let init = self.init_params(tx, addr).await?;
            let contract = self
                .build(tx, addr, init)
                .map_err(|e| IndexerError::Decode {
                    height: tx.block_num,
                    source: e.in_transaction(&tx.id),
                })?;

            info!(
                contract = %contract.address,
                name = %contract.name,
                zrc1 = contract.zrc1,
                zrc6 = contract.zrc6,
                height = contract.block_num,
                "indexed contract"
            );
            self.cache.put(IndexRequest::create(contract.clone(), Action::Index));
            created.push(contract);
        }
        Ok(created)
    }

    /// Init values from the node. When the node refuses the call, the init
    /// params carried in the deployment's own data are used instead.
    async fn init_params(&self, tx: &Transaction, addr: &str) -> Result<Vec<Param>, IndexerError> {
        match self.client.contract_init(addr).await {
            Ok(init) => decode_init(&init).map_err(|e| IndexerError::Decode {
                height: tx.block_num,
                source: e.in_transaction(&tx.id),
            }),
            Err(e) if e.is_retryable() => Err(rpc_error(e)),
            Err(e) => {
                warn!(contract = %addr, tx_id = %tx.id, error = %e, "init lookup failed, using deployment data");
                Ok(tx.data.as_ref().map(|d| d.params.clone()).unwrap_or_default())
            }
        }
    }

    /// Assemble a contract from its deployment, address and init values.
    pub fn build(&self, tx: &Transaction, addr: &str, init: Vec<Param>) -> Result<Contract, DecodeError> {
        let (address, address_bech32) = address::both(addr)?;
        let mut contract = Contract {
            address,
            address_bech32,
            block_num: tx.block_num,
            tx_id: tx.id.clone(),
            name: String::new(),
            code: tx.code.clone(),
            immutable_params: init,
            mutable_params: Vec::new(),
            transitions: Vec::new(),
            zrc1: false,
            zrc6: false,
            base_uri: String::new(),
            minters: Vec::new(),
        };
        apply_source(&mut contract, self.parser.as_ref());
        self.classifier.apply(&mut contract);
        if contract.zrc6 {
            if let Some(uri) = contract.immutable_params.str_value("initial_base_uri") {
                contract.base_uri = uri.to_string();
            }
        }
        Ok(contract)
    }
}
