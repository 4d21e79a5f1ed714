//! ZRC-6 NFT indexer.
//!
//! Besides the per-token events, ZRC-6 contracts announce base-URI changes
//! (cascaded to every token of the contract) and minter list changes
//! (recorded on the contract document, so minter history is replayed by
//! [`NftIndexer::index_contract`]).

use async_trait::async_trait;
use tracing::{debug, info, warn};

use zilindex_core::document::{Action, IndexRequest};
use zilindex_core::types::{Contract, EventLog, Standard, Transaction};
use zilindex_core::value::Params;

use super::{
    isolate, normalize_owner, parse_token_id, recipient_param, str_param, token_id_param, NftContext,
    NftError, NftIndexer,
};

const MINT: &str = "Mint";
const BATCH_MINT: &str = "BatchMint";
const TRANSFER_FROM: &str = "TransferFrom";
const BURN: &str = "Burn";
const BATCH_BURN: &str = "BatchBurn";
const SET_BASE_URI: &str = "SetBaseURI";
const ADD_MINTER: &str = "AddMinter";
const REMOVE_MINTER: &str = "RemoveMinter";

const PAIR_LIST: &str = "to_token_uri_pair_list";
const START_ID: &str = "start_id";
const END_ID: &str = "end_id";
const TOKEN_ID_LIST: &str = "token_id_list";

pub struct Zrc6Indexer {
    ctx: NftContext,
}

impl Zrc6Indexer {
    pub fn new(ctx: NftContext) -> Self {
        Self { ctx }
    }

    async fn mint(&self, tx: &Transaction, contract: &Contract, log: &EventLog) -> Result<(), NftError> {
        let token_id = token_id_param(log, tx)?;
        let owner = recipient_param(log, tx)?;
        let token_uri = str_param(log, &["token_uri"], tx).unwrap_or_default();
        self.ctx
            .mint(contract, tx, token_id, owner, token_uri, Standard::Zrc6)
            .await
            .map(|_| ())
    }

    /// Each `Pair (to, token_uri)` mints the next consecutive token ID.
    ///
    /// The first ID comes from the event's `start_id` (or is derived from
    /// `end_id`). Without either it continues from the highest known ID,
    /// which is only sound the first time this transaction is seen.
    async fn batch_mint(&self, tx: &Transaction, contract: &Contract, log: &EventLog) -> Result<(), NftError> {
        let pairs = log
            .params
            .value(PAIR_LIST)
            .and_then(|v| v.as_list())
            .ok_or_else(|| NftError::MissingParam {
                event: log.event_name.clone(),
                param: PAIR_LIST.to_string(),
                tx_id: tx.id.clone(),
            })?;

        let id_param = |name: &str| -> Result<Option<u64>, NftError> {
            log.params
                .str_value(name)
                .map(|raw| {
                    parse_token_id(raw).ok_or_else(|| NftError::InvalidTokenId {
                        value: raw.to_string(),
                        tx_id: tx.id.clone(),
                    })
                })
                .transpose()
        };
        let span = pairs.len().saturating_sub(1) as u64;
        let mut next = match (id_param(START_ID)?, id_param(END_ID)?) {
            (Some(start), _) => start,
            (None, Some(end)) => end.checked_sub(span).ok_or_else(|| NftError::InvalidTokenId {
                value: end.to_string(),
                tx_id: tx.id.clone(),
            })?,
            (None, None) => {
                if self.ctx.minted_in(&contract.address, &tx.id).await? {
                    debug!(tx_id = %tx.id, contract = %contract.address, "BatchMint already applied, skipping");
                    return Ok(());
                }
                self.ctx.max_token_id(&contract.address).await?.map_or(1, |max| max + 1)
            }
        };

        for pair in &pairs {
            let Some(adt) = pair.as_adt() else {
                warn!(tx_id = %tx.id, contract = %contract.address, "BatchMint entry is not a pair");
                continue;
            };
            let Some(to) = adt.str_arg(0) else {
                warn!(tx_id = %tx.id, contract = %contract.address, "BatchMint pair has no recipient");
                continue;
            };
            let token_uri = adt.str_arg(1).unwrap_or_default().to_string();
            self.ctx
                .mint(contract, tx, next, normalize_owner(to), token_uri, Standard::Zrc6)
                .await?;
            next += 1;
        }
        Ok(())
    }

    async fn transfer(&self, tx: &Transaction, contract: &Contract, log: &EventLog) -> Result<(), NftError> {
        let token_id = token_id_param(log, tx)?;
        let recipient = recipient_param(log, tx)?;
        self.ctx.transfer(contract, token_id, recipient).await
    }

    async fn burn(&self, tx: &Transaction, contract: &Contract, log: &EventLog) -> Result<(), NftError> {
        let token_id = token_id_param(log, tx)?;
        self.ctx.burn(contract, token_id, tx.block_num).await
    }

    async fn batch_burn(&self, tx: &Transaction, contract: &Contract, log: &EventLog) -> Result<(), NftError> {
        let ids = log
            .params
            .value(TOKEN_ID_LIST)
            .and_then(|v| v.as_str_list())
            .ok_or_else(|| NftError::MissingParam {
                event: log.event_name.clone(),
                param: TOKEN_ID_LIST.to_string(),
                tx_id: tx.id.clone(),
            })?;
        for raw in ids {
            let Some(token_id) = parse_token_id(&raw) else {
                warn!(tx_id = %tx.id, value = %raw, "skipping invalid token id in BatchBurn");
                continue;
            };
            self.ctx.burn(contract, token_id, tx.block_num).await?;
        }
        Ok(())
    }

    async fn set_base_uri(&self, tx: &Transaction, contract: &Contract, log: &EventLog) -> Result<(), NftError> {
        let base_uri = str_param(log, &["base_uri", "uri"], tx)?;
        let mut current = self.ctx.load_contract(contract).await?;
        current.base_uri = base_uri.clone();
        self.ctx.put(IndexRequest::update(current, Action::SetBaseUri));

        let tokens = self.ctx.cascade_base_uri(&contract.address, &base_uri).await?;
        info!(contract = %contract.address, base_uri = %base_uri, tokens, "base URI changed");
        Ok(())
    }

    async fn update_minters(
        &self,
        tx: &Transaction,
        contract: &Contract,
        log: &EventLog,
        add: bool,
    ) -> Result<(), NftError> {
        let minter = normalize_owner(&str_param(log, &["minter"], tx)?);
        let mut current = self.ctx.load_contract(contract).await?;
        if add {
            if !current.minters.contains(&minter) {
                current.minters.push(minter.clone());
            }
        } else {
            current.minters.retain(|m| m != &minter);
        }
        info!(contract = %contract.address, minter = %minter, add, "minters updated");
        self.ctx.put(IndexRequest::update(current, Action::UpdateMinters));
        Ok(())
    }
}

#[async_trait]
impl NftIndexer for Zrc6Indexer {
    fn standard(&self) -> Standard {
        Standard::Zrc6
    }

    fn context(&self) -> &NftContext {
        &self.ctx
    }

    async fn index_transaction(&self, tx: &Transaction, contract: &Contract) -> Result<(), NftError> {
        if !tx.receipt.success {
            return Ok(());
        }
        for log in tx.events_from(&contract.address) {
            let result = match log.event_name.as_str() {
                MINT => self.mint(tx, contract, log).await,
                BATCH_MINT => self.batch_mint(tx, contract, log).await,
                TRANSFER_FROM => self.transfer(tx, contract, log).await,
                BURN => self.burn(tx, contract, log).await,
                BATCH_BURN => self.batch_burn(tx, contract, log).await,
                SET_BASE_URI => self.set_base_uri(tx, contract, log).await,
                ADD_MINTER => self.update_minters(tx, contract, log, true).await,
                REMOVE_MINTER => self.update_minters(tx, contract, log, false).await,
                _ => continue,
            };
            isolate(result, tx, contract, &log.event_name)?;
        }
        Ok(())
    }
}
