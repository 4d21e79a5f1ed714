//! ZRC-1 NFT indexer.

use async_trait::async_trait;

use zilindex_core::types::{Contract, EventLog, Standard, Transaction};

use super::{isolate, recipient_param, str_param, token_id_param, NftContext, NftError, NftIndexer};

const MINT: &str = "MintSuccess";
const TRANSFER: &str = "TransferSuccess";
const TRANSFER_FROM: &str = "TransferFromSuccess";
const BURN: &str = "BurnSuccess";

pub struct Zrc1Indexer {
    ctx: NftContext,
}

impl Zrc1Indexer {
    pub fn new(ctx: NftContext) -> Self {
        Self { ctx }
    }

    async fn mint(&self, tx: &Transaction, contract: &Contract, log: &EventLog) -> Result<(), NftError> {
        let token_id = token_id_param(log, tx)?;
        let owner = recipient_param(log, tx)?;
        let token_uri = str_param(log, &["token_uri"], tx).unwrap_or_default();
        self.ctx
            .mint(contract, tx, token_id, owner, token_uri, Standard::Zrc1)
            .await
            .map(|_| ())
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
}

#[async_trait]
impl NftIndexer for Zrc1Indexer {
    fn standard(&self) -> Standard {
        Standard::Zrc1
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
                TRANSFER | TRANSFER_FROM => self.transfer(tx, contract, log).await,
                BURN => self.burn(tx, contract, log).await,
                _ => continue,
            };
            isolate(result, tx, contract, &log.event_name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nft::tests::{context, contract, tx_with_events, CONTRACT};
    use serde_json::json;

    fn event(name: &str, params: serde_json::Value) -> serde_json::Value {
        json!({ "_eventname": name, "address": CONTRACT, "params": params })
    }

    #[tokio::test]
    async fn mint_transfer_burn() {
        let (_, ctx) = context();
        let ix = Zrc1Indexer::new(ctx.clone());
        let c = contract(true, false, "");

        let mint = tx_with_events(
            "m",
            10,
            json!([event("MintSuccess", json!([
                {"vname": "by", "type": "ByStr20", "value": "0x2222222222222222222222222222222222222222"},
                {"vname": "recipient", "type": "ByStr20", "value": "0x3333333333333333333333333333333333333333"},
                {"vname": "token", "type": "Uint256", "value": "1"}
            ]))]),
        );
        ix.index_transaction(&mint, &c).await.unwrap();
        let nft = ctx.lookup(CONTRACT, 1).await.unwrap();
        assert_eq!(nft.owner, "0x3333333333333333333333333333333333333333");
        assert_eq!(nft.standard, Standard::Zrc1);
        assert_eq!(nft.block_num, 10);

        let transfer = tx_with_events(
            "t",
            11,
            json!([event("TransferSuccess", json!([
                {"vname": "from", "type": "ByStr20", "value": "0x3333333333333333333333333333333333333333"},
                {"vname": "recipient", "type": "ByStr20", "value": "0x4444444444444444444444444444444444444444"},
                {"vname": "token", "type": "Uint256", "value": "1"}
            ]))]),
        );
        ix.index_transaction(&transfer, &c).await.unwrap();
        assert_eq!(
            ctx.lookup(CONTRACT, 1).await.unwrap().owner,
            "0x4444444444444444444444444444444444444444"
        );

        let burn = tx_with_events(
            "b",
            12,
            json!([event("BurnSuccess", json!([
                {"vname": "burner", "type": "ByStr20", "value": "0x4444444444444444444444444444444444444444"},
                {"vname": "token", "type": "Uint256", "value": "1"}
            ]))]),
        );
        ix.index_transaction(&burn, &c).await.unwrap();
        let nft = ctx.lookup(CONTRACT, 1).await.unwrap();
        assert!(nft.is_burned());
        assert_eq!(nft.burned_at, 12);
    }

    #[tokio::test]
    async fn bad_token_id_skips_only_that_event() {
        let (_, ctx) = context();
        let ix = Zrc1Indexer::new(ctx.clone());
        let c = contract(true, false, "");
        let tx = tx_with_events(
            "m",
            10,
            json!([
                event("MintSuccess", json!([
                    {"vname": "recipient", "type": "ByStr20", "value": "0x3333333333333333333333333333333333333333"},
                    {"vname": "token", "type": "Uint256", "value": "not-a-number"}
                ])),
                event("MintSuccess", json!([
                    {"vname": "recipient", "type": "ByStr20", "value": "0x3333333333333333333333333333333333333333"},
                    {"vname": "token", "type": "Uint256", "value": "2"}
                ]))
            ]),
        );
        ix.index_transaction(&tx, &c).await.unwrap();
        assert!(ctx.find(CONTRACT, 2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn transfer_of_unknown_token_is_not_found() {
        let (_, ctx) = context();
        let ix = Zrc1Indexer::new(ctx);
        let c = contract(true, false, "");
        let tx = tx_with_events(
            "t",
            11,
            json!([event("TransferFromSuccess", json!([
                {"vname": "recipient", "type": "ByStr20", "value": "0x4444444444444444444444444444444444444444"},
                {"vname": "token", "type": "Uint256", "value": "5"}
            ]))]),
        );
        let err = ix.index_transaction(&tx, &c).await.unwrap_err();
        assert!(matches!(err, NftError::NotFound { token_id: 5, .. }));
    }

    #[tokio::test]
    async fn events_from_other_contracts_are_ignored() {
        let (_, ctx) = context();
        let ix = Zrc1Indexer::new(ctx.clone());
        let c = contract(true, false, "");
        let tx = tx_with_events(
            "m",
            10,
            json!([{
                "_eventname": "MintSuccess",
                "address": "0x5555555555555555555555555555555555555555",
                "params": [
                    {"vname": "recipient", "type": "ByStr20", "value": "0x3333333333333333333333333333333333333333"},
                    {"vname": "token", "type": "Uint256", "value": "1"}
                ]
            }]),
        );
        ix.index_transaction(&tx, &c).await.unwrap();
        assert!(ctx.cache().is_empty());
    }
}
