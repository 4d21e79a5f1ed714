//! Indexed entities: transactions, contracts and NFTs.

use serde::{Deserialize, Serialize};

use crate::value::Param;

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A decoded ledger transaction.
///
/// Immutable once decoded; identified by its ledger transaction ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub block_num: u64,
    /// Position within its block, as listed by the node.
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub gas_limit: String,
    #[serde(default)]
    pub gas_price: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub signature: String,

    #[serde(default)]
    pub sender_pub_key: String,
    #[serde(default)]
    pub sender_addr: String,
    #[serde(default)]
    pub sender_bech32: String,

    #[serde(default)]
    pub to_addr: String,
    #[serde(default)]
    pub to_bech32: String,

    /// Deployed source, for contract creations.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default)]
    pub data: Option<TxData>,
    pub receipt: Receipt,

    pub is_contract_creation: bool,
    pub is_contract_execution: bool,
    /// The contract touched by this transaction (raw form).
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub contract_address_bech32: Option<String>,
}

impl Transaction {
    /// The storage/cache identifier.
    pub fn slug(&self) -> String {
        self.id.clone()
    }

    /// Event logs emitted by `address`.
    pub fn events_from<'a>(&'a self, address: &'a str) -> impl Iterator<Item = &'a EventLog> + 'a {
        self.receipt
            .event_logs
            .iter()
            .filter(move |log| log.address.eq_ignore_ascii_case(address))
    }

    /// Returns `true` if any event log has the given name.
    pub fn has_event(&self, name: &str) -> bool {
        self.receipt.event_logs.iter().any(|log| log.event_name == name)
    }

    /// Returns `true` if any transition has the given tag.
    pub fn has_transition(&self, tag: &str) -> bool {
        self.receipt.transitions.iter().any(|t| t.msg.tag == tag)
    }

    /// Distinct addresses that emitted event logs, in first-seen order.
    pub fn event_addresses(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for log in &self.receipt.event_logs {
            if !out.iter().any(|a| a.eq_ignore_ascii_case(&log.address)) {
                out.push(log.address.clone());
            }
        }
        out
    }
}

/// Decoded invocation data: the called transition's tag and its params.
///
/// Deployments carry the init params with an empty tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxData {
    #[serde(rename = "_tag", default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default)]
    pub params: Vec<Param>,
}

/// Transaction receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub success: bool,
    #[serde(default)]
    pub accepted: Option<bool>,
    #[serde(default)]
    pub cumulative_gas: String,
    #[serde(default)]
    pub epoch_num: String,
    #[serde(default)]
    pub event_logs: Vec<EventLog>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// A pure notification emitted by a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub event_name: String,
    /// Emitting contract (raw form).
    pub address: String,
    #[serde(default)]
    pub params: Vec<Param>,
}

/// A contract-to-contract message emitted during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Sending contract (raw form).
    pub addr: String,
    #[serde(default)]
    pub depth: u32,
    pub msg: TransitionMsg,
}

/// The message carried by a [`Transition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionMsg {
    #[serde(rename = "_tag")]
    pub tag: String,
    #[serde(rename = "_recipient")]
    pub recipient: String,
    #[serde(rename = "_amount", default)]
    pub amount: String,
    #[serde(default)]
    pub params: Vec<Param>,
}

// ─── Contract ─────────────────────────────────────────────────────────────────

/// A field declared in contract source: `field <name> : <type>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// A deployed smart contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub address: String,
    pub address_bech32: String,
    pub block_num: u64,
    /// The deployment transaction.
    pub tx_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    /// Deploy-time init values.
    #[serde(default)]
    pub immutable_params: Vec<Param>,
    /// Fields declared in source.
    #[serde(default)]
    pub mutable_params: Vec<FieldDecl>,
    /// Whitespace-normalised transition signatures.
    #[serde(default)]
    pub transitions: Vec<String>,
    #[serde(default)]
    pub zrc1: bool,
    #[serde(default)]
    pub zrc6: bool,
    #[serde(default)]
    pub base_uri: String,
    /// Secondary addresses that mint on this contract's behalf.
    #[serde(default)]
    pub minters: Vec<String>,
}

impl Contract {
    /// The storage/cache identifier.
    pub fn slug(&self) -> String {
        self.address.clone()
    }

    /// Returns `true` if the contract matched any NFT standard.
    pub fn is_nft(&self) -> bool {
        self.zrc1 || self.zrc6
    }

    /// The contract's address followed by its minters.
    pub fn history_addresses(&self) -> Vec<String> {
        std::iter::once(self.address.clone())
            .chain(self.minters.iter().cloned())
            .collect()
    }
}

// ─── NFT ──────────────────────────────────────────────────────────────────────

/// The token standard an NFT was minted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Standard {
    Zrc1,
    Zrc6,
}

impl std::fmt::Display for Standard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zrc1 => write!(f, "ZRC-1"),
            Self::Zrc6 => write!(f, "ZRC-6"),
        }
    }
}

/// A non-fungible token, identified by `(contract, token_id)`.
///
/// Never deleted by the pipeline: a burn sets `burned_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nft {
    pub contract: String,
    pub token_id: u64,
    pub owner: String,
    #[serde(default)]
    pub token_uri: String,
    #[serde(default)]
    pub base_uri: String,
    /// Mint transaction.
    pub tx_id: String,
    /// Mint height.
    pub block_num: u64,
    /// Burn height; 0 means not burned.
    #[serde(default)]
    pub burned_at: u64,
    pub standard: Standard,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Nft {
    /// The stable identifier for a token.
    pub fn slug_for(contract: &str, token_id: u64) -> String {
        format!("{}-{}", contract.to_ascii_lowercase(), token_id)
    }

    /// The storage/cache identifier.
    pub fn slug(&self) -> String {
        Self::slug_for(&self.contract, self.token_id)
    }

    pub fn is_burned(&self) -> bool {
        self.burned_at != 0
    }

    /// Record a burn at `height`. The burn height never moves backwards.
    pub fn burn(&mut self, height: u64) {
        self.burned_at = self.burned_at.max(height);
    }

    /// The URI metadata should be fetched from.
    pub fn metadata_uri(&self) -> String {
        if !self.token_uri.is_empty() {
            self.token_uri.clone()
        } else {
            format!("{}{}", self.base_uri, self.token_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nft() -> Nft {
        Nft {
            contract: "0xABC".into(),
            token_id: 7,
            owner: "0x1".into(),
            token_uri: String::new(),
            base_uri: "ipfs://base/".into(),
            tx_id: "tx".into(),
            block_num: 10,
            burned_at: 0,
            standard: Standard::Zrc6,
            metadata: None,
        }
    }

    #[test]
    fn nft_slug_is_lowercase_pair() {
        assert_eq!(nft().slug(), "0xabc-7");
        assert_eq!(Nft::slug_for("0xAbC", 7), "0xabc-7");
    }

    #[test]
    fn burn_height_never_decreases() {
        let mut n = nft();
        n.burn(120);
        n.burn(90);
        assert_eq!(n.burned_at, 120);
        n.burn(0);
        assert_eq!(n.burned_at, 120);
        assert!(n.is_burned());
    }

    #[test]
    fn metadata_uri_falls_back_to_base() {
        let mut n = nft();
        assert_eq!(n.metadata_uri(), "ipfs://base/7");
        n.token_uri = "ipfs://x".into();
        assert_eq!(n.metadata_uri(), "ipfs://x");
    }

    #[test]
    fn nft_serializes_camel_case() {
        let json = serde_json::to_value(nft()).unwrap();
        assert_eq!(json["tokenId"], 7);
        assert_eq!(json["burnedAt"], 0);
        assert_eq!(json["standard"], "zrc6");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn history_addresses_include_minters() {
        let c = Contract {
            address: "0xa".into(),
            address_bech32: String::new(),
            block_num: 1,
            tx_id: "t".into(),
            name: "N".into(),
            code: String::new(),
            immutable_params: vec![],
            mutable_params: vec![],
            transitions: vec![],
            zrc1: false,
            zrc6: true,
            base_uri: String::new(),
            minters: vec!["0xb".into()],
        };
        assert_eq!(c.history_addresses(), vec!["0xa", "0xb"]);
        assert!(c.is_nft());
    }
}
