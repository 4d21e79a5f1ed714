//! Storage documents and the write requests that carry them.

use serde::{Deserialize, Serialize};

use crate::types::{Contract, Nft, Transaction};

/// A logical collection in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Transactions,
    Contracts,
    Nfts,
}

impl Collection {
    /// Every collection, in rewind order.
    pub const ALL: [Collection; 3] = [Self::Transactions, Self::Contracts, Self::Nfts];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::Contracts => "contracts",
            Self::Nfts => "nfts",
        }
    }

    /// The physical collection name, namespaced by network and deployment.
    pub fn index_name(&self, network: &str, deployment: &str) -> String {
        format!("{network}.{deployment}.{}", self.as_str()).to_ascii_lowercase()
    }

    /// The document field holding the height the entity was created at.
    pub fn height_field(&self) -> &'static str {
        "blockNum"
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The semantic reason for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Plain indexing of a decoded entity.
    Index,
    Mint,
    Transfer,
    Burn,
    SetBaseUri,
    UpdateMinters,
    MetadataRefreshed,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Index => "index",
            Self::Mint => "mint",
            Self::Transfer => "transfer",
            Self::Burn => "burn",
            Self::SetBaseUri => "set_base_uri",
            Self::UpdateMinters => "update_minters",
            Self::MetadataRefreshed => "metadata_refreshed",
        };
        f.write_str(s)
    }
}

/// How a request is applied by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Write the whole document, creating it if absent.
    Create,
    /// Merge the document into the stored one.
    Update,
}

/// An entity payload bound for one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Transaction(Box<Transaction>),
    Contract(Box<Contract>),
    Nft(Box<Nft>),
}

impl Document {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Transaction(_) => Collection::Transactions,
            Self::Contract(_) => Collection::Contracts,
            Self::Nft(_) => Collection::Nfts,
        }
    }

    /// The stable identifier used as document ID and cache key.
    pub fn slug(&self) -> String {
        match self {
            Self::Transaction(tx) => tx.slug(),
            Self::Contract(c) => c.slug(),
            Self::Nft(n) => n.slug(),
        }
    }

    /// The height the entity was created at.
    pub fn height(&self) -> u64 {
        match self {
            Self::Transaction(tx) => tx.block_num,
            Self::Contract(c) => c.block_num,
            Self::Nft(n) => n.block_num,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Transaction(tx) => serde_json::to_value(tx),
            Self::Contract(c) => serde_json::to_value(c),
            Self::Nft(n) => serde_json::to_value(n),
        }
    }

    pub fn from_json(
        collection: Collection,
        json: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match collection {
            Collection::Transactions => Self::Transaction(Box::new(serde_json::from_value(json)?)),
            Collection::Contracts => Self::Contract(Box::new(serde_json::from_value(json)?)),
            Collection::Nfts => Self::Nft(Box::new(serde_json::from_value(json)?)),
        })
    }

    pub fn as_nft(&self) -> Option<&Nft> {
        match self {
            Self::Nft(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_contract(&self) -> Option<&Contract> {
        match self {
            Self::Contract(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_transaction(&self) -> Option<&Transaction> {
        match self {
            Self::Transaction(tx) => Some(tx),
            _ => None,
        }
    }

    pub fn into_nft(self) -> Option<Nft> {
        match self {
            Self::Nft(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_contract(self) -> Option<Contract> {
        match self {
            Self::Contract(c) => Some(*c),
            _ => None,
        }
    }
}

impl From<Transaction> for Document {
    fn from(tx: Transaction) -> Self {
        Self::Transaction(Box::new(tx))
    }
}

impl From<Contract> for Document {
    fn from(c: Contract) -> Self {
        Self::Contract(Box::new(c))
    }
}

impl From<Nft> for Document {
    fn from(n: Nft) -> Self {
        Self::Nft(Box::new(n))
    }
}

/// A pending mutation of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
    pub document: Document,
    pub op: Operation,
    pub action: Action,
}

impl IndexRequest {
    pub fn new(document: impl Into<Document>, op: Operation, action: Action) -> Self {
        Self {
            document: document.into(),
            op,
            action,
        }
    }

    /// A create-type request.
    pub fn create(document: impl Into<Document>, action: Action) -> Self {
        Self::new(document, Operation::Create, action)
    }

    /// A partial-update request.
    pub fn update(document: impl Into<Document>, action: Action) -> Self {
        Self::new(document, Operation::Update, action)
    }

    pub fn collection(&self) -> Collection {
        self.document.collection()
    }

    pub fn slug(&self) -> String {
        self.document.slug()
    }
}
