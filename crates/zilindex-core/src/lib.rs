//! zilindex-core: foundation for the Zilliqa NFT indexer.
//!
//! # Architecture
//!
//! ```text
//! RPC tx bodies ─► decoder ─► Transaction ─┬─► classifier ─► Contract
//!                                          └─► NFT indexers ─► Nft
//!                                                   │
//!                     IndexRequest ◄────────────────┘
//!                          │
//!                   write buffer (zilindex-storage) ─► store ─► EventBus
//! ```

pub mod address;
pub mod classifier;
pub mod cursor;
pub mod decoder;
pub mod document;
pub mod error;
pub mod events;
pub mod indexer;
pub mod retry;
pub mod types;
pub mod value;

pub use classifier::{Classification, Classifier, OverrideTable, PatternParser, SourceParser};
pub use cursor::Cursor;
pub use decoder::{decode_transaction, decode_transaction_json, RawTransaction};
pub use document::{Action, Collection, Document, IndexRequest, Operation};
pub use error::{DecodeError, IndexerError};
pub use events::{EventBus, IndexEvent};
pub use indexer::{CacheConfig, IndexerConfig, IndexerState, NftConfig, RpcConfig};
pub use retry::{RetryConfig, RetryPolicy, Transient};
pub use types::{Contract, EventLog, FieldDecl, Nft, Receipt, Standard, Transaction, Transition, TxData};
pub use value::{Adt, Param, Params, Value};
