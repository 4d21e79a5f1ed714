//! zilindex-zilliqa: Zilliqa RPC client, contract and NFT indexers, and
//! the index loop.

pub mod builder;
pub mod contract;
pub mod fetcher;
pub mod index_loop;
pub mod messaging;
pub mod metadata;
pub mod nft;
pub mod rewind;
pub mod rpc;

pub use builder::IndexerBuilder;
pub use contract::ContractIndexer;
pub use fetcher::{Fetcher, ZilliqaRpcClient};
pub use index_loop::IndexLoop;
pub use messaging::{ChannelPublisher, LogPublisher, MessagePublisher, Queue, RefreshEnvelope, RefreshTrigger};
pub use metadata::{refresh_metadata, MetadataError, MetadataFetcher};
pub use nft::{NftContext, NftError, NftIndexer, Zrc1Indexer, Zrc6Indexer};
pub use rewind::Rewinder;
pub use rpc::{HttpZilliqaClient, RpcError};
