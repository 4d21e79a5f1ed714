//! zilindex-storage: document store backends and the index write buffer.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`elastic`]: Elasticsearch-compatible HTTP API
//!
//! [`cache::IndexCache`] sits in front of either backend and merges writes
//! per entity before flushing them in bulk.

pub mod cache;
pub mod store;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "elastic")]
pub mod elastic;

pub use cache::{CacheError, IndexCache};
pub use store::{BulkResponse, DocumentStore, ItemFailure, Page, Query, Sort, SortKey, StoreError};

#[cfg(feature = "memory")]
pub use memory::InMemoryStore;

#[cfg(feature = "elastic")]
pub use elastic::ElasticStore;
