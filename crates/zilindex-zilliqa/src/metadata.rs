//! Metadata enrichment fan-out.
//!
//! Fetching is delegated to a [`MetadataFetcher`]; this module only bounds
//! the concurrency and writes results back through the cache.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value as Json;
use thiserror::Error;
use tracing::{debug, warn};

use zilindex_core::document::{Action, IndexRequest};
use zilindex_core::types::Nft;
use zilindex_storage::IndexCache;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("token has no metadata URI")]
    NoUri,

    #[error("fetching {uri} failed: {reason}")]
    Fetch { uri: String, reason: String },

    #[error("metadata at {uri} is not valid JSON: {reason}")]
    Invalid { uri: String, reason: String },
}

/// Resolves a token's metadata URI to its JSON document.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Json, MetadataError>;
}

/// Fetch metadata for `nfts` with at most `concurrency` requests in flight
/// and buffer each success as a `MetadataRefreshed` update. Failures are
/// logged and left out. Returns the number of tokens refreshed once every
/// fetch has completed.
pub async fn refresh_metadata(
    cache: &IndexCache,
    fetcher: &dyn MetadataFetcher,
    nfts: Vec<Nft>,
    concurrency: usize,
) -> usize {
    if nfts.is_empty() {
        return 0;
    }
    let total = nfts.len();

    let refreshed = stream::iter(nfts)
        .map(|mut nft| async move {
            if nft.token_uri.is_empty() && nft.base_uri.is_empty() {
                return Err((nft, MetadataError::NoUri));
            }
            match fetcher.fetch(&nft.metadata_uri()).await {
                Ok(metadata) => {
                    nft.metadata = Some(metadata);
                    cache.put(IndexRequest::update(nft, Action::MetadataRefreshed));
                    Ok(())
                }
                Err(e) => Err((nft, e)),
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|result| async move {
            match result {
                Ok(()) => Some(()),
                Err((nft, e)) => {
                    warn!(
                        contract = %nft.contract,
                        token_id = nft.token_id,
                        error = %e,
                        "metadata refresh failed"
                    );
                    None
                }
            }
        })
        .count()
        .await;

    debug!(requested = total, refreshed, "metadata refresh done");
    refreshed
}
