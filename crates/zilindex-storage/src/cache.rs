//! Write-buffered index cache.
//!
//! Every mutation produced while indexing goes through [`IndexCache::put`].
//! Pending requests are keyed by `(collection, slug)` and merged in place,
//! so a burst of writes to one entity costs a single backend write. Reads
//! through [`IndexCache::get`] see pending state before it is flushed.
//!
//! Merge rules for a key that is already pending:
//!
//! | pending     | incoming action | result                              |
//! |-------------|-----------------|-------------------------------------|
//! | transaction | any             | unchanged                           |
//! | NFT         | `Transfer`      | owner only                          |
//! | NFT         | `Burn`          | burn height, never decreasing       |
//! | NFT         | `SetBaseUri`    | base URI only                       |
//! | NFT         | `MetadataRefreshed` | metadata only                   |
//! | contract    | `SetBaseUri`    | base URI only                       |
//! | contract    | `UpdateMinters` | minters only                        |
//! | any         | other           | payload replaced                    |
//!
//! A pending create stays a create whatever merges into it.

use indexmap::IndexMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use zilindex_core::document::{Action, Collection, Document, IndexRequest, Operation};
use zilindex_core::events::{EventBus, IndexEvent};
use zilindex_core::indexer::CacheConfig;
use zilindex_core::retry::RetryPolicy;

use crate::store::{BulkResponse, DocumentStore, StoreError};

/// A flush failure the pipeline cannot recover from.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend rejected a bulk call, or stayed overloaded past the
    /// retry budget.
    #[error("bulk write failed: {0}")]
    Store(#[source] StoreError),

    /// One document kept failing after its individual retries.
    #[error("could not write {collection}/{id} after {attempts} retries: {reason}")]
    Document {
        collection: Collection,
        id: String,
        attempts: u32,
        reason: String,
    },
}

type CacheKey = (Collection, String);

struct Pending {
    request: IndexRequest,
    /// Every distinct action merged into this entry.
    actions: Vec<Action>,
    /// Bumped on each put; a flush only retires entries it actually wrote.
    version: u64,
}

#[derive(Default)]
struct Buffer {
    entries: IndexMap<CacheKey, Pending>,
    clock: u64,
}

/// Keyed, merging write buffer in front of a [`DocumentStore`].
pub struct IndexCache {
    store: Arc<dyn DocumentStore>,
    events: EventBus,
    config: CacheConfig,
    retry: RetryPolicy,
    buffer: Mutex<Buffer>,
    /// Serializes flushes.
    flush_lock: tokio::sync::Mutex<()>,
}

impl IndexCache {
    pub fn new(store: Arc<dyn DocumentStore>, events: EventBus, config: CacheConfig) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            store,
            events,
            config,
            retry,
            buffer: Mutex::new(Buffer::default()),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer a write, merging it into any pending write for the same key.
    pub fn put(&self, request: IndexRequest) {
        let key = (request.collection(), request.slug());
        let mut buffer = self.buffer.lock().unwrap();
        buffer.clock += 1;
        let version = buffer.clock;
        match buffer.entries.get_mut(&key) {
            Some(pending) => {
                if merge(&mut pending.request, request) {
                    let action = pending.request.action;
                    if !pending.actions.contains(&action) {
                        pending.actions.push(action);
                    }
                    pending.version = version;
                }
            }
            None => {
                let actions = vec![request.action];
                buffer.entries.insert(
                    key,
                    Pending {
                        request,
                        actions,
                        version,
                    },
                );
            }
        }
    }

    /// The pending state of a document, if any.
    pub fn get(&self, collection: Collection, id: &str) -> Option<Document> {
        self.buffer
            .lock()
            .unwrap()
            .entries
            .get(&(collection, id.to_string()))
            .map(|p| p.request.document.clone())
    }

    /// Pending state if present, otherwise the stored document.
    pub async fn get_or_load(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        if let Some(doc) = self.get(collection, id) {
            return Ok(Some(doc));
        }
        self.store.get(collection, id).await
    }

    /// Pending documents in `collection` matching `filter`.
    pub fn pending_where(&self, collection: Collection, filter: impl Fn(&Document) -> bool) -> Vec<Document> {
        self.buffer
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|(_, p)| &p.request.document)
            .filter(|doc| filter(doc))
            .cloned()
            .collect()
    }

    /// Pending documents in `collection` that had any of `actions` merged in
    /// since they were last written.
    pub fn pending_with_actions(&self, collection: Collection, actions: &[Action]) -> Vec<Document> {
        self.buffer
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|((c, _), p)| *c == collection && p.actions.iter().any(|a| actions.contains(a)))
            .map(|(_, p)| p.request.document.clone())
            .collect()
    }

    /// Returns `true` once the pending count reached the flush threshold.
    pub fn should_flush(&self) -> bool {
        self.len() >= self.config.flush_threshold
    }

    /// Flush if the pending count reached the configured threshold.
    /// Returns the number of documents written.
    pub async fn maybe_flush(&self) -> Result<usize, CacheError> {
        if self.should_flush() {
            self.flush().await
        } else {
            Ok(0)
        }
    }

    /// Write every pending entry to the store in bulk chunks, then publish
    /// events for the written documents. On error nothing is retired, so the
    /// entries remain pending.
    pub async fn flush(&self) -> Result<usize, CacheError> {
        let _guard = self.flush_lock.lock().await;

        let snapshot: Vec<(CacheKey, u64, IndexRequest, Vec<Action>)> = {
            let buffer = self.buffer.lock().unwrap();
            buffer
                .entries
                .iter()
                .map(|(k, p)| (k.clone(), p.version, p.request.clone(), p.actions.clone()))
                .collect()
        };
        if snapshot.is_empty() {
            return Ok(0);
        }

        let requests: Vec<IndexRequest> = snapshot.iter().map(|(_, _, r, _)| r.clone()).collect();
        for chunk in requests.chunks(self.config.bulk_chunk_size.max(1)) {
            self.write_chunk(chunk).await?;
        }

        {
            let mut buffer = self.buffer.lock().unwrap();
            for (key, version, _, actions) in &snapshot {
                let Some(pending) = buffer.entries.get_mut(key) else {
                    continue;
                };
                if pending.version == *version {
                    buffer.entries.shift_remove(key);
                } else {
                    // Re-put during the flush: keep it, minus what was announced.
                    pending.actions.retain(|a| !actions.contains(a));
                }
            }
        }

        let mut published = 0usize;
        for (_, _, request, actions) in snapshot.iter() {
            for action in actions.iter().filter(|a| self.config.event_actions.contains(a)) {
                self.events
                    .publish(IndexEvent::new(*action, request.document.clone()));
                published += 1;
            }
        }

        info!(documents = requests.len(), events = published, "flushed write buffer");
        Ok(requests.len())
    }

    async fn write_chunk(&self, chunk: &[IndexRequest]) -> Result<(), CacheError> {
        let response = self.bulk_with_retry(chunk).await?;
        debug!(written = response.written, failed = response.failures.len(), "bulk chunk");
        for failure in response.failures {
            let request = chunk
                .iter()
                .find(|r| r.collection() == failure.collection && r.slug() == failure.id);
            match request {
                Some(request) => self.retry_document(request, failure.reason).await?,
                None => warn!(id = %failure.id, "store reported a failure for an unknown document"),
            }
        }
        Ok(())
    }

    /// One bulk call, retried once immediately and then with backoff while
    /// the backend reports a transient error.
    async fn bulk_with_retry(&self, requests: &[IndexRequest]) -> Result<BulkResponse, CacheError> {
        let mut retried_immediately = false;
        let mut attempt = 0u32;
        loop {
            match self.store.bulk(requests).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    if !retried_immediately {
                        retried_immediately = true;
                        warn!(error = %e, "bulk write failed, retrying immediately");
                        continue;
                    }
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis(),
                                error = %e,
                                "store overloaded, backing off"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(attempt, error = %e, "store still overloaded after retries");
                            return Err(CacheError::Store(e));
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "bulk write rejected");
                    return Err(CacheError::Store(e));
                }
            }
        }
    }

    async fn retry_document(&self, request: &IndexRequest, mut reason: String) -> Result<(), CacheError> {
        let id = request.slug();
        for attempt in 1..=self.config.item_retries {
            let delay = self.retry.next_delay(attempt).unwrap_or_default();
            warn!(id = %id, attempt, reason = %reason, "retrying rejected document");
            tokio::time::sleep(delay).await;
            let response = self.bulk_with_retry(std::slice::from_ref(request)).await?;
            match response.failures.into_iter().next() {
                None => return Ok(()),
                Some(failure) => reason = failure.reason,
            }
        }
        error!(id = %id, reason = %reason, "document could not be written");
        Err(CacheError::Document {
            collection: request.collection(),
            id,
            attempts: self.config.item_retries,
            reason,
        })
    }
}

/// Merge `incoming` into `pending`. Returns `false` when the merge was a
/// no-op.
fn merge(pending: &mut IndexRequest, incoming: IndexRequest) -> bool {
    let IndexRequest {
        document,
        op,
        action,
    } = incoming;

    match (&mut pending.document, document) {
        (Document::Transaction(_), Document::Transaction(_)) => return false,
        (Document::Nft(current), Document::Nft(next)) => match action {
            Action::Transfer => current.owner = next.owner,
            Action::Burn => current.burn(next.burned_at),
            Action::SetBaseUri => current.base_uri = next.base_uri,
            Action::MetadataRefreshed => current.metadata = next.metadata,
            _ => *current = next,
        },
        (Document::Contract(current), Document::Contract(next)) => match action {
            Action::SetBaseUri => current.base_uri = next.base_uri,
            Action::UpdateMinters => current.minters = next.minters,
            _ => *current = next,
        },
        (slot, next) => *slot = next,
    }

    if pending.op != Operation::Create {
        pending.op = op;
    }
    pending.action = action;
    true
}
