//! In-memory document store.
//!
//! Keeps every collection as a map of slug to JSON document in RAM.
//! Used by tests and short-lived runs that don't need persistence.
//! Failures can be injected to exercise the write buffer's retry paths.

use async_trait::async_trait;
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use zilindex_core::document::{Collection, Document, IndexRequest, Operation};

use crate::store::{BulkResponse, DocumentStore, ItemFailure, Page, Query, Sort, StoreError};

/// A failure the next bulk call should report.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectedFailure {
    /// Fail the whole call as overloaded.
    Overloaded,
    /// Fail the whole call with a non-transient error.
    Backend(String),
    /// Reject one document but write the rest.
    RejectItem(String),
}

/// In-memory document store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStore {
    collections: Mutex<HashMap<Collection, BTreeMap<String, Json>>>,
    failures: Mutex<VecDeque<InjectedFailure>>,
    bulk_calls: Mutex<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for an upcoming bulk call. Failures are consumed in
    /// order, one per call.
    pub fn inject_failure(&self, failure: InjectedFailure) {
        self.failures.lock().unwrap().push_back(failure);
    }

    /// Number of bulk calls received, including failed ones.
    pub fn bulk_calls(&self) -> usize {
        *self.bulk_calls.lock().unwrap()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: Collection) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    /// Raw JSON of a stored document.
    pub fn raw(&self, collection: Collection, id: &str) -> Option<Json> {
        self.collections
            .lock()
            .unwrap()
            .get(&collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    fn apply(docs: &mut BTreeMap<String, Json>, id: String, op: Operation, body: Json) {
        match (op, docs.get_mut(&id)) {
            (Operation::Update, Some(Json::Object(existing))) => {
                if let Json::Object(fields) = body {
                    existing.extend(fields);
                }
            }
            _ => {
                docs.insert(id, body);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ensure_collection(&self, collection: Collection) -> Result<(), StoreError> {
        self.collections.lock().unwrap().entry(collection).or_default();
        Ok(())
    }

    async fn bulk(&self, requests: &[IndexRequest]) -> Result<BulkResponse, StoreError> {
        *self.bulk_calls.lock().unwrap() += 1;
        let injected = self.failures.lock().unwrap().pop_front();
        let rejected = match injected {
            Some(InjectedFailure::Overloaded) => {
                return Err(StoreError::Overloaded("injected overload".into()))
            }
            Some(InjectedFailure::Backend(reason)) => return Err(StoreError::Backend(reason)),
            Some(InjectedFailure::RejectItem(id)) => Some(id),
            None => None,
        };

        let mut response = BulkResponse::default();
        let mut collections = self.collections.lock().unwrap();
        for request in requests {
            let id = request.slug();
            if rejected.as_deref() == Some(id.as_str()) {
                response.failures.push(ItemFailure {
                    collection: request.collection(),
                    id,
                    reason: "injected rejection".into(),
                });
                continue;
            }
            let body = request.document.to_json()?;
            let docs = collections.entry(request.collection()).or_default();
            Self::apply(docs, id, request.op, body);
            response.written += 1;
        }
        Ok(response)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        match self.raw(collection, id) {
            Some(json) => Ok(Some(Document::from_json(collection, json)?)),
            None => Ok(None),
        }
    }

    async fn search(
        &self,
        collection: Collection,
        query: &Query,
        sort: Option<&Sort>,
        page: Page,
    ) -> Result<Vec<Document>, StoreError> {
        let mut hits: Vec<Json> = {
            let collections = self.collections.lock().unwrap();
            collections
                .get(&collection)
                .map(|docs| docs.values().filter(|d| query.matches(d)).cloned().collect())
                .unwrap_or_default()
        };

        if let Some(sort) = sort {
            let mut keyed: Vec<(Vec<Json>, Json)> =
                hits.into_iter().map(|hit| (sort.values(&hit), hit)).collect();
            keyed.sort_by(|(a, _), (b, _)| sort.compare(a, b));
            if let Some(after) = &page.after {
                keyed.retain(|(values, _)| sort.compare(values, after) == Ordering::Greater);
            }
            hits = keyed.into_iter().map(|(_, hit)| hit).collect();
        }

        hits.into_iter()
            .take(page.size)
            .map(|json| Document::from_json(collection, json).map_err(StoreError::from))
            .collect()
    }

    async fn delete_above_height(&self, collection: Collection, height: u64) -> Result<u64, StoreError> {
        let above = Query::above(collection.height_field(), height);
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|_, doc| !above.matches(doc));
        Ok((before - docs.len()) as u64)
    }
}
