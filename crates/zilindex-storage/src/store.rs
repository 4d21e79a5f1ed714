//! The document store abstraction.
//!
//! A [`DocumentStore`] holds one keyed collection per [`Collection`] and
//! supports bulk writes, point reads, filtered search, and deletion by
//! height. Backends: [`crate::memory::InMemoryStore`] and
//! [`crate::elastic::ElasticStore`].

use async_trait::async_trait;
use serde_json::{json, Value as Json};
use std::cmp::Ordering;
use thiserror::Error;

use zilindex_core::document::{Collection, Document, IndexRequest};

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend is temporarily unable to accept work (e.g. HTTP 429/503).
    #[error("store overloaded: {0}")]
    Overloaded(String),

    /// Transport-level failure talking to the backend.
    #[error("store transport error: {0}")]
    Http(String),

    /// The backend rejected the request.
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns `true` if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Overloaded(_) | Self::Http(_))
    }
}

// ─── Bulk results ─────────────────────────────────────────────────────────────

/// One document a bulk call did not write.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub collection: Collection,
    pub id: String,
    pub reason: String,
}

/// Outcome of a bulk call that reached the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub written: usize,
    pub failures: Vec<ItemFailure>,
}

impl BulkResponse {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ─── Query model ──────────────────────────────────────────────────────────────

/// A structured filter over document fields.
///
/// Field names are document (camelCase) names; dotted paths address nested
/// fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    /// Exact match on a field.
    Term { field: String, value: Json },
    /// Field equals any of the values.
    Terms { field: String, values: Vec<Json> },
    /// Numeric range; unset bounds are open.
    Range {
        field: String,
        gt: Option<u64>,
        gte: Option<u64>,
        lt: Option<u64>,
        lte: Option<u64>,
    },
    Bool { must: Vec<Query>, must_not: Vec<Query> },
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Json>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms<V: Into<Json>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `field > height`.
    pub fn above(field: impl Into<String>, height: u64) -> Self {
        Self::Range {
            field: field.into(),
            gt: Some(height),
            gte: None,
            lt: None,
            lte: None,
        }
    }

    /// `from <= field <= to`.
    pub fn between(field: impl Into<String>, from: u64, to: u64) -> Self {
        Self::Range {
            field: field.into(),
            gt: None,
            gte: Some(from),
            lt: None,
            lte: Some(to),
        }
    }

    /// Conjunction of `queries`.
    pub fn all(queries: impl IntoIterator<Item = Query>) -> Self {
        Self::Bool {
            must: queries.into_iter().collect(),
            must_not: Vec::new(),
        }
    }

    /// Negate `query` inside this boolean query. Non-boolean queries are
    /// wrapped first.
    pub fn and_not(self, query: Query) -> Self {
        match self {
            Self::Bool { must, mut must_not } => {
                must_not.push(query);
                Self::Bool { must, must_not }
            }
            other => Self::Bool {
                must: vec![other],
                must_not: vec![query],
            },
        }
    }

    /// Evaluate the query against a JSON document.
    pub fn matches(&self, doc: &Json) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Term { field, value } => lookup(doc, field).map_or(false, |v| v == value),
            Self::Terms { field, values } => {
                lookup(doc, field).map_or(false, |v| values.iter().any(|x| x == v))
            }
            Self::Range { field, gt, gte, lt, lte } => {
                let Some(n) = lookup(doc, field).and_then(Json::as_u64) else {
                    return false;
                };
                gt.map_or(true, |b| n > b)
                    && gte.map_or(true, |b| n >= b)
                    && lt.map_or(true, |b| n < b)
                    && lte.map_or(true, |b| n <= b)
            }
            Self::Bool { must, must_not } => {
                must.iter().all(|q| q.matches(doc)) && !must_not.iter().any(|q| q.matches(doc))
            }
        }
    }

    /// Render as an Elasticsearch query DSL object.
    pub fn to_dsl(&self) -> Json {
        match self {
            Self::MatchAll => json!({ "match_all": {} }),
            Self::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Self::Terms { field, values } => json!({ "terms": { field.as_str(): values } }),
            Self::Range { field, gt, gte, lt, lte } => {
                let mut bounds = serde_json::Map::new();
                for (key, bound) in [("gt", gt), ("gte", gte), ("lt", lt), ("lte", lte)] {
                    if let Some(b) = bound {
                        bounds.insert(key.to_string(), json!(b));
                    }
                }
                json!({ "range": { field.as_str(): bounds } })
            }
            Self::Bool { must, must_not } => json!({
                "bool": {
                    "must": must.iter().map(Query::to_dsl).collect::<Vec<_>>(),
                    "must_not": must_not.iter().map(Query::to_dsl).collect::<Vec<_>>(),
                }
            }),
        }
    }
}

/// Resolve a dotted field path inside a JSON document.
pub(crate) fn lookup<'a>(doc: &'a Json, field: &str) -> Option<&'a Json> {
    field.split('.').try_fold(doc, |node, key| node.get(key))
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// Sort order for search results: keys compared left to right.
///
/// Cursor paging needs the keys to identify a document uniquely, so a
/// non-unique leading key should be followed by a tiebreak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub keys: Vec<SortKey>,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { keys: Vec::new() }.then_asc(field)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { keys: Vec::new() }.then_desc(field)
    }

    pub fn then_asc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn then_desc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            field: field.into(),
            descending: true,
        });
        self
    }

    /// The sort values of `doc`, one per key. Missing fields become null.
    pub fn values(&self, doc: &Json) -> Vec<Json> {
        self.keys
            .iter()
            .map(|key| lookup(doc, &key.field).cloned().unwrap_or(Json::Null))
            .collect()
    }

    /// Order two documents' sort values.
    pub fn compare(&self, a: &[Json], b: &[Json]) -> Ordering {
        for (key, (x, y)) in self.keys.iter().zip(a.iter().zip(b)) {
            let ord = compare_values(x, y);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Render as an Elasticsearch `sort` array.
    pub fn to_dsl(&self) -> Json {
        Json::Array(
            self.keys
                .iter()
                .map(|key| {
                    let order = if key.descending { "desc" } else { "asc" };
                    json!({ key.field.as_str(): { "order": order } })
                })
                .collect(),
        )
    }
}

/// Numbers numerically, strings lexically, null before anything else.
fn compare_values(a: &Json, b: &Json) -> Ordering {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Json::String(x), Json::String(y)) => x.cmp(y),
        (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
        (Json::Null, Json::Null) => Ordering::Equal,
        (Json::Null, _) => Ordering::Less,
        (_, Json::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Cursor pagination: up to `size` hits sorting strictly after `after`.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub size: usize,
    /// Sort values of the last hit of the previous page.
    pub after: Option<Vec<Json>>,
}

impl Page {
    pub fn first(size: usize) -> Self {
        Self { size, after: None }
    }

    /// The page following `last`, the final hit of this one under `sort`.
    pub fn after(&self, sort: &Sort, last: &Document) -> Result<Self, StoreError> {
        Ok(Self {
            size: self.size,
            after: Some(sort.values(&last.to_json()?)),
        })
    }
}

// ─── DocumentStore ────────────────────────────────────────────────────────────

/// Backend holding the indexed collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the collection if it does not exist.
    async fn ensure_collection(&self, collection: Collection) -> Result<(), StoreError>;

    /// Write a batch of requests. `Err` means the call as a whole failed;
    /// per-document rejections are reported in the response.
    async fn bulk(&self, requests: &[IndexRequest]) -> Result<BulkResponse, StoreError>;

    /// Point read by slug.
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    /// Hits matching `query`, ordered by `sort`. A cursor in `page` is only
    /// honoured together with a sort.
    async fn search(
        &self,
        collection: Collection,
        query: &Query,
        sort: Option<&Sort>,
        page: Page,
    ) -> Result<Vec<Document>, StoreError>;

    /// Delete every document whose height is strictly greater than `height`.
    /// Returns the number deleted.
    async fn delete_above_height(&self, collection: Collection, height: u64) -> Result<u64, StoreError>;

    /// The highest height present in the collection, if any.
    async fn max_height(&self, collection: Collection) -> Result<Option<u64>, StoreError> {
        let top = self
            .search(
                collection,
                &Query::MatchAll,
                Some(&Sort::desc(collection.height_field())),
                Page::first(1),
            )
            .await?;
        Ok(top.first().map(Document::height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Json {
        json!({
            "contract": "0xabc",
            "tokenId": 7,
            "blockNum": 120,
            "burnedAt": 0,
            "receipt": { "success": true }
        })
    }

    #[test]
    fn term_and_terms() {
        assert!(Query::term("contract", "0xabc").matches(&doc()));
        assert!(!Query::term("contract", "0xdef").matches(&doc()));
        assert!(Query::terms("tokenId", [1, 7]).matches(&doc()));
        assert!(!Query::term("missing", 1).matches(&doc()));
    }

    #[test]
    fn range_bounds() {
        assert!(Query::above("blockNum", 119).matches(&doc()));
        assert!(!Query::above("blockNum", 120).matches(&doc()));
        assert!(Query::between("blockNum", 120, 120).matches(&doc()));
        assert!(!Query::above("contract", 0).matches(&doc()));
    }

    #[test]
    fn bool_and_nested_fields() {
        let q = Query::all([Query::term("contract", "0xabc"), Query::term("receipt.success", true)])
            .and_not(Query::above("burnedAt", 0));
        assert!(q.matches(&doc()));

        let mut burned = doc();
        burned["burnedAt"] = json!(150);
        assert!(!q.matches(&burned));
    }

    #[test]
    fn dsl_rendering() {
        let q = Query::all([Query::term("contract", "0xabc")]).and_not(Query::above("blockNum", 10));
        assert_eq!(
            q.to_dsl(),
            json!({
                "bool": {
                    "must": [{ "term": { "contract": "0xabc" } }],
                    "must_not": [{ "range": { "blockNum": { "gt": 10 } } }]
                }
            })
        );
    }

    #[test]
    fn only_overload_and_transport_errors_are_transient() {
        assert!(StoreError::Overloaded("429".into()).is_transient());
        assert!(StoreError::Http("reset".into()).is_transient());
        assert!(!StoreError::Backend("mapping".into()).is_transient());
    }

    #[test]
    fn sort_values_and_tiebreak() {
        let sort = Sort::asc("blockNum").then_desc("tokenId").then_asc("missing");
        assert_eq!(sort.values(&doc()), vec![json!(120), json!(7), Json::Null]);

        let a = [json!(120), json!(7), Json::Null];
        let b = [json!(120), json!(3), Json::Null];
        assert_eq!(sort.compare(&a, &b), Ordering::Less);
        assert_eq!(sort.compare(&a, &a), Ordering::Equal);
        assert_eq!(
            Sort::asc("id").compare(&[Json::Null], &[json!("00")]),
            Ordering::Less
        );
        assert_eq!(
            sort.to_dsl(),
            json!([
                { "blockNum": { "order": "asc" } },
                { "tokenId": { "order": "desc" } },
                { "missing": { "order": "asc" } }
            ])
        );
    }

    #[test]
    fn page_advances_past_the_last_hit() {
        use zilindex_core::types::{Nft, Standard};
        let last = Nft {
            contract: "0xabc".into(),
            token_id: 9,
            owner: "0x1".into(),
            token_uri: String::new(),
            base_uri: String::new(),
            tx_id: "t".into(),
            block_num: 40,
            burned_at: 0,
            standard: Standard::Zrc6,
            metadata: None,
        };
        let sort = Sort::asc("blockNum").then_asc("tokenId");
        let next = Page::first(10).after(&sort, &last.into()).unwrap();
        assert_eq!(next.size, 10);
        assert_eq!(next.after, Some(vec![json!(40), json!(9)]));
    }
}
