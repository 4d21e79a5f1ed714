//! Elasticsearch-compatible document store over HTTP.
//!
//! Each [`Collection`] maps to one index named
//! `{network}.{deployment}.{collection}`. Writes go through `_bulk` with
//! `refresh=wait_for` so a flushed document is visible to the next search.
//! HTTP 429 and 503 surface as [`StoreError::Overloaded`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value as Json};
use std::time::Duration;
use tracing::{debug, info};

use zilindex_core::document::{Collection, Document, IndexRequest, Operation};

use crate::store::{BulkResponse, DocumentStore, ItemFailure, Page, Query, Sort, StoreError};

/// HTTP-backed document store.
#[derive(Clone)]
pub struct ElasticStore {
    url: String,
    http: reqwest::Client,
    network: String,
    deployment: String,
}

impl ElasticStore {
    pub fn new(
        url: impl Into<String>,
        network: impl Into<String>,
        deployment: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Http(e.to_string()))?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            http,
            network: network.into(),
            deployment: deployment.into(),
        })
    }

    /// The physical index name for `collection`.
    pub fn index(&self, collection: Collection) -> String {
        collection.index_name(&self.network, &self.deployment)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }

    /// Turn a non-success status into the matching error. `Ok(None)` for 404.
    async fn check(resp: reqwest::Response) -> Result<Option<reqwest::Response>, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(Some(resp));
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = resp.text().await.unwrap_or_default();
        let msg = format!("HTTP {}: {body}", status.as_u16());
        if is_overload(status) {
            Err(StoreError::Overloaded(msg))
        } else {
            Err(StoreError::Backend(msg))
        }
    }

    async fn json_of(resp: reqwest::Response) -> Result<Json, StoreError> {
        resp.json::<Json>().await.map_err(|e| StoreError::Http(e.to_string()))
    }

    /// NDJSON body for a `_bulk` call.
    fn bulk_body(&self, requests: &[IndexRequest]) -> Result<String, StoreError> {
        let mut body = String::new();
        for request in requests {
            let meta = json!({ "_index": self.index(request.collection()), "_id": request.slug() });
            let doc = request.document.to_json()?;
            let (action, source) = match request.op {
                Operation::Create => (json!({ "index": meta }), doc),
                Operation::Update => (
                    json!({ "update": meta }),
                    json!({ "doc": doc, "doc_as_upsert": true }),
                ),
            };
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&source)?);
            body.push('\n');
        }
        Ok(body)
    }
}

fn is_overload(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

/// Explicit field types for the height and every field used as a sort key
/// or exact-match filter. Everything else is mapped dynamically.
fn properties(collection: Collection) -> Json {
    let long = json!({ "type": "long" });
    let keyword = json!({ "type": "keyword" });
    let mut props = serde_json::Map::new();
    props.insert(collection.height_field().to_string(), long.clone());
    let (longs, keywords): (&[&str], &[&str]) = match collection {
        Collection::Transactions => (&["index"], &["id", "contractAddress"]),
        Collection::Contracts => (&[], &["address"]),
        Collection::Nfts => (&["tokenId", "burnedAt"], &["contract", "txId", "owner"]),
    };
    for field in longs {
        props.insert(field.to_string(), long.clone());
    }
    for field in keywords {
        props.insert(field.to_string(), keyword.clone());
    }
    Json::Object(props)
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Http(e.to_string())
}

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BulkReply {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<std::collections::HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<Json>,
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: Json,
}

fn error_reason(error: &Json) -> String {
    error
        .get("reason")
        .and_then(Json::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

#[async_trait]
impl DocumentStore for ElasticStore {
    async fn ensure_collection(&self, collection: Collection) -> Result<(), StoreError> {
        let index = self.index(collection);
        let head = self
            .http
            .head(self.endpoint(&index))
            .send()
            .await
            .map_err(transport)?;
        if head.status().is_success() {
            return Ok(());
        }
        let resp = self
            .http
            .put(self.endpoint(&index))
            .json(&json!({ "mappings": { "properties": properties(collection) } }))
            .send()
            .await
            .map_err(transport)?;
        // A concurrent creator wins with 400 resource_already_exists.
        if resp.status() == StatusCode::BAD_REQUEST {
            debug!(index = %index, "index already exists");
            return Ok(());
        }
        Self::check(resp).await?;
        info!(index = %index, "created index");
        Ok(())
    }

    async fn bulk(&self, requests: &[IndexRequest]) -> Result<BulkResponse, StoreError> {
        if requests.is_empty() {
            return Ok(BulkResponse::default());
        }
        let body = self.bulk_body(requests)?;
        let resp = self
            .http
            .post(self.endpoint("_bulk?refresh=wait_for"))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(transport)?;
        let Some(resp) = Self::check(resp).await? else {
            return Err(StoreError::Backend("bulk endpoint not found".into()));
        };
        let reply: BulkReply = serde_json::from_value(Self::json_of(resp).await?)?;

        let mut response = BulkResponse::default();
        if !reply.errors {
            response.written = requests.len();
            return Ok(response);
        }
        for (request, item) in requests.iter().zip(reply.items.iter()) {
            let outcome = item.values().next();
            match outcome.and_then(|o| o.error.as_ref().map(|e| (o.status, e))) {
                Some((status, error)) => response.failures.push(ItemFailure {
                    collection: request.collection(),
                    id: request.slug(),
                    reason: format!("status {status}: {}", error_reason(error)),
                }),
                None => response.written += 1,
            }
        }
        Ok(response)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        let path = format!("{}/_doc/{id}", self.index(collection));
        let resp = self
            .http
            .get(self.endpoint(&path))
            .send()
            .await
            .map_err(transport)?;
        let Some(resp) = Self::check(resp).await? else {
            return Ok(None);
        };
        let mut json = Self::json_of(resp).await?;
        match json.get_mut("_source").map(Json::take) {
            Some(source) => Ok(Some(Document::from_json(collection, source)?)),
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
        let mut body = json!({
            "query": query.to_dsl(),
            "size": page.size,
        });
        if let Some(sort) = sort {
            body["sort"] = sort.to_dsl();
            if let Some(after) = &page.after {
                body["search_after"] = Json::Array(after.clone());
            }
        }
        let path = format!("{}/_search", self.index(collection));
        let resp = self
            .http
            .post(self.endpoint(&path))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let Some(resp) = Self::check(resp).await? else {
            return Ok(Vec::new());
        };
        let reply: SearchReply = serde_json::from_value(Self::json_of(resp).await?)?;
        reply
            .hits
            .hits
            .into_iter()
            .map(|hit| Document::from_json(collection, hit.source).map_err(StoreError::from))
            .collect()
    }

    async fn delete_above_height(&self, collection: Collection, height: u64) -> Result<u64, StoreError> {
        let path = format!("{}/_delete_by_query?refresh=true", self.index(collection));
        let body = json!({ "query": Query::above(collection.height_field(), height).to_dsl() });
        let resp = self
            .http
            .post(self.endpoint(&path))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let Some(resp) = Self::check(resp).await? else {
            return Ok(0);
        };
        let reply = Self::json_of(resp).await?;
        Ok(reply.get("deleted").and_then(Json::as_u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zilindex_core::document::Action;
    use zilindex_core::types::{Nft, Standard};

    fn nft(id: u64) -> Nft {
        Nft {
            contract: "0xabc".into(),
            token_id: id,
            owner: "0x1".into(),
            token_uri: String::new(),
            base_uri: String::new(),
            tx_id: "t".into(),
            block_num: 9,
            burned_at: 0,
            standard: Standard::Zrc6,
            metadata: None,
        }
    }

    fn store(server: &MockServer) -> ElasticStore {
        ElasticStore::new(server.uri(), "testnet", "blue", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn bulk_body_is_ndjson_with_upserts() {
        let es = ElasticStore::new("http://es:9200/", "mainnet", "d", Duration::from_secs(1)).unwrap();
        let body = es
            .bulk_body(&[
                IndexRequest::create(nft(1), Action::Mint),
                IndexRequest::update(nft(2), Action::Transfer),
            ])
            .unwrap();
        let lines: Vec<Json> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["index"]["_index"], "mainnet.d.nfts");
        assert_eq!(lines[0]["index"]["_id"], "0xabc-1");
        assert_eq!(lines[2]["update"]["_id"], "0xabc-2");
        assert_eq!(lines[3]["doc_as_upsert"], true);
        assert_eq!(lines[3]["doc"]["tokenId"], 2);
    }

    #[tokio::test]
    async fn overload_status_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = store(&server)
            .bulk(&[IndexRequest::create(nft(1), Action::Mint)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Overloaded(_)));
    }

    #[tokio::test]
    async fn bulk_reports_item_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    { "index": { "_id": "0xabc-1", "status": 201 } },
                    { "index": { "_id": "0xabc-2", "status": 400,
                                 "error": { "type": "mapper_parsing_exception", "reason": "bad field" } } }
                ]
            })))
            .mount(&server)
            .await;

        let res = store(&server)
            .bulk(&[
                IndexRequest::create(nft(1), Action::Mint),
                IndexRequest::create(nft(2), Action::Mint),
            ])
            .await
            .unwrap();
        assert_eq!(res.written, 1);
        assert_eq!(res.failures.len(), 1);
        assert_eq!(res.failures[0].id, "0xabc-2");
        assert!(res.failures[0].reason.contains("bad field"));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/testnet.blue.nfts/_doc/0xabc-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        assert!(store(&server).get(Collection::Nfts, "0xabc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_decodes_hits() {
        let server = MockServer::start().await;
        let source = serde_json::to_value(nft(3)).unwrap();
        Mock::given(method("POST"))
            .and(path("/testnet.blue.nfts/_search"))
            .and(body_string_contains("\"contract\":\"0xabc\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": { "hits": [ { "_id": "0xabc-3", "_source": source } ] }
            })))
            .mount(&server)
            .await;

        let hits = store(&server)
            .search(Collection::Nfts, &Query::term("contract", "0xabc"), None, Page::first(10))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slug(), "0xabc-3");
    }

    #[test]
    fn sort_fields_are_mapped() {
        let props = properties(Collection::Transactions);
        assert_eq!(props["blockNum"]["type"], "long");
        assert_eq!(props["index"]["type"], "long");
        assert_eq!(props["id"]["type"], "keyword");
        assert_eq!(properties(Collection::Nfts)["tokenId"]["type"], "long");
    }

    #[tokio::test]
    async fn search_after_crosses_page_boundaries() {
        let server = MockServer::start().await;
        let hits = |ids: &[u64]| {
            let hits: Vec<Json> = ids
                .iter()
                .map(|&id| json!({ "_id": format!("0xabc-{id}"), "_source": serde_json::to_value(nft(id)).unwrap() }))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "hits": { "hits": hits } }))
        };
        // wiremock answers with the first mounted mock that matches.
        Mock::given(method("POST"))
            .and(path("/testnet.blue.nfts/_search"))
            .and(body_string_contains("\"search_after\":[3]"))
            .respond_with(hits(&[]))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/testnet.blue.nfts/_search"))
            .and(body_string_contains("\"search_after\":[2]"))
            .respond_with(hits(&[3]))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/testnet.blue.nfts/_search"))
            .respond_with(hits(&[1, 2]))
            .expect(1)
            .mount(&server)
            .await;

        let es = store(&server);
        let sort = Sort::asc("tokenId");
        let query = Query::term("contract", "0xabc");
        let mut page = Page::first(2);
        let mut seen = Vec::new();
        loop {
            let batch = es
                .search(Collection::Nfts, &query, Some(&sort), page.clone())
                .await
                .unwrap();
            let Some(last) = batch.last() else { break };
            page = page.after(&sort, last).unwrap();
            seen.extend(batch.iter().map(|d| d.as_nft().unwrap().token_id));
        }
        assert_eq!(seen, vec![1, 2, 3]);

        let bodies: Vec<Json> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        assert_eq!(bodies.len(), 3);
        assert!(bodies.iter().all(|b| b.get("from").is_none()));
        assert_eq!(bodies[0]["sort"], json!([{ "tokenId": { "order": "asc" } }]));
        assert!(bodies[0].get("search_after").is_none());
        assert_eq!(bodies[2]["search_after"], json!([3]));
    }

    #[tokio::test]
    async fn delete_by_query_returns_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/testnet.blue.transactions/_delete_by_query"))
            .and(body_string_contains("\"gt\":100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "deleted": 4 })))
            .mount(&server)
            .await;

        let n = store(&server)
            .delete_above_height(Collection::Transactions, 100)
            .await
            .unwrap();
        assert_eq!(n, 4);
    }
}
