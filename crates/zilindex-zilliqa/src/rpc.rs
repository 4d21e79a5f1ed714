//! HTTP JSON-RPC client for a Zilliqa node, backed by `reqwest`.
//!
//! Every call is sent as a JSON-RPC batch, chunked to `RpcConfig::batch_size`.
//! Transport errors and timeouts are retried a fixed number of times with a
//! fixed delay; node-side errors are returned per request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use zilindex_core::address;
use zilindex_core::indexer::RpcConfig;
use zilindex_core::retry::{RetryPolicy, Transient};

use crate::fetcher::ZilliqaRpcClient;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection refused, reset, non-2xx status, ...
    #[error("HTTP error: {0}")]
    Transport(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl RpcError {
    /// Returns `true` if this error is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl Transient for RpcError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

// ─── Wire types ───────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Json>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Json>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
}

impl From<JsonRpcError> for RpcError {
    fn from(e: JsonRpcError) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Json,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the node's error.
    pub fn into_result(self) -> Result<Json, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Json::Null)),
        }
    }

    /// The numeric request ID. Some nodes echo it back as a string.
    fn numeric_id(&self) -> Option<u64> {
        match &self.id {
            Json::Number(n) => n.as_u64(),
            Json::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Returns `true` for the node's "block has no transactions" error, which
/// means an empty block rather than a failure.
pub fn is_empty_block_error(err: &JsonRpcError) -> bool {
    err.message.to_ascii_lowercase().contains("no transactions")
}

/// Returns `true` for the node's answer that a transaction ID created no
/// contract. Any other error on an address lookup is a real failure.
pub fn is_not_contract_error(err: &JsonRpcError) -> bool {
    let message = err.message.to_ascii_lowercase();
    message.contains("not a contract") || message.contains("not contract")
}

// ─── HttpZilliqaClient ────────────────────────────────────────────────────────

/// Batched JSON-RPC client over HTTP.
pub struct HttpZilliqaClient {
    url: String,
    http: reqwest::Client,
    config: RpcConfig,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl HttpZilliqaClient {
    pub fn new(url: impl Into<String>, config: RpcConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(config.retry_config()),
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send_once(&self, reqs: &[JsonRpcRequest]) -> Result<Vec<JsonRpcResponse>, RpcError> {
        let resp = self
            .http
            .post(&self.url)
            .json(reqs)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Transport(format!("HTTP {status}: {body}")));
        }

        resp.json::<Vec<JsonRpcResponse>>()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::Timeout {
                ms: self.config.timeout_ms,
            }
        } else if e.is_decode() {
            RpcError::InvalidResponse(e.to_string())
        } else {
            RpcError::Transport(e.to_string())
        }
    }

    /// Send one batch, retrying transient failures.
    async fn send_batch(&self, reqs: &[JsonRpcRequest]) -> Result<Vec<JsonRpcResponse>, RpcError> {
        self.retry.retry(&self.url, || self.send_once(reqs)).await
    }

    /// Call `method` once per params entry, batched. Results come back in
    /// input order.
    pub async fn call_many(
        &self,
        method: &str,
        params: Vec<Vec<Json>>,
    ) -> Result<Vec<Result<Json, JsonRpcError>>, RpcError> {
        let mut out = Vec::with_capacity(params.len());
        for chunk in params.chunks(self.config.batch_size.max(1)) {
            let reqs: Vec<JsonRpcRequest> = chunk
                .iter()
                .map(|p| JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, p.clone()))
                .collect();
            let mut responses = self.send_batch(&reqs).await?;
            if responses.len() != reqs.len() {
                return Err(RpcError::InvalidResponse(format!(
                    "{method}: sent {} requests, got {} responses",
                    reqs.len(),
                    responses.len()
                )));
            }
            responses.sort_by_key(|r| r.numeric_id().unwrap_or(u64::MAX));
            for (req, resp) in reqs.iter().zip(responses) {
                if resp.numeric_id() != Some(req.id) {
                    return Err(RpcError::InvalidResponse(format!(
                        "{method}: response IDs do not match the request batch"
                    )));
                }
                out.push(resp.into_result());
            }
        }
        Ok(out)
    }

    /// Call `method` once and return its result.
    pub async fn call(&self, method: &str, params: Vec<Json>) -> Result<Json, RpcError> {
        self.call_many(method, vec![params])
            .await?
            .pop()
            .ok_or_else(|| RpcError::InvalidResponse(format!("{method}: empty batch response")))?
            .map_err(RpcError::from)
    }
}

fn strip_0x(addr: &str) -> &str {
    addr.strip_prefix("0x").unwrap_or(addr)
}

#[async_trait]
impl ZilliqaRpcClient for HttpZilliqaClient {
    async fn latest_height(&self) -> Result<u64, RpcError> {
        let result = self.call("GetNumTxBlocks", vec![]).await?;
        let count = match &result {
            Json::String(s) => s.parse::<u64>().ok(),
            Json::Number(n) => n.as_u64(),
            _ => None,
        }
        .ok_or_else(|| RpcError::InvalidResponse(format!("GetNumTxBlocks: {result}")))?;
        Ok(count.saturating_sub(1))
    }

    async fn tx_bodies(&self, heights: &[u64]) -> Result<Vec<Vec<Json>>, RpcError> {
        let params = heights.iter().map(|h| vec![json!(h.to_string())]).collect();
        let results = self.call_many("GetTxnBodiesForTxBlock", params).await?;
        heights
            .iter()
            .zip(results)
            .map(|(height, result)| match result {
                Ok(Json::Array(bodies)) => Ok(bodies),
                Ok(Json::Null) => Ok(Vec::new()),
                Ok(other) => Err(RpcError::InvalidResponse(format!(
                    "GetTxnBodiesForTxBlock({height}): expected an array, got {other}"
                ))),
                Err(e) if is_empty_block_error(&e) => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            })
            .collect()
    }

    async fn contract_addresses(&self, tx_ids: &[String]) -> Result<Vec<Option<String>>, RpcError> {
        let params = tx_ids.iter().map(|id| vec![json!(strip_0x(id))]).collect();
        let results = self.call_many("GetContractAddressFromTransactionID", params).await?;
        tx_ids
            .iter()
            .zip(results)
            .map(|(tx_id, result)| match result {
                Ok(Json::String(addr)) => address::normalize(&addr).map(Some).map_err(|e| {
                    RpcError::InvalidResponse(format!("contract address {addr} for {tx_id}: {e}"))
                }),
                Ok(other) => Err(RpcError::InvalidResponse(format!(
                    "GetContractAddressFromTransactionID({tx_id}): expected a string, got {other}"
                ))),
                Err(e) if is_not_contract_error(&e) => {
                    tracing::debug!(tx_id = %tx_id, "no contract address for deployment");
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            })
            .collect()
    }

    async fn contract_init(&self, address: &str) -> Result<Json, RpcError> {
        self.call("GetSmartContractInit", vec![json!(strip_0x(address))]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> RpcConfig {
        RpcConfig {
            timeout_ms: 2_000,
            max_retries: 2,
            backoff_ms: 1,
            batch_size: 2,
        }
    }

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(1, "GetNumTxBlocks", vec![]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"GetNumTxBlocks\""));
    }

    #[test]
    fn empty_block_error_detection() {
        let err = JsonRpcError {
            code: -1,
            message: "TxBlock has no transactions".into(),
            data: None,
        };
        assert!(is_empty_block_error(&err));
        assert!(!is_empty_block_error(&JsonRpcError {
            code: -32600,
            message: "Invalid request".into(),
            data: None,
        }));
    }

    #[tokio::test]
    async fn latest_height_is_block_count_minus_one() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("GetNumTxBlocks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "jsonrpc": "2.0", "id": 1, "result": "2500" }
            ])))
            .mount(&server)
            .await;

        let client = HttpZilliqaClient::new(server.uri(), config()).unwrap();
        assert_eq!(client.latest_height().await.unwrap(), 2499);
    }

    #[tokio::test]
    async fn empty_blocks_decode_as_no_transactions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("GetTxnBodiesForTxBlock"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "jsonrpc": "2.0", "id": 2, "result": [ { "ID": "ab" } ] },
                { "jsonrpc": "2.0", "id": 1, "error": { "code": -1, "message": "TxBlock has no transactions" } }
            ])))
            .mount(&server)
            .await;

        let client = HttpZilliqaClient::new(server.uri(), config()).unwrap();
        let bodies = client.tx_bodies(&[10, 11]).await.unwrap();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].is_empty());
        assert_eq!(bodies[1][0]["ID"], "ab");
    }

    #[tokio::test]
    async fn node_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "jsonrpc": "2.0", "id": 1, "error": { "code": -5, "message": "Address not contract address" } }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpZilliqaClient::new(server.uri(), config()).unwrap();
        let err = client.contract_init("0x1234").await.unwrap_err();
        assert!(matches!(err, RpcError::Rpc { code: -5, .. }));
    }

    #[tokio::test]
    async fn transport_errors_are_retried_up_to_the_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = HttpZilliqaClient::new(server.uri(), config()).unwrap();
        let err = client.latest_height().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn timeouts_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "jsonrpc": "2.0", "id": 1, "result": "1" }]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = HttpZilliqaClient::new(
            server.uri(),
            RpcConfig {
                timeout_ms: 50,
                max_retries: 0,
                ..config()
            },
        )
        .unwrap();
        assert!(matches!(
            client.latest_height().await.unwrap_err(),
            RpcError::Timeout { ms: 50 }
        ));
    }

    #[tokio::test]
    async fn contract_addresses_are_normalised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("GetContractAddressFromTransactionID"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "jsonrpc": "2.0", "id": 1, "result": "9BFEC715A6BD658FCB62B0F8CC9BFA2ADE71434A" },
                { "jsonrpc": "2.0", "id": 2, "error": { "code": -5, "message": "ID is not a contract txn" } }
            ])))
            .mount(&server)
            .await;

        let client = HttpZilliqaClient::new(server.uri(), config()).unwrap();
        let got = client
            .contract_addresses(&["aa".to_string(), "bb".to_string()])
            .await
            .unwrap();
        assert_eq!(
            got,
            vec![Some("0x9bfec715a6bd658fcb62b0f8cc9bfa2ade71434a".to_string()), None]
        );
    }

    #[tokio::test]
    async fn contract_address_lookup_failures_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("GetContractAddressFromTransactionID"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "jsonrpc": "2.0", "id": 1, "result": "9BFEC715A6BD658FCB62B0F8CC9BFA2ADE71434A" },
                { "jsonrpc": "2.0", "id": 2, "error": { "code": -32603, "message": "Internal error: database busy" } }
            ])))
            .mount(&server)
            .await;

        let client = HttpZilliqaClient::new(server.uri(), config()).unwrap();
        let err = client
            .contract_addresses(&["aa".to_string(), "bb".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rpc { code: -32603, .. }));
    }

    #[test]
    fn not_contract_error_detection() {
        let err = |message: &str| JsonRpcError {
            code: -5,
            message: message.into(),
            data: None,
        };
        assert!(is_not_contract_error(&err("ID is not a contract txn")));
        assert!(is_not_contract_error(&err("Address not contract address")));
        assert!(!is_not_contract_error(&err("Txn Hash not Present")));
    }
}
