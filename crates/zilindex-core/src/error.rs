//! Error types for the zilindex pipeline.

use thiserror::Error;

/// Errors raised while turning raw chain payloads into typed entities.
///
/// A decode error always means the payload did not have the shape the
/// decoder expects; it is never papered over with a default value.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unexpected value shape: expected {expected}, found {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid param '{param}': {source}")]
    InvalidParam {
        param: String,
        #[source]
        source: Box<DecodeError>,
    },

    #[error("Invalid transaction data: {reason}")]
    InvalidData { reason: String },

    #[error("Invalid address '{value}': {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("Invalid transaction {tx_id}: {source}")]
    Transaction {
        tx_id: String,
        #[source]
        source: Box<DecodeError>,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DecodeError {
    /// Wrap this error with the name of the param it occurred in.
    pub fn in_param(self, param: impl Into<String>) -> Self {
        Self::InvalidParam {
            param: param.into(),
            source: Box::new(self),
        }
    }

    /// Wrap this error with the ID of the transaction being decoded.
    pub fn in_transaction(self, tx_id: impl Into<String>) -> Self {
        Self::Transaction {
            tx_id: tx_id.into(),
            source: Box::new(self),
        }
    }
}

/// Errors that can occur while driving the indexer.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error at height {height}: {source}")]
    Decode {
        height: u64,
        #[source]
        source: DecodeError,
    },

    #[error("Fatal error: {reason}")]
    Fatal { reason: String },

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_context_is_in_message() {
        let err = DecodeError::MissingField {
            field: "arguments".into(),
        }
        .in_param("to_token_uri_pair_list");
        let msg = err.to_string();
        assert!(msg.contains("to_token_uri_pair_list"), "{msg}");
        assert!(msg.contains("arguments"), "{msg}");
    }

    #[test]
    fn only_fatal_is_fatal() {
        assert!(IndexerError::Fatal { reason: "x".into() }.is_fatal());
        assert!(!IndexerError::Rpc("timeout".into()).is_fatal());
    }
}
