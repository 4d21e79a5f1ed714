//! Refresh-message trigger.
//!
//! Listens on the cache's [`EventBus`](zilindex_core::events::EventBus) and
//! forwards NFT events as `(contract, token_id)` envelopes to a
//! [`MessagePublisher`]. The queue transport itself lives outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zilindex_core::document::Action;
use zilindex_core::events::IndexEvent;

/// Downstream queues fed by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    MetadataRefresh,
    AssetRefresh,
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MetadataRefresh => write!(f, "metadata_refresh"),
            Self::AssetRefresh => write!(f, "asset_refresh"),
        }
    }
}

/// Payload of a refresh message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshEnvelope {
    pub contract: String,
    pub token_id: u64,
}

#[derive(Debug, Error)]
#[error("publishing to {queue} failed: {reason}")]
pub struct PublishError {
    pub queue: Queue,
    pub reason: String,
}

/// Outbound side of the message transport.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, queue: Queue, envelope: RefreshEnvelope) -> Result<(), PublishError>;
}

/// Publisher that only logs. Used when no transport is configured.
pub struct LogPublisher;

#[async_trait]
impl MessagePublisher for LogPublisher {
    async fn publish(&self, queue: Queue, envelope: RefreshEnvelope) -> Result<(), PublishError> {
        info!(%queue, contract = %envelope.contract, token_id = envelope.token_id, "refresh requested");
        Ok(())
    }
}

/// Publisher backed by an in-process channel.
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<(Queue, RefreshEnvelope)>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Queue, RefreshEnvelope)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessagePublisher for ChannelPublisher {
    async fn publish(&self, queue: Queue, envelope: RefreshEnvelope) -> Result<(), PublishError> {
        self.tx.send((queue, envelope)).map_err(|_| PublishError {
            queue,
            reason: "receiver dropped".into(),
        })
    }
}

/// Maps index events to refresh messages.
#[derive(Clone)]
pub struct RefreshTrigger {
    publisher: Arc<dyn MessagePublisher>,
}

impl RefreshTrigger {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { publisher }
    }

    /// The queue and envelope for an event, if it should produce one.
    pub fn route(event: &IndexEvent) -> Option<(Queue, RefreshEnvelope)> {
        let nft = event.document.as_nft()?;
        let queue = match event.action {
            Action::Mint | Action::SetBaseUri => Queue::MetadataRefresh,
            Action::MetadataRefreshed => Queue::AssetRefresh,
            _ => return None,
        };
        Some((
            queue,
            RefreshEnvelope {
                contract: nft.contract.clone(),
                token_id: nft.token_id,
            },
        ))
    }

    /// Route and publish one event. Publish failures are logged.
    pub async fn handle(&self, event: &IndexEvent) {
        let Some((queue, envelope)) = Self::route(event) else {
            return;
        };
        if let Err(e) = self.publisher.publish(queue, envelope).await {
            warn!(error = %e, "refresh message dropped");
        }
    }

    /// Consume `rx` until the bus closes.
    pub fn spawn(self, mut rx: broadcast::Receiver<IndexEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "refresh trigger lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("event bus closed, refresh trigger stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zilindex_core::events::EventBus;
    use zilindex_core::types::{Nft, Standard};

    fn nft(id: u64) -> Nft {
        Nft {
            contract: "0xabc".into(),
            token_id: id,
            owner: "0x1".into(),
            token_uri: String::new(),
            base_uri: String::new(),
            tx_id: "m".into(),
            block_num: 1,
            burned_at: 0,
            standard: Standard::Zrc6,
            metadata: None,
        }
    }

    #[test]
    fn routes_by_action() {
        let mint = IndexEvent::new(Action::Mint, nft(7).into());
        assert_eq!(
            RefreshTrigger::route(&mint),
            Some((
                Queue::MetadataRefresh,
                RefreshEnvelope {
                    contract: "0xabc".into(),
                    token_id: 7
                }
            ))
        );
        let refreshed = IndexEvent::new(Action::MetadataRefreshed, nft(7).into());
        assert_eq!(RefreshTrigger::route(&refreshed).map(|(q, _)| q), Some(Queue::AssetRefresh));
        let transfer = IndexEvent::new(Action::Transfer, nft(7).into());
        assert!(RefreshTrigger::route(&transfer).is_none());
    }

    #[tokio::test]
    async fn spawned_trigger_forwards_until_bus_closes() {
        let bus = EventBus::new(8);
        let (publisher, mut rx) = ChannelPublisher::new();
        let handle = RefreshTrigger::new(Arc::new(publisher)).spawn(bus.subscribe());

        bus.publish(IndexEvent::new(Action::Transfer, nft(1).into()));
        bus.publish(IndexEvent::new(Action::SetBaseUri, nft(2).into()));
        let (queue, envelope) = rx.recv().await.unwrap();
        assert_eq!(queue, Queue::MetadataRefresh);
        assert_eq!(envelope.token_id, 2);

        drop(bus);
        handle.await.unwrap();
    }
}
