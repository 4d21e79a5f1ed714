//! Event bus: best-effort notifications fired after a successful flush.
//!
//! The bus is an injected handle, not global state: the cache holds a clone
//! and publishes; subscribers call [`EventBus::subscribe`] at startup.
//! Publishing never blocks. Slow subscribers may lag and drop events, and
//! nothing is delivered if nobody is subscribed.

use tokio::sync::broadcast;

use crate::document::{Action, Document};

/// A flushed document together with the action that wrote it.
#[derive(Debug, Clone)]
pub struct IndexEvent {
    pub action: Action,
    pub document: Document,
    /// Unix timestamp (seconds) of the flush.
    pub flushed_at: i64,
}

impl IndexEvent {
    pub fn new(action: Action, document: Document) -> Self {
        Self {
            action,
            document,
            flushed_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Publish/subscribe handle for [`IndexEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IndexEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns the number of subscribers it reached.
    pub fn publish(&self, event: IndexEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                tracing::trace!("no event subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Nft, Standard};

    fn minted() -> IndexEvent {
        IndexEvent::new(
            Action::Mint,
            Document::from(Nft {
                contract: "0xa".into(),
                token_id: 1,
                owner: "0xb".into(),
                token_uri: String::new(),
                base_uri: String::new(),
                tx_id: "t".into(),
                block_num: 1,
                burned_at: 0,
                standard: Standard::Zrc6,
                metadata: None,
            }),
        )
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.publish(minted()), 2);
        assert_eq!(a.recv().await.unwrap().action, Action::Mint);
        assert_eq!(b.recv().await.unwrap().document.slug(), "0xa-1");
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(minted()), 0);
    }
}
