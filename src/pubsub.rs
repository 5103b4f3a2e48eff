//! Publish/subscribe layer carrying blocks and transactions between nodes
//!
//! The transport sits behind [`MessageBus`]. [`LocalBus`] delivers through a
//! `tokio::sync::broadcast` channel and is shared by every node in a process;
//! an adapter for a hosted pub/sub service forwards into the same channel
//! shape. Payloads are the JSON form served by `/api/blockchain`.

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default number of messages a slow subscriber may fall behind by.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Block,
    Transaction,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Block => "BLOCK",
            Channel::Transaction => "TRANSACTION",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub channel: Channel,
    /// Id of the publishing node.
    pub origin: String,
    pub payload: serde_json::Value,
}

/// A transport delivering every published message to every subscriber.
pub trait MessageBus: Send + Sync {
    fn publish(&self, message: BusMessage) -> Result<(), ChainError>;
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}

/// In-process bus backed by a broadcast channel. Clones share the channel.
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl MessageBus for LocalBus {
    fn publish(&self, message: BusMessage) -> Result<(), ChainError> {
        // Sending with nobody subscribed is not a failure.
        if self.sender.send(message).is_err() {
            debug!("pubsub.no_subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

/// A node's publishing handle: stamps messages with the node id and never
/// lets a transport failure escape to the caller.
#[derive(Clone)]
pub struct PubSub {
    bus: Arc<dyn MessageBus>,
    node_id: String,
}

impl PubSub {
    pub fn new(bus: Arc<dyn MessageBus>, node_id: impl Into<String>) -> Self {
        Self {
            bus,
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.bus.subscribe()
    }

    pub fn publish<T: Serialize>(&self, channel: Channel, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(%channel, error = %e, "pubsub.encode_failed");
                return;
            }
        };

        let message = BusMessage {
            channel,
            origin: self.node_id.clone(),
            payload,
        };
        match self.bus.publish(message) {
            Ok(()) => debug!(%channel, "pubsub.published"),
            Err(e) => warn!(%channel, error = %e, "pubsub.publish_failed"),
        }
    }

    pub fn broadcast_block(&self, block: &Block) {
        self.publish(Channel::Block, block);
    }

    pub fn broadcast_transaction(&self, transaction: &Transaction) {
        self.publish(Channel::Transaction, transaction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Block.to_string(), "BLOCK");
        assert_eq!(
            serde_json::to_value(Channel::Transaction).unwrap(),
            serde_json::json!("TRANSACTION")
        );
    }

    #[tokio::test]
    async fn test_local_bus_fans_out() {
        let bus = LocalBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let pubsub = PubSub::new(Arc::new(bus), "node-a");
        pubsub.broadcast_block(&Block::genesis());

        for rx in [&mut rx1, &mut rx2] {
            let message = rx.recv().await.unwrap();
            assert_eq!(message.channel, Channel::Block);
            assert_eq!(message.origin, "node-a");
            let block: Block = serde_json::from_value(message.payload).unwrap();
            assert_eq!(block, Block::genesis());
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = LocalBus::default();
        let message = BusMessage {
            channel: Channel::Transaction,
            origin: "node-a".to_string(),
            payload: serde_json::json!({}),
        };
        assert!(bus.publish(message).is_ok());
    }
}
