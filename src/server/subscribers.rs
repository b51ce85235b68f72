//! Registry of authenticated subscriber connections.
//!
//! The registry holds weak handles: a connection is owned by its serve task,
//! and a subscriber entry lives strictly no longer than the connection. Each
//! update is encoded once and pushed onto every live connection's writer
//! channel; entries whose connection is gone or whose channel is full are
//! dropped — delivery is best-effort.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::proto::Frame;

/// Write-side handle for one connection. The serve task's writer drains the
/// channel, so frames pushed here are never interleaved mid-stream.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: String,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl ConnectionHandle {
    pub fn new(id: String, outbound: mpsc::Sender<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self { id, outbound })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueue encoded frame bytes. False means the connection is going away
    /// (channel closed) or hopelessly backed up (channel full).
    pub fn push(&self, encoded: Vec<u8>) -> bool {
        self.outbound.try_send(encoded).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    entries: Mutex<Vec<Weak<ConnectionHandle>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection.
    pub fn add(&self, handle: &Arc<ConnectionHandle>) {
        let mut entries = self.entries.lock().expect("subscriber mutex poisoned");
        if entries
            .iter()
            .any(|w| w.upgrade().is_some_and(|h| h.id() == handle.id()))
        {
            return;
        }
        entries.push(Arc::downgrade(handle));
        debug!(connection = %handle.id(), "Subscriber added");
    }

    /// Drop a connection's entry (called when its serve task exits).
    pub fn remove(&self, id: &str) {
        let mut entries = self.entries.lock().expect("subscriber mutex poisoned");
        entries.retain(|w| w.upgrade().is_some_and(|h| h.id() != id));
    }

    /// Push an update to every live subscriber. The frame is encoded once;
    /// dead or unreachable subscribers are pruned. Returns the number of
    /// subscribers the update was handed to.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let encoded = frame.encode();
        let mut delivered = 0;

        let mut entries = self.entries.lock().expect("subscriber mutex poisoned");
        entries.retain(|weak| {
            let Some(handle) = weak.upgrade() else {
                return false;
            };
            if handle.push(encoded.clone()) {
                delivered += 1;
                true
            } else {
                info!(connection = %handle.id(), "Dropping unreachable subscriber");
                false
            }
        });
        delivered
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("subscriber mutex poisoned")
            .iter()
            .filter(|w| w.upgrade().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::multicast_update;

    fn handle_with_rx(id: &str, capacity: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::new(id.to_string(), tx), rx)
    }

    #[tokio::test]
    async fn broadcast_reaches_all_live_subscribers() {
        let registry = SubscriberRegistry::new();
        let (a, mut rx_a) = handle_with_rx("a", 4);
        let (b, mut rx_b) = handle_with_rx("b", 4);
        registry.add(&a);
        registry.add(&b);

        let update = multicast_update("seat_reserved", [("route", "R1".to_string())]);
        assert_eq!(registry.broadcast(&update), 2);

        assert_eq!(rx_a.recv().await.unwrap(), update.encode());
        assert_eq!(rx_b.recv().await.unwrap(), update.encode());
    }

    #[tokio::test]
    async fn dead_connections_are_pruned_on_broadcast() {
        let registry = SubscriberRegistry::new();
        let (a, _rx_a) = handle_with_rx("a", 4);
        let (b, rx_b) = handle_with_rx("b", 4);
        registry.add(&a);
        registry.add(&b);
        assert_eq!(registry.len(), 2);

        // Connection b goes away entirely; its weak handle cannot upgrade
        drop(rx_b);
        drop(b);

        let update = multicast_update("vehicle_updated", [("uri", "bus://1".to_string())]);
        assert_eq!(registry.broadcast(&update), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn backed_up_subscribers_are_dropped() {
        let registry = SubscriberRegistry::new();
        let (a, _rx_a) = handle_with_rx("a", 1);
        registry.add(&a);

        let update = multicast_update("price_updated", [("price", "2.5".to_string())]);
        assert_eq!(registry.broadcast(&update), 1);
        // The channel (capacity 1) is now full and nothing is draining it
        assert_eq!(registry.broadcast(&update), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn add_is_idempotent_per_connection() {
        let registry = SubscriberRegistry::new();
        let (a, _rx_a) = handle_with_rx("a", 4);
        registry.add(&a);
        registry.add(&a);
        assert_eq!(registry.len(), 1);

        registry.remove("a");
        assert!(registry.is_empty());
    }
}
