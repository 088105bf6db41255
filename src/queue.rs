//! Bounded outbound queue shared between a connection agent and the registry.
//!
//! Enqueueing never waits: a full queue rejects the message immediately so a
//! stalled recipient cannot hold up the broadcaster or any other recipient.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::types::Payload;

/// Default outbound queue capacity per client
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Errors returned when enqueueing a message for a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("send queue full")]
    QueueFull,

    #[error("send queue closed")]
    Closed,
}

/// Capability to enqueue messages for one client.
///
/// Cloning is cheap; all clones feed the same queue and share one drop counter.
#[derive(Debug, Clone)]
pub struct ClientSender {
    tx: mpsc::Sender<Payload>,
    dropped: Arc<AtomicU64>,
}

impl ClientSender {
    /// Enqueue without waiting. A full queue drops the message and counts it.
    pub fn try_send(&self, payload: Payload) -> Result<(), SendError> {
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Messages dropped so far because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a bounded outbound queue
pub fn outbound_queue(capacity: usize) -> (ClientSender, mpsc::Receiver<Payload>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = ClientSender {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive() {
        let (sender, mut rx) = outbound_queue(4);
        assert!(sender.try_send(Payload::from("a")).is_ok());
        assert!(sender.try_send(Payload::from("b")).is_ok());

        assert_eq!(rx.recv().await, Some(Payload::from("a")));
        assert_eq!(rx.recv().await, Some(Payload::from("b")));
    }

    #[test]
    fn test_full_queue_fails_immediately() {
        let (sender, _rx) = outbound_queue(2);
        sender.try_send(Payload::from("1")).unwrap();
        sender.try_send(Payload::from("2")).unwrap();

        assert_eq!(sender.try_send(Payload::from("3")), Err(SendError::QueueFull));
        assert_eq!(sender.try_send(Payload::from("4")), Err(SendError::QueueFull));
        assert_eq!(sender.dropped(), 2);
    }

    #[test]
    fn test_closed_queue() {
        let (sender, rx) = outbound_queue(2);
        drop(rx);

        assert!(sender.is_closed());
        assert_eq!(sender.try_send(Payload::from("x")), Err(SendError::Closed));
        // Closed is not counted as a drop
        assert_eq!(sender.dropped(), 0);
    }

    #[test]
    fn test_clones_share_drop_counter() {
        let (sender, _rx) = outbound_queue(1);
        let clone = sender.clone();
        sender.try_send(Payload::from("1")).unwrap();
        assert!(clone.try_send(Payload::from("2")).is_err());
        assert_eq!(sender.dropped(), 1);
        assert_eq!(sender.capacity(), 1);
    }
}
