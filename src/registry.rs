//! Registry of connected clients and the broadcast fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::queue::{ClientSender, SendError};
use crate::types::{ClientId, Payload};

/// Outcome of a single broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose queue accepted the message
    pub delivered: usize,
    /// Recipients whose queue was full
    pub dropped: usize,
    /// Recipients whose agent had already stopped draining its queue
    pub closed: usize,
}

impl BroadcastReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

/// Tracks currently connected clients.
///
/// Writers (register/unregister) are exclusive; broadcasts share the read lock
/// and may run concurrently. Enqueueing is non-blocking, so the lock is never
/// held across I/O.
#[derive(Debug, Default)]
pub struct Registry {
    clients: RwLock<HashMap<ClientId, ClientSender>>,
    dropped_total: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client. An existing entry with the same id is replaced.
    pub async fn register(&self, id: ClientId, sender: ClientSender) {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        if clients.insert(id.clone(), sender).is_some() {
            tracing::warn!("Client {} registered twice, replacing previous entry", id);
        }
        tracing::info!(
            "Client {} connected. Clients: {} -> {}",
            id,
            before,
            clients.len()
        );
    }

    /// Remove a client. Removing an unknown id is a no-op.
    pub async fn unregister(&self, id: &ClientId) {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        if clients.remove(id).is_some() {
            tracing::info!(
                "Client {} disconnected. Clients: {} -> {}",
                id,
                before,
                clients.len()
            );
        }
    }

    /// Enqueue `payload` for every registered client except `sender`
    pub async fn broadcast(&self, payload: &Payload, sender: &ClientId) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let clients = self.clients.read().await;

        for (id, client) in clients.iter() {
            if id == sender {
                continue;
            }
            match client.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(SendError::QueueFull) => {
                    report.dropped += 1;
                    tracing::debug!("Dropping message for {}: send queue full", id);
                }
                Err(SendError::Closed) => {
                    report.closed += 1;
                    tracing::debug!("Skipping {}: send queue closed", id);
                }
            }
        }
        drop(clients);

        if report.dropped > 0 {
            self.dropped_total
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }

        tracing::debug!(
            "Broadcast from {} ({} bytes): delivered={} dropped={} closed={}",
            sender,
            payload.len(),
            report.delivered,
            report.dropped,
            report.closed
        );
        report
    }

    /// Number of registered clients
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn contains(&self, id: &ClientId) -> bool {
        self.clients.read().await.contains_key(id)
    }

    /// Messages dropped across all recipients because their queue was full
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}
