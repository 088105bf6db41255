//! In-memory connection for driving agents without a network.
//!
//! [`pair`] returns the agent-facing [`MemoryConnection`] and a [`MemoryPeer`]
//! that plays the remote client. A peer that stops calling [`MemoryPeer::recv`]
//! behaves like a stalled client: once its buffer is full, writes block.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Connection, ConnectionError, ConnectionResult, MessageSink, MessageSource};
use crate::types::Payload;

enum Inbound {
    Message(Payload),
    Fail(String),
}

/// Create a connected pair. `buffer` bounds how many written messages the
/// peer holds before writes start to block.
pub fn pair(buffer: usize) -> (MemoryConnection, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::channel(buffer.max(1));
    let closed = Arc::new(AtomicBool::new(false));

    let connection = MemoryConnection {
        inbound: in_rx,
        outbound: out_tx,
        closed: closed.clone(),
    };
    let peer = MemoryPeer {
        inbound: Some(in_tx),
        outbound: out_rx,
        closed,
    };
    (connection, peer)
}

/// Agent side of an in-memory connection
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::Sender<Payload>,
    closed: Arc<AtomicBool>,
}

impl Connection for MemoryConnection {
    type Source = MemorySource;
    type Sink = MemorySink;

    fn split(self) -> (MemorySource, MemorySink) {
        (
            MemorySource {
                inbound: self.inbound,
            },
            MemorySink {
                outbound: Some(self.outbound),
                closed: self.closed,
            },
        )
    }
}

pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn read_message(&mut self) -> ConnectionResult<Payload> {
        match self.inbound.recv().await {
            Some(Inbound::Message(payload)) => Ok(payload),
            Some(Inbound::Fail(reason)) => Err(ConnectionError::Read(reason)),
            None => Err(ConnectionError::Closed),
        }
    }
}

pub struct MemorySink {
    outbound: Option<mpsc::Sender<Payload>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn write_message(&mut self, payload: Payload) -> ConnectionResult<()> {
        let outbound = self.outbound.as_ref().ok_or(ConnectionError::Closed)?;
        outbound
            .send(payload)
            .await
            .map_err(|_| ConnectionError::Write("peer went away".to_string()))
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.outbound = None;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Remote end of an in-memory connection
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::Receiver<Payload>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Deliver a message to the agent. Returns false once disconnected.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Inbound::Message(payload.into())).is_ok(),
            None => false,
        }
    }

    /// Make the agent's next read fail with a transport error
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Inbound::Fail(reason.to_string()));
        }
    }

    /// Hang up: pending messages are still read, then the agent sees a close
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Stop accepting writes; the agent's next write fails
    pub fn refuse_writes(&mut self) {
        self.outbound.close();
    }

    /// Next message the agent wrote, or `None` once the agent closed
    pub async fn recv(&mut self) -> Option<Payload> {
        self.outbound.recv().await
    }

    /// Next written message if one is already waiting
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.outbound.try_recv().ok()
    }

    /// Whether the agent closed its side of the connection
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
