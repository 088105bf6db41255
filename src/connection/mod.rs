//! Message-framed duplex connection contract.
//!
//! A connection is split into a read half and a write half so the inbound and
//! outbound pumps can run concurrently without sharing a lock.

pub mod memory;

use async_trait::async_trait;

use crate::types::Payload;

/// Result type for connection operations
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors raised by a connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed by peer")]
    Closed,

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("close failed: {0}")]
    Close(String),
}

impl ConnectionError {
    /// Whether the peer ended the connection, as opposed to a transport fault
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionError::Closed)
    }
}

/// Read half of a connection
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next complete message.
    ///
    /// Returns `ConnectionError::Closed` once the peer has gone away.
    async fn read_message(&mut self) -> ConnectionResult<Payload>;
}

/// Write half of a connection
#[async_trait]
pub trait MessageSink: Send {
    /// Write one complete message
    async fn write_message(&mut self, payload: Payload) -> ConnectionResult<()>;

    /// Close the connection.
    ///
    /// Closing a connection the peer already tore down is not an error.
    async fn close(&mut self) -> ConnectionResult<()>;
}

/// A duplex message connection that can be split into independent halves
pub trait Connection: Send + 'static {
    type Source: MessageSource + 'static;
    type Sink: MessageSink + 'static;

    fn split(self) -> (Self::Source, Self::Sink);
}
