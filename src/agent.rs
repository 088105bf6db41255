//! Per-connection agent: bridges one connection to the registry.
//!
//! Each agent owns a bounded outbound queue and runs two pumps:
//! - the read pump forwards every inbound message to [`Registry::broadcast`]
//! - the write pump drains the queue into the connection
//!
//! The first pump to fail (or an external [`AgentHandle::stop`]) starts the
//! shutdown: the agent unregisters, waits for both pumps and closes the
//! connection. Messages still queued at that point are discarded.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, ConnectionError, MessageSink, MessageSource};
use crate::queue::{outbound_queue, ClientSender, SendError};
use crate::registry::Registry;
use crate::types::{ClientId, Payload};

/// Upper bound on the close handshake; a peer that stopped reading can
/// never acknowledge it, so the transport is dropped after this
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of an agent, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgentState {
    Created,
    Registered,
    Running,
    ShuttingDown,
    Closed,
}

/// What ended an agent
#[derive(Debug)]
pub enum ShutdownReason {
    /// The peer closed the connection
    PeerClosed,
    /// Reading from the connection failed
    ReadFailed(ConnectionError),
    /// Writing to the connection failed
    WriteFailed(ConnectionError),
    /// Stop was requested from outside
    Stopped,
}

/// Summary returned once an agent is fully closed
#[derive(Debug)]
pub struct AgentExit {
    pub id: ClientId,
    pub reason: ShutdownReason,
    /// Messages dropped for this client because its queue was full
    pub dropped: u64,
}

/// Handle for observing and controlling a running agent from other tasks
#[derive(Debug, Clone)]
pub struct AgentHandle {
    id: ClientId,
    sender: ClientSender,
    shutdown: CancellationToken,
    state: watch::Receiver<AgentState>,
}

impl AgentHandle {
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Enqueue a message for this client without waiting
    pub fn send(&self, payload: Payload) -> Result<(), SendError> {
        self.sender.try_send(payload)
    }

    /// Request shutdown. Calling it more than once is harmless.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Wait until the agent has reached at least `state`
    pub async fn wait_until(&self, state: AgentState) {
        let mut rx = self.state.clone();
        // An agent dropped before running never advances; treat that as reached
        let _ = rx.wait_for(|current| *current >= state).await;
    }

    /// Wait until the agent is unregistered, its pumps have exited and the
    /// connection is closed
    pub async fn closed(&self) {
        self.wait_until(AgentState::Closed).await;
    }
}

/// Connection agent for a single client
pub struct ConnectionAgent<C: Connection> {
    id: ClientId,
    connection: C,
    registry: Arc<Registry>,
    sender: ClientSender,
    queue: mpsc::Receiver<Payload>,
    shutdown: CancellationToken,
    state: watch::Sender<AgentState>,
}

impl<C: Connection> ConnectionAgent<C> {
    /// Create an agent with a fresh identity and a queue of `queue_capacity`
    pub fn new(connection: C, registry: Arc<Registry>, queue_capacity: usize) -> Self {
        let (sender, queue) = outbound_queue(queue_capacity);
        let (state, _) = watch::channel(AgentState::Created);
        Self {
            id: ClientId::generate(),
            connection,
            registry,
            sender,
            queue,
            shutdown: CancellationToken::new(),
            state,
        }
    }

    /// Tie this agent's shutdown to `token`, e.g. a child of the server's token
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Enqueue a message for this client without waiting
    pub fn send(&self, payload: Payload) -> Result<(), SendError> {
        self.sender.try_send(payload)
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            id: self.id.clone(),
            sender: self.sender.clone(),
            shutdown: self.shutdown.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Register, run both pumps until one ends, then shut down.
    pub async fn run(self) -> AgentExit {
        let ConnectionAgent {
            id,
            connection,
            registry,
            sender,
            queue,
            shutdown,
            state,
        } = self;

        registry.register(id.clone(), sender.clone()).await;
        state.send_replace(AgentState::Registered);

        let (source, sink) = connection.split();
        let writer = tokio::spawn(write_pump(id.clone(), sink, queue, shutdown.clone()));
        state.send_replace(AgentState::Running);

        let read_end = read_pump(&id, source, &registry, &shutdown).await;

        shutdown.cancel();
        state.send_replace(AgentState::ShuttingDown);
        registry.unregister(&id).await;

        let (write_end, sink) = match writer.await {
            Ok((end, sink)) => (end, Some(sink)),
            Err(e) => {
                tracing::error!("Write pump for {} panicked: {}", id, e);
                (
                    Some(ShutdownReason::WriteFailed(ConnectionError::Write(e.to_string()))),
                    None,
                )
            }
        };

        if let Some(mut sink) = sink {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Closing connection for {}: {}", id, e),
                Err(_) => tracing::debug!(
                    "Closing connection for {} timed out after {:?}, dropping it",
                    id,
                    CLOSE_TIMEOUT
                ),
            }
            drop(sink);
        }

        let reason = read_end.or(write_end).unwrap_or(ShutdownReason::Stopped);
        let dropped = sender.dropped();
        state.send_replace(AgentState::Closed);

        tracing::info!(
            "Client {} closed ({:?}), {} messages dropped",
            id,
            reason,
            dropped
        );

        AgentExit {
            id,
            reason,
            dropped,
        }
    }
}

/// Returns `None` when stopped by the shutdown signal
async fn read_pump<S: MessageSource>(
    id: &ClientId,
    mut source: S,
    registry: &Registry,
    shutdown: &CancellationToken,
) -> Option<ShutdownReason> {
    loop {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            result = source.read_message() => result,
        };

        match result {
            Ok(payload) => {
                tracing::debug!("Received {} bytes from {}", payload.len(), id);
                registry.broadcast(&payload, id).await;
            }
            Err(ConnectionError::Closed) => {
                tracing::debug!("Peer {} closed the connection", id);
                return Some(ShutdownReason::PeerClosed);
            }
            Err(e) => {
                tracing::warn!("Error reading from {}: {}", id, e);
                return Some(ShutdownReason::ReadFailed(e));
            }
        }
    }
}

/// Returns the sink so the agent can close it once both pumps are done
async fn write_pump<S: MessageSink>(
    id: ClientId,
    mut sink: S,
    mut queue: mpsc::Receiver<Payload>,
    shutdown: CancellationToken,
) -> (Option<ShutdownReason>, S) {
    let end = loop {
        let payload = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break None,
            payload = queue.recv() => payload,
        };
        let Some(payload) = payload else {
            break None;
        };

        // A stalled peer can block the write indefinitely; shutdown abandons it
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break None,
            result = sink.write_message(payload) => result,
        };

        if let Err(e) = result {
            tracing::warn!("Error writing to {}: {}", id, e);
            shutdown.cancel();
            break Some(ShutdownReason::WriteFailed(e));
        }
    };

    (end, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory::{pair, MemoryConnection, MemoryPeer};
    use crate::connection::ConnectionResult;
    use crate::queue::outbound_queue;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    struct Running {
        handle: AgentHandle,
        peer: MemoryPeer,
        task: JoinHandle<AgentExit>,
    }

    async fn spawn_agent(registry: &Arc<Registry>, capacity: usize, buffer: usize) -> Running {
        let (conn, peer) = pair(buffer);
        let agent: ConnectionAgent<MemoryConnection> =
            ConnectionAgent::new(conn, registry.clone(), capacity);
        let handle = agent.handle();
        assert_eq!(handle.state(), AgentState::Created);

        let task = tokio::spawn(agent.run());
        timeout(WAIT, handle.wait_until(AgentState::Running))
            .await
            .expect("agent should start");
        Running { handle, peer, task }
    }

    #[tokio::test]
    async fn test_three_clients_hello() {
        let registry = Arc::new(Registry::new());
        let mut c1 = spawn_agent(&registry, 16, 16).await;
        let mut c2 = spawn_agent(&registry, 16, 16).await;
        let mut c3 = spawn_agent(&registry, 16, 16).await;
        assert_eq!(registry.count().await, 3);

        c1.peer.send("hello");

        let m2 = timeout(WAIT, c2.peer.recv()).await.unwrap();
        let m3 = timeout(WAIT, c3.peer.recv()).await.unwrap();
        assert_eq!(m2, Some(Payload::from("hello")));
        assert_eq!(m3, Some(Payload::from("hello")));

        // Nothing else arrives, and the sender never hears its own message
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(c1.peer.try_recv().is_none());
        assert!(c2.peer.try_recv().is_none());
        assert!(c3.peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_messages_from_one_sender_arrive_in_order() {
        let registry = Arc::new(Registry::new());
        let sender = spawn_agent(&registry, 64, 64).await;
        let mut receiver = spawn_agent(&registry, 64, 64).await;

        for i in 0..20 {
            sender.peer.send(format!("msg-{}", i));
        }
        for i in 0..20 {
            let msg = timeout(WAIT, receiver.peer.recv()).await.unwrap();
            assert_eq!(msg, Some(Payload::from(format!("msg-{}", i))));
        }
    }

    #[tokio::test]
    async fn test_peer_disconnect_unregisters() {
        let registry = Arc::new(Registry::new());
        let c1 = spawn_agent(&registry, 16, 16).await;
        let mut c2 = spawn_agent(&registry, 16, 16).await;
        let mut c3 = spawn_agent(&registry, 16, 16).await;
        assert_eq!(registry.count().await, 3);

        let c2_id = c2.handle.id().clone();
        c2.peer.disconnect();
        let exit = timeout(WAIT, c2.task).await.unwrap().unwrap();
        assert!(matches!(exit.reason, ShutdownReason::PeerClosed));
        assert_eq!(exit.id, c2_id);
        assert_eq!(c2.handle.state(), AgentState::Closed);
        assert!(c2.peer.is_closed());

        assert_eq!(registry.count().await, 2);
        assert!(!registry.contains(&c2_id).await);

        c1.peer.send("after");
        let m3 = timeout(WAIT, c3.peer.recv()).await.unwrap();
        assert_eq!(m3, Some(Payload::from("after")));
        assert_eq!(c2.peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_read_failure_shuts_down() {
        let registry = Arc::new(Registry::new());
        let client = spawn_agent(&registry, 16, 16).await;

        client.peer.fail("connection reset by peer");
        let exit = timeout(WAIT, client.task).await.unwrap().unwrap();
        assert!(matches!(exit.reason, ShutdownReason::ReadFailed(_)));
        assert_eq!(registry.count().await, 0);
        assert!(client.peer.is_closed());
    }

    #[tokio::test]
    async fn test_write_failure_shuts_down() {
        let registry = Arc::new(Registry::new());
        let sender = spawn_agent(&registry, 16, 16).await;
        let mut broken = spawn_agent(&registry, 16, 16).await;

        broken.peer.refuse_writes();
        sender.peer.send("boom");

        let exit = timeout(WAIT, broken.task).await.unwrap().unwrap();
        assert!(matches!(exit.reason, ShutdownReason::WriteFailed(_)));
        assert_eq!(registry.count().await, 1);
        assert_eq!(sender.handle.state(), AgentState::Running);
    }

    #[tokio::test]
    async fn test_stop_discards_queued_messages() {
        let registry = Arc::new(Registry::new());
        // Peer buffer of one that is never drained: the write pump blocks
        let stalled = spawn_agent(&registry, 4, 1).await;

        for i in 0..10 {
            let _ = stalled.handle.send(Payload::from(format!("m{}", i)));
        }

        stalled.handle.stop();
        stalled.handle.stop();
        let exit = timeout(WAIT, stalled.task).await.unwrap().unwrap();
        assert!(matches!(exit.reason, ShutdownReason::Stopped));
        assert!(exit.dropped > 0);
        assert_eq!(registry.count().await, 0);
        assert!(stalled.peer.is_closed());
    }

    #[tokio::test]
    async fn test_full_queue_fails_without_blocking() {
        let registry = Arc::new(Registry::new());
        let stalled = spawn_agent(&registry, 4, 1).await;

        let mut full = false;
        for i in 0..10 {
            let result = timeout(
                Duration::from_millis(100),
                async { stalled.handle.send(Payload::from(format!("m{}", i))) },
            )
            .await
            .expect("send must not block");
            if result == Err(SendError::QueueFull) {
                full = true;
            }
        }
        assert!(full);
        stalled.handle.stop();
    }

    #[tokio::test]
    async fn test_unresponsive_recipient_burst() {
        const K: usize = 256;
        let registry = Arc::new(Registry::new());
        let sender_id = ClientId::from("burst-sender");

        // A recipient whose queue is never drained at all
        let stalled_id = ClientId::from("stalled");
        let (stalled_tx, stalled_rx) = outbound_queue(K);
        registry.register(stalled_id.clone(), stalled_tx.clone()).await;
        let mut responsive = spawn_agent(&registry, K, K + 10).await;

        let mut dropped = 0;
        for i in 0..K + 10 {
            let report = registry
                .broadcast(&Payload::from(format!("m{}", i)), &sender_id)
                .await;
            dropped += report.dropped;
        }

        assert_eq!(dropped, 10);
        assert_eq!(stalled_rx.len(), K);
        assert_eq!(stalled_tx.dropped(), 10);
        assert_eq!(responsive.handle.sender.dropped(), 0);

        for i in 0..K + 10 {
            let msg = timeout(WAIT, responsive.peer.recv()).await.unwrap();
            assert_eq!(msg, Some(Payload::from(format!("m{}", i))));
        }
    }

    struct StalledConnection;
    struct StalledSource;
    struct StalledSink;

    impl Connection for StalledConnection {
        type Source = StalledSource;
        type Sink = StalledSink;

        fn split(self) -> (StalledSource, StalledSink) {
            (StalledSource, StalledSink)
        }
    }

    #[async_trait::async_trait]
    impl MessageSource for StalledSource {
        async fn read_message(&mut self) -> ConnectionResult<Payload> {
            std::future::pending().await
        }
    }

    // Peer stopped reading: neither writes nor the close handshake complete
    #[async_trait::async_trait]
    impl MessageSink for StalledSink {
        async fn write_message(&mut self, _payload: Payload) -> ConnectionResult<()> {
            std::future::pending().await
        }

        async fn close(&mut self) -> ConnectionResult<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stop_with_stalled_peer_reaches_closed() {
        let registry = Arc::new(Registry::new());
        let agent = ConnectionAgent::new(StalledConnection, registry.clone(), 4);
        let handle = agent.handle();
        let task = tokio::spawn(agent.run());
        timeout(WAIT, handle.wait_until(AgentState::Running))
            .await
            .expect("agent should start");

        handle.send(Payload::from("never written")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.stop();
        let exit = timeout(CLOSE_TIMEOUT + WAIT, task)
            .await
            .expect("agent should close even though the peer never reads")
            .unwrap();
        assert!(matches!(exit.reason, ShutdownReason::Stopped));
        assert_eq!(handle.state(), AgentState::Closed);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_send_after_close_reports_closed() {
        let registry = Arc::new(Registry::new());
        let mut client = spawn_agent(&registry, 4, 4).await;

        client.peer.disconnect();
        timeout(WAIT, client.handle.closed()).await.unwrap();
        assert_eq!(
            client.handle.send(Payload::from("late")),
            Err(SendError::Closed)
        );
    }
}
