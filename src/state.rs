use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::registry::Registry;

/// Shared state handed to every HTTP handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// Outbound queue capacity for new connections
    pub queue_capacity: usize,
    /// Parent of every connection agent's shutdown token
    pub shutdown: CancellationToken,
    /// Tracks running connection agents so shutdown can wait for them
    pub agents: TaskTracker,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, queue_capacity: usize) -> Self {
        Self {
            registry,
            queue_capacity,
            shutdown: CancellationToken::new(),
            agents: TaskTracker::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
