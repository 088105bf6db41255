//! Server configuration

use std::time::Duration;

use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Default listen address when serving
pub const DEFAULT_LISTEN_ADDR: &str = ":8080";

/// Default server address when connecting as a client
pub const DEFAULT_CONNECT_ADDR: &str = "localhost:8080";

/// Default time allowed for in-flight connections to close on shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address; `:port` binds all interfaces
    pub addr: String,
    /// Outbound queue capacity per client
    pub queue_capacity: usize,
    /// How long shutdown waits for connections to close
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_LISTEN_ADDR.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ServerConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// BROADCAST_ADDR, BROADCAST_QUEUE_CAPACITY and
    /// BROADCAST_SHUTDOWN_GRACE_SECS are read; invalid values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let addr = std::env::var("BROADCAST_ADDR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.addr);

        let queue_capacity = match env_parse::<usize>("BROADCAST_QUEUE_CAPACITY") {
            Some(0) => {
                tracing::warn!("BROADCAST_QUEUE_CAPACITY must be positive, using default");
                defaults.queue_capacity
            }
            Some(n) => n,
            None => defaults.queue_capacity,
        };

        let shutdown_grace = env_parse::<u64>("BROADCAST_SHUTDOWN_GRACE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_grace);

        tracing::info!(
            addr = %addr,
            queue_capacity,
            shutdown_grace_secs = shutdown_grace.as_secs(),
            "Server config loaded"
        );

        Self {
            addr,
            queue_capacity,
            shutdown_grace,
        }
    }

    /// The address to hand to the socket layer
    pub fn listen_addr(&self) -> String {
        normalize_listen_addr(&self.addr)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

/// Expand the `:port` shorthand to all interfaces
pub fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
