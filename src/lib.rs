// Public API for integration tests and the binary

pub mod agent;
pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod queue;
pub mod registry;
pub mod server;
pub mod state;
pub mod types;
pub mod ws;

pub use agent::{AgentExit, AgentHandle, AgentState, ConnectionAgent, ShutdownReason};
pub use registry::{BroadcastReport, Registry};
pub use server::{Server, ServerError};
pub use types::{ClientId, Payload};
