//! Error types for the capture core.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("cannot bind event {event:?}: target has no handler named {handler:?}")]
    UnknownHandler { event: String, handler: String },
}

/// Failure reported by an event listener. Logged by the bus, never propagated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("client {0} is not connected")]
    ClientGone(String),

    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}
