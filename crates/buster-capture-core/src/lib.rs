//! buster-capture-core: coordination core of the capture server.
//! Tracks captured browser clients, buffers their per-client event streams,
//! and folds every client's suite result into a single run verdict.
//!
//! Everything here is synchronous and clock-free: callers pass `now_ms`
//! and drive idle expiry themselves.

pub mod client_queue;
pub mod client_registry;
pub mod coordinator;
pub mod error;
pub mod event_bus;
pub mod summary;
pub mod types;
pub mod user_agent;

pub use client_queue::{ClientQueue, ContextEnd};
pub use client_registry::{ClientRegistry, ClientSession, DEFAULT_IDLE_TIMEOUT_MS};
pub use coordinator::{RemoteRunner, RunState, Transport};
pub use error::{EventBusError, ListenerError, TransportError};
pub use event_bus::{Binding, EventBus, EventTarget, ListenerId, ListenerResult};
pub use summary::SuiteSummary;
pub use types::{
    ClientDescriptor, ClientMessage, ClientProgress, QueuedEvent, RunConfig, RunnerEvent,
    TestOutcome, TestProgress, Topic,
};
pub use user_agent::UserAgent;
