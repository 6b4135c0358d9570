//! Wire frames and the channel-backed client transport.
//!
//! Inbound frames are `{"clientId", "topic", "data"}` objects, one per line.
//! The only outbound frame is `{"topic": "tests:run", "data": <run config>}`.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;

use buster_capture_core::{ClientMessage, RunConfig, Transport, TransportError};

pub const TESTS_RUN: &str = "tests:run";

/// Sender half of a connection's outbound line queue.
pub type Outbound = mpsc::UnboundedSender<String>;

/// What a connection task reports to the coordinator task.
#[derive(Debug)]
pub enum Inbound {
    /// A connection started speaking for `client_id`.
    Attach {
        client_id: String,
        outbound: Outbound,
    },
    Message(ClientMessage),
    /// The connection that spoke for `client_id` went away.
    Detach {
        client_id: String,
        outbound: Outbound,
    },
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a, T> {
    topic: &'a str,
    data: &'a T,
}

// ─── Codec ───────────────────────────────────────────────────────────

pub fn decode_line(line: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Encode the `tests:run` frame, newline-terminated.
pub fn encode_tests_run(config: &RunConfig) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(&OutboundFrame {
        topic: TESTS_RUN,
        data: config,
    })?;
    line.push('\n');
    Ok(line)
}

// ─── Channel Transport ───────────────────────────────────────────────

/// Routes outbound frames to whichever connection last spoke for a client.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    clients: HashMap<String, Outbound>,
}

impl ChannelTransport {
    pub fn attach(&mut self, client_id: String, outbound: Outbound) {
        tracing::debug!(client_id = %client_id, "connection attached");
        self.clients.insert(client_id, outbound);
    }

    /// Forget a connection. A newer connection for the same client stays.
    pub fn detach(&mut self, client_id: &str, outbound: &Outbound) -> bool {
        let current = self
            .clients
            .get(client_id)
            .is_some_and(|tx| tx.same_channel(outbound));
        if current {
            tracing::debug!(client_id, "connection detached");
            self.clients.remove(client_id);
        }
        current
    }

    pub fn apply(&mut self, inbound: Inbound) -> Option<ClientMessage> {
        match inbound {
            Inbound::Attach {
                client_id,
                outbound,
            } => {
                self.attach(client_id, outbound);
                None
            }
            Inbound::Detach {
                client_id,
                outbound,
            } => {
                self.detach(&client_id, &outbound);
                None
            }
            Inbound::Message(msg) => Some(msg),
        }
    }
}

impl Transport for ChannelTransport {
    fn start_tests(&mut self, client_id: &str, config: &RunConfig) -> Result<(), TransportError> {
        let outbound = self
            .clients
            .get(client_id)
            .ok_or_else(|| TransportError::ClientGone(client_id.to_owned()))?;
        let line = encode_tests_run(config)?;
        outbound
            .send(line)
            .map_err(|_| TransportError::ClientGone(client_id.to_owned()))
    }
}
