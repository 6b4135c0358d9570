//! Registry of captured clients: identity, duplicate numbering and idle
//! deadlines.
//!
//! Pure state machine. Time is passed in as `now_ms`; the caller decides
//! when to call [`ClientRegistry::expire_due`] (the runtime sleeps until
//! [`ClientRegistry::next_deadline`]).

use std::collections::HashMap;

use serde_json::Value;

use crate::client_queue::ClientQueue;
use crate::types::ClientDescriptor;
use crate::user_agent::UserAgent;

// ─── Constants ───────────────────────────────────────────────────────

/// Default idle timeout in milliseconds (15 seconds).
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 15_000;

/// First number handed to a duplicate; the original instance is implicitly 1.
const FIRST_DUPLICATE_NUMBER: u32 = 2;

// ─── Client Session ──────────────────────────────────────────────────

/// Everything the coordinator tracks for one connected client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    pub descriptor: ClientDescriptor,
    pub queue: ClientQueue,
    /// The client's `suite:end` payload, once received.
    pub result: Option<Value>,
    pub registered_at_ms: u64,
    pub last_seen_ms: u64,
    /// `None` once the timer is disarmed (suite finished or run complete).
    pub idle_deadline_ms: Option<u64>,
}

// ─── Client Registry ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct ClientRegistry {
    sessions: HashMap<String, ClientSession>,
    idle_timeout_ms: u64,
}

impl ClientRegistry {
    pub fn new(idle_timeout_ms: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_timeout_ms,
        }
    }

    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_ms
    }

    /// Register a client that reported `ready`, parsing its user agent.
    ///
    /// A client sharing browser, version and platform with an already
    /// registered one gets a duplicate number one above the highest among
    /// them (the first instance counts as 1). Re-registering an id replaces
    /// its session and does not count the old entry as a duplicate.
    pub fn register_ready(
        &mut self,
        client_id: &str,
        user_agent: &str,
        now_ms: u64,
    ) -> &ClientSession {
        let agent = UserAgent::parse(user_agent);
        let mut descriptor = ClientDescriptor {
            id: client_id.to_owned(),
            browser: agent.browser,
            version: agent.version,
            platform: agent.platform,
            duplicate_number: None,
        };

        descriptor.duplicate_number = self
            .sessions
            .values()
            .filter(|s| s.descriptor.id != client_id && s.descriptor.same_agent(&descriptor))
            .map(|s| s.descriptor.duplicate_number.unwrap_or(1))
            .max()
            .map(|highest| (highest + 1).max(FIRST_DUPLICATE_NUMBER));

        let session = ClientSession {
            descriptor,
            queue: ClientQueue::new(),
            result: None,
            registered_at_ms: now_ms,
            last_seen_ms: now_ms,
            idle_deadline_ms: Some(now_ms.saturating_add(self.idle_timeout_ms)),
        };
        self.sessions.insert(client_id.to_owned(), session);
        &self.sessions[client_id]
    }

    pub fn lookup(&self, client_id: &str) -> Option<&ClientSession> {
        self.sessions.get(client_id)
    }

    pub fn lookup_mut(&mut self, client_id: &str) -> Option<&mut ClientSession> {
        self.sessions.get_mut(client_id)
    }

    /// Record activity from a client, pushing its idle deadline out.
    ///
    /// Returns `false` if the client is not registered. A disarmed timer
    /// stays disarmed.
    pub fn touch(&mut self, client_id: &str, now_ms: u64) -> bool {
        let Some(session) = self.sessions.get_mut(client_id) else {
            return false;
        };
        session.last_seen_ms = now_ms;
        if session.idle_deadline_ms.is_some() {
            session.idle_deadline_ms = Some(now_ms.saturating_add(self.idle_timeout_ms));
        }
        true
    }

    /// Stop a client's idle timer without removing it.
    pub fn disarm(&mut self, client_id: &str) -> bool {
        if let Some(session) = self.sessions.get_mut(client_id) {
            session.idle_deadline_ms = None;
            true
        } else {
            false
        }
    }

    pub fn disarm_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.idle_deadline_ms = None;
        }
    }

    /// Earliest armed idle deadline, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        self.sessions
            .values()
            .filter_map(|s| s.idle_deadline_ms)
            .min()
    }

    /// Remove a client. Returns its last-known session.
    pub fn expire(&mut self, client_id: &str) -> Option<ClientSession> {
        self.sessions.remove(client_id)
    }

    /// Remove every client whose deadline is at or before `now_ms`.
    ///
    /// Returned sessions are ordered by deadline, then id.
    pub fn expire_due(&mut self, now_ms: u64) -> Vec<ClientSession> {
        let mut due: Vec<(u64, String)> = self
            .sessions
            .iter()
            .filter_map(|(id, s)| match s.idle_deadline_ms {
                Some(deadline) if deadline <= now_ms => Some((deadline, id.clone())),
                _ => None,
            })
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, id)| self.sessions.remove(&id))
            .collect()
    }

    /// Registered clients sorted by id.
    pub fn list(&self) -> Vec<&ClientSession> {
        let mut sessions: Vec<&ClientSession> = self.sessions.values().collect();
        sessions.sort_by(|a, b| a.descriptor.id.cmp(&b.descriptor.id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT_MS)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
