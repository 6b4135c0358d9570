//! Per-client event queue with context nesting.
//!
//! A client reports a flat stream of start/end events for nested test
//! contexts. Reporters want one context per client, so every structural
//! event is held back until the client's top-level context closes, then the
//! whole subtree is released in arrival order, wrapped in a synthetic
//! context named after the client.

use std::collections::VecDeque;

use serde_json::Value;

use crate::types::{QueuedEvent, Topic};

/// Outcome of closing a context.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEnd {
    /// An inner context closed; its events stay queued.
    Nested,
    /// The top-level context closed. Everything buffered, followed by the
    /// synthetic client `context:end`, in emission order.
    Flushed(Vec<QueuedEvent>),
    /// No context was open. Nothing was queued.
    Unbalanced,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientQueue {
    contexts: Vec<String>,
    pending: VecDeque<QueuedEvent>,
}

impl ClientQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the currently open contexts, outermost first.
    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Buffer a non-structural event (log, test:*).
    pub fn push(&mut self, topic: &str, data: Value) {
        self.pending.push_back(QueuedEvent::new(topic, data));
    }

    /// Open a context. The first context of a run is preceded by a synthetic
    /// `context:start` carrying `display_name`.
    pub fn context_start(&mut self, display_name: &str, name: &str, data: Value) {
        if self.contexts.is_empty() {
            self.pending
                .push_back(QueuedEvent::client_context(Topic::ContextStart, display_name));
        }
        self.pending
            .push_back(QueuedEvent::new(Topic::ContextStart.as_str(), data));
        self.contexts.push(name.to_owned());
    }

    pub fn context_end(&mut self, display_name: &str, data: Value) -> ContextEnd {
        if self.contexts.pop().is_none() {
            return ContextEnd::Unbalanced;
        }
        self.pending
            .push_back(QueuedEvent::new(Topic::ContextEnd.as_str(), data));

        if !self.contexts.is_empty() {
            return ContextEnd::Nested;
        }

        let mut flushed = self.drain();
        flushed.push(QueuedEvent::client_context(Topic::ContextEnd, display_name));
        ContextEnd::Flushed(flushed)
    }

    /// Queue a `context:unsupported` notice. Outside any context it is
    /// released at once (with anything still buffered), with no synthetic
    /// wrapper; inside one it waits for the top-level context to close.
    pub fn context_unsupported(&mut self, data: Value) -> Option<Vec<QueuedEvent>> {
        self.pending
            .push_back(QueuedEvent::new(Topic::ContextUnsupported.as_str(), data));
        self.contexts.is_empty().then(|| self.drain())
    }

    fn drain(&mut self) -> Vec<QueuedEvent> {
        self.pending.drain(..).collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────
