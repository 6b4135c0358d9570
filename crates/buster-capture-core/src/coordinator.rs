//! Remote test-run coordinator.
//!
//! Receives raw messages from every captured client taking part in a run,
//! routes structural events through each client's queue, publishes
//! normalized progress events, and emits one aggregated `suite:end` once
//! every expected client has finished or timed out.
//!
//! State machine: `Idle -> Started -> Completed`. Invalid input is never an
//! error: messages for unknown clients or topics, or after completion, are
//! counted and dropped.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::client_queue::ContextEnd;
use crate::client_registry::{ClientRegistry, ClientSession};
use crate::error::TransportError;
use crate::event_bus::EventBus;
use crate::summary::SuiteSummary;
use crate::types::{
    ClientDescriptor, ClientMessage, ClientProgress, QueuedEvent, RunConfig, RunnerEvent,
    TestOutcome, TestProgress, Topic,
};

// ─── Transport Seam ──────────────────────────────────────────────────

/// Outbound side of the client transport.
pub trait Transport {
    /// Tell a client to start running its tests with `config`.
    fn start_tests(&mut self, client_id: &str, config: &RunConfig) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn start_tests(&mut self, client_id: &str, config: &RunConfig) -> Result<(), TransportError> {
        (**self).start_tests(client_id, config)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn start_tests(&mut self, client_id: &str, config: &RunConfig) -> Result<(), TransportError> {
        (**self).start_tests(client_id, config)
    }
}

// ─── Run State ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No client has started its suite yet.
    Idle,
    /// At least one client reported `suite:start`.
    Started,
    /// Every expected client finished or timed out; `suite:end` was emitted.
    Completed,
}

type Handler<T> = fn(&mut RemoteRunner<T>, ClientMessage, u64);

// ─── Remote Runner ───────────────────────────────────────────────────

pub struct RemoteRunner<T> {
    transport: T,
    config: RunConfig,
    expected: HashSet<String>,
    expected_count: usize,
    live_count: usize,
    registry: ClientRegistry,
    /// Clients whose outcome (finished or timed out) has been counted.
    settled: HashSet<String>,
    /// `suite:end` payloads in arrival order.
    results: Vec<Value>,
    summary: Option<SuiteSummary>,
    state: RunState,
    bus: EventBus<RunnerEvent>,
    dispatch: HashMap<&'static str, Handler<T>>,
    discarded: u64,
}

impl<T: Transport> RemoteRunner<T> {
    /// Topic -> handler table, installed once per runner.
    const DISPATCH: [(Topic, Handler<T>); 16] = [
        (Topic::Ready, Self::client_ready),
        (Topic::Log, Self::queue_only),
        (Topic::SuiteStart, Self::suite_start),
        (Topic::SuiteEnd, Self::suite_end),
        (Topic::ContextUnsupported, Self::context_unsupported),
        (Topic::ContextStart, Self::context_start),
        (Topic::ContextEnd, Self::context_end),
        (Topic::TestAsync, Self::queue_only),
        (Topic::TestStart, Self::queue_only),
        (Topic::TestSetUp, Self::queue_only),
        (Topic::TestTearDown, Self::queue_only),
        (Topic::TestSuccess, Self::test_success),
        (Topic::TestError, Self::test_error),
        (Topic::TestFailure, Self::test_failure),
        (Topic::TestTimeout, Self::test_timeout),
        (Topic::TestDeferred, Self::queue_only),
    ];

    /// Create a runner for the given expected client ids.
    pub fn new<I, S>(transport: T, expected_clients: I, config: RunConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expected: HashSet<String> = expected_clients.into_iter().map(Into::into).collect();
        let expected_count = expected.len();
        let dispatch = Self::DISPATCH
            .iter()
            .map(|(topic, handler)| (topic.as_str(), *handler))
            .collect();

        Self {
            transport,
            registry: ClientRegistry::new(config.idle_timeout_ms),
            config,
            expected,
            expected_count,
            live_count: expected_count,
            settled: HashSet::new(),
            results: Vec::new(),
            summary: None,
            state: RunState::Idle,
            bus: EventBus::new(),
            dispatch,
            discarded: 0,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// The bus reporters subscribe to.
    pub fn events(&mut self) -> &mut EventBus<RunnerEvent> {
        &mut self.bus
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Per-client `suite:end` payloads in arrival order.
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// The aggregated result, once the run has completed.
    pub fn summary(&self) -> Option<&SuiteSummary> {
        self.summary.as_ref()
    }

    /// Messages dropped because of an unknown client or topic, a client
    /// outside this run, or arrival after completion.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Earliest client idle deadline, for the caller's timer.
    pub fn next_deadline(&self) -> Option<u64> {
        self.registry.next_deadline()
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Handle one message from the transport.
    pub fn handle(&mut self, msg: ClientMessage, now_ms: u64) {
        if self.is_completed() {
            self.discard(&msg, "run already completed");
            return;
        }
        let Some(handler) = self.dispatch.get(msg.topic.as_str()).copied() else {
            self.discard(&msg, "unknown topic");
            return;
        };
        handler(self, msg, now_ms);
    }

    /// Expire every client whose idle deadline has passed. Returns how many
    /// timed out.
    pub fn expire_idle(&mut self, now_ms: u64) -> usize {
        let mut count = 0;
        for session in self.registry.expire_due(now_ms) {
            if self.settle_timeout(session.descriptor) {
                count += 1;
            }
        }
        count
    }

    /// Give up on a registered client: it contributes no result but no
    /// longer blocks completion. Returns `false` if `client_id` is not a
    /// registered, unsettled client of this run.
    pub fn client_timeout(&mut self, client_id: &str) -> bool {
        match self.registry.expire(client_id) {
            Some(session) => self.settle_timeout(session.descriptor),
            None => false,
        }
    }

    // ── Handlers ────────────────────────────────────────────────────

    // ── Handlers ────────────────────────────────────────────────────

    fn client_ready(&mut self, msg: ClientMessage, now_ms: u64) {
        tracing::debug!(client_id = %msg.client_id, "client ready");
        if !self.expected.contains(&msg.client_id) {
            self.discard(&msg, "client not part of this run");
            return;
        }
        if self.settled.contains(&msg.client_id) {
            self.discard(&msg, "client already settled");
            return;
        }

        let user_agent = msg.data.as_str().unwrap_or_default();
        let client = self
            .registry
            .register_ready(&msg.client_id, user_agent, now_ms)
            .descriptor
            .clone();

        if let Err(err) = self.transport.start_tests(&client.id, &self.config) {
            tracing::warn!(client_id = %client.id, error = %err, "failed to start tests");
        }
        tracing::info!(client = %client, client_id = %client.id, "client connected");
        self.emit(RunnerEvent::ClientConnect(client));
    }

    fn suite_start(&mut self, msg: ClientMessage, now_ms: u64) {
        let Some(client) = self.known_client(&msg, now_ms) else {
            return;
        };
        if self.state == RunState::Idle {
            self.state = RunState::Started;
            self.emit(RunnerEvent::SuiteStart);
        }
        self.emit(RunnerEvent::ProgressSuiteStart(ClientProgress { client }));
    }

    fn suite_end(&mut self, msg: ClientMessage, now_ms: u64) {
        let Some(client) = self.known_client(&msg, now_ms) else {
            return;
        };
        if !self.settled.insert(client.id.clone()) {
            self.discard(&msg, "client already settled");
            return;
        }

        self.registry.disarm(&client.id);
        if let Some(session) = self.registry.lookup_mut(&client.id) {
            session.result = Some(msg.data.clone());
        }
        self.emit(RunnerEvent::ProgressSuiteEnd(ClientProgress { client }));
        self.results.push(msg.data);
        self.live_count = self.live_count.saturating_sub(1);
        self.complete_if_drained();
    }

    fn context_start(&mut self, msg: ClientMessage, now_ms: u64) {
        let Some(session) = self.known_session(&msg, now_ms) else {
            return;
        };
        let display_name = session.descriptor.display_name();
        let name = msg.name().to_owned();
        session.queue.context_start(&display_name, &name, msg.data);
    }

    fn context_end(&mut self, msg: ClientMessage, now_ms: u64) {
        let Some(session) = self.known_session(&msg, now_ms) else {
            return;
        };
        let display_name = session.descriptor.display_name();
        match session.queue.context_end(&display_name, msg.data.clone()) {
            ContextEnd::Nested => {}
            ContextEnd::Flushed(events) => self.relay(events),
            ContextEnd::Unbalanced => self.discard(&msg, "context:end without open context"),
        }
    }

    fn context_unsupported(&mut self, msg: ClientMessage, now_ms: u64) {
        let Some(session) = self.known_session(&msg, now_ms) else {
            return;
        };
        if let Some(events) = session.queue.context_unsupported(msg.data) {
            self.relay(events);
        }
    }

    fn queue_only(&mut self, msg: ClientMessage, now_ms: u64) {
        if let Some(session) = self.known_session(&msg, now_ms) {
            session.queue.push(&msg.topic, msg.data);
        }
    }

    fn test_success(&mut self, msg: ClientMessage, now_ms: u64) {
        self.test_progress(msg, now_ms, TestOutcome::Success);
    }

    fn test_error(&mut self, msg: ClientMessage, now_ms: u64) {
        self.test_progress(msg, now_ms, TestOutcome::Error);
    }

    fn test_failure(&mut self, msg: ClientMessage, now_ms: u64) {
        self.test_progress(msg, now_ms, TestOutcome::Failure);
    }

    fn test_timeout(&mut self, msg: ClientMessage, now_ms: u64) {
        self.test_progress(msg, now_ms, TestOutcome::Timeout);
    }

    /// Queue the raw test event and publish its progress event right away.
    fn test_progress(&mut self, msg: ClientMessage, now_ms: u64, outcome: TestOutcome) {
        let Some(session) = self.known_session(&msg, now_ms) else {
            return;
        };
        let progress = TestProgress {
            outcome,
            client: session.descriptor.clone(),
            name: msg.name().to_owned(),
            contexts: session.queue.contexts().to_vec(),
            error: outcome
                .carries_error()
                .then(|| msg.data.get("error").cloned())
                .flatten(),
        };
        session.queue.push(&msg.topic, msg.data);
        self.emit(RunnerEvent::ProgressTest(progress));
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Look up the sender and reset its idle timer. Drops the message if
    /// the client is not registered.
    fn known_session(&mut self, msg: &ClientMessage, now_ms: u64) -> Option<&mut ClientSession> {
        if !self.registry.touch(&msg.client_id, now_ms) {
            self.discard(msg, "unknown client");
            return None;
        }
        self.registry.lookup_mut(&msg.client_id)
    }

    fn known_client(&mut self, msg: &ClientMessage, now_ms: u64) -> Option<ClientDescriptor> {
        self.known_session(msg, now_ms)
            .map(|session| session.descriptor.clone())
    }

    /// Count a client as gone. Each expected client is settled at most once.
    fn settle_timeout(&mut self, client: ClientDescriptor) -> bool {
        if self.is_completed()
            || !self.expected.contains(&client.id)
            || !self.settled.insert(client.id.clone())
        {
            return false;
        }

        tracing::warn!(client = %client, client_id = %client.id, "client timed out");
        self.emit(RunnerEvent::ClientTimeout(client));
        self.live_count = self.live_count.saturating_sub(1);
        self.complete_if_drained();
        true
    }

    fn complete_if_drained(&mut self) {
        if self.live_count > 0 || self.is_completed() {
            return;
        }
        self.registry.disarm_all();
        let summary = SuiteSummary::aggregate(&self.results);
        self.state = RunState::Completed;
        self.summary = Some(summary.clone());
        tracing::info!(
            clients = summary.clients(),
            expected = self.expected_count,
            ok = summary.ok(),
            "run completed"
        );
        self.emit(RunnerEvent::SuiteEnd(summary));
    }

    fn relay(&mut self, events: Vec<QueuedEvent>) {
        for event in events {
            self.emit(RunnerEvent::Relayed(event));
        }
    }

    fn emit(&mut self, event: RunnerEvent) {
        self.bus.emit(event.topic(), &event);
    }

    fn discard(&mut self, msg: &ClientMessage, reason: &'static str) {
        self.discarded += 1;
        tracing::debug!(
            client_id = %msg.client_id,
            topic = %msg.topic,
            reason,
            "discarding client message"
        );
    }
}

impl<T> std::fmt::Debug for RemoteRunner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRunner")
            .field("state", &self.state)
            .field("expected_count", &self.expected_count)
            .field("live_count", &self.live_count)
            .field("registry", &self.registry)
            .field("results", &self.results.len())
            .field("discarded", &self.discarded)
            .finish_non_exhaustive()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const CHROME: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/534.24 \
                          (KHTML, like Gecko) Chrome/11.0.696.16 Safari/534.24";
    const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:3.6) Gecko Firefox/3.6";

    // ── Helpers ──────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingTransport {
        started: Vec<(String, RunConfig)>,
        fail: bool,
    }

    impl Transport for RecordingTransport {
        fn start_tests(
            &mut self,
            client_id: &str,
            config: &RunConfig,
        ) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::ClientGone(client_id.to_owned()));
            }
            self.started.push((client_id.to_owned(), config.clone()));
            Ok(())
        }
    }

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    fn runner(expected: &[&str]) -> (RemoteRunner<RecordingTransport>, Seen) {
        runner_with(expected, RunConfig::default())
    }

    fn runner_with(
        expected: &[&str],
        config: RunConfig,
    ) -> (RemoteRunner<RecordingTransport>, Seen) {
        let mut runner = RemoteRunner::new(
            RecordingTransport::default(),
            expected.iter().copied(),
            config,
        );
        let seen: Seen = Arc::default();
        for topic in RunnerEvent::TOPICS {
            let seen = Arc::clone(&seen);
            runner.events().on(topic, move |event: &RunnerEvent| {
                seen.lock()
                    .expect("seen")
                    .push((event.topic().to_owned(), event.payload()));
                Ok(())
            });
        }
        (runner, seen)
    }

    fn msg(client: &str, topic: &str, data: Value) -> ClientMessage {
        ClientMessage::new(client, topic, data)
    }

    fn named(name: &str) -> Value {
        json!({ "name": name })
    }

    fn topics(seen: &Seen) -> Vec<String> {
        seen.lock()
            .expect("seen")
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    fn take(seen: &Seen) -> Vec<(String, Value)> {
        std::mem::take(&mut *seen.lock().expect("seen"))
    }

    fn count(seen: &Seen, topic: &str) -> usize {
        seen.lock()
            .expect("seen")
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }

    // ── 1. ready ────────────────────────────────────────────────────

    #[test]
    fn ready_registers_client_and_starts_tests() {
        let config = RunConfig {
            filters: vec!["login".to_owned()],
            ..RunConfig::default()
        };
        let (mut runner, seen) = runner_with(&["c1"], config.clone());

        runner.handle(msg("c1", "ready", json!(CHROME)), 0);

        assert_eq!(runner.transport().started, vec![("c1".to_owned(), config)]);
        let events = take(&seen);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "client:connect");
        assert_eq!(events[0].1["browser"], "Chrome");
        assert_eq!(events[0].1["id"], "c1");
        assert!(runner.registry().lookup("c1").is_some());
    }

    #[test]
    fn ready_from_unexpected_client_is_ignored() {
        let (mut runner, seen) = runner(&["c1"]);

        runner.handle(msg("intruder", "ready", json!(CHROME)), 0);

        assert!(runner.transport().started.is_empty());
        assert!(topics(&seen).is_empty());
        assert!(runner.registry().is_empty());
        assert_eq!(runner.discarded(), 1);
    }

    #[test]
    fn repeated_expected_ids_count_once() {
        let (runner, _) = runner(&["c1", "c1", "c2"]);
        assert_eq!(runner.expected_count(), 2);
        assert_eq!(runner.live_count(), 2);
    }

    #[test]
    fn transport_failure_on_ready_still_connects() {
        let mut runner = RemoteRunner::new(
            RecordingTransport {
                fail: true,
                ..RecordingTransport::default()
            },
            ["c1"],
            RunConfig::default(),
        );
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        assert!(runner.registry().lookup("c1").is_some());
    }

    #[test]
    fn identical_browsers_get_duplicate_numbers() {
        let (mut runner, seen) = runner(&["c1", "c2", "c3"]);
        for id in ["c1", "c2", "c3"] {
            runner.handle(msg(id, "ready", json!(CHROME)), 0);
        }

        let dups: Vec<Value> = take(&seen)
            .into_iter()
            .map(|(_, payload)| payload.get("duplicateNumber").cloned().unwrap_or(Value::Null))
            .collect();
        assert_eq!(dups, vec![Value::Null, json!(2), json!(3)]);
    }

    // ── 2. suite start ──────────────────────────────────────────────

    #[test]
    fn first_suite_start_is_global_then_per_client_only() {
        let (mut runner, seen) = runner(&["c1", "c2"]);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        runner.handle(msg("c2", "ready", json!(FIREFOX)), 0);
        take(&seen);

        runner.handle(msg("c1", "suite:start", Value::Null), 10);
        runner.handle(msg("c2", "suite:start", Value::Null), 20);

        assert_eq!(
            topics(&seen),
            vec!["suite:start", "progress:suite:start", "progress:suite:start"]
        );
        assert_eq!(runner.state(), RunState::Started);
    }

    // ── 3. nesting flush ────────────────────────────────────────────

    #[test]
    fn nested_contexts_flush_after_top_level_end() {
        let (mut runner, seen) = runner(&["c1"]);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        take(&seen);

        runner.handle(msg("c1", "context:start", named("A")), 1);
        runner.handle(msg("c1", "context:start", named("B")), 2);
        runner.handle(msg("c1", "test:success", named("t1")), 3);

        // only the progress event is visible before the subtree closes
        let early = take(&seen);
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].0, "progress:test:success");
        assert_eq!(early[0].1["name"], "t1");
        assert_eq!(early[0].1["contexts"], json!(["A", "B"]));

        runner.handle(msg("c1", "context:end", named("B")), 4);
        assert!(topics(&seen).is_empty());

        runner.handle(msg("c1", "context:end", named("A")), 5);
        let display = "Chrome 11.0.696.16, Linux";
        assert_eq!(
            take(&seen),
            vec![
                ("context:start".to_owned(), named(display)),
                ("context:start".to_owned(), named("A")),
                ("context:start".to_owned(), named("B")),
                ("test:success".to_owned(), named("t1")),
                ("context:end".to_owned(), named("B")),
                ("context:end".to_owned(), named("A")),
                ("context:end".to_owned(), named(display)),
            ]
        );
    }

    #[test]
    fn failure_progress_carries_error() {
        let (mut runner, seen) = runner(&["c1"]);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        take(&seen);

        runner.handle(
            msg(
                "c1",
                "test:failure",
                json!({ "name": "adds", "error": { "message": "expected 3" } }),
            ),
            1,
        );
        runner.handle(
            msg(
                "c1",
                "test:timeout",
                json!({ "name": "slow", "error": { "message": "ignored" } }),
            ),
            2,
        );

        let events = take(&seen);
        assert_eq!(events[0].0, "progress:test:failure");
        assert_eq!(events[0].1["error"]["message"], "expected 3");
        assert_eq!(events[1].0, "progress:test:timeout");
        assert!(events[1].1.get("error").is_none());
    }

    #[test]
    fn unbalanced_context_end_is_discarded() {
        let (mut runner, seen) = runner(&["c1"]);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        take(&seen);

        runner.handle(msg("c1", "context:end", named("A")), 1);

        assert!(topics(&seen).is_empty());
        assert_eq!(runner.discarded(), 1);
    }

    // ── 4. aggregation ──────────────────────────────────────────────

    #[test]
    fn suite_end_from_all_clients_emits_aggregate() {
        let (mut runner, seen) = runner(&["c1", "c2"]);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        runner.handle(msg("c2", "ready", json!(FIREFOX)), 0);
        runner.handle(msg("c1", "suite:start", Value::Null), 1);
        runner.handle(msg("c2", "suite:start", Value::Null), 1);
        take(&seen);

        runner.handle(msg("c2", "suite:end", json!({ "ok": false, "tests": 5 })), 2);
        assert_eq!(topics(&seen), vec!["progress:suite:end"]);
        assert_eq!(runner.live_count(), 1);

        runner.handle(msg("c1", "suite:end", json!({ "ok": true, "tests": 10 })), 3);
        let events = take(&seen);
        assert_eq!(events.last().expect("suite:end").0, "suite:end");
        assert_eq!(
            events.last().expect("suite:end").1,
            json!({ "clients": 2, "ok": false, "tests": 15 })
        );
        assert_eq!(runner.state(), RunState::Completed);
        assert_eq!(runner.results()[0]["tests"], 5);
        assert_eq!(runner.next_deadline(), None);
        assert!(!runner.summary().expect("summary").ok());
    }

    #[test]
    fn repeated_suite_end_counts_once() {
        let (mut runner, seen) = runner(&["c1", "c2"]);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        runner.handle(msg("c2", "ready", json!(FIREFOX)), 0);

        runner.handle(msg("c1", "suite:end", json!({ "ok": true })), 1);
        runner.handle(msg("c1", "suite:end", json!({ "ok": true })), 2);

        assert_eq!(runner.live_count(), 1);
        assert_eq!(count(&seen, "suite:end"), 0);
        assert_eq!(runner.results().len(), 1);
    }

    // ── 5. timeouts ─────────────────────────────────────────────────

    #[test]
    fn timed_out_client_lets_run_complete() {
        let config = RunConfig {
            idle_timeout_ms: 100,
            ..RunConfig::default()
        };
        let (mut runner, seen) = runner_with(&["c1", "c2"], config);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        runner.handle(msg("c2", "ready", json!(FIREFOX)), 0);
        runner.handle(msg("c1", "suite:start", Value::Null), 10);
        runner.handle(msg("c1", "suite:end", json!({ "ok": true, "tests": 3 })), 20);

        // c1 is disarmed; only c2 (deadline 100) can expire
        assert_eq!(runner.next_deadline(), Some(100));
        assert_eq!(runner.expire_idle(99), 0);
        assert_eq!(runner.expire_idle(100), 1);

        assert_eq!(count(&seen, "client:timeout"), 1);
        assert_eq!(count(&seen, "suite:end"), 1);
        let summary = runner.summary().expect("completed");
        assert_eq!(summary.clients(), 1);
        assert!(summary.ok());
        assert!(runner.registry().lookup("c2").is_none());
    }

    #[test]
    fn finished_client_never_times_out() {
        let config = RunConfig {
            idle_timeout_ms: 100,
            ..RunConfig::default()
        };
        let (mut runner, seen) = runner_with(&["c1", "c2"], config);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        runner.handle(msg("c2", "ready", json!(FIREFOX)), 0);
        runner.handle(msg("c1", "suite:end", json!({ "ok": true })), 10);

        for now in (50..500).step_by(50) {
            runner.handle(msg("c2", "log", json!({ "message": "tick" })), now);
            runner.expire_idle(now);
        }

        assert_eq!(count(&seen, "client:timeout"), 0);
        assert_eq!(runner.live_count(), 1);
        assert!(runner.registry().lookup("c1").is_some());
    }

    #[test]
    fn timeout_then_late_messages_are_discarded() {
        let config = RunConfig {
            idle_timeout_ms: 100,
            ..RunConfig::default()
        };
        let (mut runner, seen) = runner_with(&["c1", "c2"], config);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        runner.handle(msg("c2", "ready", json!(FIREFOX)), 60);
        runner.expire_idle(100);
        take(&seen);

        runner.handle(msg("c1", "test:success", named("late")), 101);
        runner.handle(msg("c1", "ready", json!(CHROME)), 102);
        runner.handle(msg("c1", "suite:end", json!({ "ok": true })), 103);

        assert!(topics(&seen).is_empty());
        assert_eq!(runner.live_count(), 1);
        assert_eq!(runner.discarded(), 3);
    }

    #[test]
    fn all_clients_timing_out_completes_with_no_results() {
        let config = RunConfig {
            idle_timeout_ms: 100,
            ..RunConfig::default()
        };
        let (mut runner, seen) = runner_with(&["c1"], config);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);

        runner.expire_idle(1000);

        assert!(runner.is_completed());
        let events = take(&seen);
        assert_eq!(
            events.last().expect("suite:end"),
            &("suite:end".to_owned(), json!({ "clients": 0 }))
        );
    }

    #[test]
    fn timeout_of_unregistered_client_is_ignored() {
        let (mut runner, seen) = runner(&["c1"]);

        assert!(!runner.client_timeout("ghost"));
        assert!(!runner.client_timeout("c1"));

        assert!(topics(&seen).is_empty());
        assert_eq!(runner.live_count(), 1);
        assert_eq!(runner.state(), RunState::Idle);
    }

    #[test]
    fn explicit_timeout_settles_registered_client_once() {
        let (mut runner, seen) = runner(&["c1", "c2"]);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        take(&seen);

        assert!(runner.client_timeout("c1"));
        assert!(!runner.client_timeout("c1"));

        assert_eq!(topics(&seen), vec!["client:timeout"]);
        assert_eq!(runner.live_count(), 1);
        assert!(!runner.is_completed());
        assert!(runner.registry().lookup("c1").is_none());
    }

    // ── 6. discards ─────────────────────────────────────────────────

    #[test]
    fn unknown_client_messages_are_discarded_silently() {
        let (mut runner, seen) = runner(&["c1"]);

        runner.handle(msg("ghost", "test:success", named("t1")), 0);
        runner.handle(msg("ghost", "suite:end", json!({ "ok": true })), 0);

        assert!(topics(&seen).is_empty());
        assert_eq!(runner.discarded(), 2);
        assert_eq!(runner.live_count(), 1);
        assert_eq!(runner.state(), RunState::Idle);
    }

    #[test]
    fn unknown_topic_is_discarded() {
        let (mut runner, seen) = runner(&["c1"]);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        take(&seen);

        runner.handle(msg("c1", "tests:run", Value::Null), 1);

        assert!(topics(&seen).is_empty());
        assert_eq!(runner.discarded(), 1);
    }

    #[test]
    fn messages_after_completion_are_discarded() {
        let (mut runner, seen) = runner(&["c1"]);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        runner.handle(msg("c1", "suite:end", json!({ "ok": true })), 1);
        take(&seen);

        runner.handle(msg("c1", "suite:start", Value::Null), 2);
        runner.handle(msg("c1", "suite:end", json!({ "ok": true })), 3);

        assert!(topics(&seen).is_empty());
        assert_eq!(runner.discarded(), 2);
    }

    // ── 7. idle reset ───────────────────────────────────────────────

    #[test]
    fn any_message_resets_idle_timer() {
        let config = RunConfig {
            idle_timeout_ms: 100,
            ..RunConfig::default()
        };
        let (mut runner, seen) = runner_with(&["c1"], config);
        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        runner.handle(msg("c1", "context:start", named("A")), 90);
        runner.handle(msg("c1", "test:start", named("t1")), 180);

        assert_eq!(runner.expire_idle(200), 0);
        assert_eq!(runner.next_deadline(), Some(280));
        assert_eq!(count(&seen, "client:timeout"), 0);
    }

    // ── 8. listener faults ──────────────────────────────────────────

    #[test]
    fn failing_reporter_does_not_disturb_run() {
        let (mut runner, seen) = runner(&["c1"]);
        runner
            .events()
            .on("suite:end", |_: &RunnerEvent| -> crate::ListenerResult {
                panic!("reporter bug")
            });

        runner.handle(msg("c1", "ready", json!(CHROME)), 0);
        runner.handle(msg("c1", "suite:end", json!({ "ok": true })), 1);

        assert!(runner.is_completed());
        assert_eq!(count(&seen, "suite:end"), 1);
        assert_eq!(runner.events().faults(), 1);
    }
}
