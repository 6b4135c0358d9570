use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

use crate::client_registry::DEFAULT_IDLE_TIMEOUT_MS;
use crate::summary::SuiteSummary;

// ─── Wire Message ─────────────────────────────────────────────────

/// A raw message from a captured client, as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    pub client_id: String,
    pub topic: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientMessage {
    pub fn new(client_id: impl Into<String>, topic: impl Into<String>, data: Value) -> Self {
        Self {
            client_id: client_id.into(),
            topic: topic.into(),
            data,
        }
    }

    /// The `name` field carried by context and test payloads.
    pub fn name(&self) -> &str {
        self.data.get("name").and_then(Value::as_str).unwrap_or("")
    }
}

// ─── Topics ───────────────────────────────────────────────────────

/// Inbound topics the coordinator listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Ready,
    Log,
    SuiteStart,
    SuiteEnd,
    ContextStart,
    ContextEnd,
    ContextUnsupported,
    TestAsync,
    TestStart,
    TestSetUp,
    TestTearDown,
    TestSuccess,
    TestError,
    TestFailure,
    TestTimeout,
    TestDeferred,
}

impl Topic {
    pub const ALL: [Self; 16] = [
        Self::Ready,
        Self::Log,
        Self::SuiteStart,
        Self::SuiteEnd,
        Self::ContextStart,
        Self::ContextEnd,
        Self::ContextUnsupported,
        Self::TestAsync,
        Self::TestStart,
        Self::TestSetUp,
        Self::TestTearDown,
        Self::TestSuccess,
        Self::TestError,
        Self::TestFailure,
        Self::TestTimeout,
        Self::TestDeferred,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Log => "log",
            Self::SuiteStart => "suite:start",
            Self::SuiteEnd => "suite:end",
            Self::ContextStart => "context:start",
            Self::ContextEnd => "context:end",
            Self::ContextUnsupported => "context:unsupported",
            Self::TestAsync => "test:async",
            Self::TestStart => "test:start",
            Self::TestSetUp => "test:setUp",
            Self::TestTearDown => "test:tearDown",
            Self::TestSuccess => "test:success",
            Self::TestError => "test:error",
            Self::TestFailure => "test:failure",
            Self::TestTimeout => "test:timeout",
            Self::TestDeferred => "test:deferred",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| format!("unknown topic: {s}"))
    }
}

// ─── Client Descriptor ────────────────────────────────────────────

/// Public identity of a captured client, handed to reporters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDescriptor {
    pub id: String,
    pub browser: String,
    pub version: String,
    pub platform: String,
    /// Set (from 2 upwards) when another client with the same browser,
    /// version and platform was already registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_number: Option<u32>,
}

impl ClientDescriptor {
    /// True when both describe the same browser/version/platform triple.
    pub fn same_agent(&self, other: &Self) -> bool {
        self.browser == other.browser
            && self.version == other.version
            && self.platform == other.platform
    }

    /// Human-readable name, e.g. `Firefox 3.6, Linux (2)`.
    pub fn display_name(&self) -> String {
        let mut name = format!("{} {}, {}", self.browser, self.version, self.platform);
        if let Some(n) = self.duplicate_number {
            name.push_str(&format!(" ({n})"));
        }
        name
    }
}

impl fmt::Display for ClientDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

// ─── Run Configuration ────────────────────────────────────────────

/// Configuration for one coordinated run.
///
/// Everything except `idle_timeout_ms` is forwarded to each client in its
/// `tests:run` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default = "default_true")]
    pub fail_on_no_assertions: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_console: Option<bool>,
    #[serde(skip_serializing, default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            fail_on_no_assertions: true,
            auto_run: None,
            filters: Vec::new(),
            capture_console: None,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

// ─── Emitted Events ───────────────────────────────────────────────

/// A raw client event held in a per-client queue and relayed verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub topic: String,
    pub data: Value,
}

impl QueuedEvent {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }

    /// Synthetic context event named after a client rather than a test context.
    pub fn client_context(topic: Topic, display_name: &str) -> Self {
        Self::new(topic.as_str(), json!({ "name": display_name }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Success,
    Error,
    Failure,
    Timeout,
}

impl TestOutcome {
    pub fn progress_topic(self) -> &'static str {
        match self {
            Self::Success => "progress:test:success",
            Self::Error => "progress:test:error",
            Self::Failure => "progress:test:failure",
            Self::Timeout => "progress:test:timeout",
        }
    }

    /// Errors and failures carry the client's error payload; the others don't.
    pub fn carries_error(self) -> bool {
        matches!(self, Self::Error | Self::Failure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProgress {
    pub client: ClientDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestProgress {
    #[serde(skip)]
    pub outcome: TestOutcome,
    pub client: ClientDescriptor,
    pub name: String,
    pub contexts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Everything the coordinator publishes on its event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    ClientConnect(ClientDescriptor),
    ClientTimeout(ClientDescriptor),
    SuiteStart,
    SuiteEnd(SuiteSummary),
    ProgressSuiteStart(ClientProgress),
    ProgressSuiteEnd(ClientProgress),
    ProgressTest(TestProgress),
    /// A buffered client event (or a synthetic client context) flushed
    /// under its original topic.
    Relayed(QueuedEvent),
}

impl RunnerEvent {
    /// Every topic the coordinator can emit: its own events followed by the
    /// client topics it relays from flushed queues.
    pub const TOPICS: &'static [&'static str] = &[
        "client:connect",
        "client:timeout",
        "suite:start",
        "suite:end",
        "progress:suite:start",
        "progress:suite:end",
        "progress:test:success",
        "progress:test:error",
        "progress:test:failure",
        "progress:test:timeout",
        "log",
        "context:start",
        "context:end",
        "context:unsupported",
        "test:async",
        "test:start",
        "test:setUp",
        "test:tearDown",
        "test:success",
        "test:error",
        "test:failure",
        "test:timeout",
        "test:deferred",
    ];

    pub fn topic(&self) -> &str {
        match self {
            Self::ClientConnect(_) => "client:connect",
            Self::ClientTimeout(_) => "client:timeout",
            Self::SuiteStart => "suite:start",
            Self::SuiteEnd(_) => "suite:end",
            Self::ProgressSuiteStart(_) => "progress:suite:start",
            Self::ProgressSuiteEnd(_) => "progress:suite:end",
            Self::ProgressTest(progress) => progress.outcome.progress_topic(),
            Self::Relayed(event) => &event.topic,
        }
    }

    /// JSON payload as seen by reporters.
    pub fn payload(&self) -> Value {
        let encoded = match self {
            Self::ClientConnect(client) | Self::ClientTimeout(client) => {
                serde_json::to_value(client)
            }
            Self::SuiteStart => Ok(Value::Null),
            Self::SuiteEnd(summary) => serde_json::to_value(summary),
            Self::ProgressSuiteStart(progress) | Self::ProgressSuiteEnd(progress) => {
                serde_json::to_value(progress)
            }
            Self::ProgressTest(progress) => serde_json::to_value(progress),
            Self::Relayed(event) => Ok(event.data.clone()),
        };
        encoded.unwrap_or(Value::Null)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
