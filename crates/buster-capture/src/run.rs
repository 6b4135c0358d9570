//! Coordinator task: owns the runner, feeds it client frames and idle
//! expiry, and waits for the run to complete.

use std::fmt;
use std::future::Future;
use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep_until};

use buster_capture_core::{Binding, RemoteRunner, RunConfig, SuiteSummary};

use crate::reporter::JsonLinesReporter;
use crate::server;
use crate::transport::{ChannelTransport, Inbound};

const INBOUND_CAPACITY: usize = 256;

// sysexits(3)
const EX_TEMPFAIL: i32 = 75;
const EX_PROTOCOL: i32 = 76;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub listen: String,
    pub clients: Vec<String>,
    pub config: RunConfig,
    /// Overall ceiling for the run; `None` waits as long as clients stay alive.
    pub run_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Passed(SuiteSummary),
    Failed(SuiteSummary),
    /// No clients were expected, or none of them reported a result.
    NoClients,
    TimedOut,
    Interrupted,
}

impl RunOutcome {
    fn from_summary(summary: SuiteSummary) -> Self {
        if summary.clients() == 0 {
            Self::NoClients
        } else if summary.ok() {
            Self::Passed(summary)
        } else {
            Self::Failed(summary)
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Passed(_) => 0,
            Self::Failed(_) => 1,
            Self::NoClients => EX_PROTOCOL,
            Self::TimedOut => EX_TEMPFAIL,
            Self::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed(_) => f.write_str("passed"),
            Self::Failed(_) => f.write_str("failed"),
            Self::NoClients => f.write_str("no clients"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Milliseconds since the run started; the runner's only notion of time.
struct RunClock {
    start: Instant,
}

impl RunClock {
    fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn instant_at(&self, ms: u64) -> Instant {
        self.start + Duration::from_millis(ms)
    }
}

/// Bind the client listener and run until completion or ctrl-c.
pub async fn run<W>(settings: RunSettings, out: W) -> anyhow::Result<RunOutcome>
where
    W: Write + Send + 'static,
{
    let listener = TcpListener::bind(settings.listen.as_str())
        .await
        .with_context(|| format!("failed to listen on {}", settings.listen))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("received ctrl-c, aborting run");
    };

    serve_run(listener, settings, out, shutdown).await
}

/// Run on an already bound listener until the run completes, the overall
/// deadline passes, or `shutdown` resolves.
pub async fn serve_run<W, F>(
    listener: TcpListener,
    settings: RunSettings,
    out: W,
    shutdown: F,
) -> anyhow::Result<RunOutcome>
where
    W: Write + Send + 'static,
    F: Future<Output = ()> + Send,
{
    if settings.clients.is_empty() {
        tracing::warn!("no clients expected, nothing to run");
        return Ok(RunOutcome::NoClients);
    }

    tracing::info!(
        addr = %listener.local_addr()?,
        clients = settings.clients.len(),
        "waiting for clients"
    );

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, inbound_tx).await {
            tracing::error!("client listener error: {e}");
        }
    });

    let mut runner = RemoteRunner::new(
        ChannelTransport::default(),
        settings.clients,
        settings.config,
    );
    let reporter = Arc::new(Mutex::new(JsonLinesReporter::new(out)));
    runner.events().bind(&reporter, Binding::All)?;

    let outcome = drive(&mut runner, inbound_rx, settings.run_timeout, shutdown).await;
    server_handle.abort();

    if let Ok(reporter) = reporter.lock() {
        tracing::debug!(lines = reporter.written(), "reporter finished");
    }
    tracing::debug!(discarded = runner.discarded(), "runner finished");
    outcome
}

async fn drive<F>(
    runner: &mut RemoteRunner<ChannelTransport>,
    mut inbound: mpsc::Receiver<Inbound>,
    run_timeout: Option<Duration>,
    shutdown: F,
) -> anyhow::Result<RunOutcome>
where
    F: Future<Output = ()>,
{
    let clock = RunClock::start();
    let run_deadline = run_timeout.map(|timeout| clock.start + timeout);
    tokio::pin!(shutdown);

    loop {
        if let Some(summary) = runner.summary() {
            return Ok(RunOutcome::from_summary(summary.clone()));
        }
        let idle_deadline = runner.next_deadline().map(|ms| clock.instant_at(ms));

        tokio::select! {
            biased;
            () = &mut shutdown => return Ok(RunOutcome::Interrupted),
            () = sleep_until_some(run_deadline) => {
                tracing::warn!(
                    live = runner.live_count(),
                    expected = runner.expected_count(),
                    "run deadline passed before all clients finished"
                );
                return Ok(RunOutcome::TimedOut);
            }
            () = sleep_until_some(idle_deadline) => {
                runner.expire_idle(clock.now_ms());
            }
            frame = inbound.recv() => {
                let Some(frame) = frame else {
                    anyhow::bail!("client listener stopped");
                };
                if let Some(msg) = runner.transport_mut().apply(frame) {
                    runner.handle(msg, clock.now_ms());
                }
            }
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
