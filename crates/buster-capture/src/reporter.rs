//! JSON-lines reporter: one `{"ts", "event", "payload"}` object per emitted
//! runner event.

use std::io::Write;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use buster_capture_core::{EventTarget, ListenerError, ListenerResult, RunnerEvent};

#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    event: &'a str,
    payload: Value,
}

pub struct JsonLinesReporter<W> {
    out: W,
    written: u64,
}

impl<W: Write> JsonLinesReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn write_event(&mut self, event: &RunnerEvent) -> anyhow::Result<()> {
        let line = Line {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event: event.topic(),
            payload: event.payload(),
        };
        serde_json::to_writer(&mut self.out, &line)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        self.written += 1;
        Ok(())
    }
}

impl<W: Write + Send + 'static> EventTarget<RunnerEvent> for JsonLinesReporter<W> {
    const HANDLERS: &'static [&'static str] = RunnerEvent::TOPICS;

    fn call(&mut self, _handler: &str, event: &RunnerEvent) -> ListenerResult {
        self.write_event(event)
            .map_err(|e| ListenerError::new(format!("json-lines reporter: {e}")))
    }
}
