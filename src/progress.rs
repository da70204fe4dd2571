//! Event sinks and CLI progress reporting.
//!
//! Core operations report through [`EventSink`]. The worker forwards events
//! over its channel; the CLI renders them on **stderr** so stdout remains
//! parseable for scripts (human lines or one JSON object per line).

use std::io::Write;
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::Event;

/// Receives events produced by ingest and search.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl EventSink for UnboundedSender<Event> {
    fn emit(&self, event: Event) {
        // A closed receiver means the caller went away; nothing to report to.
        let _ = self.send(event);
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Renders events for a terminal user.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &Event);
}

/// Human-friendly progress on stderr: "search #3  scanning  1,500 / 12,000 messages  (42 matches)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &Event) {
        let line = match event {
            Event::Status { msg } => format!("{}\n", msg),
            Event::Error { msg } => format!("error: {}\n", msg),
            Event::SearchMeta { total, search_id } => format!(
                "search #{}  {} messages to scan\n",
                search_id,
                format_number(*total)
            ),
            Event::SearchProgress {
                scanned,
                matched,
                total,
                search_id,
            } => format!(
                "search #{}  scanning  {} / {} messages  ({} matches)\n",
                search_id,
                format_number(*scanned),
                format_number(*total),
                format_number(*matched)
            ),
            _ => return,
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON event per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &Event) {
        if matches!(
            event,
            Event::SearchBatch { .. } | Event::Threads { .. } | Event::ThreadMessages { .. }
        ) {
            return;
        }
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// Only errors, for non-interactive runs.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, event: &Event) {
        if let Event::Error { msg } = event {
            let _ = writeln!(std::io::stderr().lock(), "error: {}", msg);
        }
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
