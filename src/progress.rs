//! Indexing progress reporting.
//!
//! Reports observable progress during `nh index` so users see how many
//! items were found and how far summarization has got. Progress is emitted
//! on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::str::FromStr;

use crate::models::ItemKind;

/// A single progress event for an indexing run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// A listing finished paging; `found` items of this kind will be summarized.
    Listing { kind: ItemKind, found: u64 },
    /// `n` of `total` items processed (summarized or skipped).
    Summarizing { n: u64, total: u64 },
}

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: `index  summarizing  12 / 1,204 items`.
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Listing { kind, found } => {
                format!("index  listed {} {}s\n", format_number(*found), kind)
            }
            IndexProgressEvent::Summarizing { n, total } => format!(
                "index  summarizing  {} / {} items\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Listing { kind, found } => serde_json::json!({
                "event": "progress",
                "phase": "listing",
                "kind": kind,
                "found": found
            }),
            IndexProgressEvent::Summarizing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "summarizing",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}' (expected human, json or off)",
                other
            )),
        }
    }
}
