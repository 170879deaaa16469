//! Audit sinks for crabwire.
//!
//! The runtime and the tool registry emit [`AuditEvent`]s on a
//! fire-and-forget basis; sinks here persist them. Sinks must never
//! propagate errors into the chat path, so every failure is swallowed
//! after a debug log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use crabwire_core::audit::{AuditEvent, AuditSink};
use serde::Serialize;
use tracing::debug;

/// One line of the audit log: a timestamp with the event's own fields
/// flattened next to it.
#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Append-only JSON-lines audit log.
///
/// The file is opened once and held for the process lifetime; each
/// event becomes one line. A broken audit log never breaks a chat.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditSink {
    /// Open the sink at `path`, creating parent directories as needed.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) {
        let line = Line {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };
        let Ok(mut json) = serde_json::to_string(&line) else {
            return;
        };
        json.push('\n');

        let Ok(mut file) = self.file.lock() else {
            return;
        };
        if let Err(e) = file.write_all(json.as_bytes()) {
            debug!(error = %e, "Audit write failed");
        }
    }
}

impl std::fmt::Debug for JsonlAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// An audit sink that forwards events to the `tracing` log stream.
/// Useful when no file sink is configured.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &AuditEvent) {
        tracing::info!(kind = event.kind(), event = ?event, "AUDIT");
    }
}
