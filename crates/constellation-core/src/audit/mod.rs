//! Structured audit trail.
//!
//! One JSON object per line, serialized under a mutex so records from the
//! two relay tasks never interleave on the wire. Writes are best-effort: a
//! full audit disk must not take the proxy down.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// A tool invocation audit record. Written exactly once per client
/// `tools/call` message.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallEvent {
    pub server: String,
    pub tool: String,
    /// Arguments as received; redact with [`redact_secrets`] before logging
    /// when names collide with injected secret env names.
    pub arguments: Map<String, Value>,
    /// `allow` or `deny`.
    pub decision: String,
    /// Index of the matched rule, `-1` when the default applied.
    pub matched_rule: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Serialize)]
struct Record<T: Serialize> {
    timestamp: String,
    event: &'static str,
    #[serde(flatten)]
    body: T,
}

/// Writes structured JSON audit events to a shared sink.
pub struct AuditLogger {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl AuditLogger {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Append to a file, creating it if missing.
    pub fn to_file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(io::stderr()))
    }

    pub fn log_startup(&self, server: &str, policy_path: &str) {
        self.write(
            "startup",
            serde_json::json!({
                "server": server,
                "policy_file": policy_path,
            }),
        );
    }

    pub fn log_shutdown(&self, server: &str) {
        self.write("shutdown", serde_json::json!({ "server": server }));
    }

    /// Record a tool invocation. `reason` is dropped when empty and
    /// `duration_ms` when zero.
    pub fn log_tool_call(&self, mut event: ToolCallEvent) {
        event.reason = event.reason.filter(|reason| !reason.is_empty());
        event.duration_ms = event.duration_ms.filter(|duration| *duration > 0);
        self.write("tool_call", event);
    }

    fn write<T: Serialize>(&self, event: &'static str, body: T) {
        let record = Record {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            event,
            body,
        };
        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{json}");
        }
    }
}

/// Replace argument values whose names collide with secret-bound env names
/// with `[REDACTED:<reference>]`. Returns a new map; the input is untouched.
pub fn redact_secrets(
    arguments: &Map<String, Value>,
    secret_refs: &BTreeMap<String, String>,
) -> Map<String, Value> {
    let mut redacted = arguments.clone();
    for (env_name, reference) in secret_refs {
        if let Some(slot) = redacted.get_mut(env_name) {
            *slot = Value::String(format!("[REDACTED:{reference}]"));
        }
    }
    redacted
}
