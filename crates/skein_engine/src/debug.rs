use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;

/// Audit record for one inbound envelope or one failed collaborator call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebugEntry {
    pub kind: String,
    pub workspace_id: Option<String>,
    pub payload: Value,
    pub at_ms: u64,
}

pub trait DebugSink: Send + Sync {
    fn record(&self, entry: DebugEntry);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDebugSink;

impl DebugSink for TracingDebugSink {
    fn record(&self, entry: DebugEntry) {
        tracing::debug!(
            target: "skein::events",
            kind = %entry.kind,
            workspace_id = entry.workspace_id.as_deref().unwrap_or_default(),
            at_ms = entry.at_ms,
            payload = %entry.payload,
        );
    }
}

/// Keeps every record; test and replay tooling read them back.
#[derive(Debug, Default)]
pub struct MemoryDebugSink {
    entries: Mutex<Vec<DebugEntry>>,
}

impl MemoryDebugSink {
    pub fn entries(&self) -> Vec<DebugEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DebugSink for MemoryDebugSink {
    fn record(&self, entry: DebugEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
