//! Process-wide progress map keyed by operation id.
//!
//! One lock guards the whole map, so `init`, `update`, and `get` never
//! observe each other half-done. Entries are never removed by the tracker
//! itself; `purge_expired` is the housekeeping hook.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Starting,
    Validating,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Starting => "starting",
            OperationStatus::Validating => "validating",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub operation_id: String,
    pub status: OperationStatus,
    pub progress_percent: f64,
    pub processed_rows: usize,
    pub total_rows: usize,
    pub message: String,
    pub metadata: Map<String, Value>,
}

/// Partial update; unset fields keep their current value and metadata keys
/// are merged.
#[derive(Clone, Debug, Default)]
pub struct ProgressUpdate {
    status: Option<OperationStatus>,
    progress_percent: Option<f64>,
    processed_rows: Option<usize>,
    total_rows: Option<usize>,
    message: Option<String>,
    metadata: Map<String, Value>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn percent(mut self, percent: f64) -> Self {
        self.progress_percent = Some(percent.clamp(0.0, 100.0));
        self
    }

    /// Row counters plus the percentage derived from them.
    pub fn rows(mut self, processed: usize, total: usize) -> Self {
        self.processed_rows = Some(processed);
        self.total_rows = Some(total);
        let percent = if total == 0 {
            0.0
        } else {
            processed as f64 / total as f64 * 100.0
        };
        self.percent(percent)
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

struct Entry {
    snapshot: ProgressSnapshot,
    touched_at: Instant,
}

#[derive(Default)]
pub struct ProgressTracker {
    entries: Mutex<IndexMap<String, Entry>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation in the `starting` state, replacing any previous
    /// entry under the same id.
    pub fn init(&self, operation_id: &str, metadata: Map<String, Value>) {
        let snapshot = ProgressSnapshot {
            operation_id: operation_id.to_string(),
            status: OperationStatus::Starting,
            progress_percent: 0.0,
            processed_rows: 0,
            total_rows: 0,
            message: "Starting".to_string(),
            metadata,
        };
        self.entries.lock().insert(
            operation_id.to_string(),
            Entry {
                snapshot,
                touched_at: Instant::now(),
            },
        );
    }

    /// Apply `update` to a known operation. Unknown ids are ignored and
    /// reported as `false`.
    pub fn update(&self, operation_id: &str, update: ProgressUpdate) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(operation_id) else {
            return false;
        };
        let snap = &mut entry.snapshot;
        if let Some(status) = update.status {
            snap.status = status;
        }
        if let Some(percent) = update.progress_percent {
            snap.progress_percent = percent;
        }
        if let Some(processed) = update.processed_rows {
            snap.processed_rows = processed;
        }
        if let Some(total) = update.total_rows {
            snap.total_rows = total;
        }
        if let Some(message) = update.message {
            snap.message = message;
        }
        snap.metadata.extend(update.metadata);
        entry.touched_at = Instant::now();
        true
    }

    pub fn get(&self, operation_id: &str) -> Option<ProgressSnapshot> {
        self.entries
            .lock()
            .get(operation_id)
            .map(|e| e.snapshot.clone())
    }

    /// Drop finished or failed operations not touched within `retention`.
    /// Returns how many were removed.
    pub fn purge_expired(&self, retention: Duration) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| {
            !(e.snapshot.status.is_terminal() && now.duration_since(e.touched_at) >= retention)
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
