//! Ledger core library: ingestion and reconciliation of spreadsheet ledger
//! rows into canonical, deduplicated accounting records.
//!
//! The crate is usable as a plain Rust library and, with the `python`
//! feature, compiles into the `_ledger_core` extension module.

pub mod config;
pub mod errors;
pub mod ingest;
pub mod models;
pub mod service;
pub mod store;

#[cfg(feature = "python")]
pub mod python;

pub use config::LedgerConfig;
pub use errors::{LedgerError, LedgerResult};
pub use ingest::pipeline::{ForexHook, IngestionPipeline, IngestionSummary, RowOutcome};
pub use ingest::progress::{OperationStatus, ProgressSnapshot, ProgressTracker};
pub use service::{IngestionJob, IngestionRequest, LedgerService, RowSource};

// ---------------------------------------------------------------------------
// Top-level Python module: _ledger_core
// ---------------------------------------------------------------------------

#[cfg(feature = "python")]
#[pyo3::pymodule]
fn _ledger_core(m: &pyo3::Bound<'_, pyo3::types::PyModule>) -> pyo3::PyResult<()> {
    python::register(m)
}
