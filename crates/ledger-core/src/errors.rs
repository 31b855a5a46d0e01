//! Error types for the ledger core library.

/// Top-level error enum for the ledger core library.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),
}

impl From<calamine::Error> for LedgerError {
    fn from(err: calamine::Error) -> Self {
        LedgerError::Spreadsheet(err.to_string())
    }
}

#[cfg(feature = "python")]
impl From<LedgerError> for pyo3::PyErr {
    fn from(err: LedgerError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyKeyError, PyRuntimeError, PyValueError};
        match &err {
            LedgerError::Database(_) | LedgerError::Sqlite(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
            LedgerError::Ingest(_) => PyRuntimeError::new_err(err.to_string()),
            LedgerError::NotFound(_) => PyKeyError::new_err(err.to_string()),
            LedgerError::Parse(_) | LedgerError::Json(_) => PyValueError::new_err(err.to_string()),
            LedgerError::Io(_)
            | LedgerError::Source(_)
            | LedgerError::Csv(_)
            | LedgerError::Spreadsheet(_) => PyIOError::new_err(err.to_string()),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
