//! Python bindings (`_ledger_core`), built with the `python` feature.

use std::path::PathBuf;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde::Serialize;

use crate::config::LedgerConfig;
use crate::errors::LedgerError;
use crate::ingest::amount;
use crate::ingest::source::ColumnMap;
use crate::models::{self, LedgerRow, PeriodRef, Provenance};
use crate::service::{IngestionRequest, LedgerService};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Hand a serialisable value to Python as plain dicts and lists.
fn to_py<T: Serialize>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let json = serde_json::to_string(value).map_err(LedgerError::from)?;
    let loaded = py.import("json")?.call_method1("loads", (json,))?;
    Ok(loaded.unbind())
}

/// Each dict is one sheet row keyed by column header.
fn rows_from_py(rows: &[Bound<'_, PyDict>]) -> PyResult<Vec<LedgerRow>> {
    let mut out = Vec::with_capacity(rows.len());
    for dict in rows {
        let mut headers = Vec::with_capacity(dict.len());
        let mut cells = Vec::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            headers.push(key.str()?.to_string());
            cells.push(if value.is_none() {
                None
            } else {
                Some(value.str()?.to_string())
            });
        }
        let columns = ColumnMap::from_headers(&headers)?;
        out.push(columns.build(&cells));
    }
    Ok(out)
}

/// `year` may be an int or a financial-year label such as `"2024-25"`.
fn period_ref(
    month_id: Option<i64>,
    month_name: Option<String>,
    year: Option<&Bound<'_, PyAny>>,
) -> PyResult<PeriodRef> {
    if let Some(id) = month_id {
        return Ok(PeriodRef::Id(id));
    }
    let year = match year {
        Some(value) => models::parse_financial_year(&value.str()?.to_string()),
        None => None,
    };
    match (month_name, year) {
        (Some(month_name), Some(year)) => Ok(PeriodRef::Named { month_name, year }),
        _ => Err(PyValueError::new_err(
            "either month_id or both month_name and year are required",
        )),
    }
}

#[derive(Serialize)]
struct AmountView {
    magnitude: Option<String>,
    classification: Option<&'static str>,
    provenance: Option<Provenance>,
    canonical: Option<String>,
}

// ---------------------------------------------------------------------------
// LedgerEngine
// ---------------------------------------------------------------------------

#[pyclass]
pub struct LedgerEngine {
    service: LedgerService,
}

#[pymethods]
impl LedgerEngine {
    /// Open (and migrate) the ledger database. Without `db_path` the
    /// `LEDGER_DB_PATH` environment variable or its default is used.
    #[new]
    #[pyo3(signature = (db_path=None))]
    fn new(db_path: Option<PathBuf>) -> PyResult<Self> {
        let mut config = LedgerConfig::from_env();
        if let Some(path) = db_path {
            config = config.with_db_path(path);
        }
        Ok(Self {
            service: LedgerService::new(config)?,
        })
    }

    #[getter]
    fn db_path(&self) -> String {
        self.service.database().db_path().to_string_lossy().into_owned()
    }

    fn init_schema(&self) -> PyResult<()> {
        self.service.database().init_schema()?;
        Ok(())
    }

    #[pyo3(signature = (
        rows, entity_id, month_id=None, month_name=None, year=None,
        is_opening_period=false, operation_id=None, filename=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn start_ingestion(
        &self,
        py: Python<'_>,
        rows: Vec<Bound<'_, PyDict>>,
        entity_id: i64,
        month_id: Option<i64>,
        month_name: Option<String>,
        year: Option<Bound<'_, PyAny>>,
        is_opening_period: bool,
        operation_id: Option<String>,
        filename: Option<String>,
    ) -> PyResult<PyObject> {
        let rows = rows_from_py(&rows)?;
        let request = IngestionRequest {
            operation_id,
            entity_id,
            period: period_ref(month_id, month_name, year.as_ref())?,
            is_opening_period,
            filename,
        };
        let summary = py.allow_threads(|| self.service.start_ingestion(request, rows));
        to_py(py, &summary)
    }

    #[pyo3(signature = (
        path, entity_id, month_id=None, month_name=None, year=None,
        is_opening_period=false, operation_id=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn ingest_file(
        &self,
        py: Python<'_>,
        path: PathBuf,
        entity_id: i64,
        month_id: Option<i64>,
        month_name: Option<String>,
        year: Option<Bound<'_, PyAny>>,
        is_opening_period: bool,
        operation_id: Option<String>,
    ) -> PyResult<PyObject> {
        let request = IngestionRequest {
            operation_id,
            entity_id,
            period: period_ref(month_id, month_name, year.as_ref())?,
            is_opening_period,
            filename: None,
        };
        let summary = py.allow_threads(|| self.service.ingest_file(request, path));
        to_py(py, &summary)
    }

    fn get_progress(&self, py: Python<'_>, operation_id: &str) -> PyResult<PyObject> {
        match self.service.get_progress(operation_id) {
            Some(snapshot) => to_py(py, &snapshot),
            None => Ok(py.None()),
        }
    }

    fn purge_progress(&self) -> usize {
        self.service.purge_progress()
    }

    #[pyo3(signature = (operation_id=None, stage=None, limit=None))]
    fn list_diagnostics(
        &self,
        py: Python<'_>,
        operation_id: Option<&str>,
        stage: Option<&str>,
        limit: Option<i64>,
    ) -> PyResult<PyObject> {
        let rows = self
            .service
            .database()
            .list_diagnostics(operation_id, stage, limit)?;
        to_py(py, &rows)
    }

    #[pyo3(signature = (operation_id=None))]
    fn summarize_diagnostics(&self, py: Python<'_>, operation_id: Option<&str>) -> PyResult<PyObject> {
        let summary = self.service.database().summarize_diagnostics(operation_id)?;
        to_py(py, &summary)
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

#[pyfunction]
#[pyo3(signature = (cell, hint=None))]
pub fn parse_amount(py: Python<'_>, cell: Option<&str>, hint: Option<&str>) -> PyResult<PyObject> {
    let parsed = amount::parse(cell, hint);
    let view = AmountView {
        magnitude: parsed.magnitude().map(|m| m.to_string()),
        classification: parsed.classification().map(|c| c.as_str()),
        provenance: parsed.provenance(),
        canonical: parsed.canonical().map(|c| c.to_string()),
    };
    to_py(py, &view)
}

#[pyfunction]
#[pyo3(name = "format_financial_year")]
pub fn py_format_financial_year(year: i32) -> String {
    models::format_financial_year(year)
}

#[pyfunction]
#[pyo3(name = "parse_financial_year")]
pub fn py_parse_financial_year(label: &str) -> Option<i32> {
    models::parse_financial_year(label)
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("OPENING_MONTH_LABEL", crate::config::OPENING_MONTH_LABEL)?;
    m.add("DEDUP_AMOUNT_TOLERANCE", crate::config::DEDUP_AMOUNT_TOLERANCE)?;

    m.add_function(wrap_pyfunction!(parse_amount, m)?)?;
    m.add_function(wrap_pyfunction!(py_format_financial_year, m)?)?;
    m.add_function(wrap_pyfunction!(py_parse_financial_year, m)?)?;

    m.add_class::<LedgerEngine>()?;
    Ok(())
}
