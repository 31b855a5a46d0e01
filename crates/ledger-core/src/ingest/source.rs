//! Row sources: CSV files and spreadsheets, read fully into memory.
//!
//! Headers are matched case-insensitively after trimming. `Particular` is
//! required; `Opening`, `Transaction`, `Closing`, and a side column (`Type`,
//! `Dr/Cr`, or `DrCr`, first present wins) are optional.

use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use tracing::debug;

use crate::errors::{LedgerError, LedgerResult};
use crate::models::LedgerRow;

/// Rows in source order. A record the reader could not decode is kept as an
/// `Err` in its position.
pub type SourceRows = Vec<LedgerResult<LedgerRow>>;

const SIDE_COLUMNS: &[&str] = &["type", "dr/cr", "drcr"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Spreadsheet,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> LedgerResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(SourceFormat::Csv),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(SourceFormat::Spreadsheet),
            _ => Err(LedgerError::Source(format!(
                "unsupported file type: {}",
                path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

/// Positions of the known columns within a header row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMap {
    particular: usize,
    opening: Option<usize>,
    transaction: Option<usize>,
    closing: Option<usize>,
    side_type: Option<usize>,
}

impl ColumnMap {
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> LedgerResult<Self> {
        let normalised: Vec<String> = headers
            .iter()
            .map(|h| h.as_ref().trim().to_lowercase())
            .collect();
        let find = |name: &str| normalised.iter().position(|h| h == name);

        let particular = find("particular").ok_or_else(|| {
            LedgerError::Source("missing required column 'Particular'".to_string())
        })?;
        Ok(Self {
            particular,
            opening: find("opening"),
            transaction: find("transaction"),
            closing: find("closing"),
            side_type: SIDE_COLUMNS.iter().find_map(|name| find(name)),
        })
    }

    /// Build a row from positional cells. Blank cells become `None`.
    pub fn build(&self, cells: &[Option<String>]) -> LedgerRow {
        let cell = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| cells.get(i))
                .and_then(|c| c.as_deref())
                .filter(|c| !c.trim().is_empty())
                .map(str::to_string)
        };
        LedgerRow {
            particular: cell(Some(self.particular)),
            opening: cell(self.opening),
            transaction: cell(self.transaction),
            closing: cell(self.closing),
            side_type: cell(self.side_type),
        }
    }
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// Read any supported file, dispatching on its extension.
pub fn read_rows(path: &Path) -> LedgerResult<SourceRows> {
    match SourceFormat::from_path(path)? {
        SourceFormat::Csv => read_csv(std::fs::File::open(path)?),
        SourceFormat::Spreadsheet => read_spreadsheet(path),
    }
}

pub fn read_csv<R: Read>(reader: R) -> LedgerResult<SourceRows> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let columns = ColumnMap::from_headers(&headers)?;

    let rows: SourceRows = reader
        .records()
        .map(|record| -> LedgerResult<LedgerRow> {
            let record = record?;
            let cells: Vec<Option<String>> =
                record.iter().map(|c| Some(c.to_string())).collect();
            Ok(columns.build(&cells))
        })
        .collect();
    debug!(rows = rows.len(), "csv source read");
    Ok(rows)
}

/// First worksheet of an xlsx/xls/xlsb/ods workbook; the first row holds the
/// headers.
pub fn read_spreadsheet(path: &Path) -> LedgerResult<SourceRows> {
    let mut workbook: Sheets<_> = open_workbook_auto(path)?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| LedgerError::Source("workbook contains no sheets".to_string()))?;
    let range = workbook.worksheet_range(&sheet_name)?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(header_row) => header_row
            .iter()
            .map(|c| cell_text(c).unwrap_or_default())
            .collect(),
        None => return Err(LedgerError::Source(format!("sheet '{sheet_name}' is empty"))),
    };
    let columns = ColumnMap::from_headers(&headers)?;

    let rows: SourceRows = rows_iter
        .map(|row| -> LedgerResult<LedgerRow> {
            let cells: Vec<Option<String>> = row.iter().map(cell_text).collect();
            Ok(columns.build(&cells))
        })
        .collect();
    debug!(sheet = %sheet_name, rows = rows.len(), "spreadsheet source read");
    Ok(rows)
}

/// Render a workbook cell as the text a user would see. Whole floats drop
/// their fractional part.
pub fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(n) => Some(if n.fract() == 0.0 && n.abs() < 1e15 {
            format!("{}", *n as i64)
        } else {
            format!("{n}")
        }),
        Data::Int(n) => Some(n.to_string()),
        Data::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::Error(e) => Some(format!("#{e:?}")),
        Data::DateTime(dt) => Some(format!("{}", dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}
