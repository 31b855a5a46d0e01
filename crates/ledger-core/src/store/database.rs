//! SQLite storage layer for the ledger.
//!
//! Each public method opens its own connection, so a `Database` is a cheap
//! handle that can be cloned into worker threads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::config::{expand_tilde, LedgerConfig, DEDUP_TOLERANCE_CENTS};
use crate::errors::{LedgerError, LedgerResult};
use crate::models::{
    cents, identity_text, particular_key, ClassificationSet, DedupeKey, EntityRecord,
    PeriodRecord, RawRecord, Scope, StructuredRecord,
};
use crate::store::schema;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Raw and structured row counts for one scope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScopeCounts {
    pub raw: i64,
    pub structured: i64,
}

impl ScopeCounts {
    pub fn total(&self) -> i64 {
        self.raw + self.structured
    }
}

/// A persisted structured row, as read back from the store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub particular: String,
    pub entity_code: String,
    pub month_label: String,
    pub selected_month: String,
    pub year: i32,
    pub transaction_amount: f64,
    pub amount_text: String,
    pub primary_code: Option<String>,
    pub avg_fx_rate: Option<f64>,
    pub operation_id: Option<String>,
}

/// Structured row awaiting an average FX rate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingForexRow {
    pub id: i64,
    pub primary_code: String,
    pub local_currency: Option<String>,
    pub selected_month: String,
    pub financial_year: Option<String>,
    pub transaction_amount: f64,
}

/// One row of `ingestion_diagnostics`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub id: Option<i64>,
    pub operation_id: String,
    pub stage: String,
    pub category: String,
    pub severity: String,
    pub row_index: Option<i64>,
    pub particular: Option<String>,
    pub message: String,
    pub created_at: Option<String>,
}

impl Diagnostic {
    pub fn new(operation_id: &str, stage: &str, category: &str, message: &str) -> Self {
        Self {
            id: None,
            operation_id: operation_id.to_string(),
            stage: stage.to_string(),
            category: category.to_string(),
            severity: "error".to_string(),
            row_index: None,
            particular: None,
            message: message.to_string(),
            created_at: None,
        }
    }

    pub fn with_severity(mut self, severity: &str) -> Self {
        self.severity = severity.to_string();
        self
    }

    pub fn with_row(mut self, row_index: usize, particular: Option<&str>) -> Self {
        self.row_index = Some(row_index as i64);
        self.particular = particular.map(str::to_string);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticSummary {
    pub total: i64,
    pub operation_id: Option<String>,
    pub latest_operation_id: Option<String>,
    pub by_stage: BTreeMap<String, i64>,
    pub by_category: BTreeMap<String, i64>,
    pub by_severity: BTreeMap<String, i64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_real(value: Decimal) -> LedgerResult<f64> {
    value
        .to_f64()
        .ok_or_else(|| LedgerError::Parse(format!("amount {value} does not fit a REAL")))
}

/// Exact integer cents of an amount, for tolerance comparisons.
fn to_cents(value: Decimal) -> LedgerResult<i64> {
    (cents(value) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| LedgerError::Parse(format!("amount {value} does not fit in cents")))
}

fn opt_real(value: Option<Decimal>) -> LedgerResult<Option<f64>> {
    value.map(to_real).transpose()
}

fn scope_params(scope: &Scope) -> (String, String, i32) {
    (
        identity_text(&scope.entity_code),
        identity_text(&scope.month),
        scope.year,
    )
}

fn count_where(conn: &Connection, sql: &str, scope: &Scope) -> LedgerResult<i64> {
    let (entity, month, year) = scope_params(scope);
    Ok(conn.query_row(sql, params![entity, month, year], |row| row.get(0))?)
}

const RAW_SCOPE: &str =
    "LOWER(TRIM(entity_code)) = ?1 AND LOWER(TRIM(month)) = ?2 AND year = ?3";
const STRUCTURED_SCOPE: &str =
    "LOWER(TRIM(entity_code)) = ?1 AND LOWER(TRIM(selected_month)) = ?2 AND year = ?3";

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Database {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Resolve the path (tilde, relative to the working directory) and create
    /// parent directories.
    pub fn new(db_path: impl AsRef<Path>, busy_timeout: Duration) -> LedgerResult<Self> {
        let expanded = expand_tilde(&db_path.as_ref().to_string_lossy());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            db_path: resolved,
            busy_timeout,
        })
    }

    pub fn from_config(config: &LedgerConfig) -> LedgerResult<Self> {
        Self::new(&config.db_path, config.busy_timeout)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a connection with the configured busy timeout.
    pub fn connect(&self) -> LedgerResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Schema / meta
    // -----------------------------------------------------------------------

    /// Switch to WAL, create all tables and indexes, then run pending
    /// migrations.
    pub fn init_schema(&self) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> LedgerResult<Option<String>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                "SELECT value FROM ledger_meta WHERE key = ?1 LIMIT 1;",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO ledger_meta(key, value) VALUES(?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            params![key, value],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw records
    // -----------------------------------------------------------------------

    /// True when a raw row for the same entity/month/year/particular exists.
    pub fn raw_exists(&self, record: &RawRecord) -> LedgerResult<bool> {
        let conn = self.connect()?;
        let found: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT 1 FROM raw_records WHERE {RAW_SCOPE} \
                     AND LOWER(TRIM(particular)) = ?4 LIMIT 1;"
                ),
                params![
                    identity_text(&record.entity_code),
                    identity_text(&record.month),
                    record.year,
                    identity_text(&record.particular),
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a raw row unless its identity is already stored. Returns the new
    /// row id, or `None` when the insert was rejected.
    pub fn insert_raw(&self, record: &RawRecord, operation_id: &str) -> LedgerResult<Option<i64>> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO raw_records( \
                 entity_code, month, year, financial_year, particular, \
                 opening_balance, transactions, closing_balance, opening_period, \
                 operation_id, raw_key \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                record.entity_code,
                record.month,
                record.year,
                record.financial_year,
                record.particular,
                opt_real(record.opening)?,
                opt_real(record.transaction)?,
                opt_real(record.closing)?,
                record.opening_period as i64,
                operation_id,
                record.identity_hash(),
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(Some(conn.last_insert_rowid()))
    }

    // -----------------------------------------------------------------------
    // Structured records
    // -----------------------------------------------------------------------

    /// Tolerance-aware lookup of a persisted record with the same key.
    pub fn structured_exists(&self, key: &DedupeKey) -> LedgerResult<bool> {
        let conn = self.connect()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM structured_records \
                 WHERE LOWER(TRIM(particular)) = ?1 \
                   AND LOWER(TRIM(entity_code)) = ?2 \
                   AND LOWER(TRIM(selected_month)) = ?3 \
                   AND year = ?4 \
                   AND LOWER(TRIM(month_label)) = ?5 \
                   AND ABS(amount_cents - ?6) < ?7 \
                 LIMIT 1;",
                params![
                    key.particular,
                    key.entity_code,
                    key.selected_month,
                    key.year,
                    key.month_label,
                    to_cents(key.amount)?,
                    DEDUP_TOLERANCE_CENTS,
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// `INSERT OR IGNORE` against the UNIQUE `dedupe_hash`. Returns the new
    /// row id, or `None` when the insert was rejected.
    pub fn insert_structured(
        &self,
        record: &StructuredRecord,
        dedupe_hash: &str,
        operation_id: &str,
    ) -> LedgerResult<Option<i64>> {
        let conn = self.connect()?;
        let amount = cents(record.amount.value());
        let changed = conn.execute(
            "INSERT OR IGNORE INTO structured_records( \
                 particular, entity_name, entity_code, local_currency, \
                 transaction_amount, amount_cents, amount_text, month_label, selected_month, \
                 primary_code, category1, category2, category3, category4, category5, \
                 year, financial_year, quarter, half, operation_id, dedupe_hash \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, \
                       ?15, ?16, ?17, ?18, ?19, ?20, ?21);",
            params![
                record.particular,
                record.entity_name,
                record.entity_code,
                record.local_currency,
                to_real(amount)?,
                to_cents(amount)?,
                amount.to_string(),
                record.month_label,
                record.selected_month,
                record.classification.primary_code,
                record.classification.category1,
                record.classification.category2,
                record.classification.category3,
                record.classification.category4,
                record.classification.category5,
                record.year,
                record.financial_year,
                record.quarter,
                record.half,
                operation_id,
                dedupe_hash,
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(Some(conn.last_insert_rowid()))
    }

    /// Structured rows of a scope, oldest first.
    pub fn list_structured(&self, scope: &Scope) -> LedgerResult<Vec<StoredRecord>> {
        let conn = self.connect()?;
        let (entity, month, year) = scope_params(scope);
        let mut stmt = conn.prepare(&format!(
            "SELECT id, particular, entity_code, month_label, selected_month, year, \
                    transaction_amount, amount_text, primary_code, avg_fx_rate, operation_id \
             FROM structured_records WHERE {STRUCTURED_SCOPE} ORDER BY id ASC;"
        ))?;
        let rows = stmt.query_map(params![entity, month, year], |row| {
            Ok(StoredRecord {
                id: row.get(0)?,
                particular: row.get(1)?,
                entity_code: row.get(2)?,
                month_label: row.get(3)?,
                selected_month: row.get(4)?,
                year: row.get(5)?,
                transaction_amount: row.get(6)?,
                amount_text: row.get(7)?,
                primary_code: row.get(8)?,
                avg_fx_rate: row.get(9)?,
                operation_id: row.get(10)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Scope maintenance
    // -----------------------------------------------------------------------

    pub fn count_scope(&self, scope: &Scope) -> LedgerResult<ScopeCounts> {
        let conn = self.connect()?;
        Ok(ScopeCounts {
            raw: count_where(
                &conn,
                &format!("SELECT COUNT(*) FROM raw_records WHERE {RAW_SCOPE};"),
                scope,
            )?,
            structured: count_where(
                &conn,
                &format!("SELECT COUNT(*) FROM structured_records WHERE {STRUCTURED_SCOPE};"),
                scope,
            )?,
        })
    }

    /// Delete every raw and structured row of a scope in one transaction.
    pub fn delete_scope(&self, scope: &Scope) -> LedgerResult<ScopeCounts> {
        let mut conn = self.connect()?;
        let (entity, month, year) = scope_params(scope);
        let tx = conn.transaction()?;
        let raw = tx.execute(
            &format!("DELETE FROM raw_records WHERE {RAW_SCOPE};"),
            params![entity, month, year],
        )?;
        let structured = tx.execute(
            &format!("DELETE FROM structured_records WHERE {STRUCTURED_SCOPE};"),
            params![entity, month, year],
        )?;
        tx.commit()?;
        debug!(%scope, raw, structured, "scope rows deleted");
        Ok(ScopeCounts {
            raw: raw as i64,
            structured: structured as i64,
        })
    }

    /// Within each tolerance-equal key group of the scope keep the lowest id
    /// and delete the rest. Returns the number of rows removed.
    pub fn sweep_scope_duplicates(&self, scope: &Scope) -> LedgerResult<usize> {
        let conn = self.connect()?;
        let (entity, month, year) = scope_params(scope);
        let removed = conn.execute(
            "DELETE FROM structured_records WHERE id IN ( \
                 SELECT later.id \
                 FROM structured_records later \
                 JOIN structured_records earlier \
                   ON earlier.id < later.id \
                  AND LOWER(TRIM(earlier.particular)) = LOWER(TRIM(later.particular)) \
                  AND LOWER(TRIM(earlier.entity_code)) = LOWER(TRIM(later.entity_code)) \
                  AND LOWER(TRIM(earlier.selected_month)) = LOWER(TRIM(later.selected_month)) \
                  AND earlier.year = later.year \
                  AND LOWER(TRIM(earlier.month_label)) = LOWER(TRIM(later.month_label)) \
                  AND ABS(earlier.amount_cents - later.amount_cents) < ?4 \
                 WHERE LOWER(TRIM(later.entity_code)) = ?1 \
                   AND LOWER(TRIM(later.selected_month)) = ?2 \
                   AND later.year = ?3 \
             );",
            params![entity, month, year, DEDUP_TOLERANCE_CENTS],
        )?;
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Forex
    // -----------------------------------------------------------------------

    /// Rows of the scope with a primary code and no average FX rate yet.
    pub fn pending_forex_rows(&self, scope: &Scope) -> LedgerResult<Vec<PendingForexRow>> {
        let conn = self.connect()?;
        let (entity, month, year) = scope_params(scope);
        let mut stmt = conn.prepare(&format!(
            "SELECT id, primary_code, local_currency, selected_month, financial_year, \
                    transaction_amount \
             FROM structured_records \
             WHERE {STRUCTURED_SCOPE} \
               AND primary_code IS NOT NULL AND TRIM(primary_code) != '' \
               AND avg_fx_rate IS NULL \
             ORDER BY id ASC;"
        ))?;
        let rows = stmt.query_map(params![entity, month, year], |row| {
            Ok(PendingForexRow {
                id: row.get(0)?,
                primary_code: row.get(1)?,
                local_currency: row.get(2)?,
                selected_month: row.get(3)?,
                financial_year: row.get(4)?,
                transaction_amount: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_avg_fx_rate(&self, record_id: i64, rate: f64) -> LedgerResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE structured_records SET avg_fx_rate = ?2 WHERE id = ?1;",
            params![record_id, rate],
        )?;
        if changed == 0 {
            return Err(LedgerError::NotFound(format!("structured record {record_id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    pub fn record_run_start(&self, operation_id: &str, scope: &Scope) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO ingestion_runs(operation_id, entity_code, month, year, status) \
             VALUES (?1, ?2, ?3, ?4, 'processing') \
             ON CONFLICT(operation_id) DO UPDATE SET \
                 status = 'processing', summary_json = NULL, finished_at = NULL, \
                 started_at = CURRENT_TIMESTAMP;",
            params![operation_id, scope.entity_code, scope.month, scope.year],
        )?;
        Ok(())
    }

    pub fn record_run_finish(
        &self,
        operation_id: &str,
        status: &str,
        summary_json: &str,
    ) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE ingestion_runs \
             SET status = ?2, summary_json = ?3, finished_at = CURRENT_TIMESTAMP \
             WHERE operation_id = ?1;",
            params![operation_id, status, summary_json],
        )?;
        Ok(())
    }

    /// Stored status and summary JSON of a finished (or running) operation.
    pub fn get_run(&self, operation_id: &str) -> LedgerResult<Option<(String, Option<String>)>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                "SELECT status, summary_json FROM ingestion_runs WHERE operation_id = ?1;",
                params![operation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }

    // -----------------------------------------------------------------------
    // Ingestion diagnostics
    // -----------------------------------------------------------------------

    pub fn record_diagnostic(&self, diagnostic: &Diagnostic) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO ingestion_diagnostics( \
                 operation_id, stage, category, severity, row_index, particular, message \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                diagnostic.operation_id,
                diagnostic.stage,
                diagnostic.category,
                diagnostic.severity,
                diagnostic.row_index,
                diagnostic.particular,
                diagnostic.message,
            ],
        )?;
        Ok(())
    }

    /// Newest first. `limit` is clamped to at least 1.
    pub fn list_diagnostics(
        &self,
        operation_id: Option<&str>,
        stage: Option<&str>,
        limit: Option<i64>,
    ) -> LedgerResult<Vec<Diagnostic>> {
        let effective_limit = std::cmp::max(1, limit.unwrap_or(100));

        let mut where_clauses: Vec<&str> = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(op) = operation_id {
            where_clauses.push("operation_id = ?");
            param_values.push(Box::new(op.to_string()));
        }
        if let Some(st) = stage {
            where_clauses.push("stage = ?");
            param_values.push(Box::new(st.to_string()));
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };
        param_values.push(Box::new(effective_limit));

        let sql = format!(
            "SELECT id, operation_id, stage, category, severity, row_index, particular, \
                    message, created_at \
             FROM ingestion_diagnostics {where_sql} \
             ORDER BY id DESC LIMIT ?;"
        );
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(Diagnostic {
                id: row.get(0)?,
                operation_id: row.get(1)?,
                stage: row.get(2)?,
                category: row.get(3)?,
                severity: row.get(4)?,
                row_index: row.get(5)?,
                particular: row.get(6)?,
                message: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn summarize_diagnostics(&self, operation_id: Option<&str>) -> LedgerResult<DiagnosticSummary> {
        let where_sql = if operation_id.is_some() {
            "WHERE operation_id = ?1"
        } else {
            ""
        };
        let conn = self.connect()?;
        let bind: Vec<&dyn rusqlite::types::ToSql> = match &operation_id {
            Some(op) => vec![op as &dyn rusqlite::types::ToSql],
            None => Vec::new(),
        };

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM ingestion_diagnostics {where_sql};"),
            bind.as_slice(),
            |row| row.get(0),
        )?;

        let group = |column: &str| -> LedgerResult<BTreeMap<String, i64>> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {column}, COUNT(*) FROM ingestion_diagnostics {where_sql} \
                 GROUP BY {column} ORDER BY {column} ASC;"
            ))?;
            let rows = stmt.query_map(bind.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            Ok(rows.collect::<Result<BTreeMap<_, _>, _>>()?)
        };

        let latest_operation_id: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT operation_id FROM ingestion_diagnostics {where_sql} \
                     ORDER BY id DESC LIMIT 1;"
                ),
                bind.as_slice(),
                |row| row.get(0),
            )
            .optional()?;

        Ok(DiagnosticSummary {
            total,
            operation_id: operation_id.map(str::to_string),
            latest_operation_id,
            by_stage: group("stage")?,
            by_category: group("category")?,
            by_severity: group("severity")?,
        })
    }

    /// Returns the number of rows deleted.
    pub fn clear_diagnostics(&self, operation_id: Option<&str>) -> LedgerResult<usize> {
        let conn = self.connect()?;
        let deleted = match operation_id {
            Some(op) => conn.execute(
                "DELETE FROM ingestion_diagnostics WHERE operation_id = ?1;",
                params![op],
            )?,
            None => conn.execute("DELETE FROM ingestion_diagnostics;", [])?,
        };
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Master data upserts
    // -----------------------------------------------------------------------

    pub fn upsert_entity(&self, entity: &EntityRecord) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO entity_master(ent_id, ent_name, ent_code, local_currency) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(ent_id) DO UPDATE SET \
                 ent_name = excluded.ent_name, \
                 ent_code = excluded.ent_code, \
                 local_currency = excluded.local_currency;",
            params![entity.id, entity.name, entity.code, entity.local_currency],
        )?;
        Ok(())
    }

    pub fn upsert_period(&self, period_id: i64, period: &PeriodRecord) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO month_master(mnt_id, month_name, year, quarter, half) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(mnt_id) DO UPDATE SET \
                 month_name = excluded.month_name, \
                 year = excluded.year, \
                 quarter = excluded.quarter, \
                 half = excluded.half;",
            params![period_id, period.month_name, period.year, period.quarter, period.half],
        )?;
        Ok(())
    }

    pub fn upsert_classification(
        &self,
        particular: &str,
        codes: &ClassificationSet,
    ) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO code_master( \
                 raw_particular, particular_key, primary_code, \
                 category1, category2, category3, category4, category5 \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(particular_key) DO UPDATE SET \
                 raw_particular = excluded.raw_particular, \
                 primary_code = excluded.primary_code, \
                 category1 = excluded.category1, \
                 category2 = excluded.category2, \
                 category3 = excluded.category3, \
                 category4 = excluded.category4, \
                 category5 = excluded.category5;",
            params![
                particular,
                particular_key(particular),
                codes.primary_code,
                codes.category1,
                codes.category2,
                codes.category3,
                codes.category4,
                codes.category5,
            ],
        )?;
        Ok(())
    }
}
