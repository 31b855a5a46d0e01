//! SQLite schema DDL and migration framework.
//!
//! Tables fall into three groups: the ingested ledger (`raw_records`,
//! `structured_records`), the master data it is resolved against
//! (`entity_master`, `month_master`, `code_master`), and bookkeeping
//! (`ledger_meta`, `migration_history`, `ingestion_diagnostics`,
//! `ingestion_runs`).

use rusqlite::Connection;

use crate::errors::{LedgerError, LedgerResult};

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 1;

/// Core DDL statements: 9 CREATE TABLE + 7 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (9) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS ledger_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS raw_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_code TEXT NOT NULL,
        month TEXT NOT NULL,
        year INTEGER NOT NULL,
        financial_year TEXT,
        particular TEXT NOT NULL,
        opening_balance REAL,
        transactions REAL,
        closing_balance REAL,
        opening_period INTEGER NOT NULL DEFAULT 0,
        operation_id TEXT,
        raw_key TEXT NOT NULL UNIQUE,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS structured_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        particular TEXT NOT NULL,
        entity_name TEXT NOT NULL,
        entity_code TEXT NOT NULL,
        local_currency TEXT,
        transaction_amount REAL NOT NULL,
        amount_cents INTEGER NOT NULL,
        amount_text TEXT NOT NULL,
        month_label TEXT NOT NULL,
        selected_month TEXT NOT NULL,
        primary_code TEXT,
        category1 TEXT,
        category2 TEXT,
        category3 TEXT,
        category4 TEXT,
        category5 TEXT,
        year INTEGER NOT NULL,
        financial_year TEXT,
        quarter TEXT,
        half TEXT,
        avg_fx_rate REAL,
        operation_id TEXT,
        dedupe_hash TEXT NOT NULL UNIQUE,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS entity_master (
        ent_id INTEGER PRIMARY KEY,
        ent_name TEXT NOT NULL,
        ent_code TEXT NOT NULL UNIQUE,
        local_currency TEXT
    );",
    "CREATE TABLE IF NOT EXISTS month_master (
        mnt_id INTEGER PRIMARY KEY,
        month_name TEXT NOT NULL,
        month_short TEXT,
        year INTEGER NOT NULL,
        quarter TEXT,
        half TEXT
    );",
    "CREATE TABLE IF NOT EXISTS code_master (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        raw_particular TEXT NOT NULL,
        particular_key TEXT NOT NULL UNIQUE,
        primary_code TEXT,
        category1 TEXT,
        category2 TEXT,
        category3 TEXT,
        category4 TEXT,
        category5 TEXT
    );",
    "CREATE TABLE IF NOT EXISTS ingestion_diagnostics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        category TEXT NOT NULL,
        severity TEXT NOT NULL DEFAULT 'error',
        row_index INTEGER,
        particular TEXT,
        message TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS ingestion_runs (
        operation_id TEXT PRIMARY KEY,
        entity_code TEXT NOT NULL,
        month TEXT NOT NULL,
        year INTEGER NOT NULL,
        status TEXT NOT NULL,
        summary_json TEXT,
        started_at TEXT DEFAULT CURRENT_TIMESTAMP,
        finished_at TEXT
    );",
    // ── indexes (7) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_raw_scope ON raw_records(entity_code, year, month);",
    "CREATE INDEX IF NOT EXISTS idx_structured_scope \
         ON structured_records(entity_code, year, selected_month);",
    "CREATE INDEX IF NOT EXISTS idx_structured_particular ON structured_records(particular);",
    "CREATE INDEX IF NOT EXISTS idx_month_master_year ON month_master(year);",
    "CREATE INDEX IF NOT EXISTS idx_ingest_diag_operation \
         ON ingestion_diagnostics(operation_id, created_at);",
    "CREATE INDEX IF NOT EXISTS idx_ingest_diag_stage_category \
         ON ingestion_diagnostics(stage, category);",
    "CREATE INDEX IF NOT EXISTS idx_ingestion_runs_scope ON ingestion_runs(entity_code, year, month);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`].  Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> LedgerResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT ledger_migrate_step;")?;

        let step_result = (|| -> LedgerResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT ledger_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT ledger_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT ledger_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `ledger_meta`.
/// Returns 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM ledger_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

/// Upsert the `schema_version` key in `ledger_meta`.
fn set_schema_version(conn: &Connection, version: i32) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO ledger_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: the tables above are the baseline. Later steps alter them.
fn migrate_to_v1(conn: &Connection) -> LedgerResult<()> {
    for table in ["raw_records", "structured_records", "ingestion_runs"] {
        let found: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1;",
            rusqlite::params![table],
            |row| row.get(0),
        )?;
        if found == 0 {
            return Err(LedgerError::Database(format!(
                "baseline table {table} missing; run the schema DDL first"
            )));
        }
    }
    Ok(())
}
