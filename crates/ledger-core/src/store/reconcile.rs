//! Scope reconciliation: clear an (entity, month, year) before re-ingesting it.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::errors::LedgerResult;
use crate::models::Scope;
use crate::store::database::{Database, ScopeCounts};

/// Attempts made before giving up on residue.
const MAX_ATTEMPTS: u32 = 2;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub raw_deleted: i64,
    pub structured_deleted: i64,
    pub success: bool,
    pub attempts: u32,
    /// Rows still in scope after the last attempt.
    pub residue: ScopeCounts,
    pub error: Option<String>,
}

/// Delete the raw and structured rows of `scope`, count again, and retry once
/// if anything is left. Never fails: problems come back as `success == false`.
pub fn reconcile(db: &Database, scope: &Scope) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    match run(db, scope, &mut report) {
        Ok(()) => {
            report.success = report.residue.total() == 0;
            if report.success {
                info!(
                    %scope,
                    raw_deleted = report.raw_deleted,
                    structured_deleted = report.structured_deleted,
                    "scope reconciled"
                );
            } else {
                warn!(
                    %scope,
                    raw_left = report.residue.raw,
                    structured_left = report.residue.structured,
                    "rows left in scope after reconciliation"
                );
            }
        }
        Err(e) => {
            error!(%scope, error = %e, "reconciliation failed");
            report.success = false;
            report.error = Some(e.to_string());
        }
    }
    report
}

fn run(db: &Database, scope: &Scope, report: &mut ReconcileReport) -> LedgerResult<()> {
    let before = db.count_scope(scope)?;
    if before.total() == 0 {
        return Ok(());
    }

    while report.attempts < MAX_ATTEMPTS {
        report.attempts += 1;
        let deleted = db.delete_scope(scope)?;
        report.raw_deleted += deleted.raw;
        report.structured_deleted += deleted.structured;

        report.residue = db.count_scope(scope)?;
        if report.residue.total() == 0 {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRecord;
    use std::time::Duration;
    use tempfile::TempDir;

    fn scope(entity: &str, month: &str) -> Scope {
        Scope {
            entity_code: entity.to_string(),
            month: month.to_string(),
            year: 2024,
        }
    }

    fn raw(entity: &str, month: &str, particular: &str) -> RawRecord {
        RawRecord {
            entity_code: entity.to_string(),
            month: month.to_string(),
            year: 2024,
            financial_year: "2024-25".to_string(),
            particular: particular.to_string(),
            opening: None,
            transaction: None,
            closing: None,
            opening_period: false,
        }
    }

    #[test]
    fn test_reconcile_empty_scope() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("l.db"), Duration::from_secs(5)).unwrap();
        db.init_schema().unwrap();

        let report = reconcile(&db, &scope("ACM", "April"));
        assert!(report.success);
        assert_eq!(report.attempts, 0);
        assert_eq!(report.raw_deleted, 0);
    }

    #[test]
    fn test_reconcile_only_touches_its_scope() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("l.db"), Duration::from_secs(5)).unwrap();
        db.init_schema().unwrap();
        db.insert_raw(&raw("ACM", "April", "Cash"), "op").unwrap();
        db.insert_raw(&raw("ACM", "April", "Bank"), "op").unwrap();
        db.insert_raw(&raw("ACM", "May", "Cash"), "op").unwrap();

        let report = reconcile(&db, &scope("acm ", "APRIL"));
        assert!(report.success);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.raw_deleted, 2);
        assert_eq!(db.count_scope(&scope("ACM", "May")).unwrap().raw, 1);
    }

    /// A trigger that writes a fresh raw row back into the scope whenever a
    /// matching row is deleted.
    fn respawn_on_delete(db: &Database, condition: &str) {
        db.connect()
            .unwrap()
            .execute_batch(&format!(
                "CREATE TRIGGER respawn AFTER DELETE ON raw_records WHEN {condition} BEGIN \
                   INSERT INTO raw_records(entity_code, month, year, particular, raw_key) \
                   VALUES (OLD.entity_code, OLD.month, OLD.year, \
                           OLD.particular || ' again', OLD.raw_key || '+'); \
                 END;"
            ))
            .unwrap();
    }

    #[test]
    fn test_reconcile_retries_once_on_residue() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("l.db"), Duration::from_secs(5)).unwrap();
        db.init_schema().unwrap();
        db.insert_raw(&raw("ACM", "April", "Cash"), "op").unwrap();
        respawn_on_delete(&db, "OLD.particular = 'Cash'");

        let report = reconcile(&db, &scope("ACM", "April"));
        assert!(report.success);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.raw_deleted, 2);
        assert_eq!(report.residue.total(), 0);
    }

    #[test]
    fn test_reconcile_gives_up_after_second_attempt() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("l.db"), Duration::from_secs(5)).unwrap();
        db.init_schema().unwrap();
        db.insert_raw(&raw("ACM", "April", "Cash"), "op").unwrap();
        respawn_on_delete(&db, "1");

        let report = reconcile(&db, &scope("ACM", "April"));
        assert!(!report.success);
        assert_eq!(report.attempts, MAX_ATTEMPTS);
        assert_eq!(report.residue.raw, 1);
        assert!(report.error.is_none());
        assert_eq!(db.count_scope(&scope("ACM", "April")).unwrap().raw, 1);
    }

    #[test]
    fn test_reconcile_reports_failure_without_schema() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("l.db"), Duration::from_secs(5)).unwrap();

        let report = reconcile(&db, &scope("ACM", "April"));
        assert!(!report.success);
        assert!(report.error.is_some());
    }
}
