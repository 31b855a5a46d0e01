use std::collections::HashSet;
use std::sync::Arc;

use _ledger_core::models::{ClassificationSet, EntityRecord, LedgerRow, PeriodRecord, PeriodRef, Scope};
use _ledger_core::store::master::InMemoryMasterData;
use _ledger_core::{
    IngestionJob, IngestionRequest, LedgerConfig, LedgerService, OperationStatus, RowSource,
};
use tempfile::TempDir;

fn service(dir: &TempDir) -> LedgerService {
    let config = LedgerConfig::default().with_db_path(dir.path().join("ledger.db"));
    let master = InMemoryMasterData::new()
        .with_entity(EntityRecord {
            id: 7,
            name: "Northwind Traders".to_string(),
            code: "NWT".to_string(),
            local_currency: Some("INR".to_string()),
        })
        .with_period(
            4,
            PeriodRecord {
                month_name: "April".to_string(),
                year: 2024,
                quarter: Some("Q1".to_string()),
                half: Some("H1".to_string()),
            },
        )
        .with_classification(
            "Cash",
            ClassificationSet {
                primary_code: Some("1100".to_string()),
                category1: Some("Current Assets".to_string()),
                ..Default::default()
            },
        )
        .with_classification(
            "Bank",
            ClassificationSet {
                primary_code: Some("1200".to_string()),
                ..Default::default()
            },
        );
    LedgerService::new(config)
        .unwrap()
        .with_master(Arc::new(master))
}

fn request(operation_id: &str, opening: bool) -> IngestionRequest {
    IngestionRequest {
        operation_id: Some(operation_id.to_string()),
        entity_id: 7,
        period: PeriodRef::Id(4),
        is_opening_period: opening,
        filename: None,
    }
}

fn scope() -> Scope {
    Scope {
        entity_code: "NWT".to_string(),
        month: "April".to_string(),
        year: 2024,
    }
}

/// `(month_label, amount_text)` per stored record, oldest first.
fn stored(svc: &LedgerService) -> Vec<(String, String)> {
    svc.database()
        .list_structured(&scope())
        .unwrap()
        .into_iter()
        .map(|r| (r.month_label, r.amount_text))
        .collect()
}

#[test]
fn test_inline_tokens_sign_opening_and_transaction() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir);
    let rows = vec![LedgerRow::new("Cash", "1365.00 Dr", "322.00 Cr", "")];

    let summary = svc.start_ingestion(request("op-a", true), rows);

    assert_eq!(summary.status, OperationStatus::Completed);
    assert_eq!(summary.records_inserted, 2);
    assert_eq!(
        stored(&svc),
        vec![
            ("Opening".to_string(), "1365.00".to_string()),
            ("April".to_string(), "-322.00".to_string()),
        ]
    );
}

#[test]
fn test_sign_only_cells_resolve_by_sign() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir);
    let rows = vec![LedgerRow::new("Bank", "-5000.00", "2000.00", "")];

    svc.start_ingestion(request("op-b", true), rows);

    assert_eq!(
        stored(&svc),
        vec![
            ("Opening".to_string(), "-5000.00".to_string()),
            ("April".to_string(), "2000.00".to_string()),
        ]
    );
}

#[test]
fn test_blank_particular_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir);
    let rows = vec![LedgerRow::new("  ", "100 Dr", "50 Cr", "")];

    let summary = svc.start_ingestion(request("op-c", true), rows);

    assert_eq!(summary.rows.no_particular, 1);
    assert_eq!(summary.records_inserted, 0);
    assert_eq!(summary.raw_inserted, 0);
    assert!(stored(&svc).is_empty());
}

#[test]
fn test_closing_column_lends_its_side() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir);
    let rows = vec![LedgerRow::new("X", "50", "", "100 Cr")];

    let summary = svc.start_ingestion(request("op-d", true), rows);

    assert_eq!(summary.records_inserted, 1);
    assert_eq!(summary.unclassified, 1);
    assert_eq!(stored(&svc), vec![("Opening".to_string(), "-50.00".to_string())]);
}

#[test]
fn test_opening_is_only_written_in_an_opening_period() {
    let dir = TempDir::new().unwrap();
    let rows = vec![LedgerRow::new("Cash", "100 Dr", "40 Cr", "")];

    let opening_dir = TempDir::new().unwrap();
    let opening = service(&opening_dir).start_ingestion(request("op-o", true), rows.clone());
    assert_eq!(opening.records_inserted, 2);

    let svc = service(&dir);
    let regular = svc.start_ingestion(request("op-r", false), rows);
    assert_eq!(regular.records_inserted, 1);
    assert_eq!(stored(&svc), vec![("April".to_string(), "-40.00".to_string())]);
}

#[test]
fn test_identical_rows_persist_once() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir);
    let rows = vec![
        LedgerRow::new("Cash", "", "250 Dr", ""),
        LedgerRow::new("Cash", "", "250 Dr", ""),
    ];

    let summary = svc.start_ingestion(request("op-dup", false), rows);

    assert_eq!(summary.rows.persisted, 1);
    assert_eq!(summary.rows.duplicate, 1);
    assert_eq!(summary.duplicate_skipped(), 1);
    assert_eq!(stored(&svc).len(), 1);
}

#[test]
fn test_amounts_one_cent_apart_are_both_kept() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir);
    let rows = vec![
        LedgerRow::new("Cash", "", "1000.10", ""),
        LedgerRow::new("Cash", "", "1000.11", ""),
        LedgerRow::new("Fees", "", "100.10", ""),
        LedgerRow::new("Fees", "", "100.11", ""),
    ];

    let summary = svc.start_ingestion(request("op-cent", false), rows);

    assert_eq!(summary.records_inserted, 4);
    assert_eq!(summary.duplicate_skipped(), 0);
    assert_eq!(summary.swept_duplicates, 0);
    let amounts: Vec<String> = stored(&svc).into_iter().map(|(_, amount)| amount).collect();
    assert_eq!(amounts, vec!["1000.10", "1000.11", "100.10", "100.11"]);
}

#[test]
fn test_reingesting_a_scope_replaces_it() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir);
    let rows = vec![
        LedgerRow::new("Cash", "", "250 Dr", ""),
        LedgerRow::new("Bank", "", "-75", ""),
        LedgerRow::new("Rent", "", "1200", "").with_side_type("Cr"),
    ];

    let first = svc.start_ingestion(request("op-1", false), rows.clone());
    let before = stored(&svc);
    let second = svc.start_ingestion(request("op-2", false), rows);

    assert_eq!(first.records_inserted, 3);
    assert_eq!(second.records_inserted, 3);
    let report = second.reconciliation.as_ref().unwrap();
    assert!(report.success);
    assert_eq!(report.structured_deleted, 3);
    assert_eq!(report.raw_deleted, 3);
    assert_eq!(stored(&svc), before);
    assert!(!second.verification.unwrap().excess);

    let ops: HashSet<_> = svc
        .database()
        .list_structured(&scope())
        .unwrap()
        .into_iter()
        .filter_map(|r| r.operation_id)
        .collect();
    assert_eq!(ops, HashSet::from(["op-2".to_string()]));
}

#[test]
fn test_concurrent_runs_on_one_scope_leave_no_duplicates() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir);
    let rows = vec![
        LedgerRow::new("Cash", "", "10 Dr", ""),
        LedgerRow::new("Bank", "", "20 Cr", ""),
        LedgerRow::new("Rent", "", "30", ""),
    ];
    let jobs = (0..2)
        .map(|i| IngestionJob {
            request: request(&format!("op-par-{i}"), false),
            source: RowSource::Rows(rows.clone()),
        })
        .collect();

    let summaries = svc.run_many(jobs);

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].operation_id, "op-par-0");
    assert!(summaries
        .iter()
        .all(|s| s.status == OperationStatus::Completed && s.error_count() == 0));

    let records = stored(&svc);
    let distinct: HashSet<_> = records.iter().collect();
    assert_eq!(records.len(), 3);
    assert_eq!(distinct.len(), 3);
}

#[test]
fn test_csv_file_ingestion() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir);
    let path = dir.path().join("april.csv");
    std::fs::write(
        &path,
        "Particular,Opening,Transaction,Closing,Type\n\
         Cash,1365.00 Dr,322.00 Cr,,\n\
         ,10,20,,\n\
         Bank,,500,,Cr\n",
    )
    .unwrap();

    let summary = svc.ingest_file(request("op-csv", true), &path);

    assert_eq!(summary.status, OperationStatus::Completed);
    assert_eq!(summary.total_rows, 3);
    assert_eq!(summary.rows.no_particular, 1);
    assert_eq!(summary.records_inserted, 3);
    assert_eq!(
        stored(&svc),
        vec![
            ("Opening".to_string(), "1365.00".to_string()),
            ("April".to_string(), "-322.00".to_string()),
            ("April".to_string(), "-500.00".to_string()),
        ]
    );

    let snap = svc.get_progress("op-csv").unwrap();
    assert_eq!(snap.status, OperationStatus::Completed);
    assert_eq!(snap.metadata.get("filename"), Some(&serde_json::Value::from("april.csv")));
}
