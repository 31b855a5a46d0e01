//! Criterion benchmarks for ledger-core.
//!
//! Groups:
//!
//! 1. **schema**: DDL plus migration on a fresh in-memory database.
//! 2. **amount_parser**: single cells and whole rows through the side chain.
//! 3. **dedupe_key**: key digest for a structured record.
//! 4. **pipeline**: end-to-end ingestion of synthetic rows into a temp ledger.
//!
//! ```sh
//! cargo bench --manifest-path crates/ledger-core/Cargo.toml -- amount_parser
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;
use tempfile::TempDir;

use _ledger_core::ingest::amount::{parse, parse_row};
use _ledger_core::models::{
    CanonicalAmount, ClassificationSet, DebitCredit, EntityRecord, LedgerRow, PeriodRecord,
    PeriodRef, StructuredRecord,
};
use _ledger_core::store::master::InMemoryMasterData;
use _ledger_core::store::schema::{migrate_schema, SCHEMA_STATEMENTS};
use _ledger_core::{IngestionRequest, LedgerConfig, LedgerService};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn synthetic_rows(n: usize) -> Vec<LedgerRow> {
    (0..n)
        .map(|i| {
            let opening = format!("{}.{:02} Dr", 1000 + i, i % 100);
            let transaction = if i % 3 == 0 {
                format!("-{}.50", 10 + i)
            } else {
                format!("{}.25 Cr", 10 + i)
            };
            LedgerRow::new(&format!("Account {i}"), &opening, &transaction, "")
        })
        .collect()
}

fn bench_service(dir: &TempDir, classified: usize) -> LedgerService {
    let config = LedgerConfig::default().with_db_path(dir.path().join("bench.db"));
    let mut master = InMemoryMasterData::new()
        .with_entity(EntityRecord {
            id: 1,
            name: "Bench Co".to_string(),
            code: "BEN".to_string(),
            local_currency: None,
        })
        .with_period(
            4,
            PeriodRecord {
                month_name: "April".to_string(),
                year: 2024,
                quarter: Some("Q1".to_string()),
                half: Some("H1".to_string()),
            },
        );
    for i in 0..classified {
        master = master.with_classification(
            &format!("Account {i}"),
            ClassificationSet {
                primary_code: Some(format!("{}", 1000 + i)),
                ..Default::default()
            },
        );
    }
    LedgerService::new(config)
        .unwrap()
        .with_master(Arc::new(master))
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_schema(c: &mut Criterion) {
    c.bench_function("schema_init_and_migrate", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            for stmt in SCHEMA_STATEMENTS {
                conn.execute_batch(stmt).unwrap();
            }
            migrate_schema(&conn).unwrap();
            black_box(&conn);
        });
    });
}

fn bench_amount_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("amount_parser");

    group.bench_function("inline_token", |b| {
        b.iter(|| parse(black_box(Some("1,365.00 Dr")), None))
    });
    group.bench_function("parenthesised_negative", |b| {
        b.iter(|| parse(black_box(Some("(2,500.75)")), None))
    });
    group.bench_function("type_column_hint", |b| {
        b.iter(|| parse(black_box(Some("420")), black_box(Some("Credit"))))
    });
    group.bench_function("unparseable", |b| {
        b.iter(|| parse(black_box(Some("n/a")), None))
    });

    let row = LedgerRow::new("Cash", "50", "", "100 Cr");
    group.bench_function("row_with_closing_fallback", |b| {
        b.iter(|| parse_row(black_box(&row)))
    });

    group.finish();
}

fn bench_dedupe_key(c: &mut Criterion) {
    let record = StructuredRecord {
        particular: "Trade Receivables".to_string(),
        entity_name: "Bench Co".to_string(),
        entity_code: "BEN".to_string(),
        local_currency: None,
        amount: CanonicalAmount::new(rust_decimal::Decimal::new(123_456, 2), DebitCredit::Credit),
        month_label: "April".to_string(),
        selected_month: "April".to_string(),
        classification: ClassificationSet::default(),
        year: 2024,
        financial_year: "2024-25".to_string(),
        quarter: None,
        half: None,
    };
    c.bench_function("dedupe_key_digest", |b| {
        b.iter(|| black_box(&record).dedupe_key().digest())
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    for n in [50usize, 500] {
        let rows = synthetic_rows(n);
        group.bench_with_input(BenchmarkId::new("ingest_rows", n), &rows, |b, rows| {
            let dir = TempDir::new().unwrap();
            let svc = bench_service(&dir, n / 2);
            b.iter(|| {
                let request = IngestionRequest {
                    operation_id: None,
                    entity_id: 1,
                    period: PeriodRef::Id(4),
                    is_opening_period: true,
                    filename: None,
                };
                black_box(svc.start_ingestion(request, rows.clone()))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_schema,
    bench_amount_parser,
    bench_dedupe_key,
    bench_pipeline,
);
criterion_main!(benches);
