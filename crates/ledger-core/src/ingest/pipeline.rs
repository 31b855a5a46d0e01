//! Ingestion orchestration: reconcile the scope, stream rows, persist, and
//! run the post-ingest steps.
//!
//! Rows are handled strictly in source order, Opening before Transaction
//! within a row. A failing row is recorded and skipped; only a source row the
//! reader could not decode stops the run.

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::config::{LedgerConfig, MAX_ERROR_SAMPLES, OPENING_MONTH_LABEL};
use crate::errors::{LedgerError, LedgerResult};
use crate::ingest::amount::{self, parse_plain_number};
use crate::ingest::classify::ClassificationResolver;
use crate::ingest::progress::{OperationStatus, ProgressTracker, ProgressUpdate};
use crate::ingest::source::SourceRows;
use crate::models::{
    CanonicalAmount, ClassificationSet, IngestionContext, LedgerRow, RawRecord, Scope,
    StructuredRecord,
};
use crate::store::database::{Database, Diagnostic, PendingForexRow};
use crate::store::dedup::{BatchKeys, DedupLayer, DedupStore, PersistOutcome};
use crate::store::master::MasterData;
use crate::store::reconcile::{reconcile, ReconcileReport};

/// Batch currency step run after a successful ingestion.
pub trait ForexHook: Send + Sync {
    /// Fill `avg_fx_rate` for `pending`; returns how many rows were updated.
    fn apply(&self, db: &Database, pending: &[PendingForexRow]) -> LedgerResult<usize>;
}

// ---------------------------------------------------------------------------
// Outcomes and summary
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RowOutcome {
    SkippedNoParticular,
    SkippedNoData,
    Persisted { inserted: usize },
    SkippedDuplicate,
    FailedIsolated { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// Zero-based data row index in the source.
    pub row: usize,
    pub particular: Option<String>,
    pub message: String,
}

/// Rows per final state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub persisted: usize,
    pub duplicate: usize,
    pub no_particular: usize,
    pub no_data: usize,
    pub failed: usize,
}

/// Structured records rejected as duplicates, per layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateCounts {
    pub batch: usize,
    pub existing: usize,
    pub constraint: usize,
}

impl DuplicateCounts {
    fn record(&mut self, layer: DedupLayer) {
        match layer {
            DedupLayer::Batch => self.batch += 1,
            DedupLayer::Existing => self.existing += 1,
            DedupLayer::Constraint => self.constraint += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.batch + self.existing + self.constraint
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub raw_count: i64,
    pub structured_count: i64,
    pub expected_raw: i64,
    pub expected_structured: i64,
    /// More rows in scope than this run accounts for.
    pub excess: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ForexReport {
    pub pending: usize,
    pub updated: usize,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngestionSummary {
    pub operation_id: String,
    pub status: OperationStatus,
    pub scope: Option<Scope>,
    pub total_rows: usize,
    pub processed_rows: usize,
    /// Structured records written.
    pub records_inserted: usize,
    pub raw_inserted: usize,
    pub raw_duplicates: usize,
    pub rows: RowCounts,
    pub duplicates: DuplicateCounts,
    pub unclassified: usize,
    pub errors: Vec<RowError>,
    pub reconciliation: Option<ReconcileReport>,
    pub reconciliation_warning: Option<String>,
    pub swept_duplicates: usize,
    pub verification: Option<Verification>,
    pub forex: Option<ForexReport>,
    pub failure: Option<String>,
}

impl IngestionSummary {
    pub fn new(operation_id: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            status: OperationStatus::Processing,
            scope: None,
            total_rows: 0,
            processed_rows: 0,
            records_inserted: 0,
            raw_inserted: 0,
            raw_duplicates: 0,
            rows: RowCounts::default(),
            duplicates: DuplicateCounts::default(),
            unclassified: 0,
            errors: Vec::new(),
            reconciliation: None,
            reconciliation_warning: None,
            swept_duplicates: 0,
            verification: None,
            forex: None,
            failure: None,
        }
    }

    /// Summary of an operation that stopped before any row was read.
    pub fn failed(operation_id: &str, message: impl Into<String>) -> Self {
        let mut summary = Self::new(operation_id);
        summary.status = OperationStatus::Failed;
        summary.failure = Some(message.into());
        summary
    }

    pub fn skipped(&self) -> usize {
        self.rows.no_particular + self.rows.no_data
    }

    pub fn duplicate_skipped(&self) -> usize {
        self.duplicates.total()
    }

    pub fn error_count(&self) -> usize {
        self.rows.failed
    }

    fn push_error(&mut self, row: usize, particular: Option<&str>, message: &str) {
        self.rows.failed += 1;
        if self.errors.len() < MAX_ERROR_SAMPLES {
            self.errors.push(RowError {
                row,
                particular: particular.map(str::to_string),
                message: message.to_string(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Per-run mutable state threaded through row processing.
struct RunState<'r> {
    operation_id: &'r str,
    dedup: DedupStore<'r>,
    batch: BatchKeys,
    resolver: ClassificationResolver<'r>,
    summary: IngestionSummary,
}

pub struct IngestionPipeline<'a> {
    db: &'a Database,
    master: &'a dyn MasterData,
    progress: &'a ProgressTracker,
    config: &'a LedgerConfig,
    forex: Option<&'a dyn ForexHook>,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(
        db: &'a Database,
        master: &'a dyn MasterData,
        progress: &'a ProgressTracker,
        config: &'a LedgerConfig,
    ) -> Self {
        Self {
            db,
            master,
            progress,
            config,
            forex: None,
        }
    }

    pub fn with_forex(mut self, hook: &'a dyn ForexHook) -> Self {
        self.forex = Some(hook);
        self
    }

    /// Run one operation end to end. The returned summary always carries
    /// the counts reached, also when the run failed part way.
    pub fn run(
        &self,
        operation_id: &str,
        rows: SourceRows,
        context: &IngestionContext,
    ) -> IngestionSummary {
        let scope = context.scope();
        let span = info_span!(
            "ingest",
            operation_id,
            entity = %scope.entity_code,
            month = %scope.month,
            year = scope.year
        );
        let _guard = span.enter();

        let total = rows.len();
        let mut state = RunState {
            operation_id,
            dedup: DedupStore::new(self.db, operation_id),
            batch: BatchKeys::new(),
            resolver: ClassificationResolver::new(self.master),
            summary: IngestionSummary::new(operation_id),
        };
        state.summary.scope = Some(scope.clone());
        state.summary.total_rows = total;

        if let Err(e) = self.db.record_run_start(operation_id, &scope) {
            warn!(error = %e, "could not record run start");
        }

        self.progress.update(
            operation_id,
            ProgressUpdate::new()
                .status(OperationStatus::Validating)
                .message("Reconciling existing records"),
        );
        let report = reconcile(self.db, &scope);
        if !report.success {
            let warning = format!(
                "reconciliation incomplete for {scope}: {}",
                report.error.as_deref().unwrap_or("rows left in scope")
            );
            self.diagnose(
                Diagnostic::new(operation_id, "reconcile", "reconciliation", &warning)
                    .with_severity("warning"),
            );
            state.summary.reconciliation_warning = Some(warning);
        }
        state.summary.reconciliation = Some(report);

        self.progress.update(
            operation_id,
            ProgressUpdate::new()
                .status(OperationStatus::Processing)
                .rows(0, total)
                .message("Processing rows"),
        );
        info!(rows = total, "processing rows");

        for (index, row) in rows.into_iter().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    let message = format!("row {index} could not be read: {e}");
                    error!(row = index, error = %e, "aborting on unreadable source row");
                    self.diagnose(Diagnostic::new(operation_id, "source", "unreadable", &message));
                    state.summary.status = OperationStatus::Failed;
                    state.summary.failure = Some(message);
                    break;
                }
            };

            let outcome = self
                .process_row(index, &row, context, &mut state)
                .unwrap_or_else(|e| RowOutcome::FailedIsolated {
                    message: e.to_string(),
                });
            self.tally(operation_id, index, &row, outcome, &mut state.summary);

            state.summary.processed_rows += 1;
            let processed = state.summary.processed_rows;
            self.progress.update(
                operation_id,
                ProgressUpdate::new()
                    .rows(processed, total)
                    .message(format!("Processed {processed}/{total} rows")),
            );
        }

        let mut summary = state.summary;
        if summary.status != OperationStatus::Failed {
            self.post_ingest(&scope, &mut summary);
            summary.status = OperationStatus::Completed;
        }
        self.finish(operation_id, &summary);
        summary
    }

    fn process_row(
        &self,
        index: usize,
        row: &LedgerRow,
        ctx: &IngestionContext,
        state: &mut RunState<'_>,
    ) -> LedgerResult<RowOutcome> {
        let Some(particular) = row.particular_name() else {
            return Ok(RowOutcome::SkippedNoParticular);
        };
        let amounts = amount::parse_row(row);

        let raw = RawRecord {
            entity_code: ctx.entity.code.clone(),
            month: ctx.period.month_name.clone(),
            year: ctx.period.year,
            financial_year: ctx.financial_year(),
            particular: particular.to_string(),
            opening: if ctx.is_opening_period {
                parse_plain_number(row.opening.as_deref())
            } else {
                None
            },
            transaction: parse_plain_number(row.transaction.as_deref()),
            closing: parse_plain_number(row.closing.as_deref()),
            opening_period: ctx.is_opening_period,
        };
        match state.dedup.try_persist_raw(&raw) {
            PersistOutcome::Inserted(_) => state.summary.raw_inserted += 1,
            PersistOutcome::SkippedDuplicate(_) => state.summary.raw_duplicates += 1,
            PersistOutcome::Failed(message) => {
                warn!(row = index, particular, error = %message, "raw record not stored");
                self.diagnose(
                    Diagnostic::new(state.operation_id, "raw", "persist", &message)
                        .with_severity("warning")
                        .with_row(index, Some(particular)),
                );
            }
        }

        let mut attempts: Vec<(CanonicalAmount, &str)> = Vec::with_capacity(2);
        if ctx.is_opening_period {
            if let Some(opening) = amounts.opening.canonical() {
                attempts.push((opening, OPENING_MONTH_LABEL));
            }
        }
        if let Some(transaction) = amounts.transaction.canonical() {
            attempts.push((transaction, ctx.period.month_name.as_str()));
        }
        if attempts.is_empty() {
            return Ok(RowOutcome::SkippedNoData);
        }

        let classification = state.resolver.resolve(particular);
        if classification.is_none() {
            state.summary.unclassified += 1;
        }
        let classification = classification.unwrap_or_default();

        let mut inserted = 0;
        for (amount, label) in attempts {
            let record = build_record(ctx, particular, amount, label, &classification);
            match state.dedup.try_persist(&record, &mut state.batch) {
                PersistOutcome::Inserted(id) => {
                    debug!(row = index, id, label, amount = %amount, "record inserted");
                    inserted += 1;
                    state.summary.records_inserted += 1;
                }
                PersistOutcome::SkippedDuplicate(layer) => state.summary.duplicates.record(layer),
                PersistOutcome::Failed(message) => {
                    return Err(LedgerError::Ingest(format!(
                        "{label} amount not stored: {message}"
                    )));
                }
            }
        }

        Ok(if inserted > 0 {
            RowOutcome::Persisted { inserted }
        } else {
            RowOutcome::SkippedDuplicate
        })
    }

    fn tally(
        &self,
        operation_id: &str,
        index: usize,
        row: &LedgerRow,
        outcome: RowOutcome,
        summary: &mut IngestionSummary,
    ) {
        match outcome {
            RowOutcome::SkippedNoParticular => summary.rows.no_particular += 1,
            RowOutcome::SkippedNoData => summary.rows.no_data += 1,
            RowOutcome::Persisted { .. } => summary.rows.persisted += 1,
            RowOutcome::SkippedDuplicate => summary.rows.duplicate += 1,
            RowOutcome::FailedIsolated { message } => {
                let particular = row.particular_name();
                warn!(row = index, particular, error = %message, "row failed");
                self.diagnose(
                    Diagnostic::new(operation_id, "row", "persist", &message)
                        .with_row(index, particular),
                );
                summary.push_error(index, particular, &message);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Post-ingest
    // -----------------------------------------------------------------------

    fn post_ingest(&self, scope: &Scope, summary: &mut IngestionSummary) {
        if self.config.dedup_sweep {
            match self.db.sweep_scope_duplicates(scope) {
                Ok(removed) => {
                    if removed > 0 {
                        warn!(removed, "duplicate records swept after ingest");
                    }
                    summary.swept_duplicates = removed;
                }
                Err(e) => warn!(error = %e, "duplicate sweep failed"),
            }
        }

        match self.db.count_scope(scope) {
            Ok(counts) => {
                let expected_raw = summary.raw_inserted as i64;
                let expected_structured =
                    summary.records_inserted as i64 - summary.swept_duplicates as i64;
                let excess =
                    counts.raw > expected_raw || counts.structured > expected_structured;
                if excess {
                    warn!(
                        raw = counts.raw,
                        structured = counts.structured,
                        expected_raw,
                        expected_structured,
                        "scope holds more rows than this run inserted"
                    );
                }
                summary.verification = Some(Verification {
                    raw_count: counts.raw,
                    structured_count: counts.structured,
                    expected_raw,
                    expected_structured,
                    excess,
                });
            }
            Err(e) => warn!(error = %e, "verification count failed"),
        }

        if summary.records_inserted > 0 && self.config.forex_post_step {
            if let Some(hook) = self.forex {
                summary.forex = Some(self.run_forex(hook, scope));
            }
        }
    }

    fn run_forex(&self, hook: &dyn ForexHook, scope: &Scope) -> ForexReport {
        let pending = match self.db.pending_forex_rows(scope) {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "could not load rows pending forex");
                return ForexReport {
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };
        if pending.is_empty() {
            return ForexReport::default();
        }
        match hook.apply(self.db, &pending) {
            Ok(updated) => {
                info!(pending = pending.len(), updated, "forex post-step done");
                ForexReport {
                    pending: pending.len(),
                    updated,
                    error: None,
                }
            }
            Err(e) => {
                error!(error = %e, "forex post-step failed");
                ForexReport {
                    pending: pending.len(),
                    updated: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn finish(&self, operation_id: &str, summary: &IngestionSummary) {
        let mut update = ProgressUpdate::new()
            .status(summary.status)
            .meta("records_inserted", summary.records_inserted);
        update = match summary.status {
            OperationStatus::Completed => update.percent(100.0).message(format!(
                "Completed: {} records inserted",
                summary.records_inserted
            )),
            _ => update.message(
                summary
                    .failure
                    .clone()
                    .unwrap_or_else(|| "Failed".to_string()),
            ),
        };
        self.progress.update(operation_id, update);

        match serde_json::to_string(summary) {
            Ok(json) => {
                if let Err(e) =
                    self.db
                        .record_run_finish(operation_id, summary.status.as_str(), &json)
                {
                    warn!(error = %e, "could not record run result");
                }
            }
            Err(e) => warn!(error = %e, "could not serialise summary"),
        }

        info!(
            status = summary.status.as_str(),
            inserted = summary.records_inserted,
            duplicates = summary.duplicate_skipped(),
            skipped = summary.skipped(),
            unclassified = summary.unclassified,
            errors = summary.error_count(),
            "ingestion finished"
        );
    }

    fn diagnose(&self, diagnostic: Diagnostic) {
        if let Err(e) = self.db.record_diagnostic(&diagnostic) {
            warn!(error = %e, "could not record diagnostic");
        }
    }
}

fn build_record(
    ctx: &IngestionContext,
    particular: &str,
    amount: CanonicalAmount,
    month_label: &str,
    classification: &ClassificationSet,
) -> StructuredRecord {
    StructuredRecord {
        particular: particular.to_string(),
        entity_name: ctx.entity.name.clone(),
        entity_code: ctx.entity.code.clone(),
        local_currency: ctx.entity.local_currency.clone(),
        amount,
        month_label: month_label.to_string(),
        selected_month: ctx.period.month_name.clone(),
        classification: classification.clone(),
        year: ctx.period.year,
        financial_year: ctx.financial_year(),
        quarter: ctx.period.quarter.clone(),
        half: ctx.period.half.clone(),
    }
}
