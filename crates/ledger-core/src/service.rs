//! Public entry points: start an ingestion, poll its progress, run several
//! at once.

use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::config::LedgerConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::ingest::pipeline::{ForexHook, IngestionPipeline, IngestionSummary};
use crate::ingest::progress::{OperationStatus, ProgressSnapshot, ProgressTracker, ProgressUpdate};
use crate::ingest::source::{self, SourceRows};
use crate::models::{IngestionContext, LedgerRow, PeriodRef};
use crate::store::database::Database;
use crate::store::master::{MasterData, SqliteMasterData};

/// Who and what an upload is for.
#[derive(Clone, Debug)]
pub struct IngestionRequest {
    /// Generated when absent.
    pub operation_id: Option<String>,
    pub entity_id: i64,
    pub period: PeriodRef,
    pub is_opening_period: bool,
    pub filename: Option<String>,
}

#[derive(Clone, Debug)]
pub enum RowSource {
    Rows(Vec<LedgerRow>),
    File(PathBuf),
}

#[derive(Clone, Debug)]
pub struct IngestionJob {
    pub request: IngestionRequest,
    pub source: RowSource,
}

pub struct LedgerService {
    config: LedgerConfig,
    db: Database,
    master: Arc<dyn MasterData>,
    progress: Arc<ProgressTracker>,
    forex: Option<Arc<dyn ForexHook>>,
}

impl LedgerService {
    /// Open the configured database, bring its schema up to date, and read
    /// master data from the same file.
    pub fn new(config: LedgerConfig) -> LedgerResult<Self> {
        let db = Database::from_config(&config)?;
        db.init_schema()?;
        let master: Arc<dyn MasterData> = Arc::new(SqliteMasterData::new(db.clone()));
        Ok(Self {
            config,
            db,
            master,
            progress: Arc::new(ProgressTracker::new()),
            forex: None,
        })
    }

    pub fn from_env() -> LedgerResult<Self> {
        Self::new(LedgerConfig::from_env())
    }

    pub fn with_master(mut self, master: Arc<dyn MasterData>) -> Self {
        self.master = master;
        self
    }

    /// Share a progress map with other services in the process.
    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_forex(mut self, hook: Arc<dyn ForexHook>) -> Self {
        self.forex = Some(hook);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub fn start_ingestion(&self, request: IngestionRequest, rows: Vec<LedgerRow>) -> IngestionSummary {
        self.execute(IngestionJob {
            request,
            source: RowSource::Rows(rows),
        })
    }

    pub fn ingest_file(&self, request: IngestionRequest, path: impl Into<PathBuf>) -> IngestionSummary {
        self.execute(IngestionJob {
            request,
            source: RowSource::File(path.into()),
        })
    }

    pub fn get_progress(&self, operation_id: &str) -> Option<ProgressSnapshot> {
        self.progress.get(operation_id)
    }

    /// Drop terminal progress entries older than the configured retention.
    pub fn purge_progress(&self) -> usize {
        self.progress.purge_expired(self.config.progress_retention)
    }

    /// Run independent operations in parallel, one worker per operation.
    /// Summaries come back in job order.
    pub fn run_many(&self, jobs: Vec<IngestionJob>) -> Vec<IngestionSummary> {
        if jobs.is_empty() {
            return vec![];
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.len().min(num_workers()))
            .build();
        match pool {
            Ok(pool) => pool.install(|| jobs.into_par_iter().map(|job| self.execute(job)).collect()),
            Err(e) => {
                error!(error = %e, "worker pool unavailable, running jobs sequentially");
                jobs.into_iter().map(|job| self.execute(job)).collect()
            }
        }
    }

    fn execute(&self, job: IngestionJob) -> IngestionSummary {
        let IngestionJob { request, source } = job;
        let operation_id = request
            .operation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut metadata = Map::new();
        metadata.insert("entity_id".to_string(), Value::from(request.entity_id));
        if let Some(name) = request.filename.clone().or_else(|| match &source {
            RowSource::File(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            RowSource::Rows(_) => None,
        }) {
            metadata.insert("filename".to_string(), Value::from(name));
        }
        self.progress.init(&operation_id, metadata);
        self.progress.update(
            &operation_id,
            ProgressUpdate::new()
                .status(OperationStatus::Validating)
                .message("Validating request"),
        );

        let prepared = self
            .resolve_context(&request)
            .and_then(|ctx| Ok((load_rows(source)?, ctx)));
        let (rows, context) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return self.fail(&operation_id, e),
        };

        self.progress.update(
            &operation_id,
            ProgressUpdate::new()
                .meta("entity", context.entity.code.as_str())
                .meta("month", context.period.month_name.as_str())
                .meta("year", context.period.year)
                .meta("financial_year", context.financial_year()),
        );
        info!(
            operation_id = %operation_id,
            entity = %context.entity.code,
            month = %context.period.month_name,
            year = context.period.year,
            opening = context.is_opening_period,
            "starting ingestion"
        );

        let pipeline =
            IngestionPipeline::new(&self.db, self.master.as_ref(), &self.progress, &self.config);
        let pipeline = match &self.forex {
            Some(hook) => pipeline.with_forex(hook.as_ref()),
            None => pipeline,
        };
        pipeline.run(&operation_id, rows, &context)
    }

    fn resolve_context(&self, request: &IngestionRequest) -> LedgerResult<IngestionContext> {
        let entity = self
            .master
            .lookup_entity(request.entity_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("entity {}", request.entity_id)))?;
        let period = self
            .master
            .lookup_period(&request.period)?
            .ok_or_else(|| LedgerError::NotFound(format!("period {:?}", request.period)))?;
        Ok(IngestionContext {
            entity,
            period,
            is_opening_period: request.is_opening_period,
        })
    }

    fn fail(&self, operation_id: &str, err: LedgerError) -> IngestionSummary {
        let message = err.to_string();
        error!(operation_id, error = %message, "ingestion could not start");
        self.progress.update(
            operation_id,
            ProgressUpdate::new()
                .status(OperationStatus::Failed)
                .message(message.clone()),
        );
        IngestionSummary::failed(operation_id, message)
    }
}

fn load_rows(source: RowSource) -> LedgerResult<SourceRows> {
    match source {
        RowSource::Rows(rows) => Ok(rows.into_iter().map(Ok).collect()),
        RowSource::File(path) => source::read_rows(&path),
    }
}

fn num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassificationSet, EntityRecord, PeriodRecord};
    use crate::store::master::InMemoryMasterData;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> LedgerService {
        let config = LedgerConfig::default().with_db_path(dir.path().join("ledger.db"));
        let master = InMemoryMasterData::new()
            .with_entity(EntityRecord {
                id: 1,
                name: "Acme Ltd".to_string(),
                code: "ACM".to_string(),
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
            .with_classification("Cash", ClassificationSet::default());
        LedgerService::new(config).unwrap().with_master(Arc::new(master))
    }

    fn request(op: Option<&str>, entity_id: i64) -> IngestionRequest {
        IngestionRequest {
            operation_id: op.map(str::to_string),
            entity_id,
            period: PeriodRef::Id(4),
            is_opening_period: false,
            filename: Some("april.xlsx".to_string()),
        }
    }

    #[test]
    fn test_generated_operation_id_is_tracked() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let summary = svc.start_ingestion(request(None, 1), vec![LedgerRow::new("Cash", "", "10", "")]);

        assert_eq!(summary.status, OperationStatus::Completed);
        assert!(uuid::Uuid::parse_str(&summary.operation_id).is_ok());
        let snap = svc.get_progress(&summary.operation_id).unwrap();
        assert_eq!(snap.metadata.get("filename"), Some(&Value::from("april.xlsx")));
        assert_eq!(snap.metadata.get("entity"), Some(&Value::from("ACM")));
    }

    #[test]
    fn test_unknown_entity_fails_the_operation() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let summary = svc.start_ingestion(request(Some("op-x"), 99), vec![]);

        assert_eq!(summary.status, OperationStatus::Failed);
        assert!(summary.failure.as_deref().unwrap().contains("entity 99"));
        let snap = svc.get_progress("op-x").unwrap();
        assert_eq!(snap.status, OperationStatus::Failed);
    }

    #[test]
    fn test_missing_file_fails_the_operation() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let summary = svc.ingest_file(request(Some("op-f"), 1), dir.path().join("absent.csv"));
        assert_eq!(summary.status, OperationStatus::Failed);
        assert_eq!(summary.processed_rows, 0);
    }

    #[test]
    fn test_purge_progress_uses_retention() {
        let dir = TempDir::new().unwrap();
        let mut svc = service(&dir);
        svc.config.progress_retention = std::time::Duration::ZERO;
        svc.start_ingestion(request(Some("op-p"), 1), vec![]);
        assert_eq!(svc.purge_progress(), 1);
        assert!(svc.get_progress("op-p").is_none());
    }
}
