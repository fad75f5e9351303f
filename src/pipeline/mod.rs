//! Dataset orchestration
//!
//! Runs each [`DatasetJob`] through read, normalize, provision, merge and
//! evolve. Jobs run strictly one after another, each on its own warehouse
//! session which is closed on every exit path. A failing dataset is recorded
//! in the [`RunReport`] and the run moves on to the next one.

pub mod catalog;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::dataset::{Dataset, DatasetError, SourceFile, read_source};
use crate::load::{
    ColumnOrder, Evolution, LoadError, MergeOptions, MergeOutcome, ensure_namespace,
    ensure_table, evolve_table, merge_into,
};
use crate::transform::{NormalizeError, NormalizeResult};
use crate::warehouse::{Connector, EtlConfig, TargetTable, Warehouse, WarehouseError};

pub use catalog::{builtin_jobs, find_job};

/// Error type for a single dataset run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The source file could not be read
    #[error("Source error: {0}")]
    Source(#[from] DatasetError),

    /// The dataset could not be normalized
    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    /// Provisioning, merging or evolving failed
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// The warehouse session could not be opened or the target is invalid
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// No job with this name is registered
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// One hand-written dataset transformation and its destination
pub trait DatasetJob: Send + Sync {
    /// Unique job name, e.g. `nba_payroll`
    fn name(&self) -> &str;

    /// File name of the source inside the data directory
    fn source_file(&self) -> &str;

    /// Table the normalized dataset is loaded into
    fn target(&self) -> PipelineResult<TargetTable>;

    /// Turn the raw source into the target table's shape
    fn normalize(&self, raw: &Dataset) -> NormalizeResult<Dataset>;
}

/// What happened to one dataset
#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    /// Job name
    pub dataset: String,
    /// Target table, `namespace.table`
    pub table: String,
    /// Source file that was read, if reading succeeded
    pub source: Option<SourceFile>,
    /// Rows read from the source
    pub rows_read: usize,
    /// Rows left after normalization
    pub rows_normalized: usize,
    /// Merge counts, if the merge ran
    pub merge: Option<MergeOutcome>,
    /// What the evolution step added, if it ran
    pub evolution: Option<Evolution>,
    /// Failure message, if the dataset failed
    pub error: Option<String>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl DatasetReport {
    fn new(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            table: String::new(),
            source: None,
            rows_read: 0,
            rows_normalized: 0,
            merge: None,
            evolution: None,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Identifier of this run
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// One entry per job, in run order
    pub datasets: Vec<DatasetReport>,
    /// Duration of the whole run in milliseconds
    pub duration_ms: u64,
}

impl RunReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            datasets: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Check if every dataset loaded
    pub fn is_success(&self) -> bool {
        self.datasets.iter().all(DatasetReport::is_success)
    }

    /// Datasets that failed
    pub fn failures(&self) -> impl Iterator<Item = &DatasetReport> {
        self.datasets.iter().filter(|d| !d.is_success())
    }

    /// Total rows inserted across all datasets
    pub fn rows_inserted(&self) -> u64 {
        self.datasets
            .iter()
            .filter_map(|d| d.merge.map(|m| m.inserted))
            .sum()
    }
}

/// Sequential ETL pipeline over a set of dataset jobs
pub struct Pipeline {
    data_dir: PathBuf,
    evolve: bool,
    column_order: ColumnOrder,
    jobs: Vec<Box<dyn DatasetJob>>,
}

impl Pipeline {
    /// Create an empty pipeline reading sources from `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            evolve: true,
            column_order: ColumnOrder::Strict,
            jobs: Vec::new(),
        }
    }

    /// Create a pipeline with the built-in jobs and the configured behaviour
    pub fn from_config(config: &EtlConfig) -> Self {
        let order = if config.pipeline.strict_column_order {
            ColumnOrder::Strict
        } else {
            ColumnOrder::ByName
        };
        let mut pipeline = Self::new(&config.data.dir)
            .with_evolve(config.pipeline.evolve)
            .with_column_order(order);
        for job in builtin_jobs() {
            pipeline.add_job(job);
        }
        pipeline
    }

    pub fn with_evolve(mut self, evolve: bool) -> Self {
        self.evolve = evolve;
        self
    }

    pub fn with_column_order(mut self, column_order: ColumnOrder) -> Self {
        self.column_order = column_order;
        self
    }

    pub fn add_job(&mut self, job: Box<dyn DatasetJob>) {
        self.jobs.push(job);
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn jobs(&self) -> &[Box<dyn DatasetJob>] {
        &self.jobs
    }

    /// Keep only the named jobs, in the order given
    pub fn retain_jobs<S: AsRef<str>>(mut self, names: &[S]) -> PipelineResult<Self> {
        let mut kept = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let position = self
                .jobs
                .iter()
                .position(|j| j.name() == name)
                .ok_or_else(|| PipelineError::UnknownDataset(name.to_string()))?;
            kept.push(self.jobs.remove(position));
        }
        self.jobs = kept;
        Ok(self)
    }

    /// Run every job, one session per dataset
    pub async fn run(&self, connector: &dyn Connector) -> RunReport {
        let start = std::time::Instant::now();
        let mut report = RunReport::new();
        tracing::info!(
            run_id = %report.run_id,
            datasets = self.jobs.len(),
            warehouse = %connector.describe(),
            "Starting pipeline run"
        );

        for job in &self.jobs {
            let span = tracing::info_span!("dataset", run_id = %report.run_id, name = job.name());
            let dataset = self.run_dataset(connector, job.as_ref()).instrument(span).await;
            report.datasets.push(dataset);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        let failed = report.failures().count();
        if failed == 0 {
            tracing::info!(
                run_id = %report.run_id,
                inserted = report.rows_inserted(),
                duration_ms = report.duration_ms,
                "Pipeline run complete"
            );
        } else {
            tracing::warn!(
                run_id = %report.run_id,
                failed,
                duration_ms = report.duration_ms,
                "Pipeline run finished with failures"
            );
        }
        report
    }

    async fn run_dataset(&self, connector: &dyn Connector, job: &dyn DatasetJob) -> DatasetReport {
        let start = std::time::Instant::now();
        let mut report = DatasetReport::new(job.name());

        let outcome = match connector.open().await {
            Ok(session) => {
                let outcome = self.load_dataset(session.as_ref(), job, &mut report).await;
                if let Err(e) = session.close().await {
                    tracing::warn!(error = %e, "Failed to close warehouse session");
                }
                outcome
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = outcome {
            tracing::error!(error = %e, "Dataset failed");
            report.error = Some(e.to_string());
        }
        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }

    async fn load_dataset(
        &self,
        warehouse: &dyn Warehouse,
        job: &dyn DatasetJob,
        report: &mut DatasetReport,
    ) -> PipelineResult<()> {
        let target = job.target()?;
        report.table = target.name.to_string();

        let (source, raw) = read_source(&self.data_dir.join(job.source_file()))?;
        report.rows_read = raw.row_count();
        report.source = Some(source);

        let normalized = job.normalize(&raw)?;
        report.rows_normalized = normalized.row_count();
        tracing::info!(
            rows = normalized.row_count(),
            columns = normalized.column_count(),
            "Normalized dataset"
        );

        ensure_namespace(warehouse, &target.name.namespace).await?;
        ensure_table(warehouse, &target).await?;

        let options = MergeOptions::evolved(self.column_order);
        report.merge = Some(merge_into(warehouse, &target.name, &normalized, &options).await?);

        if self.evolve {
            report.evolution = Some(evolve_table(warehouse, &target.name).await?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_registers_catalog() {
        let config = EtlConfig::default();
        let pipeline = Pipeline::from_config(&config);
        assert_eq!(pipeline.jobs().len(), builtin_jobs().len());
        assert_eq!(pipeline.data_dir(), Path::new("data"));
    }

    #[test]
    fn test_retain_jobs_keeps_requested_order() {
        let pipeline = Pipeline::from_config(&EtlConfig::default())
            .retain_jobs(&["nba_salaries", "nba_payroll"])
            .unwrap();
        let names: Vec<&str> = pipeline.jobs().iter().map(|j| j.name()).collect();
        assert_eq!(names, vec!["nba_salaries", "nba_payroll"]);
    }

    #[test]
    fn test_retain_unknown_job() {
        let result = Pipeline::from_config(&EtlConfig::default()).retain_jobs(&["nope"]);
        assert!(matches!(result, Err(PipelineError::UnknownDataset(_))));
    }

    #[test]
    fn test_empty_report_is_success() {
        let report = RunReport::new();
        assert!(report.is_success());
        assert_eq!(report.rows_inserted(), 0);
    }
}
