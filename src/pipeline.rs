//! Fetch → normalize → load → validate orchestration
//!
//! A run never stops on a per-pair or per-record problem; those are collected in
//! the [`RunSummary`]. Only configuration errors, total fetch failure, a load-time
//! schema mismatch, an unreadable import or the run deadline make a run fatal.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::api::StatementProvider;
use crate::concurrent_fetcher::{fetch_statements_concurrently, ConcurrentFetchConfig, FetchFailure};
use crate::database::{load_table, LoadError, LoadReport, StatementStore};
use crate::models::{CanonicalTable, Config, ConfigError, RawPayload, StatementType};
use crate::normalizer::{normalize_batch, NormalizationDefect, NormalizationWarning};
use crate::spreadsheet::{discover_exports, read_export, ImportError};
use crate::validator::{validate_store, ValidationReport};

/// Errors that end a run early
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("every fetch failed ({attempted} pairs attempted)")]
    TotalFetchFailure { attempted: usize },
    #[error("run exceeded its time limit of {0:?}")]
    Timeout(Duration),
    #[error("import failed: {0}")]
    Import(#[from] ImportError),
    #[error("validation could not read the store: {0}")]
    Validation(#[source] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Clean,
    ViolationsReported,
    Fatal,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Clean => 0,
            RunOutcome::ViolationsReported => 1,
            RunOutcome::Fatal => 2,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Clean => "completed, validation clean",
            RunOutcome::ViolationsReported => "completed with validation violations",
            RunOutcome::Fatal => "failed",
        })
    }
}

/// Everything that happened during one run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub payloads: usize,
    pub fetch_failures: Vec<FetchFailure>,
    pub defects: Vec<NormalizationDefect>,
    pub warnings: Vec<NormalizationWarning>,
    pub loads: Vec<LoadReport>,
    pub load_errors: Vec<LoadError>,
    pub validation: Option<ValidationReport>,
    pub fatal: Option<PipelineError>,
}

impl RunSummary {
    fn fatal(error: PipelineError) -> Self {
        Self {
            fatal: Some(error),
            ..Self::default()
        }
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.fatal.is_some() || !self.load_errors.is_empty() {
            return RunOutcome::Fatal;
        }
        match &self.validation {
            Some(report) if report.is_clean() => RunOutcome::Clean,
            Some(_) => RunOutcome::ViolationsReported,
            None => RunOutcome::Fatal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome().exit_code()
    }

    pub fn rows_loaded(&self) -> u64 {
        self.loads.iter().map(|l| l.rows_inserted).sum()
    }
}

fn write_items<T: fmt::Display>(f: &mut fmt::Formatter<'_>, label: &str, items: &[T]) -> fmt::Result {
    writeln!(f, "{}: {}", label, items.len())?;
    for item in items {
        writeln!(f, "  - {}", item)?;
    }
    Ok(())
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary")?;
        writeln!(f, "payloads received: {}", self.payloads)?;
        write_items(f, "fetch failures", &self.fetch_failures)?;
        write_items(f, "normalization defects", &self.defects)?;
        write_items(f, "normalization warnings", &self.warnings)?;

        writeln!(f, "loads: {} ({} rows)", self.loads.len(), self.rows_loaded())?;
        for load in &self.loads {
            writeln!(
                f,
                "  - {}: {} symbols replaced, {} rows deleted, {} rows inserted",
                load.statement_type, load.symbols_replaced, load.rows_deleted, load.rows_inserted
            )?;
        }
        write_items(f, "load errors", &self.load_errors)?;

        match &self.validation {
            Some(report) => {
                writeln!(
                    f,
                    "validation violations: {} ({} rows checked)",
                    report.len(),
                    report.rows_checked
                )?;
                for (rule, count) in report.counts_by_rule() {
                    writeln!(f, "  {}: {}", rule, count)?;
                }
                for violation in &report.violations {
                    writeln!(f, "  - {}", violation)?;
                }
            }
            None => writeln!(f, "validation: not run")?,
        }

        if let Some(fatal) = &self.fatal {
            writeln!(f, "fatal: {}", fatal)?;
        }
        write!(f, "outcome: {} (exit {})", self.outcome(), self.exit_code())
    }
}

/// The batch pipeline over one statement store
pub struct Pipeline {
    store: StatementStore,
    config: Config,
}

impl Pipeline {
    pub fn new(store: StatementStore, config: Config) -> Self {
        Self { store, config }
    }

    /// Open the configured store; an unreachable store is a configuration error
    pub async fn open(config: Config) -> Result<Self, ConfigError> {
        let store = StatementStore::open(&config.database_path).await?;
        Ok(Self::new(store, config))
    }

    pub fn store(&self) -> &StatementStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch every configured symbol from the provider, then normalize, load and validate
    pub async fn run_fetch(&self, provider: Arc<dyn StatementProvider>) -> RunSummary {
        let deadline = Instant::now() + self.config.run_timeout;
        let fetch_config = ConcurrentFetchConfig::from_config(&self.config);
        info!(
            "🚀 Starting fetch run for {} symbols: {}",
            self.config.symbols.len(),
            self.config.symbols.join(", ")
        );

        let fetch = fetch_statements_concurrently(provider, &self.config.symbols, &StatementType::ALL, &fetch_config);
        let batch = match timeout_at(deadline, fetch).await {
            Ok(batch) => batch,
            Err(_) => return self.timed_out(RunSummary::default()),
        };

        let mut summary = RunSummary {
            payloads: batch.payloads.len(),
            fetch_failures: batch.failures,
            ..RunSummary::default()
        };
        if batch.payloads.is_empty() && !summary.fetch_failures.is_empty() {
            error!("❌ All {} fetches failed", summary.fetch_failures.len());
            summary.fatal = Some(PipelineError::TotalFetchFailure {
                attempted: summary.fetch_failures.len(),
            });
            return summary;
        }

        self.normalize_load_validate(&batch.payloads, summary, deadline).await
    }

    /// Read spreadsheet exports from a directory instead of calling the API
    pub async fn run_import(&self, input_dir: &Path) -> RunSummary {
        let deadline = Instant::now() + self.config.run_timeout;
        info!("📂 Starting import run from {}", input_dir.display());

        let payloads = match read_exports(input_dir) {
            Ok(payloads) => payloads,
            Err(e) => {
                error!("❌ {}", e);
                return RunSummary::fatal(PipelineError::Import(e));
            }
        };

        let summary = RunSummary {
            payloads: payloads.len(),
            ..RunSummary::default()
        };
        self.normalize_load_validate(&payloads, summary, deadline).await
    }

    /// Validate the store as it stands
    pub async fn run_validate(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        self.validate_into(&mut summary).await;
        summary
    }

    async fn normalize_load_validate(
        &self,
        payloads: &[RawPayload],
        mut summary: RunSummary,
        deadline: Instant,
    ) -> RunSummary {
        let mut tables = Vec::new();
        for statement_type in StatementType::ALL {
            let normalized = normalize_batch(statement_type, payloads);
            info!(
                "🧹 Normalized {}: {} records, {} defects, {} dropped columns",
                statement_type,
                normalized.table.len(),
                normalized.defects.len(),
                normalized.warnings.len()
            );
            summary.defects.extend(normalized.defects);
            summary.warnings.extend(normalized.warnings);
            tables.push(normalized.table);
        }

        if timeout_at(deadline, self.load_tables(&tables, &mut summary)).await.is_err() {
            return self.timed_out(summary);
        }

        self.validate_into(&mut summary).await;
        summary
    }

    /// Load each statement type in turn; a failed type does not stop the others
    async fn load_tables(&self, tables: &[CanonicalTable], summary: &mut RunSummary) {
        for table in tables {
            match load_table(&self.store, table).await {
                Ok(report) => summary.loads.push(report),
                Err(e) => {
                    error!("❌ Load failed: {}", e);
                    summary.load_errors.push(e);
                }
            }
        }
    }

    async fn validate_into(&self, summary: &mut RunSummary) {
        match validate_store(&self.store).await {
            Ok(report) => summary.validation = Some(report),
            Err(e) => {
                error!("❌ Validation failed: {}", e);
                summary.fatal = Some(PipelineError::Validation(e));
            }
        }
    }

    fn timed_out(&self, mut summary: RunSummary) -> RunSummary {
        warn!("⏰ Run exceeded {:?}; outstanding work aborted", self.config.run_timeout);
        summary.fatal = Some(PipelineError::Timeout(self.config.run_timeout));
        summary
    }
}

fn read_exports(input_dir: &Path) -> Result<Vec<RawPayload>, ImportError> {
    discover_exports(input_dir)?.iter().map(read_export).collect()
}
