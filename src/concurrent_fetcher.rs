//! Concurrent statement fetching module
//!
//! Fetches every (symbol, statement type) pair through a small pool of workers
//! pulling from a shared task queue. Each worker retries transient failures with
//! exponential backoff; outcomes flow to a single collector over a channel.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::api::{FetchError, StatementProvider};
use crate::models::{Config, RawPayload, StatementType};

/// Configuration for concurrent fetching
#[derive(Debug, Clone)]
pub struct ConcurrentFetchConfig {
    pub num_workers: usize,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl ConcurrentFetchConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            num_workers: config.fetch_workers.max(1),
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::default(),
        }
    }
}

/// Exponential backoff between retry attempts
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// One unit of work: a single upstream call
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTask {
    pub symbol: String,
    pub statement_type: StatementType,
}

/// A pair that could not be fetched, after retries where applicable
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub symbol: String,
    pub statement_type: StatementType,
    pub attempts: u32,
    pub cause: FetchError,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} failed after {} attempt(s): {}",
            self.symbol, self.statement_type, self.attempts, self.cause
        )
    }
}

/// Aggregated result of a fetch batch, sorted by (symbol, statement type)
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub payloads: Vec<RawPayload>,
    pub failures: Vec<FetchFailure>,
}

impl FetchBatch {
    pub fn attempted(&self) -> usize {
        self.payloads.len() + self.failures.len()
    }

    /// Every pair failed; nothing left to load
    pub fn is_total_failure(&self) -> bool {
        self.payloads.is_empty() && !self.failures.is_empty()
    }
}

/// Build the task queue: every symbol crossed with every statement type
pub fn plan_tasks(symbols: &[String], statement_types: &[StatementType]) -> VecDeque<FetchTask> {
    symbols
        .iter()
        .flat_map(|symbol| {
            statement_types.iter().map(move |&statement_type| FetchTask {
                symbol: symbol.clone(),
                statement_type,
            })
        })
        .collect()
}

/// Main function to fetch statements concurrently.
///
/// Never aborts the batch on a per-pair failure: the result holds one payload per
/// pair minus the permanently failed pairs, which are recorded with their cause.
/// Dropping the returned future aborts the outstanding workers.
pub async fn fetch_statements_concurrently(
    provider: Arc<dyn StatementProvider>,
    symbols: &[String],
    statement_types: &[StatementType],
    config: &ConcurrentFetchConfig,
) -> FetchBatch {
    let tasks = plan_tasks(symbols, statement_types);
    let total = tasks.len();
    let num_workers = config.num_workers.max(1).min(total.max(1));
    info!("🚀 Fetching {} statements with {} workers", total, num_workers);

    let queue = Arc::new(Mutex::new(tasks));
    let (sender, mut receiver) = mpsc::channel(total.max(1));

    let mut workers = JoinSet::new();
    for worker_id in 0..num_workers {
        let queue = Arc::clone(&queue);
        let provider = Arc::clone(&provider);
        let sender = sender.clone();
        let config = config.clone();
        workers.spawn(async move { worker(worker_id, queue, provider, sender, config).await });
    }
    drop(sender);

    let mut batch = FetchBatch::default();
    while let Some(outcome) = receiver.recv().await {
        match outcome {
            Ok(payload) => batch.payloads.push(payload),
            Err(failure) => batch.failures.push(failure),
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!("Fetch worker terminated abnormally: {}", e);
        }
    }

    batch
        .payloads
        .sort_by(|a, b| (&a.symbol, a.statement_type).cmp(&(&b.symbol, b.statement_type)));
    batch
        .failures
        .sort_by(|a, b| (&a.symbol, a.statement_type).cmp(&(&b.symbol, b.statement_type)));

    info!(
        "✅ Fetch completed: {} payloads, {} failures",
        batch.payloads.len(),
        batch.failures.len()
    );
    batch
}

async fn worker(
    worker_id: usize,
    queue: Arc<Mutex<VecDeque<FetchTask>>>,
    provider: Arc<dyn StatementProvider>,
    sender: mpsc::Sender<Result<RawPayload, FetchFailure>>,
    config: ConcurrentFetchConfig,
) {
    loop {
        let Some(task) = queue.lock().await.pop_front() else {
            break; // No more work
        };

        let outcome = fetch_with_retry(provider.as_ref(), &task, &config).await;
        match &outcome {
            Ok(payload) => info!(
                "✅ Worker {}: {} {} ({} rows)",
                worker_id,
                task.symbol,
                task.statement_type,
                payload.table.rows.len()
            ),
            Err(failure) => error!("❌ Worker {}: {}", worker_id, failure),
        }

        if sender.send(outcome).await.is_err() {
            break; // Collector is gone
        }
    }
}

/// Fetch a single pair with retry logic for transient failures
async fn fetch_with_retry(
    provider: &dyn StatementProvider,
    task: &FetchTask,
    config: &ConcurrentFetchConfig,
) -> Result<RawPayload, FetchFailure> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match provider.fetch_statement(&task.symbol, task.statement_type).await {
            Ok(payload) => return Ok(payload),
            Err(e) if e.is_transient() && attempts < config.max_attempts => {
                let delay = config.backoff.delay(attempts - 1);
                warn!(
                    "Attempt {} failed for {} {}: {}. Retrying in {:?}...",
                    attempts, task.symbol, task.statement_type, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(cause) => {
                return Err(FetchFailure {
                    symbol: task.symbol.clone(),
                    statement_type: task.statement_type,
                    attempts,
                    cause,
                })
            }
        }
    }
}
