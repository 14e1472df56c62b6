//! One job per security, run in parallel on the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::engine::log::ActionLog;
use crate::engine::types::EngineError;
use crate::persist::{LogStore, PersistError};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("job panicked: {0}")]
    Panicked(String),
}

#[derive(Debug)]
pub struct BatchReport<T> {
    pub completed: BTreeMap<String, T>,
    /// Symbols whose data could not be loaded, with the reason.
    pub skipped: BTreeMap<String, String>,
    pub failed: BTreeMap<String, JobError>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            completed: BTreeMap::new(),
            skipped: BTreeMap::new(),
            failed: BTreeMap::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }
}

/// Load every symbol's log from `store` and run `job` over it.
///
/// Symbols are independent: an unavailable log is skipped and any other
/// failure is reported for that symbol alone.
#[instrument(skip_all, fields(symbols = symbols.len()))]
pub async fn run_per_symbol<S, T, F>(store: Arc<S>, symbols: Vec<String>, job: F) -> BatchReport<T>
where
    S: LogStore + 'static,
    T: Send + 'static,
    F: Fn(&str, ActionLog) -> Result<T, EngineError> + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let mut tasks = JoinSet::new();

    for symbol in symbols {
        let store = Arc::clone(&store);
        let job = Arc::clone(&job);
        tasks.spawn(async move {
            // a panic while loading must still be reported against the symbol
            let result = match tokio::spawn(run_one(store, symbol.clone(), job)).await {
                Ok(result) => result,
                Err(err) => Err(JobError::Panicked(err.to_string())),
            };
            (symbol, result)
        });
    }

    let mut report = BatchReport::default();
    while let Some(joined) = tasks.join_next().await {
        let (symbol, result) = match joined {
            Ok(done) => done,
            Err(err) => {
                error!(error = %err, "batch task aborted");
                continue;
            }
        };
        match result {
            Ok(value) => {
                report.completed.insert(symbol, value);
            }
            Err(JobError::Persist(err)) if err.is_data_unavailable() => {
                warn!(%symbol, error = %err, "skipping symbol");
                metrics::counter!("lobtraj_symbols_skipped_total").increment(1);
                report.skipped.insert(symbol, err.to_string());
            }
            Err(err) => {
                error!(%symbol, error = %err, "symbol failed");
                report.failed.insert(symbol, err);
            }
        }
    }

    info!(
        completed = report.completed.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "batch finished"
    );
    report
}

async fn run_one<S, T, F>(store: Arc<S>, symbol: String, job: Arc<F>) -> Result<T, JobError>
where
    S: LogStore + 'static,
    T: Send + 'static,
    F: Fn(&str, ActionLog) -> Result<T, EngineError> + Send + Sync + 'static,
{
    let log = store.load_actions(&symbol).await?;
    let value = tokio::task::spawn_blocking(move || (*job)(&symbol, log))
        .await
        .map_err(|e| JobError::Panicked(e.to_string()))??;
    Ok(value)
}
