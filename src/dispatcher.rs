//! Fan-out/fan-in over one round's input.
//!
//! Each shard gets its own worker task, annotator handle and partition. The
//! only synchronization is the final join: `run` returns once every worker
//! task has finished, whether it completed, was cancelled, failed to start or
//! panicked.

use crate::annotator::{AnnotatorFactory, HandleError};
use crate::domain::{CategorySchema, Record};
use crate::reliability::RetryPolicy;
use crate::sharder::{Shard, shard};
use crate::store::{ResultStore, StoreError};
use crate::worker::{Worker, WorkerContext, WorkerReport, WorkerState};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Maximum number of workers running at once.
    pub workers: usize,
    /// Number of shards the round's input is split into.
    pub shards: usize,
    pub policy: RetryPolicy,
    pub pacing: Duration,
    pub schema: CategorySchema,
}

/// A shard that produced no (or only some) outcomes because its worker could not run.
#[derive(Error, Debug)]
pub enum ShardFailure {
    #[error(transparent)]
    Allocation(#[from] HandleError),
    #[error("shard {shard} could not persist outcomes: {error}")]
    Store {
        shard: usize,
        #[source]
        error: StoreError,
    },
    #[error("worker for shard {shard} panicked: {message}")]
    Panicked { shard: usize, message: String },
}

impl ShardFailure {
    pub fn shard(&self) -> usize {
        match self {
            ShardFailure::Allocation(e) => e.shard,
            ShardFailure::Store { shard, .. } | ShardFailure::Panicked { shard, .. } => *shard,
        }
    }
}

#[derive(Debug)]
pub struct DispatchReport {
    pub round: u32,
    pub records: usize,
    pub workers: Vec<WorkerReport>,
    pub failures: Vec<ShardFailure>,
    pub cancelled: bool,
}

impl DispatchReport {
    fn empty(round: u32) -> Self {
        Self {
            round,
            records: 0,
            workers: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.workers.iter().map(|w| w.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.workers.iter().map(|w| w.failed).sum()
    }

    pub fn outcomes(&self) -> usize {
        self.workers.iter().map(WorkerReport::outcomes).sum()
    }

    /// Every shard ran to `Done`.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self.failures.is_empty()
            && self.workers.iter().all(|w| w.state == WorkerState::Done)
    }
}

pub struct Dispatcher<F> {
    factory: Arc<F>,
    store: ResultStore,
    settings: DispatchSettings,
}

impl<F> Dispatcher<F>
where
    F: AnnotatorFactory + 'static,
{
    pub fn new(factory: Arc<F>, store: ResultStore, settings: DispatchSettings) -> Self {
        Self {
            factory,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Annotate `records` as round `round`, blocking until every worker has finished.
    #[instrument(skip_all, fields(round = round))]
    pub async fn run(
        &self,
        records: Vec<Record>,
        round: u32,
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let mut report = DispatchReport::empty(round);
        report.records = records.len();

        let shards = shard(records, self.settings.shards);
        info!(
            "Dispatching {} records across {} shards ({} concurrent workers)",
            report.records,
            shards.len(),
            self.settings.workers
        );

        let permits = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let context = WorkerContext {
            round,
            policy: self.settings.policy.clone(),
            pacing: self.settings.pacing,
            schema: self.settings.schema.clone(),
            cancel: cancel.clone(),
        };

        let mut handles = Vec::with_capacity(shards.len());
        for shard in shards {
            let index = shard.index;
            let task = run_shard(
                shard,
                self.factory.clone(),
                self.store.clone(),
                context.clone(),
                permits.clone(),
            );
            handles.push((index, tokio::spawn(task)));
        }

        for (index, handle) in handles {
            match handle.await {
                Ok(Ok(worker)) => report.workers.push(worker),
                Ok(Err(failure)) => {
                    error!("Shard {} failed: {}", index, failure);
                    report.failures.push(failure);
                }
                Err(join_error) => {
                    error!("Worker task for shard {} died: {}", index, join_error);
                    report.failures.push(ShardFailure::Panicked {
                        shard: index,
                        message: join_error.to_string(),
                    });
                }
            }
        }

        // A signal that lands after every worker finished does not cancel the round.
        report.cancelled = report
            .workers
            .iter()
            .any(|w| w.state == WorkerState::Cancelled);
        info!(
            "Round {} barrier reached: {} succeeded, {} failed, {} shard failures{}",
            round,
            report.succeeded(),
            report.failed(),
            report.failures.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }
}

async fn run_shard<F>(
    shard: Shard,
    factory: Arc<F>,
    store: ResultStore,
    context: WorkerContext,
    permits: Arc<Semaphore>,
) -> Result<WorkerReport, ShardFailure>
where
    F: AnnotatorFactory + 'static,
{
    // The semaphore is never closed, so acquisition only fails if it is dropped.
    let _permit = permits.acquire_owned().await.ok();

    let index = shard.index;
    if context.cancel.is_cancelled() {
        return Ok(WorkerReport {
            shard: index,
            assigned: shard.len(),
            succeeded: 0,
            failed: 0,
            permanent_failures: 0,
            attempts: 0,
            state: WorkerState::Cancelled,
        });
    }

    let annotator = factory.create(index)?;
    let partition = store
        .create_partition(context.round, index)
        .await
        .map_err(|error| ShardFailure::Store {
            shard: index,
            error,
        })?;

    Worker::new(shard, annotator, partition, context)
        .run()
        .await
        .map_err(|error| ShardFailure::Store {
            shard: index,
            error,
        })
}
