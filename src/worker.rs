//! One worker per shard: submits records strictly in shard order, drives the
//! per-record retry state machine, and appends every terminal outcome to its
//! own partition before moving on.

use crate::annotator::{Annotator, AnnotatorError};
use crate::domain::{AnnotationOutcome, CategorySchema, Outcome, Record};
use crate::reliability::{AttemptState, Pacer, RetryPolicy};
use crate::sharder::Shard;
use crate::store::{PartitionWriter, StoreError};
use chrono::Utc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    /// Every record in the shard produced an outcome.
    Done,
    /// Stopped early on cancellation; later records have no outcome.
    Cancelled,
}

/// Settings shared by every worker of a round.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub round: u32,
    pub policy: RetryPolicy,
    pub pacing: Duration,
    pub schema: CategorySchema,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub shard: usize,
    pub assigned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub permanent_failures: usize,
    pub attempts: u64,
    pub state: WorkerState,
}

impl WorkerReport {
    fn new(shard: usize, assigned: usize) -> Self {
        Self {
            shard,
            assigned,
            succeeded: 0,
            failed: 0,
            permanent_failures: 0,
            attempts: 0,
            state: WorkerState::Idle,
        }
    }

    pub fn outcomes(&self) -> usize {
        self.succeeded + self.failed
    }
}

pub struct Worker<A: Annotator> {
    shard: Shard,
    annotator: A,
    partition: PartitionWriter,
    pacer: Pacer,
    context: WorkerContext,
    state: WorkerState,
}

impl<A: Annotator> Worker<A> {
    pub fn new(
        shard: Shard,
        annotator: A,
        partition: PartitionWriter,
        context: WorkerContext,
    ) -> Self {
        Self {
            shard,
            annotator,
            partition,
            pacer: Pacer::new(context.pacing),
            context,
            state: WorkerState::Idle,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Process the whole shard. Only a failed partition write ends the shard early
    /// with an error; annotator failures become `Failed` outcomes.
    #[instrument(skip_all, fields(round = self.context.round, shard = self.shard.index))]
    pub async fn run(mut self) -> Result<WorkerReport, StoreError> {
        let records = std::mem::take(&mut self.shard.records);
        let mut report = WorkerReport::new(self.shard.index, records.len());

        self.state = WorkerState::Running;
        debug!(
            "Worker started with {} records, writing to {}",
            records.len(),
            self.partition.path().display()
        );

        for record in &records {
            if self.context.cancel.is_cancelled() {
                self.state = WorkerState::Cancelled;
                break;
            }

            let Some(terminal) = self.annotate(record).await else {
                self.state = WorkerState::Cancelled;
                break;
            };

            let outcome = self.to_outcome(record, terminal);
            report.attempts += u64::from(outcome.attempts);
            match &outcome.outcome {
                Outcome::Success => report.succeeded += 1,
                Outcome::Failed { permanent, .. } => {
                    report.failed += 1;
                    if *permanent {
                        report.permanent_failures += 1;
                    }
                }
            }

            self.partition.append(&outcome).await?;
        }

        if self.state == WorkerState::Running {
            self.state = WorkerState::Done;
        }
        report.state = self.state;

        info!(
            "Worker finished ({:?}): {} succeeded, {} failed, {} of {} records, {} lines in {}",
            report.state,
            report.succeeded,
            report.failed,
            report.outcomes(),
            report.assigned,
            self.partition.written(),
            self.partition.path().display()
        );
        Ok(report)
    }

    /// Drive one record to a terminal state, or `None` if cancelled first.
    async fn annotate(&mut self, record: &Record) -> Option<AttemptState> {
        let policy = self.context.policy.clone();
        let mut state = policy.start();

        loop {
            match state {
                AttemptState::Ready { attempt } => {
                    tokio::select! {
                        biased;
                        () = self.context.cancel.cancelled() => return None,
                        () = self.pacer.wait() => {}
                    }

                    let result = match timeout(
                        policy.attempt_timeout,
                        self.annotator.analyze(&record.text),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(AnnotatorError::Transient(format!(
                            "attempt timed out after {:?}",
                            policy.attempt_timeout
                        ))),
                    };
                    let result = result.and_then(|scores| {
                        if scores.covers(&self.context.schema) {
                            Ok(scores)
                        } else {
                            Err(AnnotatorError::Permanent(
                                "scores do not cover every requested category".to_string(),
                            ))
                        }
                    });

                    if let Err(e) = &result {
                        warn!(id = %record.id, attempt, "Annotator attempt failed: {}", e);
                    }
                    state = state.on_result(&policy, result);
                }
                AttemptState::Backoff { attempt, delay, .. } => {
                    debug!(id = %record.id, "Retrying in {:?} (attempt {})", delay, attempt);
                    tokio::select! {
                        biased;
                        () = self.context.cancel.cancelled() => return None,
                        () = sleep(delay) => {}
                    }
                    state = state.resume();
                }
                terminal => return Some(terminal),
            }
        }
    }

    fn to_outcome(&self, record: &Record, terminal: AttemptState) -> AnnotationOutcome {
        let (scores, outcome, attempts) = match terminal {
            AttemptState::Succeeded { attempts, scores } => (scores, Outcome::Success, attempts),
            AttemptState::Exhausted { attempts, error } => {
                let permanent = error.is_permanent();
                if permanent {
                    warn!(id = %record.id, "Record rejected permanently: {}", error);
                } else {
                    error!(
                        id = %record.id,
                        "Record failed after {} attempts: {}", attempts, error
                    );
                }
                (
                    self.context.schema.unavailable(),
                    Outcome::Failed {
                        reason: error.reason().to_string(),
                        permanent,
                    },
                    attempts,
                )
            }
            // annotate() only returns terminal states
            AttemptState::Ready { attempt } | AttemptState::Backoff { attempt, .. } => (
                self.context.schema.unavailable(),
                Outcome::Failed {
                    reason: "attempt sequence did not finish".to_string(),
                    permanent: false,
                },
                attempt,
            ),
        };

        AnnotationOutcome {
            id: record.id.clone(),
            scores,
            outcome,
            round: self.context.round,
            shard: self.shard.index,
            attempts,
            recorded_at: Utc::now(),
        }
    }
}
