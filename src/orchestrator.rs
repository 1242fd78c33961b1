//! Round loop: dispatch the current subset, reconcile the whole store, and
//! re-feed whatever is still missing until nothing retryable remains, the
//! round budget runs out, or the run is cancelled.
//!
//! The Result Store is the only carrier of progress between rounds, so a
//! restarted run converges on the same state.

use crate::annotator::AnnotatorFactory;
use crate::dispatcher::{DispatchReport, Dispatcher, ShardFailure};
use crate::domain::{Record, RecordId};
use crate::error::PipelineError;
use crate::reconciler::{Reconciliation, Reconciler};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Nothing retryable remains. Permanently rejected ids may still be missing.
    Converged,
    /// The round budget ran out with retryable ids left.
    BudgetExhausted,
    /// Stopped on request. The missing set may be over-estimated; resuming is safe.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    pub round: u32,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub missing_after: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub rounds: Vec<RoundSummary>,
    pub total: usize,
    pub succeeded: usize,
    /// Ids without a Success that another round could still fix.
    pub unresolved: BTreeSet<RecordId>,
    /// Ids the annotator rejected permanently.
    pub permanently_failed: BTreeSet<RecordId>,
}

impl PipelineReport {
    fn new(status: PipelineStatus, rounds: Vec<RoundSummary>, state: Reconciliation) -> Self {
        let unresolved = state.retry_ids();
        Self {
            status,
            rounds,
            total: state.total,
            succeeded: state.succeeded,
            unresolved,
            permanently_failed: state.permanently_failed,
        }
    }

    /// Every id without a Success outcome.
    pub fn missing(&self) -> BTreeSet<RecordId> {
        self.unresolved
            .union(&self.permanently_failed)
            .cloned()
            .collect()
    }

    /// Every input id has at least one Success outcome.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty() && self.permanently_failed.is_empty()
    }
}

pub struct Orchestrator<F> {
    dispatcher: Dispatcher<F>,
    reconciler: Reconciler,
    max_rounds: Option<u32>,
    resume: bool,
}

impl<F> Orchestrator<F>
where
    F: AnnotatorFactory + 'static,
{
    /// `max_rounds = None` keeps going until convergence.
    pub fn new(dispatcher: Dispatcher<F>, max_rounds: Option<u32>) -> Self {
        let reconciler = Reconciler::new(dispatcher.store().clone());
        Self {
            dispatcher,
            reconciler,
            max_rounds,
            resume: false,
        }
    }

    /// Start from the store's current MissingSet instead of the full input.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub async fn run(
        &self,
        records: Vec<Record>,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, PipelineError> {
        let all_ids = unique_ids(&records)?;
        let mut rounds = Vec::new();

        let (mut subset, mut state) = if self.resume {
            let state = self.reconciler.reconcile(&all_ids).await?;
            info!(
                "Resuming: {} of {} records still need annotation",
                state.retry_ids().len(),
                all_ids.len()
            );
            (materialize(&records, &state.retry_ids()), Some(state))
        } else {
            (records.clone(), None)
        };

        let mut round: u32 = 0;
        let status = loop {
            if subset.is_empty() {
                break PipelineStatus::Converged;
            }
            if cancel.is_cancelled() {
                break PipelineStatus::Cancelled;
            }
            if self.max_rounds.is_some_and(|max| round >= max) {
                break PipelineStatus::BudgetExhausted;
            }

            let dispatched = subset.len();
            let report = self.dispatcher.run(subset, round, cancel).await;
            check_failures(round, &report.failures)?;
            let report = surface_store_failure(report)?;

            let reconciled = self.reconciler.reconcile(&all_ids).await?;
            rounds.push(RoundSummary {
                round,
                dispatched,
                succeeded: report.succeeded(),
                failed: report.failed(),
                missing_after: reconciled.missing.len(),
            });

            if report.cancelled {
                state = Some(reconciled);
                break PipelineStatus::Cancelled;
            }

            subset = materialize(&records, &reconciled.retry_ids());
            state = Some(reconciled);
            round += 1;
        };

        let state = match state {
            Some(state) => state,
            None => self.reconciler.reconcile(&all_ids).await?,
        };
        let report = PipelineReport::new(status, rounds, state);

        match report.status {
            PipelineStatus::Converged if report.is_complete() => {
                info!(
                    "All {} records annotated after {} round(s)",
                    report.total,
                    report.rounds.len()
                );
            }
            PipelineStatus::Converged => warn!(
                "Finished with {} permanently rejected records",
                report.permanently_failed.len()
            ),
            PipelineStatus::BudgetExhausted => warn!(
                "Round budget exhausted with {} records unresolved and {} permanently rejected",
                report.unresolved.len(),
                report.permanently_failed.len()
            ),
            PipelineStatus::Cancelled => warn!(
                "Cancelled with {} records without a success; rerun with resume to continue",
                report.missing().len()
            ),
        }

        Ok(report)
    }
}

fn unique_ids(records: &[Record]) -> Result<BTreeSet<RecordId>, PipelineError> {
    let mut ids = BTreeSet::new();
    for record in records {
        if !ids.insert(record.id.clone()) {
            return Err(PipelineError::DuplicateRecordId(record.id.clone()));
        }
    }
    Ok(ids)
}

/// Records whose id is in `ids`, in original input order.
pub fn materialize(records: &[Record], ids: &BTreeSet<RecordId>) -> Vec<Record> {
    records
        .iter()
        .filter(|record| ids.contains(&record.id))
        .cloned()
        .collect()
}

/// Allocation failures and panics stop the run before reconciliation.
fn check_failures(round: u32, failures: &[ShardFailure]) -> Result<(), PipelineError> {
    let mut allocation = Vec::new();
    for failure in failures {
        match failure {
            ShardFailure::Allocation(e) => allocation.push(e.clone()),
            ShardFailure::Panicked { shard, message } => {
                return Err(PipelineError::WorkerPanicked {
                    round,
                    shard: *shard,
                    message: message.clone(),
                });
            }
            ShardFailure::Store { .. } => {}
        }
    }

    if allocation.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::ShardAllocation {
            round,
            failures: allocation,
        })
    }
}

fn surface_store_failure(mut report: DispatchReport) -> Result<DispatchReport, PipelineError> {
    let position = report
        .failures
        .iter()
        .position(|f| matches!(f, ShardFailure::Store { .. }));

    match position.map(|index| report.failures.swap_remove(index)) {
        Some(ShardFailure::Store { error, .. }) => {
            Err(PipelineError::ResultStoreUnavailable(error))
        }
        _ => Ok(report),
    }
}
