//! Computes which input ids still lack a Success outcome.
//!
//! Deduplication is part of the contract: an id is done as soon as at least
//! one Success exists anywhere in the store, regardless of how many `Failed`
//! or duplicate Success lines share its id.

use crate::domain::{AnnotationOutcome, RecordId};
use crate::store::{ResultStore, StoreError};
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub total: usize,
    pub succeeded: usize,
    /// Ids with no Success outcome at all.
    pub missing: BTreeSet<RecordId>,
    /// Members of `missing` the annotator rejected permanently. Never retried.
    pub permanently_failed: BTreeSet<RecordId>,
    /// Success outcomes beyond the first for the same id.
    pub duplicate_successes: usize,
    /// Outcomes whose id is not part of the input set.
    pub unknown_outcomes: usize,
}

impl Reconciliation {
    /// Ids worth feeding into another round.
    pub fn retry_ids(&self) -> BTreeSet<RecordId> {
        self.missing
            .difference(&self.permanently_failed)
            .cloned()
            .collect()
    }

    /// Nothing left that another round could fix.
    pub fn is_converged(&self) -> bool {
        self.missing.len() == self.permanently_failed.len()
    }
}

/// Pure reconciliation of `outcomes` against the input id set.
pub fn reconcile_outcomes<'a, I>(all_ids: &BTreeSet<RecordId>, outcomes: I) -> Reconciliation
where
    I: IntoIterator<Item = &'a AnnotationOutcome>,
{
    let mut succeeded: BTreeSet<&RecordId> = BTreeSet::new();
    let mut rejected: BTreeSet<&RecordId> = BTreeSet::new();
    let mut duplicate_successes = 0;
    let mut unknown_outcomes = 0;

    for outcome in outcomes {
        if !all_ids.contains(&outcome.id) {
            unknown_outcomes += 1;
            continue;
        }
        if outcome.is_success() {
            if !succeeded.insert(&outcome.id) {
                duplicate_successes += 1;
            }
        } else if outcome.outcome.is_permanent_failure() {
            rejected.insert(&outcome.id);
        }
    }

    let missing: BTreeSet<RecordId> = all_ids
        .iter()
        .filter(|id| !succeeded.contains(id))
        .cloned()
        .collect();
    let permanently_failed = missing
        .iter()
        .filter(|id| rejected.contains(id))
        .cloned()
        .collect();

    Reconciliation {
        total: all_ids.len(),
        succeeded: succeeded.len(),
        missing,
        permanently_failed,
        duplicate_successes,
        unknown_outcomes,
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    store: ResultStore,
}

impl Reconciler {
    pub fn new(store: ResultStore) -> Self {
        Self { store }
    }

    /// Read the whole store and reconcile it. Never mutates the store.
    ///
    /// An unreadable partition is an error, not an empty partition.
    pub async fn reconcile(
        &self,
        all_ids: &BTreeSet<RecordId>,
    ) -> Result<Reconciliation, StoreError> {
        let outcomes = self.store.load_outcomes().await?;
        let reconciliation = reconcile_outcomes(all_ids, &outcomes);

        if reconciliation.unknown_outcomes > 0 {
            debug!(
                "Ignored {} outcomes for ids outside the input set",
                reconciliation.unknown_outcomes
            );
        }
        info!(
            "Reconciled {} outcomes: {}/{} ids succeeded, {} missing ({} permanently rejected)",
            outcomes.len(),
            reconciliation.succeeded,
            reconciliation.total,
            reconciliation.missing.len(),
            reconciliation.permanently_failed.len()
        );
        Ok(reconciliation)
    }

    /// Input ids with no Success outcome in the store.
    pub async fn missing(
        &self,
        all_ids: &BTreeSet<RecordId>,
    ) -> Result<BTreeSet<RecordId>, StoreError> {
        Ok(self.reconcile(all_ids).await?.missing)
    }
}
