use crate::annotator::HandleError;
use crate::domain::RecordId;
use crate::store::StoreError;
use thiserror::Error;

/// Conditions that stop the round loop. Per-record annotator failures never
/// reach this level; they are recorded as `Failed` outcomes.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("result store unavailable: {0}")]
    ResultStoreUnavailable(#[from] StoreError),
    #[error("{} shard(s) could not obtain an annotator in round {round}: {}", .failures.len(), first_reason(.failures))]
    ShardAllocation {
        round: u32,
        failures: Vec<HandleError>,
    },
    #[error("worker for shard {shard} panicked in round {round}: {message}")]
    WorkerPanicked {
        round: u32,
        shard: usize,
        message: String,
    },
    #[error("duplicate record id in input: {0}")]
    DuplicateRecordId(RecordId),
}

fn first_reason(failures: &[HandleError]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}
