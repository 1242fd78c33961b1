use super::{RecordId, ScoreSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed {
        reason: String,
        /// Set when the annotator rejected the text itself; such ids are not retried.
        permanent: bool,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, Outcome::Failed { permanent: true, .. })
    }
}

/// One line of an output partition: the terminal result of one record's attempt sequence.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnnotationOutcome {
    pub id: RecordId,
    pub scores: ScoreSet,
    pub outcome: Outcome,
    pub round: u32,
    pub shard: usize,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl AnnotationOutcome {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}
