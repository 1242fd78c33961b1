mod outcome;
mod record;
mod scores;

pub use outcome::{AnnotationOutcome, Outcome};
pub use record::{Record, RecordId};
pub use scores::{CategorySchema, ScoreSet, UNAVAILABLE_SCORE};
