pub mod pacing;
pub mod retry;

pub use pacing::Pacer;
pub use retry::{AttemptState, RetryPolicy};
