pub mod http;

pub use http::{HttpAnnotator, HttpAnnotatorConfig, HttpAnnotatorFactory};

use crate::domain::ScoreSet;
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotatorError {
    /// Network, rate-limit or service-side trouble. Worth another attempt.
    #[error("transient annotator error: {0}")]
    Transient(String),
    /// The service rejected the text itself. Retrying cannot help.
    #[error("permanent annotator error: {0}")]
    Permanent(String),
}

impl AnnotatorError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, AnnotatorError::Permanent(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            AnnotatorError::Transient(reason) | AnnotatorError::Permanent(reason) => reason,
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("could not create annotator handle for shard {shard}: {reason}")]
pub struct HandleError {
    pub shard: usize,
    pub reason: String,
}

/// A scoring handle owned by exactly one worker.
///
/// Handles are not assumed to be safe for concurrent use, hence `&mut self`.
pub trait Annotator: Send {
    fn analyze(
        &mut self,
        text: &str,
    ) -> impl Future<Output = Result<ScoreSet, AnnotatorError>> + Send;
}

/// Produces one private [`Annotator`] per shard.
pub trait AnnotatorFactory: Send + Sync {
    type Handle: Annotator + 'static;

    fn create(&self, shard: usize) -> Result<Self::Handle, HandleError>;
}
