//! # Error taxonomy
//!
//! The engine distinguishes expected flow outcomes (a reply timed out, a
//! wait was superseded by another input path) from genuine failures. The
//! listener is the last line of defense: expected outcomes are logged at
//! debug level, everything else as an error.

use thiserror::Error;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    /// No reply arrived within the configured timeout. Expected and
    /// recoverable; the per-listener timeout callback has already run.
    #[error("promise-timeout")]
    Timeout,

    /// A pending wait was explicitly discarded, e.g. a button click made an
    /// in-flight free-text wait moot. Carries the discard reason.
    #[error("promise-discarded: {0}")]
    Discarded(String),

    /// A poll found no request record where one was expected. Indicates the
    /// record was deleted externally or a store-level anomaly.
    #[error("request data not found")]
    RequestNotFound,

    /// The state store failed.
    #[error("store error: {0}")]
    Store(anyhow::Error),

    /// The chat transport failed to deliver.
    #[error("transport error: {0}")]
    Transport(anyhow::Error),

    /// A step function returned an error of its own.
    #[error("step error: {0}")]
    Step(anyhow::Error),
}

impl FlowError {
    /// Expected end-of-flow outcomes that the listener must not log as
    /// unhandled errors.
    pub fn is_expected(&self) -> bool {
        matches!(self, FlowError::Timeout | FlowError::Discarded(_))
    }

    /// Classifies an error coming out of a step function. Steps return
    /// `anyhow::Result`, so an engine error propagated with `?` arrives
    /// wrapped; unwrap it instead of burying the sentinel.
    pub fn from_step(err: anyhow::Error) -> Self {
        match err.downcast::<FlowError>() {
            Ok(flow_err) => flow_err,
            Err(other) => FlowError::Step(other),
        }
    }
}
