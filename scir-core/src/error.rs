//! Engine error types.
//!
//! Only infrastructure faults live here. Expression and communication
//! failures are never Rust errors: they become `error.execution` /
//! `error.communication` events the chart can react to.

use scir_checkpoint::CheckpointError;
use thiserror::Error;

/// Fatal engine faults. Any of these aborts the session; none are ever
/// visible to the running chart.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("inconsistent configuration: {reason}")]
    InconsistentConfiguration { reason: String },

    #[error("engine invariant violated: {reason}")]
    Inconsistent { reason: String },

    #[error("no stable configuration after {limit} microsteps; the document contains an eventless or self-feeding event loop")]
    EventlessLoop { limit: usize },

    #[error("session completed before the suspend request was observed")]
    CompletedBeforeSuspend,

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The session's external queue is gone; the event could not be posted.
#[derive(Debug, Error)]
#[error("session is no longer receiving events")]
pub struct SessionClosed;
