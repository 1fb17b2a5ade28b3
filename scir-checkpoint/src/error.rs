//! Checkpoint error types.

use crate::bucket::FrameKey;
use thiserror::Error;

/// Errors from the checkpoint journal. All of these are consistency
/// faults: the engine treats them as fatal, never as chart-visible events.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("frame key mismatch: recorded {recorded}, attempted {attempted}")]
    FrameMismatch {
        recorded: FrameKey,
        attempted: FrameKey,
    },

    #[error("frame {key} was recorded as still executing")]
    IncompleteFrame { key: FrameKey },

    #[error("no open frame to exit (attempted {key})")]
    NoOpenFrame { key: FrameKey },

    #[error("checkpoint was taken against a different document: recorded checksum {recorded}, actual {actual}")]
    DocumentMismatch { recorded: String, actual: String },

    #[error("unsupported checkpoint version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}
