//! # scir-checkpoint
//!
//! Checkpoint bucket tree for scir.
//!
//! This crate provides:
//! - The tree-shaped snapshot of engine call-frame completion state
//! - A journal that records frames on first execution and replays them
//!   on resume, returning captured values instead of re-running bodies
//! - Version and document-checksum verification at resume

pub mod bucket;
pub mod error;

pub use bucket::{
    Bucket, CheckpointTree, FrameEntry, FrameKey, FrameKind, Journal, SlotState,
    CHECKPOINT_VERSION,
};
pub use error::CheckpointError;
