//! Engine state capture for checkpoint frames.

use crate::event::Event;
use crate::invoke::InvokeInstance;
use scir_document::DocumentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Complete mutable engine state at a frame boundary. Everything is keyed
/// by `DocumentId`, never by in-memory identity, so a snapshot taken in
/// one process restores cleanly against a fresh graph built from the same
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Active configuration in document order.
    pub configuration: Vec<DocumentId>,

    /// Recorded history per history pseudostate.
    pub history: Vec<(DocumentId, Vec<DocumentId>)>,

    /// Full data model, system fields included.
    pub data_model: Value,

    /// Internal events still queued at the frame boundary.
    pub internal_events: Vec<Event>,

    /// States entered during the frame whose invokes have not started yet.
    pub states_to_invoke: Vec<DocumentId>,

    /// Running invocations.
    pub invokes: Vec<InvokeInstance>,

    /// Per-owner invoke sequence counters.
    pub invoke_counters: Vec<(DocumentId, u32)>,

    /// False once a top-level final state was reached.
    pub running: bool,
}
