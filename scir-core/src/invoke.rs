//! Invoke lifecycle management.
//!
//! Tracks the external child services owned by active states. Starting
//! delegates the actual spawn to the communication capability; cancelling
//! happens exactly once, when the owning state exits.

use crate::capabilities::{CommError, Communications, InvokeRequest};
use scir_document::{Document, DocumentId, InvokeDecl};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A running invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeInstance {
    /// Invoke id: explicit, or generated as `<owner-id>.<sequence>`.
    pub id: String,

    /// The state node that declared the invoke.
    pub owner: DocumentId,

    /// Whether external events are forwarded to this invocation.
    pub autoforward: bool,
}

/// Registry of running invocations for one session.
#[derive(Debug)]
pub struct InvokeManager {
    session_id: String,
    active: Vec<InvokeInstance>,
    /// Per-owner sequence counters for generated ids.
    counters: HashMap<DocumentId, u32>,
}

impl InvokeManager {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            active: Vec::new(),
            counters: HashMap::new(),
        }
    }

    /// Starts an invocation and registers it. On failure nothing is
    /// registered and the error is returned for the engine to surface as
    /// an `error.communication` event.
    pub fn start(
        &mut self,
        doc: &Document,
        owner: DocumentId,
        decl: &InvokeDecl,
        payload: Value,
        comm: &dyn Communications,
    ) -> Result<String, CommError> {
        let invoke_id = match &decl.id {
            Some(id) => id.clone(),
            None => {
                let seq = self.counters.entry(owner).or_insert(0);
                *seq += 1;
                format!("{}.{}", doc.effective_id(owner), seq)
            }
        };

        comm.start_invoke(&InvokeRequest {
            session_id: &self.session_id,
            invoke_id: &invoke_id,
            invoke_type: decl.invoke_type.as_deref(),
            src: decl.src.as_deref(),
            data: &payload,
        })?;

        tracing::debug!(invoke_id = %invoke_id, owner = %owner, "invoke started");
        self.active.push(InvokeInstance {
            id: invoke_id.clone(),
            owner,
            autoforward: decl.autoforward,
        });
        Ok(invoke_id)
    }

    /// Cancels every invocation owned by an exiting state. Each instance
    /// is cancelled exactly once; failures are returned for the engine to
    /// surface as events.
    pub fn cancel_owned(
        &mut self,
        owner: DocumentId,
        comm: &dyn Communications,
    ) -> Vec<(String, CommError)> {
        let (owned, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.active)
                .into_iter()
                .partition(|i| i.owner == owner);
        self.active = kept;

        let mut failures = Vec::new();
        for instance in owned {
            match comm.cancel_invoke(&self.session_id, &instance.id) {
                Ok(()) => {
                    tracing::debug!(invoke_id = %instance.id, "invoke cancelled");
                }
                Err(err) => failures.push((instance.id, err)),
            }
        }
        failures
    }

    /// Ids of running invocations that requested autoforwarding.
    pub fn autoforward_ids(&self) -> Vec<String> {
        self.active
            .iter()
            .filter(|i| i.autoforward)
            .map(|i| i.id.clone())
            .collect()
    }

    pub fn active(&self) -> &[InvokeInstance] {
        &self.active
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn snapshot(&self) -> (Vec<InvokeInstance>, Vec<(DocumentId, u32)>) {
        let mut counters: Vec<_> = self.counters.iter().map(|(k, v)| (*k, *v)).collect();
        counters.sort();
        (self.active.clone(), counters)
    }

    /// Re-registers instances from a checkpoint. The services themselves
    /// are not re-spawned; reattaching to them is the communication
    /// capability's concern.
    pub fn restore(&mut self, instances: Vec<InvokeInstance>, counters: Vec<(DocumentId, u32)>) {
        self.active = instances;
        self.counters = counters.into_iter().collect();
    }
}
