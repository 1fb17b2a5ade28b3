//! Active-state configuration and history records.
//!
//! Both stores are keyed strictly by `DocumentId` so their contents can be
//! captured into a checkpoint and reloaded against a fresh graph built
//! from the same document. Access is single-threaded by design (one
//! logical flow per session), so there is no locking.

use scir_document::{Document, DocumentId};
use std::collections::{BTreeMap, BTreeSet};

/// The set of currently active nodes. A `BTreeSet` over `DocumentId`
/// makes iteration order document order for free.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    active: BTreeSet<DocumentId>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: DocumentId) {
        self.active.insert(id);
    }

    pub fn remove(&mut self, id: DocumentId) {
        self.active.remove(&id);
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.active.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Active nodes in document order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = DocumentId> + '_ {
        self.active.iter().copied()
    }

    pub fn snapshot(&self) -> Vec<DocumentId> {
        self.active.iter().copied().collect()
    }

    pub fn restore(&mut self, ids: Vec<DocumentId>) {
        self.active = ids.into_iter().collect();
    }

    /// Verifies the closure invariants: every active node's proper
    /// ancestors are active, every active parallel has all child states
    /// active, every active compound has exactly one active child state.
    ///
    /// Only meaningful at stable points; mid-microstep the set is
    /// transiently open.
    pub fn validate(&self, doc: &Document) -> Result<(), String> {
        for id in self.iter() {
            let node = doc.node(id);
            if !node.is_state() {
                return Err(format!("{} is not a state", id));
            }
            if let Some(parent) = node.parent {
                if !doc.node(parent).is_root() && !self.contains(parent) {
                    return Err(format!("{} is active but its parent {} is not", id, parent));
                }
            }

            if node.is_parallel() {
                for child in doc.child_states(id) {
                    if !self.contains(child) {
                        return Err(format!(
                            "parallel {} is active but its child {} is not",
                            id, child
                        ));
                    }
                }
            } else if node.is_compound() {
                let active_children = doc.child_states(id).filter(|&c| self.contains(c)).count();
                if active_children != 1 {
                    return Err(format!(
                        "compound {} has {} active children, expected exactly 1",
                        id, active_children
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Recorded history: history pseudostate id to the sibling/descendant
/// nodes that were active when its region was last exited.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    records: BTreeMap<DocumentId, Vec<DocumentId>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the record for a history pseudostate. Called once per
    /// exit of the containing region.
    pub fn record(&mut self, history: DocumentId, active: Vec<DocumentId>) {
        self.records.insert(history, active);
    }

    /// The recorded set, or `None` if the region was never exited.
    pub fn lookup(&self, history: DocumentId) -> Option<&[DocumentId]> {
        self.records.get(&history).map(|v| v.as_slice())
    }

    pub fn snapshot(&self) -> Vec<(DocumentId, Vec<DocumentId>)> {
        self.records
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    pub fn restore(&mut self, records: Vec<(DocumentId, Vec<DocumentId>)>) {
        self.records = records.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_json(&json!({
            "initial": "p",
            "states": [
                {"kind": "parallel", "id": "p", "states": [
                    {"kind": "state", "id": "left", "initial": "l1", "states": [
                        {"kind": "state", "id": "l1"},
                        {"kind": "state", "id": "l2"}
                    ]},
                    {"kind": "state", "id": "right", "initial": "r1", "states": [
                        {"kind": "state", "id": "r1"}
                    ]}
                ]}
            ]
        }))
        .unwrap()
    }

    fn full_config(doc: &Document) -> Configuration {
        let mut c = Configuration::new();
        for name in ["p", "left", "l1", "right", "r1"] {
            c.insert(doc.resolve(name).unwrap());
        }
        c
    }

    #[test]
    fn test_iteration_is_document_order() {
        let doc = doc();
        let c = full_config(&doc);
        let ids: Vec<_> = c.iter().collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_validate_accepts_closed_configuration() {
        let doc = doc();
        assert!(full_config(&doc).validate(&doc).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_ancestor() {
        let doc = doc();
        let mut c = full_config(&doc);
        c.remove(doc.resolve("left").unwrap());
        let err = c.validate(&doc).unwrap_err();
        assert!(err.contains("parent"));
    }

    #[test]
    fn test_validate_rejects_missing_parallel_child() {
        let doc = doc();
        let mut c = full_config(&doc);
        c.remove(doc.resolve("right").unwrap());
        c.remove(doc.resolve("r1").unwrap());
        let err = c.validate(&doc).unwrap_err();
        assert!(err.contains("parallel"));
    }

    #[test]
    fn test_validate_rejects_two_active_children() {
        let doc = doc();
        let mut c = full_config(&doc);
        c.insert(doc.resolve("l2").unwrap());
        let err = c.validate(&doc).unwrap_err();
        assert!(err.contains("expected exactly 1"));
    }

    #[test]
    fn test_history_roundtrip() {
        let doc = doc();
        let mut h = HistoryStore::new();
        let hist_id = DocumentId(40);
        let active = vec![doc.resolve("l2").unwrap()];

        assert!(h.lookup(hist_id).is_none());
        h.record(hist_id, active.clone());
        assert_eq!(h.lookup(hist_id).unwrap(), active.as_slice());

        // Re-recording overwrites.
        h.record(hist_id, vec![]);
        assert!(h.lookup(hist_id).unwrap().is_empty());

        let mut restored = HistoryStore::new();
        restored.restore(h.snapshot());
        assert!(restored.lookup(hist_id).unwrap().is_empty());
    }
}
