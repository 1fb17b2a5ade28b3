//! Document graph construction and structural validation.
//!
//! Builds the node/transition arenas from the raw tree in a single
//! pre-order walk, then resolves transition targets and validates
//! structure. Defects are collected and reported as one batch so a host
//! sees every problem in a definition at once, not one per attempt.

use crate::descriptor::EventDescriptor;
use crate::error::{Defect, DocumentError};
use crate::graph::Document;
use crate::node::{DocumentId, Node, NodeKind, Transition, TransitionId, TransitionKind};
use crate::raw::{RawDocument, RawNode, RawTransition, RawTransitionKind};
use std::collections::HashMap;

pub(crate) fn build(raw: &RawDocument) -> Result<Document, DocumentError> {
    let mut builder = Builder::default();
    builder.walk_root(raw);
    builder.resolve_targets();
    builder.finish_nodes(raw);

    if !builder.defects.is_empty() {
        return Err(DocumentError::Invalid {
            defects: builder.defects,
        });
    }

    let canonical = serde_json::to_vec(raw)?;
    let checksum = format!("{:08x}", crc32c::crc32c(&canonical));

    tracing::debug!(
        nodes = builder.nodes.len(),
        transitions = builder.transitions.len(),
        checksum = %checksum,
        "document graph built"
    );

    Ok(Document {
        name: raw.name.clone(),
        script: raw.script.clone(),
        script_src: raw.script_src.clone(),
        nodes: builder.nodes,
        transitions: builder.transitions,
        ids: builder.ids,
        checksum,
    })
}

#[derive(Default)]
struct Builder {
    nodes: Vec<Node>,
    transitions: Vec<Transition>,
    ids: HashMap<String, DocumentId>,
    defects: Vec<Defect>,
    /// Unresolved target names, fixed up after the walk.
    pending: Vec<(TransitionId, Vec<String>)>,
    /// `initial="..."` attributes, applied once targets resolve.
    initial_attrs: HashMap<DocumentId, Vec<String>>,
}

impl Builder {
    fn defect(&mut self, node: Option<DocumentId>, reason: impl Into<String>) {
        self.defects.push(Defect {
            node,
            reason: reason.into(),
        });
    }

    // =========================================================================
    // Pre-order walk
    // =========================================================================

    fn walk_root(&mut self, raw: &RawDocument) {
        self.nodes.push(Node {
            document_id: DocumentId(0),
            id: None,
            parent: None,
            depth: 0,
            children: Vec::new(),
            transitions: Vec::new(),
            on_entry: Vec::new(),
            on_exit: Vec::new(),
            invokes: Vec::new(),
            data: raw.data.clone(),
            // Placeholder; the real initial transition is synthesized in
            // finish_nodes once targets are resolvable.
            kind: NodeKind::Root {
                initial: TransitionId(u32::MAX),
            },
        });

        for child in &raw.states {
            let cid = self.walk(child, DocumentId(0), 1);
            self.nodes[0].children.push(cid);
        }
    }

    fn walk(&mut self, raw: &RawNode, parent: DocumentId, depth: u32) -> DocumentId {
        let id = DocumentId(self.nodes.len() as u32);

        match raw {
            RawNode::State {
                id: name,
                initial,
                data,
                on_entry,
                on_exit,
                transitions,
                invoke,
                states,
            } => {
                self.push_node(Node {
                    document_id: id,
                    id: name.clone(),
                    parent: Some(parent),
                    depth,
                    children: Vec::new(),
                    transitions: Vec::new(),
                    on_entry: on_entry.clone(),
                    on_exit: on_exit.clone(),
                    invokes: invoke.clone(),
                    data: data.clone(),
                    kind: NodeKind::State { initial: None },
                });
                if !initial.is_empty() {
                    self.initial_attrs.insert(id, initial.clone());
                }
                for t in transitions {
                    let tid = self.add_transition(id, t);
                    self.nodes[id.index()].transitions.push(tid);
                }
                for child in states {
                    let cid = self.walk(child, id, depth + 1);
                    self.nodes[id.index()].children.push(cid);
                }
            }

            RawNode::Parallel {
                id: name,
                data,
                on_entry,
                on_exit,
                transitions,
                invoke,
                states,
            } => {
                self.push_node(Node {
                    document_id: id,
                    id: name.clone(),
                    parent: Some(parent),
                    depth,
                    children: Vec::new(),
                    transitions: Vec::new(),
                    on_entry: on_entry.clone(),
                    on_exit: on_exit.clone(),
                    invokes: invoke.clone(),
                    data: data.clone(),
                    kind: NodeKind::Parallel,
                });
                for t in transitions {
                    let tid = self.add_transition(id, t);
                    self.nodes[id.index()].transitions.push(tid);
                }
                for child in states {
                    let cid = self.walk(child, id, depth + 1);
                    self.nodes[id.index()].children.push(cid);
                }
            }

            RawNode::Final {
                id: name,
                on_entry,
                on_exit,
            } => {
                self.push_node(Node {
                    document_id: id,
                    id: name.clone(),
                    parent: Some(parent),
                    depth,
                    children: Vec::new(),
                    transitions: Vec::new(),
                    on_entry: on_entry.clone(),
                    on_exit: on_exit.clone(),
                    invokes: Vec::new(),
                    data: Vec::new(),
                    kind: NodeKind::Final,
                });
            }

            RawNode::History {
                id: name,
                deep,
                transition,
            } => {
                self.push_node(Node {
                    document_id: id,
                    id: name.clone(),
                    parent: Some(parent),
                    depth,
                    children: Vec::new(),
                    transitions: Vec::new(),
                    on_entry: Vec::new(),
                    on_exit: Vec::new(),
                    invokes: Vec::new(),
                    data: Vec::new(),
                    kind: NodeKind::History {
                        deep: *deep,
                        default: TransitionId(u32::MAX),
                    },
                });
                self.check_default_transition(id, transition, "history default transition");
                let tid = self.add_transition(id, transition);
                self.nodes[id.index()].kind = NodeKind::History {
                    deep: *deep,
                    default: tid,
                };
            }

            RawNode::Initial { transition } => {
                self.push_node(Node {
                    document_id: id,
                    id: None,
                    parent: Some(parent),
                    depth,
                    children: Vec::new(),
                    transitions: Vec::new(),
                    on_entry: Vec::new(),
                    on_exit: Vec::new(),
                    invokes: Vec::new(),
                    data: Vec::new(),
                    kind: NodeKind::Initial {
                        transition: TransitionId(u32::MAX),
                    },
                });
                self.check_default_transition(id, transition, "initial transition");
                let tid = self.add_transition(id, transition);
                self.nodes[id.index()].kind = NodeKind::Initial { transition: tid };
            }
        }

        id
    }

    fn push_node(&mut self, node: Node) {
        let id = node.document_id;
        if let Some(name) = node.id.clone() {
            if self.ids.contains_key(&name) {
                self.defect(Some(id), format!("duplicate id '{}'", name));
            } else {
                self.ids.insert(name, id);
            }
        }
        self.nodes.push(node);
    }

    fn add_transition(&mut self, source: DocumentId, raw: &RawTransition) -> TransitionId {
        let tid = TransitionId(self.transitions.len() as u32);
        self.transitions.push(Transition {
            id: tid,
            source,
            events: raw.event.iter().map(EventDescriptor::new).collect(),
            cond: raw.cond.clone(),
            targets: Vec::new(),
            kind: match raw.kind {
                RawTransitionKind::External => TransitionKind::External,
                RawTransitionKind::Internal => TransitionKind::Internal,
            },
            actions: raw.actions.clone(),
        });
        if !raw.target.is_empty() {
            self.pending.push((tid, raw.target.clone()));
        }
        tid
    }

    /// Default (history/initial) transitions must be eventless,
    /// unconditional, and targeted.
    fn check_default_transition(&mut self, node: DocumentId, raw: &RawTransition, what: &str) {
        if !raw.event.is_empty() {
            self.defect(Some(node), format!("{} must not name events", what));
        }
        if raw.cond.is_some() {
            self.defect(Some(node), format!("{} must not have a condition", what));
        }
        if raw.target.is_empty() {
            self.defect(Some(node), format!("{} must have a target", what));
        }
    }

    // =========================================================================
    // Target resolution
    // =========================================================================

    fn resolve_targets(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (tid, names) in pending {
            let mut targets = Vec::with_capacity(names.len());
            for name in &names {
                match self.ids.get(name) {
                    Some(&target) => targets.push(target),
                    None => {
                        let source = self.transitions[tid.index()].source;
                        self.defect(Some(source), format!("unresolved target '{}'", name));
                    }
                }
            }
            self.transitions[tid.index()].targets = targets;
        }
    }

    // =========================================================================
    // Synthesis and structural validation
    // =========================================================================

    fn finish_nodes(&mut self, raw: &RawDocument) {
        self.finish_root(raw);

        for index in 1..self.nodes.len() {
            let id = DocumentId(index as u32);
            match self.nodes[index].kind.clone() {
                NodeKind::State { .. } => self.finish_state(id),
                NodeKind::Parallel => self.finish_parallel(id),
                NodeKind::History { deep, default } => self.finish_history(id, deep, default),
                NodeKind::Initial { transition } => self.finish_initial(id, transition),
                NodeKind::Final | NodeKind::Root { .. } => {}
            }
        }
    }

    fn finish_root(&mut self, raw: &RawDocument) {
        let targets = if raw.initial.is_empty() {
            match self.child_states(DocumentId(0)).first().copied() {
                Some(first) => vec![first],
                None => {
                    self.defect(None, "document has no states");
                    return;
                }
            }
        } else {
            let mut targets = Vec::new();
            for name in &raw.initial {
                match self.ids.get(name).copied() {
                    Some(t) if self.enterable(t) => targets.push(t),
                    Some(_) => {
                        self.defect(None, format!("initial target '{}' is not a state", name))
                    }
                    None => self.defect(None, format!("unresolved initial target '{}'", name)),
                }
            }
            if targets.is_empty() {
                return;
            }
            targets
        };

        let tid = self.synthesize_transition(DocumentId(0), targets);
        self.nodes[0].kind = NodeKind::Root { initial: tid };
    }

    fn finish_state(&mut self, id: DocumentId) {
        let child_states = self.child_states(id);
        let initial_children: Vec<DocumentId> = self.nodes[id.index()]
            .children
            .iter()
            .copied()
            .filter(|&c| matches!(self.nodes[c.index()].kind, NodeKind::Initial { .. }))
            .collect();
        let attr = self.initial_attrs.remove(&id);

        if child_states.is_empty() {
            // Atomic state.
            if attr.is_some() {
                self.defect(Some(id), "initial attribute on atomic state");
            }
            if !initial_children.is_empty() {
                self.defect(Some(id), "initial child on atomic state");
            }
            return;
        }

        if initial_children.len() > 1 {
            self.defect(Some(id), "more than one initial child");
        }

        let initial = match (initial_children.first(), attr) {
            (Some(&pseudo), Some(_)) => {
                self.defect(Some(id), "both initial attribute and initial child");
                self.initial_of_pseudostate(pseudo)
            }
            (Some(&pseudo), None) => self.initial_of_pseudostate(pseudo),
            (None, Some(names)) => {
                let mut targets = Vec::new();
                for name in &names {
                    match self.ids.get(name).copied() {
                        Some(t) if self.is_proper_descendant(t, id) && self.enterable(t) => {
                            targets.push(t)
                        }
                        Some(_) => self.defect(
                            Some(id),
                            format!("initial target '{}' is not a descendant state", name),
                        ),
                        None => {
                            self.defect(Some(id), format!("unresolved initial target '{}'", name))
                        }
                    }
                }
                if targets.is_empty() {
                    return;
                }
                Some(self.synthesize_transition(id, targets))
            }
            (None, None) => Some(self.synthesize_transition(id, vec![child_states[0]])),
        };

        self.nodes[id.index()].kind = NodeKind::State { initial };
    }

    fn initial_of_pseudostate(&mut self, pseudo: DocumentId) -> Option<TransitionId> {
        match self.nodes[pseudo.index()].kind {
            NodeKind::Initial { transition } => Some(transition),
            _ => None,
        }
    }

    fn finish_parallel(&mut self, id: DocumentId) {
        let child_states = self.child_states(id);
        if child_states.is_empty() {
            self.defect(Some(id), "parallel state has no child states");
        }
        for &child in &child_states {
            if matches!(self.nodes[child.index()].kind, NodeKind::Final) {
                self.defect(Some(id), "final state cannot be a child of parallel");
            }
        }
        let has_initial_child = self.nodes[id.index()]
            .children
            .iter()
            .any(|&c| matches!(self.nodes[c.index()].kind, NodeKind::Initial { .. }));
        if has_initial_child {
            self.defect(Some(id), "initial child on parallel state");
        }
    }

    fn finish_history(&mut self, id: DocumentId, deep: bool, default: TransitionId) {
        let Some(parent) = self.nodes[id.index()].parent else {
            return;
        };
        let targets = self.transitions[default.index()].targets.clone();
        for target in targets {
            let ok = if deep {
                self.is_proper_descendant(target, parent)
            } else {
                self.nodes[target.index()].parent == Some(parent)
            };
            if !ok {
                let kind = if deep { "descendant" } else { "child" };
                self.defect(
                    Some(id),
                    format!("history default target must be a {} of the parent state", kind),
                );
            }
        }
    }

    fn finish_initial(&mut self, id: DocumentId, transition: TransitionId) {
        let Some(parent) = self.nodes[id.index()].parent else {
            return;
        };
        let targets = self.transitions[transition.index()].targets.clone();
        for target in targets {
            if !self.is_proper_descendant(target, parent) {
                self.defect(
                    Some(id),
                    "initial transition target must be a descendant of the parent state",
                );
            }
        }
    }

    fn synthesize_transition(&mut self, source: DocumentId, targets: Vec<DocumentId>) -> TransitionId {
        let tid = TransitionId(self.transitions.len() as u32);
        self.transitions.push(Transition {
            id: tid,
            source,
            events: Vec::new(),
            cond: None,
            targets,
            kind: TransitionKind::External,
            actions: Vec::new(),
        });
        tid
    }

    // =========================================================================
    // Local queries (the Document accessors are not built yet)
    // =========================================================================

    fn child_states(&self, id: DocumentId) -> Vec<DocumentId> {
        self.nodes[id.index()]
            .children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c.index()].is_state())
            .collect()
    }

    /// States and history pseudostates can be entered via a transition.
    fn enterable(&self, id: DocumentId) -> bool {
        let node = &self.nodes[id.index()];
        node.is_state() || matches!(node.kind, NodeKind::History { .. })
    }

    fn is_proper_descendant(&self, node: DocumentId, ancestor: DocumentId) -> bool {
        let mut current = self.nodes[node.index()].parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.nodes[p.index()].parent;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::error::DocumentError;
    use crate::graph::Document;
    use crate::node::NodeKind;
    use serde_json::json;

    fn defects(result: Result<Document, DocumentError>) -> Vec<String> {
        match result {
            Err(DocumentError::Invalid { defects }) => {
                defects.into_iter().map(|d| d.reason).collect()
            }
            Err(other) => panic!("expected validation failure, got {}", other),
            Ok(_) => panic!("expected validation failure, got a document"),
        }
    }

    #[test]
    fn test_minimal_document() {
        let doc = Document::from_json(&json!({
            "states": [{"kind": "state", "id": "only"}]
        }))
        .unwrap();

        // Root initial synthesized to the first (only) child state.
        let initial = doc.root().initial_transition().unwrap();
        assert_eq!(
            doc.transition(initial).targets,
            vec![doc.resolve("only").unwrap()]
        );
    }

    #[test]
    fn test_compound_default_initial_is_first_child() {
        let doc = Document::from_json(&json!({
            "states": [
                {"kind": "state", "id": "c", "states": [
                    {"kind": "state", "id": "first"},
                    {"kind": "state", "id": "second"}
                ]}
            ]
        }))
        .unwrap();

        let c = doc.resolve("c").unwrap();
        let initial = doc.node(c).initial_transition().unwrap();
        assert_eq!(
            doc.transition(initial).targets,
            vec![doc.resolve("first").unwrap()]
        );
    }

    #[test]
    fn test_explicit_initial_attribute() {
        let doc = Document::from_json(&json!({
            "states": [
                {"kind": "state", "id": "c", "initial": "second", "states": [
                    {"kind": "state", "id": "first"},
                    {"kind": "state", "id": "second"}
                ]}
            ]
        }))
        .unwrap();

        let c = doc.resolve("c").unwrap();
        let initial = doc.node(c).initial_transition().unwrap();
        assert_eq!(
            doc.transition(initial).targets,
            vec![doc.resolve("second").unwrap()]
        );
    }

    #[test]
    fn test_initial_pseudostate_child() {
        let doc = Document::from_json(&json!({
            "states": [
                {"kind": "state", "id": "c", "states": [
                    {"kind": "initial", "transition": {"target": "second", "actions": [
                        {"action": "raise", "event": "entered.default"}
                    ]}},
                    {"kind": "state", "id": "first"},
                    {"kind": "state", "id": "second"}
                ]}
            ]
        }))
        .unwrap();

        let c = doc.resolve("c").unwrap();
        let initial = doc.node(c).initial_transition().unwrap();
        let t = doc.transition(initial);
        assert_eq!(t.targets, vec![doc.resolve("second").unwrap()]);
        assert_eq!(t.actions.len(), 1);
    }

    #[test]
    fn test_defects_are_batched() {
        let reasons = defects(Document::from_json(&json!({
            "states": [
                {"kind": "state", "id": "dup"},
                {"kind": "state", "id": "dup", "transitions": [
                    {"event": "go", "target": "missing"}
                ]},
                {"kind": "parallel", "id": "empty_par"}
            ]
        })));

        assert_eq!(reasons.len(), 3);
        assert!(reasons.iter().any(|r| r.contains("duplicate id 'dup'")));
        assert!(reasons.iter().any(|r| r.contains("unresolved target 'missing'")));
        assert!(reasons.iter().any(|r| r.contains("parallel state has no child states")));
    }

    #[test]
    fn test_history_requires_target() {
        let reasons = defects(Document::from_json(&json!({
            "states": [
                {"kind": "state", "id": "c", "states": [
                    {"kind": "history", "id": "h", "transition": {}},
                    {"kind": "state", "id": "a"}
                ]}
            ]
        })));

        assert!(reasons.iter().any(|r| r.contains("must have a target")));
    }

    #[test]
    fn test_shallow_history_target_must_be_child() {
        let reasons = defects(Document::from_json(&json!({
            "states": [
                {"kind": "state", "id": "c", "states": [
                    {"kind": "history", "id": "h", "transition": {"target": "leaf"}},
                    {"kind": "state", "id": "a", "states": [
                        {"kind": "state", "id": "leaf"}
                    ]}
                ]}
            ]
        })));

        assert!(reasons
            .iter()
            .any(|r| r.contains("must be a child of the parent state")));
    }

    #[test]
    fn test_deep_history_accepts_descendant() {
        let doc = Document::from_json(&json!({
            "states": [
                {"kind": "state", "id": "c", "states": [
                    {"kind": "history", "id": "h", "deep": true,
                     "transition": {"target": "leaf"}},
                    {"kind": "state", "id": "a", "states": [
                        {"kind": "state", "id": "leaf"}
                    ]}
                ]}
            ]
        }))
        .unwrap();

        let h = doc.resolve("h").unwrap();
        match doc.node(h).kind {
            NodeKind::History { deep, default } => {
                assert!(deep);
                assert_eq!(doc.transition(default).targets, vec![doc.resolve("leaf").unwrap()]);
            }
            _ => panic!("expected history node"),
        }
    }

    #[test]
    fn test_initial_on_atomic_state_rejected() {
        let reasons = defects(Document::from_json(&json!({
            "states": [
                {"kind": "state", "id": "a", "initial": "a"}
            ]
        })));

        assert!(reasons.iter().any(|r| r.contains("initial attribute on atomic state")));
    }

    #[test]
    fn test_initial_attr_must_target_descendant() {
        let reasons = defects(Document::from_json(&json!({
            "states": [
                {"kind": "state", "id": "c", "initial": "elsewhere", "states": [
                    {"kind": "state", "id": "inside"}
                ]},
                {"kind": "state", "id": "elsewhere"}
            ]
        })));

        assert!(reasons
            .iter()
            .any(|r| r.contains("is not a descendant state")));
    }

    #[test]
    fn test_empty_document_rejected() {
        let reasons = defects(Document::from_json(&json!({})));
        assert!(reasons.iter().any(|r| r.contains("document has no states")));
    }

    #[test]
    fn test_final_child_of_parallel_rejected() {
        let reasons = defects(Document::from_json(&json!({
            "states": [
                {"kind": "parallel", "id": "p", "states": [
                    {"kind": "state", "id": "region"},
                    {"kind": "final", "id": "f"}
                ]}
            ]
        })));

        assert!(reasons
            .iter()
            .any(|r| r.contains("final state cannot be a child of parallel")));
    }

    #[test]
    fn test_transition_ids_in_document_order() {
        let doc = Document::from_json(&json!({
            "initial": "a",
            "states": [
                {"kind": "state", "id": "a", "transitions": [
                    {"event": "one", "target": "b"},
                    {"event": "two", "target": "b"}
                ]},
                {"kind": "state", "id": "b", "transitions": [
                    {"event": "three", "target": "a"}
                ]}
            ]
        }))
        .unwrap();

        let a = doc.resolve("a").unwrap();
        let b = doc.resolve("b").unwrap();
        let a_ts = &doc.node(a).transitions;
        let b_ts = &doc.node(b).transitions;

        assert!(a_ts[0] < a_ts[1]);
        assert!(a_ts[1] < b_ts[0]);
    }
}
