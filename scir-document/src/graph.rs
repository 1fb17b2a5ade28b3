//! The immutable document graph and its read-only queries.

use crate::builder;
use crate::error::DocumentError;
use crate::node::{DocumentId, Node, Transition, TransitionId};
use crate::raw::RawDocument;
use std::collections::HashMap;

/// An immutable statechart document, built once and shared read-only
/// across sessions (`Arc<Document>`).
#[derive(Debug)]
pub struct Document {
    pub(crate) name: Option<String>,
    pub(crate) script: Option<String>,
    pub(crate) script_src: Option<String>,
    /// Arena indexed by `DocumentId`; index 0 is the root.
    pub(crate) nodes: Vec<Node>,
    pub(crate) transitions: Vec<Transition>,
    /// Explicit-id lookup.
    pub(crate) ids: HashMap<String, DocumentId>,
    /// crc32c over the canonical raw serialization.
    pub(crate) checksum: String,
}

impl Document {
    /// Builds and validates a document from the parsed tree.
    ///
    /// Structural defects are collected and reported as a batch in
    /// [`DocumentError::Invalid`].
    pub fn from_raw(raw: &RawDocument) -> Result<Self, DocumentError> {
        builder::build(raw)
    }

    /// Convenience: deserialize the raw tree from JSON, then build.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, DocumentError> {
        let raw: RawDocument = serde_json::from_value(json.clone())?;
        Self::from_raw(&raw)
    }

    /// Chart name, if the document declared one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Inline global script.
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// Global script URI for the resource loader.
    pub fn script_src(&self) -> Option<&str> {
        self.script_src.as_deref()
    }

    /// Checksum of the source definition; recorded in checkpoints so a
    /// resume against a different document fails fast.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Looks up a node by arena id. Ids are only ever produced by this
    /// document, so an out-of-range id is an engine bug and panics.
    pub fn node(&self, id: DocumentId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Checked node lookup, for ids read back from persisted state.
    pub fn get_node(&self, id: DocumentId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.index()]
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// All nodes in document order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Resolves an explicit node id to its arena id.
    pub fn resolve(&self, id: &str) -> Option<DocumentId> {
        self.ids.get(id).copied()
    }

    /// The node's explicit id, or a stable generated name.
    pub fn effective_id(&self, id: DocumentId) -> String {
        match &self.node(id).id {
            Some(explicit) => explicit.clone(),
            None => format!("__state{}", id.0),
        }
    }

    /// Proper ancestors of `id`, nearest first, ending at the root.
    pub fn proper_ancestors(&self, id: DocumentId) -> impl Iterator<Item = DocumentId> + '_ {
        std::iter::successors(self.node(id).parent, move |&p| self.node(p).parent)
    }

    /// Returns true if `node` is a proper descendant of `ancestor`.
    pub fn is_descendant(&self, node: DocumentId, ancestor: DocumentId) -> bool {
        self.proper_ancestors(node).any(|a| a == ancestor)
    }

    /// Child nodes that are proper states (pseudostates filtered out).
    pub fn child_states(&self, id: DocumentId) -> impl Iterator<Item = DocumentId> + '_ {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(move |&c| self.node(c).is_state())
    }

    /// History pseudostate children of a node.
    pub fn history_children(&self, id: DocumentId) -> impl Iterator<Item = DocumentId> + '_ {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(move |&c| matches!(self.node(c).kind, crate::node::NodeKind::History { .. }))
    }

    /// The least common compound ancestor of a set of nodes: the closest
    /// proper ancestor of all of them that is compound or the root.
    pub fn least_common_compound_ancestor(&self, ids: &[DocumentId]) -> DocumentId {
        let Some(&head) = ids.first() else {
            return DocumentId(0);
        };

        for anc in self.proper_ancestors(head) {
            let node = self.node(anc);
            if !(node.is_compound() || node.is_root()) {
                continue;
            }
            if ids[1..].iter().all(|&s| self.is_descendant(s, anc)) {
                return anc;
            }
        }
        DocumentId(0)
    }
}
