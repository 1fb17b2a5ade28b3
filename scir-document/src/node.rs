//! Document graph node and transition types.
//!
//! Nodes live in a flat arena indexed by [`DocumentId`], assigned in a
//! fixed pre-order walk of the parsed tree. The id is the sole key used by
//! history records, checkpoint captures, and target resolution; it never
//! changes after the graph is built.

use crate::action::{Action, DataDecl, InvokeDecl};
use crate::descriptor::EventDescriptor;
use serde::{Deserialize, Serialize};

/// Stable arena index of a node, in document (pre-order) order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(pub u32);

impl DocumentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable arena index of a transition, in document order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TransitionId(pub u32);

impl TransitionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t#{}", self.0)
    }
}

/// Transition type: external transitions exit their source; internal
/// transitions whose targets stay inside a compound source do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    External,
    Internal,
}

/// A transition between states.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Arena index, in document order.
    pub id: TransitionId,

    /// The node this transition belongs to.
    pub source: DocumentId,

    /// Event descriptors; empty means eventless.
    pub events: Vec<EventDescriptor>,

    /// Optional condition, evaluated by the evaluator capability.
    pub cond: Option<String>,

    /// Resolved target nodes; empty means targetless.
    pub targets: Vec<DocumentId>,

    pub kind: TransitionKind,

    /// Executable content run between exit and entry.
    pub actions: Vec<Action>,
}

impl Transition {
    /// Returns true if this transition has no event descriptors.
    pub fn is_eventless(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns true if any descriptor matches the event name.
    pub fn matches_event(&self, name: &str) -> bool {
        self.events.iter().any(|d| d.matches(name))
    }
}

/// Closed set of node variants. Entry/exit/selection logic pattern-matches
/// on this, so adding a variant is a compile-time sweep of the engine.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// The document root. Always carries an initial transition.
    Root { initial: TransitionId },

    /// A state. `initial` is `Some` exactly when the state is compound.
    State { initial: Option<TransitionId> },

    /// A parallel region: all child states active together.
    Parallel,

    /// A final state.
    Final,

    /// A history pseudostate with its default transition.
    History { deep: bool, default: TransitionId },

    /// An initial pseudostate holding the default entry transition.
    Initial { transition: TransitionId },
}

/// A node in the document graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub document_id: DocumentId,

    /// Explicit id from the source document, if any.
    pub id: Option<String>,

    /// Parent node; `None` only for the root.
    pub parent: Option<DocumentId>,

    /// Number of proper ancestors.
    pub depth: u32,

    /// All children in document order, pseudostates included.
    pub children: Vec<DocumentId>,

    /// Transitions declared on this node, in document order.
    pub transitions: Vec<TransitionId>,

    pub on_entry: Vec<Action>,
    pub on_exit: Vec<Action>,

    /// Invoke declarations owned by this node.
    pub invokes: Vec<InvokeDecl>,

    /// Data-model declarations owned by this node.
    pub data: Vec<DataDecl>,

    pub kind: NodeKind,
}

impl Node {
    /// Returns true for proper states: compound, atomic, parallel, final.
    pub fn is_state(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::State { .. } | NodeKind::Parallel | NodeKind::Final
        )
    }

    /// Returns true for history and initial pseudostates.
    pub fn is_pseudostate(&self) -> bool {
        matches!(self.kind, NodeKind::History { .. } | NodeKind::Initial { .. })
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Root { .. })
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, NodeKind::Final)
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.kind, NodeKind::Parallel)
    }

    /// A compound state has child states and an initial transition.
    pub fn is_compound(&self) -> bool {
        matches!(self.kind, NodeKind::State { initial: Some(_) })
    }

    /// Atomic states are leaves of the active configuration.
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, NodeKind::State { initial: None } | NodeKind::Final)
    }

    /// The initial transition for root and compound states.
    pub fn initial_transition(&self) -> Option<TransitionId> {
        match self.kind {
            NodeKind::Root { initial } => Some(initial),
            NodeKind::State { initial } => initial,
            _ => None,
        }
    }
}
