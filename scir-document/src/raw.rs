//! Raw parsed-tree types.
//!
//! This is the contract with the parsed-document provider: any front end
//! that can produce these types (an XML reader, a JSON/YAML loader, a
//! programmatic builder) can feed [`Document::from_raw`]. The JSON shape:
//!
//! ```json
//! {
//!   "name": "traffic-light",
//!   "initial": "red",
//!   "states": [
//!     {"kind": "state", "id": "red", "transitions": [
//!       {"event": "tick", "target": "green"}
//!     ]},
//!     {"kind": "state", "id": "green", "transitions": [
//!       {"event": "tick", "target": "red"}
//!     ]}
//!   ]
//! }
//! ```
//!
//! `event`, `target`, and `initial` accept either a single string or an
//! array of strings.
//!
//! [`Document::from_raw`]: crate::Document::from_raw

use crate::action::{Action, DataDecl, InvokeDecl};
use serde::{Deserialize, Serialize};

/// Raw statechart document as supplied by the parsed-document provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    /// Optional chart name, exposed to expressions as `_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Initial target id(s) of the root. Defaults to the first child state.
    #[serde(default, deserialize_with = "string_or_seq")]
    pub initial: Vec<String>,

    /// Inline global script, run once after the initial entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    /// URI of the global script, resolved through the resource loader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_src: Option<String>,

    /// Root data-model declarations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataDecl>,

    /// Top-level nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<RawNode>,
}

/// A raw node in the parsed tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawNode {
    /// A state; compound when `states` contains child states, atomic otherwise.
    State {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Initial child id(s); mutually exclusive with an `initial` child node.
        #[serde(default, deserialize_with = "string_or_seq")]
        initial: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        data: Vec<DataDecl>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        on_entry: Vec<Action>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        on_exit: Vec<Action>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        transitions: Vec<RawTransition>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        invoke: Vec<InvokeDecl>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        states: Vec<RawNode>,
    },

    /// A parallel region; all child states are active together.
    Parallel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        data: Vec<DataDecl>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        on_entry: Vec<Action>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        on_exit: Vec<Action>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        transitions: Vec<RawTransition>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        invoke: Vec<InvokeDecl>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        states: Vec<RawNode>,
    },

    /// A final state.
    Final {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        on_entry: Vec<Action>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        on_exit: Vec<Action>,
    },

    /// A history pseudostate with its default transition.
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        deep: bool,
        transition: RawTransition,
    },

    /// An initial pseudostate carrying the default entry transition.
    Initial { transition: RawTransition },
}

/// A raw transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransition {
    /// Event descriptors; empty means eventless.
    #[serde(default, deserialize_with = "string_or_seq")]
    pub event: Vec<String>,

    /// Optional condition expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cond: Option<String>,

    /// Target id(s); empty means the transition is targetless.
    #[serde(default, deserialize_with = "string_or_seq")]
    pub target: Vec<String>,

    /// External (default) or internal.
    #[serde(default, rename = "type")]
    pub kind: RawTransitionKind,

    /// Executable content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

/// Transition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawTransitionKind {
    #[default]
    External,
    Internal,
}

fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct StringOrSeqVisitor;

    impl<'de> Visitor<'de> for StringOrSeqVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or array of strings")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                out.push(s);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_any(StringOrSeqVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_string_target() {
        let t: RawTransition = serde_json::from_value(serde_json::json!({
            "event": "go",
            "target": "b"
        }))
        .unwrap();

        assert_eq!(t.event, vec!["go"]);
        assert_eq!(t.target, vec!["b"]);
        assert_eq!(t.kind, RawTransitionKind::External);
    }

    #[test]
    fn test_array_targets() {
        let t: RawTransition = serde_json::from_value(serde_json::json!({
            "event": ["go", "jump.*"],
            "target": ["left", "right"],
            "type": "internal"
        }))
        .unwrap();

        assert_eq!(t.event.len(), 2);
        assert_eq!(t.target, vec!["left", "right"]);
        assert_eq!(t.kind, RawTransitionKind::Internal);
    }

    #[test]
    fn test_eventless_transition_defaults() {
        let t: RawTransition = serde_json::from_value(serde_json::json!({
            "target": "done"
        }))
        .unwrap();

        assert!(t.event.is_empty());
        assert!(t.cond.is_none());
        assert!(t.actions.is_empty());
    }

    #[test]
    fn test_node_kind_tags() {
        let n: RawNode = serde_json::from_value(serde_json::json!({
            "kind": "history",
            "id": "h",
            "deep": true,
            "transition": {"target": "fallback"}
        }))
        .unwrap();

        match n {
            RawNode::History { deep, transition, .. } => {
                assert!(deep);
                assert_eq!(transition.target, vec!["fallback"]);
            }
            _ => panic!("expected history node"),
        }
    }

    #[test]
    fn test_document_roundtrip() {
        let doc = RawDocument {
            name: Some("demo".to_string()),
            initial: vec!["a".to_string()],
            states: vec![RawNode::State {
                id: Some("a".to_string()),
                initial: Vec::new(),
                data: Vec::new(),
                on_entry: Vec::new(),
                on_exit: Vec::new(),
                transitions: Vec::new(),
                invoke: Vec::new(),
                states: Vec::new(),
            }],
            ..Default::default()
        };

        let json = serde_json::to_value(&doc).unwrap();
        let back: RawDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back.name.as_deref(), Some("demo"));
        assert_eq!(back.states.len(), 1);
    }
}
