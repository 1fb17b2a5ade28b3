//! Executable content and declarations attached to nodes.

use serde::{Deserialize, Serialize};

/// A single executable action, run during entry, exit, or a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Enqueue an internal event.
    Raise { event: String },

    /// Send an event through the external-communication capability.
    /// No target (or `"#_internal"`) routes to the internal queue.
    Send {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Expression evaluated into the event payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },

    /// Assign the value of `expr` to a data-model location.
    Assign { location: String, expr: String },

    /// Evaluate `expr` and hand the result to the logger/observer.
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<String>,
    },

    /// Run a script through the evaluator capability.
    Script { src: String },

    /// Cancel a previously sent event by its send-id.
    Cancel { send_id: String },
}

/// A data-model declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDecl {
    /// Field name in the data model.
    pub id: String,

    /// Initializer expression; `null` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

/// An invoke declaration owned by a state node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InvokeDecl {
    /// Service type understood by the communication capability.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub invoke_type: Option<String>,

    /// Source URI of the invoked service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,

    /// Explicit invoke id; generated as `<owner-id>.<sequence>` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Forward every external event to the running invocation.
    #[serde(default)]
    pub autoforward: bool,

    /// Parameters evaluated into the invocation payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// A named parameter expression for an invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub expr: String,
}
