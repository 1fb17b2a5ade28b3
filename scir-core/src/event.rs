//! Event types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Raised by the chart itself (`raise`, `done.state.*`).
    Internal,
    /// Posted by the host or an invoked child.
    External,
    /// Raised by the platform (`error.*`).
    Platform,
}

/// An event flowing through the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dot-separated event name, matched against transition descriptors.
    pub name: String,

    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Send-id of the `send` that produced this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_id: Option<String>,

    /// Session id of the sender, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    /// Id of the invocation this event came from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_id: Option<String>,

    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Event {
    pub fn external(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::External,
            send_id: None,
            origin: None,
            invoke_id: None,
            data,
        }
    }

    pub fn internal(name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Internal,
            ..Self::external(name, data)
        }
    }

    fn platform(name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Platform,
            ..Self::external(name, data)
        }
    }

    /// An expression or condition evaluation failed.
    pub fn error_execution(message: impl Into<String>) -> Self {
        Self::platform("error.execution", json!({ "message": message.into() }))
    }

    /// The external-communication capability failed for a send or invoke.
    pub fn error_communication(message: impl Into<String>, send_id: Option<String>) -> Self {
        Self {
            send_id,
            ..Self::platform("error.communication", json!({ "message": message.into() }))
        }
    }

    /// A compound or parallel state reached its final condition.
    pub fn done_state(state_id: &str) -> Self {
        Self::internal(format!("done.state.{}", state_id), Value::Null)
    }

    /// The representation bound to `_event` in the data model.
    pub fn as_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_events_are_platform_events() {
        let e = Event::error_execution("boom");
        assert_eq!(e.name, "error.execution");
        assert_eq!(e.kind, EventKind::Platform);
        assert_eq!(e.data["message"], "boom");

        let e = Event::error_communication("no route", Some("send-1".to_string()));
        assert_eq!(e.name, "error.communication");
        assert_eq!(e.send_id.as_deref(), Some("send-1"));
    }

    #[test]
    fn test_done_state_name() {
        let e = Event::done_state("regions");
        assert_eq!(e.name, "done.state.regions");
        assert_eq!(e.kind, EventKind::Internal);
    }

    #[test]
    fn test_event_value_binding() {
        let e = Event::external("go", json!({"speed": 3}));
        let v = e.as_value();
        assert_eq!(v["name"], "go");
        assert_eq!(v["type"], "external");
        assert_eq!(v["data"]["speed"], 3);
    }
}
