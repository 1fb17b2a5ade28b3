//! Session data model.
//!
//! A JSON object with dotted-path access. System fields (`_sessionid`,
//! `_name`, `_event`) live alongside chart data; expressions read them
//! through the same paths.

use crate::event::Event;
use serde_json::{Map, Value};

/// Mutable per-session data store.
#[derive(Debug, Clone, Default)]
pub struct DataModel {
    values: Map<String, Value>,
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the platform system fields. Called once at initialization.
    pub fn set_system(&mut self, session_id: &str, name: Option<&str>) {
        self.values
            .insert("_sessionid".to_string(), Value::String(session_id.to_string()));
        if let Some(name) = name {
            self.values
                .insert("_name".to_string(), Value::String(name.to_string()));
        }
    }

    /// Binds `_event` for the event currently being processed.
    pub fn set_event(&mut self, event: &Event) {
        self.values.insert("_event".to_string(), event.as_value());
    }

    /// Declares (or redeclares) a top-level field.
    pub fn declare(&mut self, id: &str, value: Value) {
        self.values.insert(id.to_string(), value);
    }

    /// Reads a dotted path; missing segments yield `Null`.
    pub fn get(&self, path: &str) -> Value {
        let mut parts = path.split('.');
        let Some(first) = parts.next() else {
            return Value::Null;
        };
        let Some(mut current) = self.values.get(first) else {
            return Value::Null;
        };
        for part in parts {
            match current {
                Value::Object(map) => match map.get(part) {
                    Some(v) => current = v,
                    None => return Value::Null,
                },
                _ => return Value::Null,
            }
        }
        current.clone()
    }

    /// Writes a dotted path, creating intermediate objects. Writing
    /// through a non-object value is a location error.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), String> {
        let mut parts = path.split('.').peekable();
        let Some(first) = parts.next() else {
            return Err("empty location".to_string());
        };
        if first.is_empty() {
            return Err(format!("invalid location '{}'", path));
        }

        if parts.peek().is_none() {
            self.values.insert(first.to_string(), value);
            return Ok(());
        }

        let mut current = self
            .values
            .entry(first.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        while let Some(part) = parts.next() {
            let map = match current {
                Value::Object(map) => map,
                _ => return Err(format!("location '{}' passes through a non-object", path)),
            };
            if parts.peek().is_none() {
                map.insert(part.to_string(), value);
                return Ok(());
            }
            current = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        unreachable!("loop returns on the last segment")
    }

    /// Merges a JSON object of host-supplied fields over the current
    /// values. Non-object input is ignored.
    pub fn merge(&mut self, data: Value) {
        if let Value::Object(map) = data {
            for (k, v) in map {
                self.values.insert(k, v);
            }
        }
    }

    /// The full data model as a JSON object.
    pub fn export(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn restore(&mut self, data: Value) {
        self.values = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
    }
}
