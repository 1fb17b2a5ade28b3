//! Event descriptor matching.
//!
//! A descriptor matches an event name when its dot-separated tokens are a
//! prefix of the event's tokens: `error` and `error.*` both match
//! `error.execution`; `*` matches every event. Trailing `.*` and `.` are
//! normalized away at construction.

use serde::{Deserialize, Serialize};

/// A glob-style event descriptor attached to a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventDescriptor(String);

impl EventDescriptor {
    /// Creates a descriptor, normalizing a trailing `.*` or `.` suffix.
    pub fn new(pattern: impl Into<String>) -> Self {
        let mut pattern: String = pattern.into();
        if let Some(stripped) = pattern.strip_suffix(".*") {
            pattern = stripped.to_string();
        }
        if let Some(stripped) = pattern.strip_suffix('.') {
            pattern = stripped.to_string();
        }
        Self(pattern)
    }

    /// Returns the normalized pattern.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this descriptor matches the given event name.
    pub fn matches(&self, name: &str) -> bool {
        if self.0 == "*" {
            return true;
        }
        if self.0.is_empty() {
            return false;
        }

        let mut event_tokens = name.split('.');
        for token in self.0.split('.') {
            match event_tokens.next() {
                Some(t) if t == token => {}
                _ => return false,
            }
        }
        true
    }
}

impl std::fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn token() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,5}"
    }

    proptest! {
        #[test]
        fn descriptor_always_matches_itself(tokens in prop::collection::vec(token(), 1..4)) {
            let name = tokens.join(".");
            prop_assert!(EventDescriptor::new(name.clone()).matches(&name));
        }

        #[test]
        fn prefix_descriptor_matches_extension(
            tokens in prop::collection::vec(token(), 1..4),
            suffix in token(),
        ) {
            let prefix = tokens.join(".");
            let name = format!("{}.{}", prefix, suffix);
            prop_assert!(EventDescriptor::new(prefix.clone()).matches(&name));
            prop_assert!(
                EventDescriptor::new(format!("{}.*", prefix)).matches(&name),
                "prefix wildcard descriptor should match extension"
            );
        }
    }
}
