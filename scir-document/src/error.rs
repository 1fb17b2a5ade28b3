//! Document error types.

use crate::node::DocumentId;
use thiserror::Error;

/// A single structural defect found while building the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    /// The offending node, when one can be named.
    pub node: Option<DocumentId>,
    pub reason: String,
}

impl std::fmt::Display for Defect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.node {
            Some(id) => write!(f, "{}: {}", id, self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Errors from document construction.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Structural validation failed; all defects are reported together.
    #[error("invalid document: {}", format_defects(.defects))]
    Invalid { defects: Vec<Defect> },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_defects(defects: &[Defect]) -> String {
    defects
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
