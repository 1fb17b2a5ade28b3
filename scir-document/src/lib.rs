//! # scir-document
//!
//! Immutable statechart document graph for scir.
//!
//! This crate provides:
//! - The parsed-tree contract (`RawDocument` and friends, plain serde types)
//! - Graph construction with pre-order `DocumentId` assignment
//! - Transition target resolution and batched structural validation
//! - Read-only traversal and ancestry queries used by the engine

mod builder;

pub mod action;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod node;
pub mod raw;

pub use action::{Action, DataDecl, InvokeDecl, Param};
pub use descriptor::EventDescriptor;
pub use error::{Defect, DocumentError};
pub use graph::Document;
pub use node::{DocumentId, Node, NodeKind, Transition, TransitionId, TransitionKind};
pub use raw::{RawDocument, RawNode, RawTransition, RawTransitionKind};
