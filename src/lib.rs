//! # scir
//!
//! An embeddable statechart interpreter: nested and parallel states,
//! guarded transitions, event-driven macrostep/microstep execution,
//! history pseudostates, invoked child services, and call-stack
//! checkpoints for deterministic suspend/resume.
//!
//! The workspace splits into three crates, re-exported here:
//!
//! - [`document`]: the immutable document graph and its builder
//! - [`core`]: queues, selection, the execution engine, the session surface
//! - [`checkpoint`]: the bucket-tree journal behind suspend/resume
//!
//! # Example
//!
//! ```no_run
//! use scir::{Capabilities, Document, Event, Outcome, SessionOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let document = Arc::new(Document::from_json(&serde_json::json!({
//!         "initial": "idle",
//!         "states": [
//!             {"kind": "state", "id": "idle", "transitions": [
//!                 {"event": "start", "target": "working"}
//!             ]},
//!             {"kind": "state", "id": "working", "transitions": [
//!                 {"event": "done", "target": "finished"}
//!             ]},
//!             {"kind": "final", "id": "finished"}
//!         ]
//!     }))?);
//!
//!     let handle = scir::start(
//!         document,
//!         Capabilities::default(),
//!         serde_json::Value::Null,
//!         SessionOptions::default(),
//!     );
//!     handle.post_external_event(Event::external("start", serde_json::Value::Null))?;
//!     handle.post_external_event(Event::external("done", serde_json::Value::Null))?;
//!
//!     match handle.await_result().await? {
//!         Outcome::Finished { data } => println!("finished with {}", data),
//!         other => println!("ended early: {:?}", other),
//!     }
//!     Ok(())
//! }
//! ```

pub use scir_checkpoint as checkpoint;
pub use scir_core as core;
pub use scir_document as document;

pub use scir_checkpoint::{CheckpointTree, Journal};
pub use scir_core::{
    resume, start, Capabilities, Communications, DefaultEvaluator, EngineError, Evaluator, Event,
    EventKind, Interpreter, Observer, Outcome, ResourceLoader, SessionHandle, SessionOptions,
};
pub use scir_document::{Document, DocumentError, DocumentId, RawDocument};
