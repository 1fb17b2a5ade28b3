//! Session surface for host applications.
//!
//! `start` spawns an interpreter as a tokio task and hands back a
//! [`SessionHandle`] for posting events, requesting stop/suspend, and
//! collecting the outcome. `resume` does the same from an exported
//! checkpoint; the host re-posts any events the suspended session never
//! consumed.

use crate::capabilities::Capabilities;
use crate::engine::{ControlSignal, Interpreter, Outcome, SessionOptions};
use crate::error::{EngineError, SessionClosed};
use crate::event::Event;
use crate::queue::ExternalSender;
use scir_checkpoint::CheckpointTree;
use scir_document::Document;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: String,
    events: Option<ExternalSender>,
    control: mpsc::UnboundedSender<ControlSignal>,
    task: JoinHandle<Result<Outcome, EngineError>>,
}

/// Starts a session over a built document. Must be called inside a tokio
/// runtime.
pub fn start(
    document: Arc<Document>,
    capabilities: Capabilities,
    initial_data: Value,
    options: SessionOptions,
) -> SessionHandle {
    let (mut interpreter, channels) =
        Interpreter::new(document, capabilities, initial_data, options);
    let session_id = interpreter.session_id().to_string();
    tracing::info!(session = %session_id, "session started");

    let task = tokio::spawn(async move { interpreter.run().await });
    SessionHandle {
        session_id,
        events: Some(channels.events),
        control: channels.control,
        task,
    }
}

/// Resumes a session from an exported checkpoint taken against the same
/// document.
pub fn resume(
    document: Arc<Document>,
    checkpoint: CheckpointTree,
    capabilities: Capabilities,
    options: SessionOptions,
) -> Result<SessionHandle, EngineError> {
    let (mut interpreter, channels) =
        Interpreter::resume(document, checkpoint, capabilities, options)?;
    let session_id = interpreter.session_id().to_string();
    tracing::info!(session = %session_id, "session resumed from checkpoint");

    let task = tokio::spawn(async move { interpreter.run().await });
    Ok(SessionHandle {
        session_id,
        events: Some(channels.events),
        control: channels.control,
        task,
    })
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Posts an event to the session's external queue.
    pub fn post_external_event(&self, event: Event) -> Result<(), SessionClosed> {
        match &self.events {
            Some(sender) => sender.post(event),
            None => Err(SessionClosed),
        }
    }

    /// A clone-able sender, e.g. for wiring an invoked child's events
    /// back into this session.
    pub fn event_sender(&self) -> Option<ExternalSender> {
        self.events.clone()
    }

    /// Signals that no more events will be posted through this handle.
    /// Buffered events are still delivered; once they drain the session
    /// exits cooperatively.
    pub fn close_events(&mut self) {
        self.events = None;
    }

    /// Requests a cooperative stop: observed at the wait point, runs the
    /// exit sequence, cancels active invokes.
    pub fn request_stop(&self) {
        let _ = self.control.send(ControlSignal::Stop);
    }

    /// Requests suspension: observed at the wait point, the session ends
    /// with a resumable checkpoint and runs no exit actions.
    pub fn request_suspend(&self) {
        let _ = self.control.send(ControlSignal::Suspend);
    }

    /// Waits for the session to end.
    pub async fn await_result(self) -> Result<Outcome, EngineError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(EngineError::Inconsistent {
                reason: format!("session task failed: {}", err),
            }),
        }
    }

    /// Suspends the session and returns its checkpoint. Pending events
    /// drain first; a session that completes instead yields
    /// [`EngineError::CompletedBeforeSuspend`].
    pub async fn export_checkpoint(self) -> Result<CheckpointTree, EngineError> {
        self.request_suspend();
        match self.await_result().await? {
            Outcome::Suspended { checkpoint } => Ok(checkpoint),
            _ => Err(EngineError::CompletedBeforeSuspend),
        }
    }
}
