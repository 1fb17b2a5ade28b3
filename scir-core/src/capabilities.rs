//! Collaborator contracts consumed by the engine.
//!
//! Implementations are the host's concern; the crate ships null stubs and
//! a default expression evaluator so pure charts run out of the box.

use crate::datamodel::DataModel;
use crate::engine::Phase;
use crate::event::Event;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Expression evaluation failure. Never fatal: the engine converts these
/// into `error.execution` events.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("type error: {0}")]
    Type(String),
}

/// Communication failure. Never fatal: the engine converts these into
/// `error.communication` events scoped to the originating send/invoke.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("target unavailable: {0}")]
    Unavailable(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// Resource loading failure.
#[derive(Debug, Error)]
#[error("failed to load '{uri}': {reason}")]
pub struct LoadError {
    pub uri: String,
    pub reason: String,
}

/// How the communication capability disposed of a sent event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// Routed to an external target; nothing more for the engine to do.
    Accepted,
    /// The event targets this session; the engine enqueues it internally.
    RoutedInternal,
}

/// Parameters for starting an invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest<'a> {
    pub session_id: &'a str,
    pub invoke_id: &'a str,
    pub invoke_type: Option<&'a str>,
    pub src: Option<&'a str>,
    pub data: &'a Value,
}

/// Evaluates conditions, value expressions, and scripts against the
/// session data model.
pub trait Evaluator: Send + Sync {
    fn evaluate_condition(&self, expr: &str, data: &DataModel) -> Result<bool, EvalError>;

    fn evaluate_value(&self, expr: &str, data: &DataModel) -> Result<Value, EvalError>;

    /// Runs a script for its side effects on the data model. The default
    /// evaluates the source as an expression and discards the result.
    fn execute_script(&self, src: &str, data: &mut DataModel) -> Result<(), EvalError> {
        self.evaluate_value(src, data).map(|_| ())
    }
}

/// Starts and cancels invoked child services and routes sent events.
pub trait Communications: Send + Sync {
    fn send_event(
        &self,
        session_id: &str,
        event: &Event,
        target: Option<&str>,
    ) -> Result<SendDisposition, CommError>;

    fn cancel_event(&self, session_id: &str, send_id: &str) -> Result<(), CommError>;

    fn start_invoke(&self, request: &InvokeRequest<'_>) -> Result<(), CommError>;

    fn cancel_invoke(&self, session_id: &str, invoke_id: &str) -> Result<(), CommError>;

    /// Autoforwards an external event to a running invocation.
    fn forward_event(
        &self,
        session_id: &str,
        invoke_id: &str,
        event: &Event,
    ) -> Result<(), CommError>;
}

/// Resolves `src` URIs to text content.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, uri: &str) -> Result<String, LoadError>;
}

/// Purely observational notifications; nothing an implementation does can
/// influence control flow.
pub trait Observer: Send + Sync {
    fn phase_changed(&self, _phase: Phase) {}
    fn state_entered(&self, _state: &str) {}
    fn state_exited(&self, _state: &str) {}
    fn transition_taken(&self, _source: &str) {}
    fn event_processed(&self, _event: &Event) {}
    /// Sink for `log` actions.
    fn log(&self, _label: Option<&str>, _value: &Value) {}
}

/// Accepts sends targeting this session, drops everything else.
#[derive(Debug, Default)]
pub struct NullCommunications;

impl Communications for NullCommunications {
    fn send_event(
        &self,
        _session_id: &str,
        _event: &Event,
        target: Option<&str>,
    ) -> Result<SendDisposition, CommError> {
        match target {
            None | Some("#_internal") => Ok(SendDisposition::RoutedInternal),
            Some(_) => Ok(SendDisposition::Accepted),
        }
    }

    fn cancel_event(&self, _session_id: &str, _send_id: &str) -> Result<(), CommError> {
        Ok(())
    }

    fn start_invoke(&self, _request: &InvokeRequest<'_>) -> Result<(), CommError> {
        Ok(())
    }

    fn cancel_invoke(&self, _session_id: &str, _invoke_id: &str) -> Result<(), CommError> {
        Ok(())
    }

    fn forward_event(
        &self,
        _session_id: &str,
        _invoke_id: &str,
        _event: &Event,
    ) -> Result<(), CommError> {
        Ok(())
    }
}

/// Refuses every load; documents using `script_src` need a real loader.
#[derive(Debug, Default)]
pub struct NullLoader;

impl ResourceLoader for NullLoader {
    fn load(&self, uri: &str) -> Result<String, LoadError> {
        Err(LoadError {
            uri: uri.to_string(),
            reason: "no resource loader configured".to_string(),
        })
    }
}

/// Observer that does nothing.
#[derive(Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// The capability set a session runs with.
#[derive(Clone)]
pub struct Capabilities {
    pub evaluator: Arc<dyn Evaluator>,
    pub comm: Arc<dyn Communications>,
    pub loader: Arc<dyn ResourceLoader>,
    pub observer: Arc<dyn Observer>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            evaluator: Arc::new(crate::expr::DefaultEvaluator),
            comm: Arc::new(NullCommunications),
            loader: Arc::new(NullLoader),
            observer: Arc::new(NullObserver),
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
