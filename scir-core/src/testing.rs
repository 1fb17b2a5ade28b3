//! Recording capability doubles shared by the engine and session tests.

use crate::capabilities::{
    CommError, Communications, InvokeRequest, Observer, SendDisposition,
};
use crate::event::Event;
use parking_lot::Mutex;
use serde_json::Value;

/// Observer that records notifications.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub entered: Mutex<Vec<String>>,
    pub exited: Mutex<Vec<String>>,
    pub transitions: Mutex<Vec<String>>,
    pub logs: Mutex<Vec<(Option<String>, Value)>>,
}

impl Observer for RecordingObserver {
    fn state_entered(&self, state: &str) {
        self.entered.lock().push(state.to_string());
    }

    fn state_exited(&self, state: &str) {
        self.exited.lock().push(state.to_string());
    }

    fn transition_taken(&self, source: &str) {
        self.transitions.lock().push(source.to_string());
    }

    fn log(&self, label: Option<&str>, value: &Value) {
        self.logs.lock().push((label.map(str::to_string), value.clone()));
    }
}

/// Communications double that records calls. Targetless sends (and
/// `#_internal`) route back into the session; external targets are
/// accepted, or rejected wholesale when `fail_external` is set.
#[derive(Debug, Default)]
pub struct RecordingComms {
    pub sent: Mutex<Vec<(String, Option<String>)>>,
    pub started: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
    pub forwarded: Mutex<Vec<(String, String)>>,
    pub fail_external: bool,
}

impl RecordingComms {
    pub fn failing() -> Self {
        Self {
            fail_external: true,
            ..Default::default()
        }
    }

    pub fn sent_names(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(n, _)| n.clone()).collect()
    }
}

impl Communications for RecordingComms {
    fn send_event(
        &self,
        _session_id: &str,
        event: &Event,
        target: Option<&str>,
    ) -> Result<SendDisposition, CommError> {
        match target {
            None | Some("#_internal") => Ok(SendDisposition::RoutedInternal),
            Some(target) => {
                if self.fail_external {
                    return Err(CommError::Unavailable(target.to_string()));
                }
                self.sent
                    .lock()
                    .push((event.name.clone(), Some(target.to_string())));
                Ok(SendDisposition::Accepted)
            }
        }
    }

    fn cancel_event(&self, _session_id: &str, _send_id: &str) -> Result<(), CommError> {
        Ok(())
    }

    fn start_invoke(&self, request: &InvokeRequest<'_>) -> Result<(), CommError> {
        self.started.lock().push(request.invoke_id.to_string());
        Ok(())
    }

    fn cancel_invoke(&self, _session_id: &str, invoke_id: &str) -> Result<(), CommError> {
        self.cancelled.lock().push(invoke_id.to_string());
        Ok(())
    }

    fn forward_event(
        &self,
        _session_id: &str,
        invoke_id: &str,
        event: &Event,
    ) -> Result<(), CommError> {
        self.forwarded
            .lock()
            .push((invoke_id.to_string(), event.name.clone()));
        Ok(())
    }
}
