//! The execution engine.
//!
//! One interpreter runs one session as a single logical flow: document
//! graph traversal, transition selection, and microstep execution all run
//! to completion without yielding. The only suspension point is the
//! external-queue wait, which is also where stop and suspend requests are
//! observed and the only place a checkpoint can be taken.
//!
//! Every phase is wrapped in a checkpoint frame. On a fresh run the
//! journal just records; on a resumed run completed frames restore their
//! captured state without re-executing, so no send or invoke ever happens
//! twice.

use crate::capabilities::{Capabilities, SendDisposition};
use crate::configuration::{Configuration, HistoryStore};
use crate::datamodel::DataModel;
use crate::error::EngineError;
use crate::event::Event;
use crate::invoke::InvokeManager;
use crate::queue::{external_channel, ExternalQueue, ExternalSender, InternalQueue};
use crate::selector;
use crate::snapshot::EngineSnapshot;
use scir_checkpoint::{CheckpointTree, FrameEntry, FrameKey, FrameKind, Journal};
use scir_document::{Action, Document, DocumentId, InvokeDecl, NodeKind, TransitionId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Interpreter phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialize,
    EnterInitial,
    MainLoop,
    Exiting,
    Terminal,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Initialize => "initialize",
            Phase::EnterInitial => "enter_initial",
            Phase::MainLoop => "main_loop",
            Phase::Exiting => "exiting",
            Phase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A top-level final state was reached; the exit sequence ran.
    Finished { data: Value },

    /// The host requested a stop (or closed the event queue); the exit
    /// sequence ran.
    Cancelled { data: Value },

    /// The host requested a suspend; the session can be resumed from the
    /// checkpoint. No exit actions ran.
    Suspended { checkpoint: CheckpointTree },
}

/// Host-to-engine control messages, observed only at the wait point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Stop,
    Suspend,
}

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on selection/microstep rounds per macrostep. Hitting
    /// it means the document loops without stabilizing and aborts the
    /// run.
    pub max_microsteps: usize,

    /// Explicit session id; generated when absent.
    pub session_id: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_microsteps: 4096,
            session_id: None,
        }
    }
}

/// Producer endpoints for a running interpreter.
#[derive(Debug)]
pub struct SessionChannels {
    pub events: ExternalSender,
    pub control: mpsc::UnboundedSender<ControlSignal>,
}

enum Wake {
    Event(Event),
    Stop,
    Suspend,
    Closed,
}

/// A single statechart session.
pub struct Interpreter {
    doc: Arc<Document>,
    session_id: String,
    capabilities: Capabilities,
    options: SessionOptions,

    phase: Phase,
    running: bool,
    configuration: Configuration,
    history: HistoryStore,
    data: DataModel,
    internal: InternalQueue,
    external: ExternalQueue,
    control: mpsc::UnboundedReceiver<ControlSignal>,
    invokes: InvokeManager,
    /// States entered since the last invoke startup, in document order.
    states_to_invoke: BTreeSet<DocumentId>,

    journal: Journal,
    initial_data: Value,
    /// Index of the next top-level checkpoint frame.
    top_index: u32,
    /// Index of the next sub-frame inside the current top-level frame.
    sub_index: u32,
}

impl Interpreter {
    /// Creates a fresh session over a built document.
    pub fn new(
        doc: Arc<Document>,
        capabilities: Capabilities,
        initial_data: Value,
        options: SessionOptions,
    ) -> (Self, SessionChannels) {
        let journal = Journal::new(doc.checksum());
        Self::with_journal(doc, capabilities, initial_data, options, journal)
    }

    /// Recreates a session from an exported checkpoint. The tree must
    /// have been taken against the same document.
    pub fn resume(
        doc: Arc<Document>,
        checkpoint: CheckpointTree,
        capabilities: Capabilities,
        options: SessionOptions,
    ) -> Result<(Self, SessionChannels), EngineError> {
        let journal = Journal::resume(checkpoint, doc.checksum())?;
        Ok(Self::with_journal(
            doc,
            capabilities,
            Value::Null,
            options,
            journal,
        ))
    }

    fn with_journal(
        doc: Arc<Document>,
        capabilities: Capabilities,
        initial_data: Value,
        options: SessionOptions,
        journal: Journal,
    ) -> (Self, SessionChannels) {
        let (events, external) = external_channel();
        let (control_tx, control) = mpsc::unbounded_channel();
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));

        let interpreter = Self {
            session_id: session_id.clone(),
            invokes: InvokeManager::new(session_id),
            doc,
            capabilities,
            options,
            phase: Phase::Initialize,
            running: true,
            configuration: Configuration::new(),
            history: HistoryStore::new(),
            data: DataModel::new(),
            internal: InternalQueue::new(),
            external,
            control,
            states_to_invoke: BTreeSet::new(),
            journal,
            initial_data,
            top_index: 2,
            sub_index: 0,
        };

        (
            interpreter,
            SessionChannels {
                events,
                control: control_tx,
            },
        )
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Active configuration in document order.
    pub fn configuration(&self) -> Vec<DocumentId> {
        self.configuration.snapshot()
    }

    /// Effective ids of the active configuration, in document order.
    pub fn active_states(&self) -> Vec<String> {
        self.configuration
            .iter()
            .map(|id| self.doc.effective_id(id))
            .collect()
    }

    /// The current data model as JSON.
    pub fn data_model(&self) -> Value {
        self.data.export()
    }

    // =========================================================================
    // Main loop
    // =========================================================================

    /// Runs the session to completion, cancellation, or suspension.
    pub async fn run(&mut self) -> Result<Outcome, EngineError> {
        self.set_phase(Phase::Initialize);
        self.state_frame(FrameKind::Initialize, 0, |eng| {
            eng.initialize();
            Ok(())
        })?;

        self.set_phase(Phase::EnterInitial);
        self.state_frame(FrameKind::EnterInitial, 1, |eng| eng.enter_initial())?;

        self.set_phase(Phase::MainLoop);
        let mut trigger: Option<Event> = None;
        loop {
            let index = self.top_index;
            self.top_index += 1;
            self.sub_index = 0;
            let event = trigger.take();
            self.state_frame(FrameKind::Iteration, index, move |eng| {
                eng.macrostep(event)?;
                eng.start_pending_invokes();
                Ok(())
            })?;

            if !self.running {
                break;
            }

            // Starting invokes may have raised events; stabilize again
            // before suspending on the external queue.
            if !self.internal.is_empty() {
                continue;
            }

            // On a resumed run the next iteration may already be
            // recorded; its triggering event was consumed before the
            // suspension, so replay it instead of waiting for a new one.
            if self.journal.is_replaying() {
                continue;
            }

            match self.wait_external().await {
                Wake::Event(event) => trigger = Some(event),
                Wake::Suspend => {
                    tracing::info!(session = %self.session_id, "session suspended");
                    return Ok(Outcome::Suspended {
                        checkpoint: self.journal.export(),
                    });
                }
                Wake::Stop | Wake::Closed => return Ok(self.shut_down(true)),
            }
        }

        Ok(self.shut_down(false))
    }

    /// The sole suspension point. Pending events drain before a stop or
    /// suspend request is observed.
    async fn wait_external(&mut self) -> Wake {
        let external = &mut self.external;
        let control = &mut self.control;
        tokio::select! {
            biased;
            event = external.wait() => match event {
                Some(event) => Wake::Event(event),
                None => Wake::Closed,
            },
            signal = control.recv() => match signal {
                Some(ControlSignal::Stop) => Wake::Stop,
                Some(ControlSignal::Suspend) => Wake::Suspend,
                None => match external.wait().await {
                    Some(event) => Wake::Event(event),
                    None => Wake::Closed,
                },
            },
        }
    }

    fn shut_down(&mut self, cancelled: bool) -> Outcome {
        self.set_phase(Phase::Exiting);
        self.exit_interpreter();
        self.set_phase(Phase::Terminal);
        let data = self.data.export();
        if cancelled {
            Outcome::Cancelled { data }
        } else {
            Outcome::Finished { data }
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        tracing::debug!(session = %self.session_id, phase = %phase, "phase changed");
        self.capabilities.observer.phase_changed(phase);
    }

    // =========================================================================
    // Checkpoint frames
    // =========================================================================

    /// Wraps a state-mutating phase: on replay the captured end state is
    /// restored and the body never runs.
    fn state_frame(
        &mut self,
        kind: FrameKind,
        index: u32,
        body: impl FnOnce(&mut Self) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let key = FrameKey::new(kind, index);
        match self.journal.enter(key)? {
            FrameEntry::Completed(value) => {
                let value = value.ok_or_else(|| EngineError::Inconsistent {
                    reason: format!("frame {} captured no state", key),
                })?;
                let snapshot: EngineSnapshot = serde_json::from_value(value)?;
                self.restore_snapshot(snapshot);
                tracing::debug!(frame = %key, "frame replayed from checkpoint");
                Ok(())
            }
            FrameEntry::Started => {
                body(self)?;
                let snapshot = serde_json::to_value(self.snapshot())?;
                self.journal.exit(key, Some(snapshot))?;
                Ok(())
            }
        }
    }

    /// Wraps a value-producing step: on replay the captured value comes
    /// back without the body running.
    fn with_frame<T, F>(&mut self, kind: FrameKind, body: F) -> Result<T, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Self) -> Result<T, EngineError>,
    {
        let key = FrameKey::new(kind, self.sub_index);
        self.sub_index += 1;
        match self.journal.enter(key)? {
            FrameEntry::Completed(value) => {
                Ok(serde_json::from_value(value.unwrap_or(Value::Null))?)
            }
            FrameEntry::Started => {
                let out = body(self)?;
                self.journal.exit(key, Some(serde_json::to_value(&out)?))?;
                Ok(out)
            }
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        let (invokes, invoke_counters) = self.invokes.snapshot();
        EngineSnapshot {
            configuration: self.configuration.snapshot(),
            history: self.history.snapshot(),
            data_model: self.data.export(),
            internal_events: self.internal.snapshot(),
            states_to_invoke: self.states_to_invoke.iter().copied().collect(),
            invokes,
            invoke_counters,
            running: self.running,
        }
    }

    fn restore_snapshot(&mut self, snapshot: EngineSnapshot) {
        self.configuration.restore(snapshot.configuration);
        self.history.restore(snapshot.history);
        self.data.restore(snapshot.data_model);
        self.internal.restore(snapshot.internal_events);
        self.states_to_invoke = snapshot.states_to_invoke.into_iter().collect();
        self.invokes.restore(snapshot.invokes, snapshot.invoke_counters);
        self.running = snapshot.running;
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    fn initialize(&mut self) {
        self.data.set_system(&self.session_id, self.doc.name());

        // Early binding: every declaration initializes now, in document
        // order. Evaluation failures leave the field null and surface as
        // error.execution events.
        let doc = Arc::clone(&self.doc);
        for node in doc.nodes() {
            for decl in &node.data {
                let value = match &decl.expr {
                    None => Value::Null,
                    Some(expr) => match self.capabilities.evaluator.evaluate_value(expr, &self.data)
                    {
                        Ok(v) => v,
                        Err(err) => {
                            self.raise_execution_error(format!("data '{}': {}", decl.id, err));
                            Value::Null
                        }
                    },
                };
                self.data.declare(&decl.id, value);
            }
        }

        let initial = std::mem::take(&mut self.initial_data);
        self.data.merge(initial);
        tracing::debug!(session = %self.session_id, "data model initialized");
    }

    fn enter_initial(&mut self) -> Result<(), EngineError> {
        let NodeKind::Root { initial } = self.doc.root().kind else {
            return Err(EngineError::Inconsistent {
                reason: "root node has no initial transition".to_string(),
            });
        };
        self.enter_states(&[initial]);
        self.check_configuration()?;
        self.run_global_script();
        Ok(())
    }

    fn run_global_script(&mut self) {
        if let Some(uri) = self.doc.script_src().map(str::to_string) {
            match self.capabilities.loader.load(&uri) {
                Ok(text) => self.run_script(&text),
                Err(err) => self.raise_execution_error(format!("script '{}': {}", uri, err)),
            }
        }
        if let Some(script) = self.doc.script().map(str::to_string) {
            self.run_script(&script);
        }
    }

    fn run_script(&mut self, src: &str) {
        let evaluator = Arc::clone(&self.capabilities.evaluator);
        if let Err(err) = evaluator.execute_script(src, &mut self.data) {
            self.raise_execution_error(format!("script: {}", err));
        }
    }

    // =========================================================================
    // Macrostep / microstep
    // =========================================================================

    /// One full stabilization: apply the triggering external event if
    /// any, then alternate eventless selection and internal-queue
    /// draining until the configuration is stable.
    fn macrostep(&mut self, trigger: Option<Event>) -> Result<(), EngineError> {
        if let Some(event) = trigger {
            self.process_external_event(event)?;
        }

        let mut rounds = 0usize;
        while self.running {
            if rounds >= self.options.max_microsteps {
                return Err(EngineError::EventlessLoop {
                    limit: self.options.max_microsteps,
                });
            }
            rounds += 1;

            let mut selected = self.select_frame(None)?;
            if selected.is_empty() {
                let Some(event) = self.internal.pop() else {
                    break;
                };
                self.data.set_event(&event);
                self.capabilities.observer.event_processed(&event);
                tracing::trace!(event = %event.name, "processing internal event");
                selected = self.select_frame(Some(&event))?;
                if selected.is_empty() {
                    // No transition cares about this event; keep draining.
                    continue;
                }
            }
            self.microstep_frame(selected)?;
        }
        Ok(())
    }

    fn process_external_event(&mut self, event: Event) -> Result<(), EngineError> {
        self.data.set_event(&event);
        self.capabilities.observer.event_processed(&event);
        tracing::debug!(event = %event.name, "processing external event");

        for invoke_id in self.invokes.autoforward_ids() {
            let comm = Arc::clone(&self.capabilities.comm);
            if let Err(err) = comm.forward_event(&self.session_id, &invoke_id, &event) {
                self.raise_communication_error(
                    format!("autoforward to '{}': {}", invoke_id, err),
                    None,
                );
            }
        }

        let selected = self.select_frame(Some(&event))?;
        if !selected.is_empty() {
            self.microstep_frame(selected)?;
        }
        Ok(())
    }

    fn select_frame(&mut self, event: Option<&Event>) -> Result<Vec<TransitionId>, EngineError> {
        self.with_frame(FrameKind::Select, |eng| {
            let mut outcome = selector::select_transitions(
                &eng.doc,
                &eng.configuration,
                &eng.history,
                &eng.data,
                eng.capabilities.evaluator.as_ref(),
                event,
            );
            for raised in outcome.raised.drain(..) {
                eng.internal.push(raised);
            }
            Ok(outcome.transitions)
        })
    }

    fn microstep_frame(&mut self, transitions: Vec<TransitionId>) -> Result<(), EngineError> {
        self.with_frame(FrameKind::Microstep, move |eng| {
            eng.microstep(&transitions)
        })?;
        self.check_configuration()
    }

    /// One exit/execute/enter cycle for a non-conflicting transition set.
    fn microstep(&mut self, transitions: &[TransitionId]) -> Result<(), EngineError> {
        let exit_set =
            selector::compute_exit_set(&self.doc, &self.configuration, &self.history, transitions);
        tracing::debug!(
            transitions = transitions.len(),
            exiting = exit_set.len(),
            "microstep"
        );

        self.record_history(&exit_set);
        self.exit_states(&exit_set);

        for &tid in transitions {
            let (source, actions) = {
                let t = self.doc.transition(tid);
                (t.source, t.actions.clone())
            };
            let name = self.doc.effective_id(source);
            self.capabilities.observer.transition_taken(&name);
            self.execute_actions(&actions);
        }

        self.enter_states(transitions);
        Ok(())
    }

    /// Writes history records for every exited region that has history
    /// children, before any exit action runs.
    fn record_history(&mut self, exit_set: &BTreeSet<DocumentId>) {
        let doc = Arc::clone(&self.doc);
        for &s in exit_set {
            for h in doc.history_children(s) {
                let NodeKind::History { deep, .. } = doc.node(h).kind else {
                    continue;
                };
                let recorded: Vec<DocumentId> = if deep {
                    self.configuration
                        .iter()
                        .filter(|&c| doc.node(c).is_atomic() && doc.is_descendant(c, s))
                        .collect()
                } else {
                    self.configuration
                        .iter()
                        .filter(|&c| doc.node(c).parent == Some(s))
                        .collect()
                };
                tracing::trace!(history = %h, recorded = recorded.len(), "history recorded");
                self.history.record(h, recorded);
            }
        }
    }

    /// Exits states in exit order (reverse document order): exit actions,
    /// then invoke cancellation, then removal from the configuration.
    fn exit_states(&mut self, exit_set: &BTreeSet<DocumentId>) {
        let doc = Arc::clone(&self.doc);
        for &s in exit_set.iter().rev() {
            let actions = doc.node(s).on_exit.clone();
            self.execute_actions(&actions);

            let failures = self.invokes.cancel_owned(s, self.capabilities.comm.as_ref());
            for (invoke_id, err) in failures {
                self.raise_communication_error(
                    format!("cancel invoke '{}': {}", invoke_id, err),
                    None,
                );
            }

            self.configuration.remove(s);
            self.states_to_invoke.remove(&s);
            let name = doc.effective_id(s);
            tracing::debug!(state = %name, "state exited");
            self.capabilities.observer.state_exited(&name);
        }
    }

    /// Computes the entry set for the given transitions and enters it in
    /// document order.
    fn enter_states(&mut self, transitions: &[TransitionId]) {
        let doc = Arc::clone(&self.doc);
        let mut to_enter: BTreeSet<DocumentId> = BTreeSet::new();
        let mut default_entry: BTreeSet<DocumentId> = BTreeSet::new();
        let mut history_actions: HashMap<DocumentId, Vec<Action>> = HashMap::new();

        for &tid in transitions {
            let t = doc.transition(tid);
            if t.targets.is_empty() {
                continue;
            }
            for &target in &t.targets {
                self.add_descendants(
                    &doc,
                    target,
                    &mut to_enter,
                    &mut default_entry,
                    &mut history_actions,
                );
            }
            let Some(domain) = selector::transition_domain(&doc, &self.history, t) else {
                continue;
            };
            for target in selector::effective_targets(&doc, &self.history, t) {
                self.add_ancestors_upto(
                    &doc,
                    target,
                    domain,
                    &mut to_enter,
                    &mut default_entry,
                    &mut history_actions,
                );
            }
        }

        let ordered: Vec<DocumentId> = to_enter.iter().copied().collect();
        for s in ordered {
            self.configuration.insert(s);
            self.states_to_invoke.insert(s);
            let name = doc.effective_id(s);
            tracing::debug!(state = %name, "state entered");

            let entry_actions = doc.node(s).on_entry.clone();
            self.execute_actions(&entry_actions);

            if default_entry.contains(&s) {
                if let Some(itid) = doc.node(s).initial_transition() {
                    let actions = doc.transition(itid).actions.clone();
                    self.execute_actions(&actions);
                }
            }
            if let Some(actions) = history_actions.remove(&s) {
                self.execute_actions(&actions);
            }

            if doc.node(s).is_final() {
                self.handle_final_entered(&doc, s);
            }
            self.capabilities.observer.state_entered(&name);
        }
    }

    /// Adds a target and everything it implies below it: default initial
    /// chains for compounds, all regions for parallels, recorded or
    /// default content for history pseudostates.
    fn add_descendants(
        &self,
        doc: &Document,
        s: DocumentId,
        to_enter: &mut BTreeSet<DocumentId>,
        default_entry: &mut BTreeSet<DocumentId>,
        history_actions: &mut HashMap<DocumentId, Vec<Action>>,
    ) {
        let node = doc.node(s);
        match node.kind {
            NodeKind::History { default, .. } => {
                let Some(parent) = node.parent else { return };
                match self.history.lookup(s).map(|r| r.to_vec()) {
                    Some(recorded) => {
                        for &r in &recorded {
                            self.add_descendants(doc, r, to_enter, default_entry, history_actions);
                        }
                        for &r in &recorded {
                            self.add_ancestors_upto(
                                doc,
                                r,
                                parent,
                                to_enter,
                                default_entry,
                                history_actions,
                            );
                        }
                    }
                    None => {
                        let t = doc.transition(default);
                        if !t.actions.is_empty() {
                            history_actions.insert(parent, t.actions.clone());
                        }
                        let targets = t.targets.clone();
                        for &target in &targets {
                            self.add_descendants(
                                doc,
                                target,
                                to_enter,
                                default_entry,
                                history_actions,
                            );
                        }
                        for &target in &targets {
                            self.add_ancestors_upto(
                                doc,
                                target,
                                parent,
                                to_enter,
                                default_entry,
                                history_actions,
                            );
                        }
                    }
                }
            }
            NodeKind::Initial { .. } | NodeKind::Root { .. } => {}
            _ => {
                to_enter.insert(s);
                if node.is_compound() {
                    default_entry.insert(s);
                    if let Some(itid) = node.initial_transition() {
                        let targets = doc.transition(itid).targets.clone();
                        for &target in &targets {
                            self.add_descendants(
                                doc,
                                target,
                                to_enter,
                                default_entry,
                                history_actions,
                            );
                        }
                        for &target in &targets {
                            self.add_ancestors_upto(
                                doc,
                                target,
                                s,
                                to_enter,
                                default_entry,
                                history_actions,
                            );
                        }
                    }
                } else if node.is_parallel() {
                    for child in doc.child_states(s) {
                        let covered = to_enter
                            .iter()
                            .any(|&x| x == child || doc.is_descendant(x, child));
                        if !covered {
                            self.add_descendants(
                                doc,
                                child,
                                to_enter,
                                default_entry,
                                history_actions,
                            );
                        }
                    }
                }
            }
        }
    }

    /// Adds the proper ancestors of `s` below `upto` (exclusive),
    /// completing parallel regions along the way.
    fn add_ancestors_upto(
        &self,
        doc: &Document,
        s: DocumentId,
        upto: DocumentId,
        to_enter: &mut BTreeSet<DocumentId>,
        default_entry: &mut BTreeSet<DocumentId>,
        history_actions: &mut HashMap<DocumentId, Vec<Action>>,
    ) {
        for anc in doc.proper_ancestors(s) {
            if anc == upto || doc.node(anc).is_root() {
                break;
            }
            to_enter.insert(anc);
            if doc.node(anc).is_parallel() {
                for child in doc.child_states(anc) {
                    let covered = to_enter
                        .iter()
                        .any(|&x| x == child || doc.is_descendant(x, child));
                    if !covered {
                        self.add_descendants(doc, child, to_enter, default_entry, history_actions);
                    }
                }
            }
        }
    }

    /// Raises `done.state.*` events when a final state is entered, and
    /// ends the session on a top-level final.
    fn handle_final_entered(&mut self, doc: &Document, s: DocumentId) {
        let Some(parent) = doc.node(s).parent else {
            return;
        };
        if doc.node(parent).is_root() {
            tracing::info!(session = %self.session_id, "top-level final state reached");
            self.running = false;
            return;
        }

        self.internal.push(Event::done_state(&doc.effective_id(parent)));

        if let Some(grandparent) = doc.node(parent).parent {
            if doc.node(grandparent).is_parallel()
                && doc
                    .child_states(grandparent)
                    .all(|c| self.in_final_state(doc, c))
            {
                self.internal
                    .push(Event::done_state(&doc.effective_id(grandparent)));
            }
        }
    }

    fn in_final_state(&self, doc: &Document, s: DocumentId) -> bool {
        let node = doc.node(s);
        if node.is_compound() {
            doc.child_states(s)
                .any(|c| doc.node(c).is_final() && self.configuration.contains(c))
        } else if node.is_parallel() {
            doc.child_states(s).all(|c| self.in_final_state(doc, c))
        } else {
            false
        }
    }

    // =========================================================================
    // Executable content
    // =========================================================================

    fn execute_actions(&mut self, actions: &[Action]) {
        for action in actions {
            match action {
                Action::Raise { event } => {
                    self.internal.push(Event::internal(event.clone(), Value::Null));
                }

                Action::Assign { location, expr } => {
                    match self.capabilities.evaluator.evaluate_value(expr, &self.data) {
                        Ok(value) => {
                            if let Err(reason) = self.data.set(location, value) {
                                self.raise_execution_error(format!("assign: {}", reason));
                            }
                        }
                        Err(err) => {
                            self.raise_execution_error(format!("assign '{}': {}", expr, err));
                        }
                    }
                }

                Action::Log { label, expr } => {
                    let value = match expr {
                        None => Value::Null,
                        Some(expr) => {
                            match self.capabilities.evaluator.evaluate_value(expr, &self.data) {
                                Ok(v) => v,
                                Err(err) => {
                                    self.raise_execution_error(format!("log '{}': {}", expr, err));
                                    continue;
                                }
                            }
                        }
                    };
                    tracing::debug!(label = label.as_deref().unwrap_or(""), value = %value, "chart log");
                    self.capabilities.observer.log(label.as_deref(), &value);
                }

                Action::Script { src } => self.run_script(src),

                Action::Send {
                    event,
                    target,
                    id,
                    data,
                } => self.execute_send(event, target.as_deref(), id.clone(), data.as_deref()),

                Action::Cancel { send_id } => {
                    if let Err(err) = self
                        .capabilities
                        .comm
                        .cancel_event(&self.session_id, send_id)
                    {
                        self.raise_communication_error(
                            format!("cancel '{}': {}", send_id, err),
                            Some(send_id.clone()),
                        );
                    }
                }
            }
        }
    }

    fn execute_send(
        &mut self,
        name: &str,
        target: Option<&str>,
        id: Option<String>,
        data_expr: Option<&str>,
    ) {
        let payload = match data_expr {
            None => Value::Null,
            Some(expr) => match self.capabilities.evaluator.evaluate_value(expr, &self.data) {
                Ok(v) => v,
                Err(err) => {
                    // A send whose payload fails to evaluate is not performed.
                    self.raise_execution_error(format!("send '{}': {}", name, err));
                    return;
                }
            },
        };

        let send_id = id.unwrap_or_else(|| format!("send-{}", uuid::Uuid::new_v4()));
        let mut event = Event::external(name, payload);
        event.send_id = Some(send_id.clone());
        event.origin = Some(self.session_id.clone());

        match self
            .capabilities
            .comm
            .send_event(&self.session_id, &event, target)
        {
            Ok(SendDisposition::Accepted) => {
                tracing::debug!(event = %event.name, send_target = target.unwrap_or(""), "event sent");
            }
            Ok(SendDisposition::RoutedInternal) => {
                // Addressed to this session; it keeps its external type
                // but joins the internal queue per the routing contract.
                self.internal.push(event);
            }
            Err(err) => {
                self.raise_communication_error(format!("send '{}': {}", name, err), Some(send_id));
            }
        }
    }

    // =========================================================================
    // Invokes
    // =========================================================================

    /// Starts the invokes declared on states entered during the finished
    /// macrostep, in document order.
    fn start_pending_invokes(&mut self) {
        if self.states_to_invoke.is_empty() {
            return;
        }
        let doc = Arc::clone(&self.doc);
        let pending: Vec<DocumentId> = std::mem::take(&mut self.states_to_invoke)
            .into_iter()
            .collect();

        for s in pending {
            for decl in doc.node(s).invokes.clone() {
                let payload = self.evaluate_invoke_params(&decl);
                let comm = Arc::clone(&self.capabilities.comm);
                if let Err(err) = self.invokes.start(&doc, s, &decl, payload, comm.as_ref()) {
                    self.raise_communication_error(
                        format!("invoke on '{}': {}", doc.effective_id(s), err),
                        None,
                    );
                }
            }
        }
    }

    fn evaluate_invoke_params(&mut self, decl: &InvokeDecl) -> Value {
        let mut map = serde_json::Map::new();
        for param in &decl.params {
            match self
                .capabilities
                .evaluator
                .evaluate_value(&param.expr, &self.data)
            {
                Ok(value) => {
                    map.insert(param.name.clone(), value);
                }
                Err(err) => {
                    self.raise_execution_error(format!("param '{}': {}", param.name, err));
                }
            }
        }
        Value::Object(map)
    }

    // =========================================================================
    // Shutdown and faults
    // =========================================================================

    /// Exits every active state in exit order, cancelling invokes. Runs
    /// for both normal completion and cooperative stops.
    fn exit_interpreter(&mut self) {
        let doc = Arc::clone(&self.doc);
        let states: Vec<DocumentId> = self.configuration.iter().collect();
        for &s in states.iter().rev() {
            let actions = doc.node(s).on_exit.clone();
            self.execute_actions(&actions);

            let failures = self.invokes.cancel_owned(s, self.capabilities.comm.as_ref());
            for (invoke_id, err) in failures {
                tracing::warn!(invoke_id = %invoke_id, error = %err, "invoke cancel failed during shutdown");
            }

            self.configuration.remove(s);
            self.capabilities.observer.state_exited(&doc.effective_id(s));
        }
    }

    fn check_configuration(&self) -> Result<(), EngineError> {
        self.configuration
            .validate(&self.doc)
            .map_err(|reason| EngineError::InconsistentConfiguration { reason })
    }

    fn raise_execution_error(&mut self, message: String) {
        tracing::warn!(error = %message, "execution error");
        self.internal.push(Event::error_execution(message));
    }

    fn raise_communication_error(&mut self, message: String, send_id: Option<String>) {
        tracing::warn!(error = %message, "communication error");
        self.internal.push(Event::error_communication(message, send_id));
    }
}
