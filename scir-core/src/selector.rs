//! Transition selection.
//!
//! Collects enabled transitions for an event (or for the eventless round
//! of a macrostep), then removes conflicts. Two transitions conflict when
//! their exit sets intersect; the one from the deeper source wins, ties
//! broken by ascending document id. A condition that fails to evaluate
//! counts as false and raises an `error.execution` event; it never aborts
//! the run.

use crate::capabilities::Evaluator;
use crate::configuration::{Configuration, HistoryStore};
use crate::datamodel::DataModel;
use crate::event::Event;
use scir_document::{Document, DocumentId, NodeKind, Transition, TransitionId, TransitionKind};
use std::collections::BTreeSet;

/// Result of a selection round.
#[derive(Debug, Default)]
pub struct SelectionOutcome {
    /// Selected, non-conflicting transitions in document order.
    pub transitions: Vec<TransitionId>,
    /// Events raised by failed condition evaluations.
    pub raised: Vec<Event>,
}

/// Selects the transitions enabled for `event`, or the enabled eventless
/// transitions when `event` is `None`.
pub fn select_transitions(
    doc: &Document,
    config: &Configuration,
    history: &HistoryStore,
    data: &DataModel,
    evaluator: &dyn Evaluator,
    event: Option<&Event>,
) -> SelectionOutcome {
    let mut raised = Vec::new();
    let mut enabled = Vec::new();

    for node_id in config.iter() {
        for &tid in &doc.node(node_id).transitions {
            let t = doc.transition(tid);
            let matched = match event {
                None => t.is_eventless(),
                Some(ev) => !t.is_eventless() && t.matches_event(&ev.name),
            };
            if !matched {
                continue;
            }
            if condition_holds(t, data, evaluator, &mut raised) {
                // First enabled transition per node wins; later ones on
                // the same node are never considered.
                enabled.push(tid);
                break;
            }
        }
    }

    SelectionOutcome {
        transitions: remove_conflicting(doc, config, history, enabled),
        raised,
    }
}

fn condition_holds(
    t: &Transition,
    data: &DataModel,
    evaluator: &dyn Evaluator,
    raised: &mut Vec<Event>,
) -> bool {
    let Some(expr) = &t.cond else {
        return true;
    };
    match evaluator.evaluate_condition(expr, data) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(transition = %t.id, error = %err, "condition evaluation failed");
            raised.push(Event::error_execution(format!(
                "condition '{}': {}",
                expr, err
            )));
            false
        }
    }
}

/// Removes conflicting transitions: priority order is source depth
/// descending, then source document id ascending; a transition loses when
/// its exit set overlaps one already claimed. The survivors come back in
/// document order, which is also their execution order.
pub fn remove_conflicting(
    doc: &Document,
    config: &Configuration,
    history: &HistoryStore,
    enabled: Vec<TransitionId>,
) -> Vec<TransitionId> {
    let mut ordered = enabled;
    ordered.sort_by(|&a, &b| {
        let sa = doc.transition(a).source;
        let sb = doc.transition(b).source;
        doc.node(sb)
            .depth
            .cmp(&doc.node(sa).depth)
            .then(sa.cmp(&sb))
    });

    let mut selected = Vec::new();
    let mut claimed: BTreeSet<DocumentId> = BTreeSet::new();
    for tid in ordered {
        let exit = compute_exit_set(doc, config, history, &[tid]);
        if exit.iter().any(|s| claimed.contains(s)) {
            continue;
        }
        claimed.extend(exit);
        selected.push(tid);
    }

    selected.sort();
    selected
}

/// Targets with history pseudostates substituted: the recorded set when
/// the region was exited before, the default-transition targets otherwise.
pub fn effective_targets(
    doc: &Document,
    history: &HistoryStore,
    t: &Transition,
) -> Vec<DocumentId> {
    let mut out = Vec::with_capacity(t.targets.len());
    for &target in &t.targets {
        match doc.node(target).kind {
            NodeKind::History { default, .. } => match history.lookup(target) {
                Some(recorded) => out.extend_from_slice(recorded),
                None => out.extend_from_slice(&doc.transition(default).targets),
            },
            _ => out.push(target),
        }
    }
    out
}

/// The transition's domain: the source itself for internal transitions
/// that stay inside a compound source, the least common compound ancestor
/// of source and effective targets otherwise. `None` for targetless
/// transitions, which exit nothing.
pub fn transition_domain(
    doc: &Document,
    history: &HistoryStore,
    t: &Transition,
) -> Option<DocumentId> {
    if t.targets.is_empty() {
        return None;
    }
    let targets = effective_targets(doc, history, t);

    if t.kind == TransitionKind::Internal
        && doc.node(t.source).is_compound()
        && targets.iter().all(|&s| doc.is_descendant(s, t.source))
    {
        return Some(t.source);
    }

    let mut ids = Vec::with_capacity(targets.len() + 1);
    ids.push(t.source);
    ids.extend(targets);
    Some(doc.least_common_compound_ancestor(&ids))
}

/// Every active node that the given transitions will exit: the active
/// descendants of each transition's domain.
pub fn compute_exit_set(
    doc: &Document,
    config: &Configuration,
    history: &HistoryStore,
    tids: &[TransitionId],
) -> BTreeSet<DocumentId> {
    let mut exit = BTreeSet::new();
    for &tid in tids {
        let t = doc.transition(tid);
        let Some(domain) = transition_domain(doc, history, t) else {
            continue;
        };
        for s in config.iter() {
            if doc.is_descendant(s, domain) {
                exit.insert(s);
            }
        }
    }
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DefaultEvaluator;
    use serde_json::json;

    fn select(
        doc: &Document,
        config: &Configuration,
        data: &DataModel,
        event: Option<&Event>,
    ) -> SelectionOutcome {
        select_transitions(
            doc,
            config,
            &HistoryStore::new(),
            data,
            &DefaultEvaluator,
            event,
        )
    }

    fn activate(doc: &Document, names: &[&str]) -> Configuration {
        let mut config = Configuration::new();
        for name in names {
            config.insert(doc.resolve(name).unwrap());
        }
        config
    }

    fn nested_doc() -> Document {
        Document::from_json(&json!({
            "initial": "outer",
            "states": [
                {"kind": "state", "id": "outer", "initial": "inner",
                 "transitions": [{"event": "go", "target": "other"}],
                 "states": [
                    {"kind": "state", "id": "inner",
                     "transitions": [{"event": "go", "target": "sibling"}]},
                    {"kind": "state", "id": "sibling"}
                ]},
                {"kind": "state", "id": "other"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_deeper_source_wins() {
        let doc = nested_doc();
        let config = activate(&doc, &["outer", "inner"]);
        let data = DataModel::new();

        let outcome = select(&doc, &config, &data, Some(&Event::external("go", json!(null))));
        assert_eq!(outcome.transitions.len(), 1);
        let t = doc.transition(outcome.transitions[0]);
        assert_eq!(t.source, doc.resolve("inner").unwrap());
    }

    #[test]
    fn test_ancestor_fires_when_descendant_has_no_match() {
        let doc = nested_doc();
        let config = activate(&doc, &["outer", "sibling"]);
        let data = DataModel::new();

        let outcome = select(&doc, &config, &data, Some(&Event::external("go", json!(null))));
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(
            doc.transition(outcome.transitions[0]).source,
            doc.resolve("outer").unwrap()
        );
    }

    #[test]
    fn test_document_order_breaks_depth_ties() {
        let doc = Document::from_json(&json!({
            "initial": "p",
            "states": [
                {"kind": "parallel", "id": "p", "states": [
                    {"kind": "state", "id": "a", "initial": "a1", "states": [
                        {"kind": "state", "id": "a1",
                         "transitions": [{"event": "go", "target": "done_state"}]}
                    ]},
                    {"kind": "state", "id": "b", "initial": "b1", "states": [
                        {"kind": "state", "id": "b1",
                         "transitions": [{"event": "go", "target": "done_state"}]}
                    ]}
                ]},
                {"kind": "state", "id": "done_state"}
            ]
        }))
        .unwrap();

        let config = activate(&doc, &["p", "a", "a1", "b", "b1"]);
        let data = DataModel::new();

        // Both transitions leave the parallel region, so their exit sets
        // collide; the one from the earlier region wins.
        let outcome = select(&doc, &config, &data, Some(&Event::external("go", json!(null))));
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(
            doc.transition(outcome.transitions[0]).source,
            doc.resolve("a1").unwrap()
        );
    }

    #[test]
    fn test_parallel_regions_fire_together_when_disjoint() {
        let doc = Document::from_json(&json!({
            "initial": "p",
            "states": [
                {"kind": "parallel", "id": "p", "states": [
                    {"kind": "state", "id": "a", "initial": "a1", "states": [
                        {"kind": "state", "id": "a1",
                         "transitions": [{"event": "go", "target": "a2"}]},
                        {"kind": "state", "id": "a2"}
                    ]},
                    {"kind": "state", "id": "b", "initial": "b1", "states": [
                        {"kind": "state", "id": "b1",
                         "transitions": [{"event": "go", "target": "b2"}]},
                        {"kind": "state", "id": "b2"}
                    ]}
                ]}
            ]
        }))
        .unwrap();

        let config = activate(&doc, &["p", "a", "a1", "b", "b1"]);
        let data = DataModel::new();

        let outcome = select(&doc, &config, &data, Some(&Event::external("go", json!(null))));
        assert_eq!(outcome.transitions.len(), 2);
    }

    #[test]
    fn test_eventless_selection_ignores_evented_transitions() {
        let doc = Document::from_json(&json!({
            "initial": "a",
            "states": [
                {"kind": "state", "id": "a", "transitions": [
                    {"event": "go", "target": "b"},
                    {"cond": "ready", "target": "b"}
                ]},
                {"kind": "state", "id": "b"}
            ]
        }))
        .unwrap();

        let config = activate(&doc, &["a"]);
        let mut data = DataModel::new();

        let outcome = select(&doc, &config, &data, None);
        assert!(outcome.transitions.is_empty());

        data.declare("ready", json!(true));
        let outcome = select(&doc, &config, &data, None);
        assert_eq!(outcome.transitions.len(), 1);
    }

    #[test]
    fn test_failed_condition_raises_error_event() {
        let doc = Document::from_json(&json!({
            "initial": "a",
            "states": [
                {"kind": "state", "id": "a", "transitions": [
                    {"event": "go", "cond": "x +", "target": "b"},
                    {"event": "go", "target": "b"}
                ]},
                {"kind": "state", "id": "b"}
            ]
        }))
        .unwrap();

        let config = activate(&doc, &["a"]);
        let data = DataModel::new();

        let outcome = select(&doc, &config, &data, Some(&Event::external("go", json!(null))));
        // The broken condition counts as false; the next transition on the
        // same node fires instead, and the failure surfaces as an event.
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(outcome.raised.len(), 1);
        assert_eq!(outcome.raised[0].name, "error.execution");
    }

    #[test]
    fn test_targetless_transitions_do_not_conflict() {
        let doc = Document::from_json(&json!({
            "initial": "outer",
            "states": [
                {"kind": "state", "id": "outer", "initial": "inner",
                 "transitions": [{"event": "ping", "actions": [
                     {"action": "raise", "event": "pong"}
                 ]}],
                 "states": [
                    {"kind": "state", "id": "inner",
                     "transitions": [{"event": "ping"}]}
                ]}
            ]
        }))
        .unwrap();

        let config = activate(&doc, &["outer", "inner"]);
        let data = DataModel::new();

        let outcome = select(&doc, &config, &data, Some(&Event::external("ping", json!(null))));
        assert_eq!(outcome.transitions.len(), 2);
    }

    #[test]
    fn test_internal_transition_domain_is_source() {
        let doc = Document::from_json(&json!({
            "initial": "c",
            "states": [
                {"kind": "state", "id": "c", "initial": "x",
                 "transitions": [{"event": "go", "target": "y", "type": "internal"}],
                 "states": [
                    {"kind": "state", "id": "x"},
                    {"kind": "state", "id": "y"}
                ]}
            ]
        }))
        .unwrap();

        let c = doc.resolve("c").unwrap();
        let tid = doc.node(c).transitions[0];
        let history = HistoryStore::new();

        assert_eq!(transition_domain(&doc, &history, doc.transition(tid)), Some(c));

        // The internal domain keeps the source out of the exit set.
        let config = activate(&doc, &["c", "x"]);
        let exit = compute_exit_set(&doc, &config, &history, &[tid]);
        assert!(exit.contains(&doc.resolve("x").unwrap()));
        assert!(!exit.contains(&c));
    }

    #[test]
    fn test_history_substitution_in_targets() {
        let doc = Document::from_json(&json!({
            "initial": "main",
            "states": [
                {"kind": "state", "id": "main", "initial": "one", "states": [
                    {"kind": "history", "id": "h", "transition": {"target": "one"}},
                    {"kind": "state", "id": "one"},
                    {"kind": "state", "id": "two"}
                ]},
                {"kind": "state", "id": "away", "transitions": [
                    {"event": "back", "target": "h"}
                ]}
            ]
        }))
        .unwrap();

        let h = doc.resolve("h").unwrap();
        let away = doc.resolve("away").unwrap();
        let tid = doc.node(away).transitions[0];

        let mut history = HistoryStore::new();
        assert_eq!(
            effective_targets(&doc, &history, doc.transition(tid)),
            vec![doc.resolve("one").unwrap()]
        );

        history.record(h, vec![doc.resolve("two").unwrap()]);
        assert_eq!(
            effective_targets(&doc, &history, doc.transition(tid)),
            vec![doc.resolve("two").unwrap()]
        );
    }
}
