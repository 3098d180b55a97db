//! End-to-end pipeline behavior: locking, error writeback, state
//! transitions, reconciler fan-out.

mod helpers;

use std::sync::Arc;

use chrono::Utc;
use helpers::{HOST_ID, RULE_ID, RecordingReconciler, Setup, cond, macro_path};
use rdisco_core::{
    ConfigCache, EvalType, ProcessStatus, RuleState,
};

const PAYLOAD: &str = r#"[{"{#IFNAME}": "eth0"}, {"{#IFNAME}": "lo"}]"#;

#[test]
fn contended_rule_drops_the_value() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#IFNAME}", "^eth")]);

    // another worker holds the claim
    assert!(setup.cache.try_lock_rule(RULE_ID));

    let processor = setup.processor();
    assert_eq!(
        processor.process(RULE_ID, PAYLOAD, Utc::now()),
        ProcessStatus::Locked
    );
    assert!(setup.catalog.updates().is_empty());
    assert!(setup.cache.applied_diffs().is_empty());

    // the loser must not have released the other worker's claim
    assert!(!setup.cache.try_lock_rule(RULE_ID));
    setup.cache.unlock_rule(RULE_ID);

    assert_eq!(
        processor.process(RULE_ID, PAYLOAD, Utc::now()),
        ProcessStatus::Completed
    );
}

#[test]
fn unknown_rule_aborts_without_writeback() {
    let setup = Setup::new(EvalType::AndOr, "");
    let processor = setup.processor();

    assert_eq!(
        processor.process(999_999, PAYLOAD, Utc::now()),
        ProcessStatus::UnknownRule
    );
    assert!(setup.catalog.updates().is_empty());

    // the claim was released on the way out
    assert!(setup.cache.try_lock_rule(999_999));
}

#[test]
fn successful_run_clears_stored_error() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.set_rule(RuleState::Normal, "previous failure", EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#IFNAME}", "^eth")]);

    let processor = setup.processor();
    processor.process(RULE_ID, PAYLOAD, Utc::now());

    assert_eq!(setup.stored_error(), "");
    let diffs = setup.cache.applied_diffs();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].error.as_deref(), Some(""));
}

#[test]
fn unknown_named_expression_skips_reconcilers_and_persists_error() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#IFNAME}", "@nosuch")]);

    let reconciler = Arc::new(RecordingReconciler::default());
    let processor = setup.processor_with(Arc::clone(&reconciler));

    assert_eq!(
        processor.process(RULE_ID, PAYLOAD, Utc::now()),
        ProcessStatus::Completed
    );

    assert!(reconciler.calls().is_empty());
    assert_eq!(
        setup.stored_error(),
        "Global regular expression \"nosuch\" does not exist."
    );
}

#[test]
fn bad_macro_path_persists_diagnostic() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#NAME}", ".*")]);
    setup.macro_paths(vec![macro_path("{#NAME}", "metadata.name")]);

    let processor = setup.processor();
    processor.process(RULE_ID, PAYLOAD, Utc::now());

    let error = setup.stored_error();
    assert!(
        error.starts_with("Cannot process LLD macro \"{#NAME}\":"),
        "{error}"
    );
}

#[test]
fn malformed_payload_persists_error() {
    let setup = Setup::new(EvalType::AndOr, "");
    let processor = setup.processor();

    processor.process(RULE_ID, "\"scalar\"", Utc::now());
    assert_eq!(setup.stored_error(), "Value should be a JSON array.");

    processor.process(RULE_ID, r#"{"items": []}"#, Utc::now());
    assert_eq!(
        setup.stored_error(),
        "Cannot find the \"data\" array in the received JSON object."
    );
}

#[test]
fn missing_macro_warning_reaches_stored_error() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#X}", ".*")]);

    let processor = setup.processor();
    processor.process(RULE_ID, r#"[{"{#Y}": "a"}]"#, Utc::now());

    let error = setup.stored_error();
    assert!(
        error.contains("no value received for macro \"{#X}\""),
        "{error}"
    );

    // identical second run changes nothing, so no second update
    let before = setup.catalog.updates().len();
    processor.process(RULE_ID, r#"[{"{#Y}": "a"}]"#, Utc::now());
    assert_eq!(setup.catalog.updates().len(), before);
}

#[test]
fn became_supported_emits_event_and_updates_state() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.set_rule(RuleState::NotSupported, "prev", EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#IFNAME}", "^eth")]);

    let processor = setup.processor();
    processor.process(RULE_ID, PAYLOAD, Utc::now());

    assert_eq!(setup.stored_state(), RuleState::Normal);
    assert_eq!(setup.stored_error(), "");

    let events = setup.events.processed();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].object_id, RULE_ID);
    assert_eq!(events[0].state, RuleState::Normal);

    let updates = setup.catalog.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].state, Some(RuleState::Normal));
    assert_eq!(updates[0].error.as_deref(), Some(""));

    // second identical invocation is a no-op: state already normal, error
    // unchanged, no further event
    processor.process(RULE_ID, PAYLOAD, Utc::now());
    assert_eq!(setup.catalog.updates().len(), 1);
    assert_eq!(setup.events.processed().len(), 1);
}

#[test]
fn load_failure_does_not_transition_state() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.set_rule(RuleState::NotSupported, "", EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#A}", "@nosuch")]);

    let processor = setup.processor();
    processor.process(RULE_ID, PAYLOAD, Utc::now());

    assert_eq!(setup.stored_state(), RuleState::NotSupported);
    assert!(setup.events.processed().is_empty());
    assert!(!setup.stored_error().is_empty());
}

#[test]
fn reconcilers_run_in_fixed_order_with_surviving_rows() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#IFNAME}", "^eth")]);

    let reconciler = Arc::new(RecordingReconciler::default());
    let processor = setup.processor_with(Arc::clone(&reconciler));
    processor.process(RULE_ID, PAYLOAD, Utc::now());

    assert_eq!(reconciler.calls(), vec!["items", "triggers", "graphs", "hosts"]);
    // only eth0 survived the filter
    assert_eq!(reconciler.row_counts(), vec![1]);
    // links handed out by the item stage were sorted before triggers ran
    assert_eq!(
        *reconciler.links_sorted_at_triggers.lock().unwrap(),
        Some(true)
    );
}

#[test]
fn parent_host_gone_skips_rest_but_still_writes_back() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.set_rule(RuleState::NotSupported, "prev", EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#IFNAME}", "^eth")]);

    let reconciler = Arc::new(RecordingReconciler {
        fail_items: true,
        ..RecordingReconciler::default()
    });
    let processor = setup.processor_with(Arc::clone(&reconciler));
    processor.process(RULE_ID, PAYLOAD, Utc::now());

    assert_eq!(reconciler.calls(), vec!["items"]);
    // extraction finished, so the transition and the writeback still happen
    assert_eq!(setup.stored_state(), RuleState::Normal);
    assert_eq!(setup.stored_error(), "");
    assert_eq!(setup.events.processed().len(), 1);
}

#[test]
fn reconciler_error_text_is_persisted() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#IFNAME}", "^eth")]);

    let reconciler = Arc::new(RecordingReconciler {
        item_error: Some("Cannot create item: key already used.\n".to_string()),
        ..RecordingReconciler::default()
    });
    let processor = setup.processor_with(Arc::clone(&reconciler));
    processor.process(RULE_ID, PAYLOAD, Utc::now());

    assert_eq!(
        setup.stored_error(),
        "Cannot create item: key already used.\n"
    );
}

#[test]
fn lock_is_released_after_completion() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.conditions(vec![cond(1, "{#IFNAME}", "^eth")]);

    let processor = setup.processor();
    processor.process(RULE_ID, PAYLOAD, Utc::now());

    assert!(setup.cache.try_lock_rule(RULE_ID));
    setup.cache.unlock_rule(RULE_ID);
}

#[test]
fn invalid_lifetime_is_clamped_not_fatal() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.catalog.insert_rule(
        RULE_ID,
        rdisco_core::RuleRecord {
            host_id: HOST_ID,
            key: "disc".to_string(),
            state: RuleState::Normal,
            evaltype: EvalType::AndOr,
            formula: String::new(),
            error: String::new(),
            lifetime: "{$UNDEFINED}".to_string(),
        },
    );
    setup.conditions(vec![cond(1, "{#IFNAME}", "^eth")]);

    let processor = setup.processor();
    assert_eq!(
        processor.process(RULE_ID, PAYLOAD, Utc::now()),
        ProcessStatus::Completed
    );
    assert_eq!(setup.stored_error(), "");
}

#[test]
fn user_macro_in_lifetime_is_expanded() {
    let setup = Setup::new(EvalType::AndOr, "");
    setup.cache.set_user_macro(HOST_ID, "{$KEEP}", "7d");
    setup.catalog.insert_rule(
        RULE_ID,
        rdisco_core::RuleRecord {
            host_id: HOST_ID,
            key: "disc".to_string(),
            state: RuleState::Normal,
            evaltype: EvalType::AndOr,
            formula: String::new(),
            error: String::new(),
            lifetime: "{$KEEP}".to_string(),
        },
    );

    let processor = setup.processor();
    assert_eq!(
        processor.process(RULE_ID, "[]", Utc::now()),
        ProcessStatus::Completed
    );
}
