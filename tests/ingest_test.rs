mod helpers;

use helpers::{engine, run_conversation};
use mnema::engine::message::Role;
use mnema::text::estimate_tokens;

#[test]
fn pipeline_keeps_subsystems_consistent() {
    let mut e = engine();
    let ids = run_conversation(
        &mut e,
        &[
            (Role::User, "Why does the deployment pipeline keep failing?"),
            (
                Role::Assistant,
                "The deployment pipeline fails because the registry credentials expired",
            ),
            (
                Role::User,
                "Decided: rotate the registry credentials automatically every week, final",
            ),
            (
                Role::Assistant,
                "Rotation is configured; the deployment pipeline is green again",
            ),
        ],
    );

    assert_eq!(e.tree().len(), 4);
    assert_eq!(e.graph().len(), 4);
    e.tree().check_invariants().unwrap();

    // Base version 1 plus one commit per message.
    assert_eq!(e.current_version(), 5);

    // Every tree node id is a message id, and each has a causal twin.
    for id in &ids {
        assert!(e.tree().node(id).is_some());
        assert!(e.graph().node(id).is_some());
    }

    // The outbox holds one record per message, versions strictly increasing.
    let changes = e.drain_changes();
    assert_eq!(changes.len(), 4);
    assert!(changes.iter().all(|c| c.record_type == "message"));
    for pair in changes.windows(2) {
        assert!(pair[0].version < pair[1].version);
    }
    assert!(e.drain_changes().is_empty());
}

#[test]
fn answers_link_back_to_their_question() {
    let mut e = engine();
    let ids = run_conversation(
        &mut e,
        &[
            (Role::User, "Why is the websocket connection dropping?"),
            (
                Role::Assistant,
                "The websocket connection drops because the proxy idle timeout is 30s",
            ),
        ],
    );
    let causes = e.graph().causes_of(&ids[1]);
    assert!(causes.iter().any(|edge| edge.from_id == ids[0]));
    assert!(causes.iter().all(|edge| edge.confidence <= 1.0));
}

#[test]
fn context_window_is_chronological_and_within_budget() {
    let mut e = engine();
    run_conversation(
        &mut e,
        &[
            (Role::User, "Let's plan the caching layer for the search service"),
            (Role::Assistant, "The caching layer should sit in front of the query parser"),
            (Role::User, "What eviction policy fits the caching layer best?"),
            (Role::Assistant, "Least-recently-used eviction fits the access pattern"),
            (Role::User, "Decided: LRU eviction with a 10k entry cap, final"),
            (Role::Assistant, "LRU with a 10k cap is wired into the caching layer now"),
        ],
    );

    let budget = 2000;
    let context = e.get_context(10, budget);
    assert!(!context.is_empty());

    for pair in context.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    let used: usize = context.iter().map(|n| estimate_tokens(&n.content)).sum();
    assert!(used <= budget);

    // A tight budget returns strictly fewer (possibly zero) nodes.
    let tight = e.get_context(10, 8);
    assert!(tight.len() < context.len());
}

#[test]
fn rejected_message_leaves_no_trace() {
    let mut e = engine();
    let blank = helpers::msg(Role::User, "   \n  ");
    assert!(e.process_message(&blank, None).is_err());
    assert!(e.tree().is_empty());
    assert!(e.graph().is_empty());
    assert_eq!(e.current_version(), 1);
}
