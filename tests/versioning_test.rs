mod helpers;

use helpers::{engine, run_conversation};
use mnema::engine::message::Role;
use mnema::error::EngineError;

#[test]
fn reconstruct_head_matches_tree_size() {
    let mut e = engine();
    run_conversation(
        &mut e,
        &[
            (Role::User, "How should the indexer shard its postings lists?"),
            (
                Role::Assistant,
                "The indexer should shard postings lists by term prefix for locality",
            ),
            (Role::User, "Decided: shard the postings lists by term prefix, final"),
        ],
    );

    let head = e.reconstruct(e.current_version()).unwrap();
    // Flattened state holds every message node plus the synthetic root.
    assert_eq!(head.len(), e.tree().len() + 1);
}

#[test]
fn previous_version_has_one_fewer_node() {
    let mut e = engine();
    run_conversation(
        &mut e,
        &[
            (
                Role::User,
                "The migration runner applies schema changes out of order sometimes",
            ),
            (
                Role::Assistant,
                "The migration runner sorts by filename; zero-pad the migration numbers",
            ),
            (
                Role::User,
                "Zero-padding the migration numbers fixed the runner ordering, confirmed",
            ),
            (
                Role::Assistant,
                "Good; the migration runner now applies schema changes deterministically",
            ),
        ],
    );

    let current = e.current_version();
    let head = e.reconstruct(current).unwrap();
    let before = e.reconstruct(current - 1).unwrap();
    assert_eq!(head.len(), before.len() + 1);
}

#[test]
fn out_of_range_versions_error() {
    let mut e = engine();
    run_conversation(&mut e, &[(Role::User, "just one message in this stream")]);

    assert!(matches!(
        e.reconstruct(0),
        Err(EngineError::VersionOutOfRange { .. })
    ));
    assert!(matches!(
        e.reconstruct(e.current_version() + 1),
        Err(EngineError::VersionOutOfRange { .. })
    ));
}

#[test]
fn long_conversations_collapse_but_stay_reconstructible() {
    let mut e = engine();
    let max_chain = e.config().versioning.max_patch_chain_length;

    for i in 0..(max_chain + 10) {
        let m = helpers::msg(
            Role::User,
            &format!("progress update number {i} on the ingestion backlog"),
        );
        e.process_message(&m, None).unwrap();
    }

    // Versions never stop advancing, and the head is always reachable.
    assert_eq!(e.current_version() as usize, max_chain + 10 + 1);
    let head = e.reconstruct(e.current_version()).unwrap();
    assert_eq!(head.len(), e.tree().len() + 1);
}

#[test]
fn explicit_snapshot_bumps_the_version() {
    let mut e = engine();
    run_conversation(&mut e, &[(Role::User, "note the current state before the risky step")]);
    let before = e.current_version();
    let commit = e.snapshot().unwrap();
    assert_eq!(commit.version, before + 1);
    assert_eq!(e.current_version(), before + 1);
}
