mod helpers;

use helpers::{engine, msg};
use mnema::engine::message::Role;

#[test]
fn exact_repeat_is_flagged_but_still_recorded() {
    let mut e = engine();
    let first = msg(Role::User, "deploy the service with the blue-green strategy");
    let second = msg(Role::User, "deploy the service with the blue-green strategy");

    let r1 = e.process_message(&first, None).unwrap();
    assert!(!r1.duplicate);

    let r2 = e.process_message(&second, None).unwrap();
    assert!(r2.duplicate);
    assert_eq!(r2.fingerprint, r1.fingerprint);

    // The transcript stays faithful: both messages live in the tree.
    assert_eq!(e.tree().len(), 2);
}

#[test]
fn reordered_words_are_near_duplicates() {
    let mut e = engine();
    let a = msg(Role::User, "the cache invalidation bug is fixed now");
    let b = msg(Role::User, "now the cache invalidation bug is fixed");

    e.process_message(&a, None).unwrap();
    let result = e.process_message(&b, None).unwrap();
    assert!(result.duplicate);
}

#[test]
fn unrelated_content_is_not_flagged() {
    let mut e = engine();
    let a = msg(Role::User, "ok");
    let b = msg(
        Role::Assistant,
        "fn main() { let mut counter = 0; counter += 1; println!(\"{counter}\"); }",
    );

    e.process_message(&a, None).unwrap();
    let result = e.process_message(&b, None).unwrap();
    assert!(!result.duplicate);
}

#[test]
fn fingerprints_are_stable_across_engines() {
    let mut e1 = engine();
    let mut e2 = engine();
    let text = "structured logging with spans beats bare printf debugging";
    let r1 = e1.process_message(&msg(Role::User, text), None).unwrap();
    let r2 = e2.process_message(&msg(Role::User, text), None).unwrap();
    assert_eq!(r1.fingerprint, r2.fingerprint);
}
