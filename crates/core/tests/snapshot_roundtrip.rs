//! Snapshot capture and reactivation across threads.

use std::sync::{Arc, Barrier};
use std::thread;

use ambit_core::testing::{RefusingManager, TagManager, TextManager};
use ambit_core::{ContextError, Runtime};

fn runtime_with_text() -> Runtime {
    let runtime = Runtime::new();
    runtime.register(Arc::new(TextManager)).unwrap();
    runtime
}

#[test]
fn values_round_trip_to_another_thread() {
    let runtime = Runtime::new();
    runtime.register(Arc::new(TextManager)).unwrap();
    runtime.register(Arc::new(TagManager::new())).unwrap();

    let text = TextManager::set("Vincent");
    let tag = TagManager::set("request-42");
    let snapshot = runtime.capture();
    tag.close();
    text.close();

    let observed = thread::spawn(move || {
        let reactivation = snapshot.reactivate().unwrap();
        let observed = (TextManager::current(), TagManager::current());
        reactivation.close();
        assert_eq!(TextManager::current(), None);
        assert_eq!(TagManager::current(), None);
        observed
    })
    .join()
    .unwrap();

    assert_eq!(observed.0.as_deref(), Some("Vincent"));
    assert_eq!(observed.1.as_deref(), Some("request-42"));
}

#[test]
fn snapshot_is_unaffected_by_later_mutations() {
    let runtime = runtime_with_text();

    let scope = TextManager::set("original");
    let snapshot = runtime.capture();
    scope.close();
    let _replacement = TextManager::set("mutated");

    let reactivation = snapshot.reactivate().unwrap();
    assert_eq!(TextManager::current().as_deref(), Some("original"));
    reactivation.close();
    assert_eq!(TextManager::current().as_deref(), Some("mutated"));
}

#[test]
fn one_snapshot_reactivates_concurrently_on_many_threads() {
    let runtime = runtime_with_text();

    let scope = TextManager::set("shared");
    let snapshot = runtime.capture();
    scope.close();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let snapshot = snapshot.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let reactivation = snapshot.reactivate().unwrap();
                let observed = TextManager::current();
                reactivation.close();
                assert_eq!(TextManager::current(), None);
                observed
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().as_deref(), Some("shared"));
    }
}

#[test]
fn empty_runtime_snapshot_reactivates_as_a_no_op() {
    let runtime = Runtime::new();

    let snapshot = runtime.capture();
    assert!(snapshot.is_empty());

    let reactivation = snapshot.reactivate().unwrap();
    reactivation.close();

    runtime.clear_active_contexts();
}

#[test]
fn failed_reactivation_rolls_back_in_reverse_order() {
    let runtime = Runtime::new();
    runtime.register(Arc::new(TextManager)).unwrap();
    runtime.register(Arc::new(RefusingManager)).unwrap();

    let text = TextManager::set("will-roll-back");
    let refusing = RefusingManager::set("captured-but-unactivatable");
    let snapshot = runtime.capture();
    refusing.close();
    text.close();

    let err = thread::spawn(move || {
        let err = snapshot.reactivate().unwrap_err();
        // The text scope that was already activated must have been closed
        // again during rollback.
        assert_eq!(TextManager::current(), None);
        err
    })
    .join()
    .unwrap();

    match err {
        ContextError::Reactivation { manager, source } => {
            assert!(manager.ends_with("RefusingManager"));
            assert!(matches!(*source, ContextError::Activation { .. }));
        }
        other => panic!("expected a reactivation error, got {other:?}"),
    }
}

#[test]
fn clear_active_contexts_closes_held_handles() {
    let runtime = runtime_with_text();

    let outer = TextManager::set("outer");
    let inner = TextManager::set("inner");

    runtime.clear_active_contexts();

    assert_eq!(TextManager::current(), None);
    assert!(outer.is_closed());
    assert!(inner.is_closed());
}

#[test]
fn reactivation_nests_over_existing_contexts() {
    let runtime = runtime_with_text();

    let scope = TextManager::set("captured");
    let snapshot = runtime.capture();
    scope.close();

    let local = TextManager::set("local");
    let reactivation = snapshot.reactivate().unwrap();
    assert_eq!(TextManager::current().as_deref(), Some("captured"));
    reactivation.close();
    assert_eq!(TextManager::current().as_deref(), Some("local"));
    local.close();
}
