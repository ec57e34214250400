//! Observer fan-out and timing emission around real context flow.
//!
//! The observer bus and timing listeners are process-global, so these
//! tests serialize behind a lock.

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use ambit_core::testing::{
    CollectingTimings, PanickingObserver, RecordingObserver, TagManager, TextManager,
};
use ambit_core::{
    ContextOp, Runtime, clear_observers, clear_timing_listeners, register_observer,
    register_timing_listener,
};

static GLOBAL_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

#[test]
fn observers_see_activations_and_deactivations_in_order() {
    let _guard = GLOBAL_LOCK.lock();
    clear_observers();

    let events = Arc::new(Mutex::new(Vec::new()));
    register_observer(Arc::new(RecordingObserver::new(Arc::clone(&events))));

    let outer = TextManager::set("outer");
    let inner = TextManager::set("inner");
    inner.close();
    outer.close();

    let events = events.lock().clone();
    assert_eq!(
        events,
        vec![
            "activate TextManager outer <- none",
            "activate TextManager inner <- outer",
            "deactivate TextManager inner -> outer",
            "deactivate TextManager outer -> none",
        ]
    );
    clear_observers();
}

#[test]
fn a_panicking_observer_never_breaks_context_flow() {
    let _guard = GLOBAL_LOCK.lock();
    clear_observers();

    let events = Arc::new(Mutex::new(Vec::new()));
    register_observer(Arc::new(PanickingObserver));
    register_observer(Arc::new(RecordingObserver::new(Arc::clone(&events))));

    // Activation still succeeds and the well-behaved observer still hears
    // about it.
    let scope = TextManager::set("survives");
    assert_eq!(TextManager::current().as_deref(), Some("survives"));
    scope.close();
    assert_eq!(TextManager::current(), None);

    assert_eq!(events.lock().len(), 2);
    clear_observers();
}

#[test]
fn observers_can_watch_a_single_manager() {
    let _guard = GLOBAL_LOCK.lock();
    clear_observers();

    let events = Arc::new(Mutex::new(Vec::new()));
    register_observer(Arc::new(RecordingObserver::for_manager::<TagManager>(
        Arc::clone(&events),
    )));

    let text = TextManager::set("ignored");
    let tag = TagManager::set("watched");
    tag.close();
    text.close();

    let events = events.lock().clone();
    assert_eq!(
        events,
        vec![
            "activate TagManager watched <- none",
            "deactivate TagManager watched -> none",
        ]
    );
    clear_observers();
}

#[test]
fn out_of_order_closes_notify_only_on_head_changes() {
    let _guard = GLOBAL_LOCK.lock();
    clear_observers();

    let events = Arc::new(Mutex::new(Vec::new()));
    register_observer(Arc::new(RecordingObserver::new(Arc::clone(&events))));

    let first = TextManager::set("A");
    let second = TextManager::set("B");

    // Closing the interior scope changes nothing observable.
    first.close();
    assert_eq!(events.lock().len(), 2, "no deactivation for a tombstone");

    // Closing the head unwinds past the tombstone straight to "no value".
    second.close();
    let events = events.lock().clone();
    assert_eq!(events.last().unwrap(), "deactivate TextManager B -> none");
    assert_eq!(events.len(), 3);
    clear_observers();
}

#[test]
fn capture_and_reactivate_emit_per_manager_and_overall_timing() {
    let _guard = GLOBAL_LOCK.lock();
    clear_timing_listeners();

    let collector = CollectingTimings::new();
    let samples = collector.buffer();
    register_timing_listener(Arc::new(collector));

    let runtime = Runtime::new();
    runtime.register(Arc::new(TextManager)).unwrap();

    let scope = TextManager::set("timed");
    let snapshot = runtime.capture();
    scope.close();
    let reactivation = snapshot.reactivate().unwrap();
    reactivation.close();

    let samples = samples.lock().clone();
    let captures: Vec<_> = samples
        .iter()
        .filter(|(_, op)| *op == ContextOp::Capture)
        .collect();
    let reactivates: Vec<_> = samples
        .iter()
        .filter(|(_, op)| *op == ContextOp::Reactivate)
        .collect();

    // One per-manager sample plus one whole-pass sample for each side.
    assert_eq!(captures.len(), 2);
    assert_eq!(reactivates.len(), 2);
    assert!(captures.iter().any(|(subject, _)| subject == "snapshot"));
    assert!(
        captures
            .iter()
            .any(|(subject, _)| subject.ends_with("TextManager"))
    );

    clear_timing_listeners();
}
