//! Fan-out of activate/deactivate events to registered observers.
//!
//! The bus is process-global and ordered: observers are notified in
//! registration order, skipped for managers they do not observe, and a
//! panicking observer is logged at warning level and swallowed: an
//! observer must never break context flow.

use std::any::TypeId;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::manager::ManagerKey;
use crate::value::AmbientValue;

/// Observer of context activations and deactivations.
pub trait ContextObserver: Send + Sync + 'static {
    /// The manager type to observe, or `None` to observe every manager.
    fn observed_manager(&self) -> Option<TypeId>;

    /// A value became the active context for `manager` on some thread.
    /// `previous` is the value it shadowed, if known.
    fn on_activate(
        &self,
        manager: ManagerKey,
        activated: &AmbientValue,
        previous: Option<&AmbientValue>,
    );

    /// An active context was closed. `restored` is the value that became
    /// active again, if any.
    fn on_deactivate(
        &self,
        manager: ManagerKey,
        deactivated: &AmbientValue,
        restored: Option<&AmbientValue>,
    );
}

static OBSERVERS: Lazy<RwLock<Vec<Arc<dyn ContextObserver>>>> =
    Lazy::new(|| RwLock::new(Vec::new()));

/// Register an observer on the global bus.
///
/// Observers are notified in registration order, stably across
/// reactivations.
pub fn register_observer(observer: Arc<dyn ContextObserver>) {
    OBSERVERS.write().push(observer);
}

/// Remove every registered observer. Intended for tests.
pub fn clear_observers() {
    OBSERVERS.write().clear();
}

/// Observers matching `manager`, cloned out so no lock is held while they
/// run (an observer may itself activate contexts or register observers).
fn matching(manager: ManagerKey) -> Vec<Arc<dyn ContextObserver>> {
    let observers = OBSERVERS.read();
    if observers.is_empty() {
        return Vec::new();
    }
    observers
        .iter()
        .filter(|observer| {
            observer
                .observed_manager()
                .is_none_or(|observed| observed == manager.type_id())
        })
        .cloned()
        .collect()
}

pub(crate) fn notify_activate(
    manager: ManagerKey,
    activated: &AmbientValue,
    previous: Option<&AmbientValue>,
) {
    for observer in matching(manager) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            observer.on_activate(manager, activated, previous);
        }));
        if outcome.is_err() {
            tracing::warn!(manager = %manager, "context observer panicked in on_activate; continuing");
        }
    }
}

pub(crate) fn notify_deactivate(
    manager: ManagerKey,
    deactivated: &AmbientValue,
    restored: Option<&AmbientValue>,
) {
    for observer in matching(manager) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            observer.on_deactivate(manager, deactivated, restored);
        }));
        if outcome.is_err() {
            tracing::warn!(manager = %manager, "context observer panicked in on_deactivate; continuing");
        }
    }
}
