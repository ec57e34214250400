//! Capture-all / reactivate-all across the registered managers.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::error::ContextError;
use crate::manager::ContextManager;
use crate::runtime::Runtime;
use crate::scope::ContextScope;
use crate::timing::{self, ContextOp, SNAPSHOT_SUBJECT};
use crate::value::AmbientValue;

#[derive(Clone)]
struct Captured {
    manager: Arc<dyn ContextManager>,
    value: Option<AmbientValue>,
}

/// An immutable capture of every registered manager's active value at one
/// instant on one thread.
///
/// Snapshots are `Send + Sync`, independent of the capturing thread, and
/// may be reactivated any number of times, on any thread, concurrently.
/// Mutating a manager's active value after the capture does not change
/// what the snapshot contains.
///
/// Capture order equals reactivation order (the registry's priority
/// order); this is the only ordering guarantee between managers.
#[derive(Clone)]
pub struct ContextSnapshot {
    entries: Arc<[Captured]>,
}

impl ContextSnapshot {
    pub(crate) fn capture_from(runtime: &Runtime) -> Self {
        let overall = Instant::now();
        let entries: Vec<Captured> = runtime
            .managers()
            .into_iter()
            .map(|manager| {
                let start = Instant::now();
                let value = manager.active_value();
                timing::record(manager.key().name(), ContextOp::Capture, start.elapsed());
                Captured { manager, value }
            })
            .collect();
        timing::record(SNAPSHOT_SUBJECT, ContextOp::Capture, overall.elapsed());
        Self {
            entries: entries.into(),
        }
    }

    /// Number of managers captured, with or without an active value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no managers were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-read the active values of the same managers this snapshot
    /// captured, in the same order.
    ///
    /// This is how take-new-snapshot future chains carry mutations onward
    /// without reaching for a global registry. Managers registered after
    /// the original capture are not included.
    #[must_use]
    pub fn refresh(&self) -> ContextSnapshot {
        let overall = Instant::now();
        let entries: Vec<Captured> = self
            .entries
            .iter()
            .map(|captured| {
                let start = Instant::now();
                let value = captured.manager.active_value();
                timing::record(
                    captured.manager.key().name(),
                    ContextOp::Capture,
                    start.elapsed(),
                );
                Captured {
                    manager: Arc::clone(&captured.manager),
                    value,
                }
            })
            .collect();
        timing::record(SNAPSHOT_SUBJECT, ContextOp::Capture, overall.elapsed());
        Self {
            entries: entries.into(),
        }
    }

    /// Re-establish every captured value on the calling thread.
    ///
    /// Returns a composite handle that restores all prior values when it
    /// closes. Managers captured without a value are skipped. If a manager
    /// fails to activate partway through, every scope already activated is
    /// closed again in reverse order and the failure is surfaced as
    /// [`ContextError::Reactivation`].
    pub fn reactivate(&self) -> Result<Reactivation, ContextError> {
        let overall = Instant::now();
        let mut scopes = Vec::with_capacity(self.entries.len());
        for captured in self.entries.iter() {
            let Some(value) = &captured.value else {
                continue;
            };
            let key = captured.manager.key();
            let start = Instant::now();
            match captured.manager.activate(AmbientValue::clone(value)) {
                Ok(scope) => {
                    timing::record(key.name(), ContextOp::Reactivate, start.elapsed());
                    scopes.push(scope);
                }
                Err(error) => {
                    for scope in scopes.iter().rev() {
                        scope.close();
                    }
                    return Err(ContextError::Reactivation {
                        manager: key.name(),
                        source: Box::new(error),
                    });
                }
            }
        }
        timing::record(SNAPSHOT_SUBJECT, ContextOp::Reactivate, overall.elapsed());
        Ok(Reactivation {
            scopes,
            closed: Cell::new(false),
        })
    }
}

impl fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for captured in self.entries.iter() {
            list.entry(
                &captured.manager.key().short_name(),
                &captured.value.is_some(),
            );
        }
        list.finish()
    }
}

/// Composite handle owning one scope per captured value, in activation
/// order.
///
/// Closing closes each contained scope exactly once, in reverse order;
/// close is idempotent and also happens on drop. Like the scopes it
/// contains, a reactivation is bound to the thread that created it.
/// Failing to close one leaks the captured values into the worker thread
/// until they are cleared or overwritten.
pub struct Reactivation {
    scopes: Vec<ContextScope>,
    closed: Cell<bool>,
}

impl Reactivation {
    /// Close every contained scope, most recent first. No-op after the
    /// first call.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        for scope in self.scopes.iter().rev() {
            scope.close();
        }
    }

    /// Whether [`close`](Reactivation::close) already ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Drop for Reactivation {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Reactivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactivation")
            .field("scopes", &self.scopes.len())
            .field("closed", &self.closed.get())
            .finish()
    }
}

impl Runtime {
    /// Capture the active value of every registered manager, in registry
    /// order.
    #[must_use]
    pub fn capture(&self) -> ContextSnapshot {
        ContextSnapshot::capture_from(self)
    }
}

/// Capture a snapshot from the [global runtime](Runtime::global).
#[must_use]
pub fn capture() -> ContextSnapshot {
    Runtime::global().capture()
}

/// Close every active context on the calling thread, for the
/// [global runtime](Runtime::global)'s managers.
pub fn clear_active_contexts() {
    Runtime::global().clear_active_contexts()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TextManager;

    #[test]
    fn empty_runtime_snapshot_round_trips() {
        let runtime = Runtime::new();
        let snapshot = runtime.capture();
        assert!(snapshot.is_empty());

        let reactivation = snapshot.reactivate().unwrap();
        reactivation.close();
        assert!(reactivation.is_closed());
    }

    #[test]
    fn snapshot_is_independent_of_later_mutations() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(TextManager)).unwrap();

        let scope = TextManager::set("before");
        let snapshot = runtime.capture();
        scope.close();

        let _other = TextManager::set("after");
        let reactivation = snapshot.reactivate().unwrap();
        assert_eq!(TextManager::current().as_deref(), Some("before"));
        reactivation.close();
        assert_eq!(TextManager::current().as_deref(), Some("after"));
    }

    #[test]
    fn reactivation_close_is_idempotent() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(TextManager)).unwrap();

        let scope = TextManager::set("value");
        let snapshot = runtime.capture();
        scope.close();

        let reactivation = snapshot.reactivate().unwrap();
        reactivation.close();
        reactivation.close();
        assert_eq!(TextManager::current(), None);
    }

    #[test]
    fn refresh_re_reads_the_same_managers() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(TextManager)).unwrap();

        let scope = TextManager::set("first");
        let snapshot = runtime.capture();
        scope.close();

        let scope = TextManager::set("second");
        let refreshed = snapshot.refresh();
        scope.close();

        let reactivation = refreshed.reactivate().unwrap();
        assert_eq!(TextManager::current().as_deref(), Some("second"));
        drop(reactivation);
    }

    #[test]
    fn clear_active_contexts_affects_only_registered_managers() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(TextManager)).unwrap();

        let scope = TextManager::set("lingering");
        runtime.clear_active_contexts();
        assert_eq!(TextManager::current(), None);
        assert!(scope.is_closed());
    }
}
