//! The ordered manager registry.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::ContextError;
use crate::manager::{ContextManager, ManagerKey};
use crate::scope;

static GLOBAL: Lazy<Runtime> = Lazy::new(Runtime::new);

/// Ordered registry of [`ContextManager`]s.
///
/// Snapshots capture managers in registry order: declared priority first
/// (lower is earlier), then registration order for ties and for managers
/// without a priority. The order is deterministic for the lifetime of a
/// cache generation; [`reload`](Runtime::reload) starts a new one.
///
/// Most programs use the process-wide [`Runtime::global`] instance. Tests
/// construct their own runtime to stay isolated from each other.
pub struct Runtime {
    inner: RwLock<Inner>,
}

struct Inner {
    managers: Vec<Registered>,
    generation: u64,
}

#[derive(Clone)]
struct Registered {
    manager: Arc<dyn ContextManager>,
    priority: Option<i32>,
}

impl Inner {
    fn sort(&mut self) {
        // Stable: ties and undeclared priorities keep registration order.
        self.managers
            .sort_by_key(|registered| registered.priority.map_or(i64::MAX, i64::from));
    }

    fn bump(&mut self) {
        self.generation += 1;
    }
}

impl Runtime {
    /// Create an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                managers: Vec::new(),
                generation: 0,
            }),
        }
    }

    /// The process-wide default runtime.
    #[must_use]
    pub fn global() -> &'static Runtime {
        &GLOBAL
    }

    /// Register a manager.
    ///
    /// Fails with [`ContextError::Configuration`] if a manager of the same
    /// type is already registered.
    pub fn register(&self, manager: Arc<dyn ContextManager>) -> Result<(), ContextError> {
        let key = manager.key();
        let mut inner = self.inner.write();
        if inner
            .managers
            .iter()
            .any(|registered| registered.manager.key() == key)
        {
            return Err(ContextError::configuration(format!(
                "context manager '{key}' is already registered"
            )));
        }
        let priority = manager.priority();
        inner.managers.push(Registered { manager, priority });
        inner.sort();
        inner.bump();
        Ok(())
    }

    /// Register a manager, replacing any previous manager of the same
    /// type.
    pub fn register_or_replace(&self, manager: Arc<dyn ContextManager>) {
        let key = manager.key();
        let mut inner = self.inner.write();
        inner
            .managers
            .retain(|registered| registered.manager.key() != key);
        let priority = manager.priority();
        inner.managers.push(Registered { manager, priority });
        inner.sort();
        inner.bump();
    }

    /// Remove the manager with the given key. Returns whether one was
    /// registered.
    pub fn unregister(&self, key: ManagerKey) -> bool {
        let mut inner = self.inner.write();
        let before = inner.managers.len();
        inner
            .managers
            .retain(|registered| registered.manager.key() != key);
        let removed = inner.managers.len() != before;
        if removed {
            inner.bump();
        }
        removed
    }

    /// The registered managers, in capture order.
    ///
    /// The returned list is a stable copy: later registry mutations do not
    /// affect it, making it safely re-enumerable.
    #[must_use]
    pub fn managers(&self) -> Vec<Arc<dyn ContextManager>> {
        self.inner
            .read()
            .managers
            .iter()
            .map(|registered| Arc::clone(&registered.manager))
            .collect()
    }

    /// Drop every registered manager and start a new cache generation.
    /// Intended for tests that re-register from scratch.
    pub fn reload(&self) {
        let mut inner = self.inner.write();
        inner.managers.clear();
        inner.bump();
    }

    /// Monotonic counter, bumped on every registry mutation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Number of registered managers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().managers.len()
    }

    /// Whether no managers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().managers.is_empty()
    }

    /// Close every active context of every registered manager on the
    /// calling thread, even for scopes that callers still hold handles to,
    /// and ask each manager to reset any external per-thread state.
    ///
    /// Other threads are unaffected. Useful when returning a thread to a
    /// pool.
    pub fn clear_active_contexts(&self) {
        for manager in self.managers() {
            scope::clear_stack(manager.key());
            manager.clear_thread();
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Runtime")
            .field("count", &inner.managers.len())
            .field("generation", &inner.generation)
            .field(
                "managers",
                &inner
                    .managers
                    .iter()
                    .map(|registered| registered.manager.key().short_name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ContextScope, ScopeStack};
    use crate::value::AmbientValue;

    macro_rules! stacked_manager {
        ($name:ident, $priority:expr) => {
            #[derive(Debug, Default)]
            struct $name;

            impl ContextManager for $name {
                fn priority(&self) -> Option<i32> {
                    $priority
                }

                fn activate(
                    &self,
                    value: AmbientValue,
                ) -> Result<ContextScope, ContextError> {
                    Ok(ScopeStack::<Self>::push(value))
                }

                fn active_value(&self) -> Option<AmbientValue> {
                    ScopeStack::<Self>::active()
                }
            }
        };
    }

    stacked_manager!(First, Some(10));
    stacked_manager!(Second, Some(20));
    stacked_manager!(Unranked, None);
    stacked_manager!(Early, Some(-5));

    fn keys(runtime: &Runtime) -> Vec<&'static str> {
        runtime
            .managers()
            .iter()
            .map(|manager| manager.key().short_name())
            .collect()
    }

    #[test]
    fn priority_orders_lower_first_and_unranked_last() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(Unranked)).unwrap();
        runtime.register(Arc::new(Second)).unwrap();
        runtime.register(Arc::new(First)).unwrap();
        runtime.register(Arc::new(Early)).unwrap();

        assert_eq!(keys(&runtime), vec!["Early", "First", "Second", "Unranked"]);
    }

    #[test]
    fn duplicate_registration_is_a_configuration_error() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(First)).unwrap();
        let err = runtime.register(Arc::new(First)).unwrap_err();
        assert!(matches!(err, ContextError::Configuration { .. }));
        assert_eq!(runtime.len(), 1);
    }

    #[test]
    fn register_or_replace_keeps_one_instance() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(First)).unwrap();
        runtime.register_or_replace(Arc::new(First));
        assert_eq!(runtime.len(), 1);
    }

    #[test]
    fn unregister() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(First)).unwrap();
        assert!(runtime.unregister(ManagerKey::of::<First>()));
        assert!(!runtime.unregister(ManagerKey::of::<First>()));
        assert!(runtime.is_empty());
    }

    #[test]
    fn reload_starts_a_new_generation() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(First)).unwrap();
        let generation = runtime.generation();

        runtime.reload();
        assert!(runtime.is_empty());
        assert!(runtime.generation() > generation);
    }

    #[test]
    fn managers_returns_a_stable_copy() {
        let runtime = Runtime::new();
        runtime.register(Arc::new(First)).unwrap();
        let copy = runtime.managers();

        runtime.reload();
        assert_eq!(copy.len(), 1);
        assert!(runtime.is_empty());
    }
}
