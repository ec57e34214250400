//! The pluggable context manager contract.

use std::any::TypeId;
use std::fmt;

use crate::error::ContextError;
use crate::scope::ContextScope;
use crate::value::AmbientValue;

/// Identity of a [`ContextManager`] implementation.
///
/// Keys the per-thread stacks, observer matching and timing labels. Two
/// manager instances of the same Rust type share one key, and therefore one
/// stack per thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerKey {
    type_id: TypeId,
    name: &'static str,
}

impl ManagerKey {
    /// The key of a concrete manager type.
    #[must_use]
    pub fn of<M: ContextManager>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    /// The `TypeId` of the manager type.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The fully qualified type name of the manager.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The unqualified type name, for log labels.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl fmt::Display for ManagerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A pluggable strategy that knows how to read and push one kind of
/// ambient value.
///
/// Managers are stateless and shared: a single instance serves every
/// thread, so implementations must be safe for concurrent invocation. The
/// per-thread state itself lives either in the shared stack (see
/// [`ScopeStack`](crate::scope::ScopeStack)) or in whatever external store
/// the manager adapts.
///
/// This trait is object-safe so managers can be registered as
/// `Arc<dyn ContextManager>`.
pub trait ContextManager: Send + Sync + 'static {
    /// Identity of this manager. The default derives it from the
    /// implementing type, which is almost always what you want.
    fn key(&self) -> ManagerKey {
        ManagerKey {
            type_id: TypeId::of::<Self>(),
            name: std::any::type_name::<Self>(),
        }
    }

    /// Relative registry priority: lower values are captured and
    /// reactivated earlier. Managers without a declared priority sort
    /// last, in registration order.
    fn priority(&self) -> Option<i32> {
        None
    }

    /// Push `value` as the active context for this manager on the calling
    /// thread.
    ///
    /// The returned scope restores the previous active context for the
    /// same manager on the same thread when it closes. Fails with
    /// [`ContextError::Activation`] if the value is rejected (wrong type,
    /// or the underlying store refuses it).
    fn activate(&self, value: AmbientValue) -> Result<ContextScope, ContextError>;

    /// The value currently active for this manager on the calling thread,
    /// or `None`. Must be free of side effects.
    fn active_value(&self) -> Option<AmbientValue>;

    /// Reset whatever per-thread state this manager keeps beyond the
    /// shared stack.
    ///
    /// Managers built on [`ScopeStack`](crate::scope::ScopeStack) need no
    /// override; managers that mirror into an external store reset that
    /// store here.
    fn clear_thread(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeStack;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct StubManager;

    impl ContextManager for StubManager {
        fn activate(&self, value: AmbientValue) -> Result<ContextScope, ContextError> {
            Ok(ScopeStack::<Self>::push(value))
        }

        fn active_value(&self) -> Option<AmbientValue> {
            ScopeStack::<Self>::active()
        }
    }

    #[test]
    fn default_key_identifies_the_type() {
        let manager = StubManager;
        assert_eq!(manager.key(), ManagerKey::of::<StubManager>());
        assert_eq!(manager.key().short_name(), "StubManager");
        assert!(manager.key().name().ends_with("StubManager"));
    }

    #[test]
    fn default_priority_is_none() {
        assert_eq!(StubManager.priority(), None);
    }

    #[test]
    fn object_safety() {
        let manager: Arc<dyn ContextManager> = Arc::new(StubManager);
        assert_eq!(manager.key(), ManagerKey::of::<StubManager>());
        assert!(manager.active_value().is_none());
    }

    #[test]
    fn display_uses_short_name() {
        assert_eq!(ManagerKey::of::<StubManager>().to_string(), "StubManager");
    }
}
