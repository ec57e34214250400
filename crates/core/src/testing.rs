//! Test support: trivial managers and recording plug-ins.
//!
//! Used by the test suites of every ambit crate. Nothing here is intended
//! for production code.

use std::any::TypeId;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ContextError;
use crate::manager::{ContextManager, ManagerKey};
use crate::observer::ContextObserver;
use crate::scope::{ContextScope, ScopeStack};
use crate::timing::{ContextOp, TimingListener};
use crate::value::{AmbientValue, ambient, value_of};

/// String-valued manager backed by the shared per-thread stack.
#[derive(Debug, Default)]
pub struct TextManager;

impl TextManager {
    /// Activate `text` on the calling thread.
    #[must_use = "dropping the scope immediately closes it again"]
    pub fn set(text: impl Into<String>) -> ContextScope {
        ScopeStack::<Self>::push(ambient(text.into()))
    }

    /// The active text on the calling thread.
    #[must_use]
    pub fn current() -> Option<String> {
        ScopeStack::<Self>::active().and_then(|value| value_of::<String>(&value).cloned())
    }
}

impl ContextManager for TextManager {
    fn activate(&self, value: AmbientValue) -> Result<ContextScope, ContextError> {
        if value_of::<String>(&value).is_none() {
            return Err(ContextError::activation(
                std::any::type_name::<Self>(),
                "expected a String value",
            ));
        }
        Ok(ScopeStack::<Self>::push(value))
    }

    fn active_value(&self) -> Option<AmbientValue> {
        ScopeStack::<Self>::active()
    }
}

/// A second stacked string manager, for multi-manager and priority tests.
#[derive(Debug, Default)]
pub struct TagManager {
    priority: Option<i32>,
}

impl TagManager {
    /// A tag manager without a declared priority.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tag manager with the given registry priority.
    #[must_use]
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority: Some(priority),
        }
    }

    /// Activate `tag` on the calling thread.
    #[must_use = "dropping the scope immediately closes it again"]
    pub fn set(tag: impl Into<String>) -> ContextScope {
        ScopeStack::<Self>::push(ambient(tag.into()))
    }

    /// The active tag on the calling thread.
    #[must_use]
    pub fn current() -> Option<String> {
        ScopeStack::<Self>::active().and_then(|value| value_of::<String>(&value).cloned())
    }
}

impl ContextManager for TagManager {
    fn priority(&self) -> Option<i32> {
        self.priority
    }

    fn activate(&self, value: AmbientValue) -> Result<ContextScope, ContextError> {
        if value_of::<String>(&value).is_none() {
            return Err(ContextError::activation(
                std::any::type_name::<Self>(),
                "expected a String value",
            ));
        }
        Ok(ScopeStack::<Self>::push(value))
    }

    fn active_value(&self) -> Option<AmbientValue> {
        ScopeStack::<Self>::active()
    }
}

/// Manager that rejects every activation; for rollback tests.
#[derive(Debug, Default)]
pub struct RefusingManager;

impl RefusingManager {
    /// Pretend something is active so snapshots capture a value.
    #[must_use = "dropping the scope immediately closes it again"]
    pub fn set(text: impl Into<String>) -> ContextScope {
        ScopeStack::<Self>::push(ambient(text.into()))
    }
}

impl ContextManager for RefusingManager {
    fn activate(&self, _value: AmbientValue) -> Result<ContextScope, ContextError> {
        Err(ContextError::activation(
            std::any::type_name::<Self>(),
            "this manager refuses every value",
        ))
    }

    fn active_value(&self) -> Option<AmbientValue> {
        ScopeStack::<Self>::active()
    }
}

/// Observer that records every event as a compact line, e.g.
/// `"activate TextManager Vincent <- none"`.
pub struct RecordingObserver {
    target: Option<TypeId>,
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingObserver {
    /// Observe every manager, recording into `events`.
    #[must_use]
    pub fn new(events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            target: None,
            events,
        }
    }

    /// Observe only manager type `M`.
    #[must_use]
    pub fn for_manager<M: ContextManager>(events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            target: Some(TypeId::of::<M>()),
            events,
        }
    }
}

fn text(value: &AmbientValue) -> &str {
    value_of::<String>(value).map_or("<opaque>", String::as_str)
}

fn opt_text(value: Option<&AmbientValue>) -> &str {
    value.map_or("none", text)
}

impl ContextObserver for RecordingObserver {
    fn observed_manager(&self) -> Option<TypeId> {
        self.target
    }

    fn on_activate(
        &self,
        manager: ManagerKey,
        activated: &AmbientValue,
        previous: Option<&AmbientValue>,
    ) {
        self.events.lock().push(format!(
            "activate {} {} <- {}",
            manager.short_name(),
            text(activated),
            opt_text(previous)
        ));
    }

    fn on_deactivate(
        &self,
        manager: ManagerKey,
        deactivated: &AmbientValue,
        restored: Option<&AmbientValue>,
    ) {
        self.events.lock().push(format!(
            "deactivate {} {} -> {}",
            manager.short_name(),
            text(deactivated),
            opt_text(restored)
        ));
    }
}

/// Observer that panics on every event; verifies observer isolation.
pub struct PanickingObserver;

impl ContextObserver for PanickingObserver {
    fn observed_manager(&self) -> Option<TypeId> {
        None
    }

    fn on_activate(&self, _: ManagerKey, _: &AmbientValue, _: Option<&AmbientValue>) {
        panic!("observer failure on activate");
    }

    fn on_deactivate(&self, _: ManagerKey, _: &AmbientValue, _: Option<&AmbientValue>) {
        panic!("observer failure on deactivate");
    }
}

/// Timing listener collecting `(subject, op)` pairs.
#[derive(Default)]
pub struct CollectingTimings {
    samples: Arc<Mutex<Vec<(String, ContextOp)>>>,
}

impl CollectingTimings {
    /// A listener with an empty sample buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected `(subject, op)` pairs so far.
    #[must_use]
    pub fn samples(&self) -> Vec<(String, ContextOp)> {
        self.samples.lock().clone()
    }

    /// Shared handle to the sample buffer, for registering the listener
    /// while keeping the collection readable.
    #[must_use]
    pub fn buffer(&self) -> Arc<Mutex<Vec<(String, ContextOp)>>> {
        Arc::clone(&self.samples)
    }
}

impl TimingListener for CollectingTimings {
    fn record(&self, subject: &str, op: ContextOp, _elapsed: Duration) {
        self.samples.lock().push((subject.to_string(), op));
    }
}
