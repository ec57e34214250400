//! Diagnostic map (MDC) propagation.
//!
//! A thread-local key/value store plus a message stack, in the mapped
//! diagnostic context mold of the logging world. The manager captures the
//! whole state at once; activation replaces the worker thread's state
//! with the captured data and close puts the previous state back.

use std::cell::RefCell;
use std::collections::BTreeMap;

use ambit_core::{
    AmbientValue, ContextError, ContextManager, ContextScope, ManagerKey, ambient, value_of,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

thread_local! {
    static ACTIVE: RefCell<DiagnosticData> = RefCell::new(DiagnosticData::default());
}

/// Immutable capture of one thread's diagnostic state at a point in time.
///
/// Entries are ordered by key; messages are ordered from least recently
/// pushed to most recently pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiagnosticData {
    entries: BTreeMap<String, String>,
    messages: Vec<String>,
}

impl DiagnosticData {
    /// The captured key/value entries.
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// The captured message stack, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Whether the capture holds no entries and no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.messages.is_empty()
    }
}

/// The calling thread's diagnostic field store.
#[derive(Debug)]
pub struct DiagnosticMap;

impl DiagnosticMap {
    /// Set `key` to `value` on this thread.
    pub fn put(key: impl Into<String>, value: impl Into<String>) {
        ACTIVE.with(|state| {
            state.borrow_mut().entries.insert(key.into(), value.into());
        });
    }

    /// The value for `key` on this thread.
    #[must_use]
    pub fn get(key: &str) -> Option<String> {
        ACTIVE.with(|state| state.borrow().entries.get(key).cloned())
    }

    /// Remove `key`, returning its previous value.
    pub fn remove(key: &str) -> Option<String> {
        ACTIVE.with(|state| state.borrow_mut().entries.remove(key))
    }

    /// Push a message onto this thread's message stack.
    pub fn push_message(message: impl Into<String>) {
        ACTIVE.with(|state| state.borrow_mut().messages.push(message.into()));
    }

    /// Pop the most recently pushed message.
    pub fn pop_message() -> Option<String> {
        ACTIVE.with(|state| state.borrow_mut().messages.pop())
    }

    /// Drop every entry and message on this thread.
    pub fn clear() {
        ACTIVE.with(|state| {
            *state.borrow_mut() = DiagnosticData::default();
        });
    }

    /// Capture this thread's current state.
    #[must_use]
    pub fn snapshot() -> DiagnosticData {
        ACTIVE.with(|state| state.borrow().clone())
    }

    /// Install `data` as this thread's state, returning the previous one.
    fn replace(data: DiagnosticData) -> DiagnosticData {
        ACTIVE.with(|state| state.replace(data))
    }
}

/// Manager that captures the whole diagnostic map and message stack.
///
/// Unlike the stacked managers, activation *replaces* the thread's state
/// with the captured data; closing the scope restores what the thread had
/// before.
#[derive(Debug, Default)]
pub struct DiagnosticManager;

impl ContextManager for DiagnosticManager {
    fn activate(&self, value: AmbientValue) -> Result<ContextScope, ContextError> {
        let Some(data) = value_of::<DiagnosticData>(&value) else {
            return Err(ContextError::activation(
                std::any::type_name::<Self>(),
                "expected a DiagnosticData value",
            ));
        };
        let previous = DiagnosticMap::replace(data.clone());
        Ok(ContextScope::with_restore(
            ManagerKey::of::<Self>(),
            AmbientValue::clone(&value),
            move || {
                DiagnosticMap::replace(previous);
            },
        ))
    }

    fn active_value(&self) -> Option<AmbientValue> {
        let snapshot = DiagnosticMap::snapshot();
        if snapshot.is_empty() {
            None
        } else {
            Some(ambient(snapshot))
        }
    }

    fn clear_thread(&self) {
        DiagnosticMap::clear();
    }
}
