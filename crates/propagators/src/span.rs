//! Tracing span propagation.

use ambit_core::{
    AmbientValue, ContextError, ContextManager, ContextScope, ManagerKey, ambient, value_of,
};
use tracing::Span;

/// Manager propagating the current `tracing` span across hand-offs.
///
/// Capture reads [`Span::current`]; activation enters the captured span on
/// the worker thread and the scope exits it again on close. The span
/// registry itself belongs to the installed `tracing` subscriber; this
/// manager only carries the handle across, as the subscriber's own
/// locking rules allow.
#[derive(Debug, Default)]
pub struct SpanManager;

impl ContextManager for SpanManager {
    fn activate(&self, value: AmbientValue) -> Result<ContextScope, ContextError> {
        let Some(span) = value_of::<Span>(&value) else {
            return Err(ContextError::activation(
                std::any::type_name::<Self>(),
                "expected a tracing Span value",
            ));
        };
        let entered = span.clone().entered();
        Ok(ContextScope::with_restore(
            ManagerKey::of::<Self>(),
            AmbientValue::clone(&value),
            move || drop(entered),
        ))
    }

    fn active_value(&self) -> Option<AmbientValue> {
        let span = Span::current();
        if span.is_none() {
            None
        } else {
            Some(ambient(span))
        }
    }
}
