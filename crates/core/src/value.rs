//! Type-erased ambient values.

use std::any::Any;
use std::sync::Arc;

/// A type-erased ambient value, as carried by snapshots and scopes.
///
/// The propagation machinery treats values as opaque immutable references;
/// managers downcast them back to their concrete type on activation.
/// Cloning is cheap.
pub type AmbientValue = Arc<dyn Any + Send + Sync>;

/// Erase a concrete value into an [`AmbientValue`].
///
/// ```rust
/// use ambit_core::{ambient, value_of};
///
/// let value = ambient("nl-NL".to_string());
/// assert_eq!(value_of::<String>(&value).map(String::as_str), Some("nl-NL"));
/// ```
#[must_use]
pub fn ambient<T: Send + Sync + 'static>(value: T) -> AmbientValue {
    Arc::new(value)
}

/// Borrow the concrete value behind an [`AmbientValue`], if the type
/// matches.
#[must_use]
pub fn value_of<T: 'static>(value: &AmbientValue) -> Option<&T> {
    value.downcast_ref::<T>()
}
