//! # ambit-propagators
//!
//! Concrete [`ContextManager`](ambit_core::ContextManager)s: thin adapters
//! that plug an ambient-value holder into the ambit snapshot machinery.
//!
//! - [`LocaleManager`] propagates a [`Locale`] via the shared per-thread
//!   stack.
//! - [`DiagnosticManager`] captures a whole diagnostic field map (MDC) and
//!   message stack at once, replace-and-restore style.
//! - [`SpanManager`] carries the current `tracing` span across hand-offs.
//!
//! None of these is special-cased in the core: register the ones you need
//! and snapshots pick them up.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ambit_core::Runtime;
//! use ambit_propagators::{Locale, LocaleManager};
//!
//! let runtime = Runtime::new();
//! runtime.register(Arc::new(LocaleManager)).unwrap();
//!
//! let scope = LocaleManager::set("nl-NL".parse().unwrap());
//! let snapshot = runtime.capture();
//! scope.close();
//!
//! let reactivation = snapshot.reactivate().unwrap();
//! assert_eq!(LocaleManager::current(), Some(Locale::new("nl", Some("NL"))));
//! drop(reactivation);
//! ```

pub mod diagnostic;
pub mod locale;
pub mod span;

pub use diagnostic::{DiagnosticData, DiagnosticManager, DiagnosticMap};
pub use locale::{Locale, LocaleManager, LocaleParseError};
pub use span::SpanManager;
