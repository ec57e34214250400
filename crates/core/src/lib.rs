//! # ambit-core
//!
//! Propagates thread-scoped ambient state ("contexts") across thread
//! hand-offs. The active value of every registered [`ContextManager`] is
//! captured into an immutable [`ContextSnapshot`] on the producing thread;
//! reactivating the snapshot re-establishes those values on whatever
//! thread runs the work, and closing the [`Reactivation`] restores what
//! was there before, on every exit path.
//!
//! Nested activations per manager follow a per-thread stack discipline
//! that tolerates out-of-order closes; see [`scope`] for the state
//! machine. Observers ([`observer`]) see every activation and
//! deactivation, and [`timing`] measures each capture and reactivate.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ambit_core::Runtime;
//! use ambit_core::testing::TextManager;
//!
//! let runtime = Runtime::new();
//! runtime.register(Arc::new(TextManager)).unwrap();
//!
//! let scope = TextManager::set("Vincent");
//! let snapshot = runtime.capture();
//! scope.close();
//!
//! // ...typically on another thread:
//! let reactivation = snapshot.reactivate().unwrap();
//! assert_eq!(TextManager::current().as_deref(), Some("Vincent"));
//! reactivation.close();
//! assert_eq!(TextManager::current(), None);
//! ```

pub mod error;
pub mod manager;
pub mod observer;
pub mod runtime;
pub mod scope;
pub mod snapshot;
pub mod testing;
pub mod timing;
pub mod value;

pub use error::ContextError;
pub use manager::{ContextManager, ManagerKey};
pub use observer::{ContextObserver, clear_observers, register_observer};
pub use runtime::Runtime;
pub use scope::{ContextScope, ScopeStack};
pub use snapshot::{ContextSnapshot, Reactivation, capture, clear_active_contexts};
pub use timing::{ContextOp, TimingListener, clear_timing_listeners, register_timing_listener};
pub use value::{AmbientValue, ambient, value_of};
