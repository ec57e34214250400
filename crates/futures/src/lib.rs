//! # ambit-futures
//!
//! The scheduling-boundary machinery of ambit: wrap executors, closures
//! and futures so that work submitted on one thread observes the
//! submitting thread's ambient context when it runs on another.
//!
//! - [`ContextAwareExecutor`] captures a snapshot per submission and
//!   reactivates it around the job on the worker.
//! - [`ContextTask`] / [`ContextCall`] / [`ContextFn`] wrap a single
//!   delegate invocation in a guaranteed-close reactivation scope.
//! - [`ContextFuture`] is a completable future whose continuations all run
//!   under the snapshot taken at future creation (or, in
//!   take-new-snapshot mode, at the previous stage's completion).
//! - [`SnapshotExt::in_snapshot`] carries a snapshot across the polls of a
//!   plain `async` future.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ambit_core::Runtime;
//! use ambit_core::testing::TextManager;
//! use ambit_futures::FutureBuilder;
//!
//! let runtime = Runtime::new();
//! runtime.register(Arc::new(TextManager)).unwrap();
//!
//! let scope = TextManager::set("Vincent");
//! let future = FutureBuilder::new()
//!     .snapshot(runtime.capture())
//!     .supply(|| TextManager::current().unwrap());
//! scope.close();
//!
//! assert_eq!(future.join().unwrap(), "Vincent");
//! ```

pub mod executor;
pub mod future;
pub mod poll;
pub mod task;

pub use executor::{ContextAwareExecutor, Executor, Job, ThreadPerTask};
pub use future::{CompletionError, ContextFuture, FutureBuilder, Outcome};
pub use poll::{InSnapshot, SnapshotExt};
pub use task::{ContextCall, ContextFn, ContextTask, SnapshotSource};
