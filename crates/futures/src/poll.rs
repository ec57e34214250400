//! Snapshot reactivation around `Future::poll`.
//!
//! Plain async executors do not preserve thread-local state between polls;
//! a task may resume on a different worker thread entirely. Wrapping the
//! future reactivates a snapshot around every poll and restores prior
//! state before yielding back to the executor, which gives `async` code
//! the same guarantees the thread-based wrappers give closures.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;

use ambit_core::{ContextSnapshot, capture};

/// A future that reactivates a context snapshot around every poll of its
/// inner future.
#[pin_project]
pub struct InSnapshot<F> {
    #[pin]
    inner: F,
    snapshot: ContextSnapshot,
}

impl<F: Future> Future for InSnapshot<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.snapshot.reactivate() {
            Ok(reactivation) => {
                let result = this.inner.poll(cx);
                reactivation.close();
                result
            }
            Err(error) => {
                // A poll has no error channel; run without the snapshot
                // rather than wedge the task.
                tracing::warn!(%error, "context reactivation failed; polling without context");
                this.inner.poll(cx)
            }
        }
    }
}

/// Extension methods for carrying context across `.await` points.
pub trait SnapshotExt: Future + Sized {
    /// Run this future with `snapshot` reactivated around every poll.
    fn in_snapshot(self, snapshot: ContextSnapshot) -> InSnapshot<Self> {
        InSnapshot {
            inner: self,
            snapshot,
        }
    }

    /// Capture the global runtime's current context and carry it across
    /// every poll of this future.
    fn in_current_context(self) -> InSnapshot<Self> {
        self.in_snapshot(capture())
    }
}

impl<F: Future> SnapshotExt for F {}
