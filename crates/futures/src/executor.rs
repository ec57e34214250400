//! Executor contract and the context-aware wrapper.

use std::fmt;
use std::sync::Arc;
use std::thread;

use ambit_core::{ContextSnapshot, Runtime, capture};

use crate::future::ContextFuture;
use crate::task::ContextTask;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Minimal task-executor contract: hand a job to some pool of threads.
///
/// The propagation machinery does not own a scheduler; whatever the host
/// uses (a thread pool, a queue drained by workers, a test harness running
/// jobs inline) plugs in here. Shutdown, rejection and interruption
/// semantics are the executor's own.
pub trait Executor: Send + Sync {
    /// Run `job`, now or later, on whatever thread the executor owns.
    fn execute(&self, job: Job);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}

/// Executor that spawns one named thread per job.
///
/// The fallback used when the host does not supply a pool. If the spawn
/// fails the job is dropped with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPerTask;

impl Executor for ThreadPerTask {
    fn execute(&self, job: Job) {
        let spawned = thread::Builder::new()
            .name("ambit-worker".to_string())
            .spawn(job);
        if let Err(error) = spawned {
            tracing::warn!(%error, "failed to spawn worker thread; job dropped");
        }
    }
}

/// Wraps an executor so every submitted job carries the submitting
/// thread's context.
///
/// A snapshot is captured on the submitting thread at submission time. On
/// the worker, the job reactivates it before the original task runs and
/// restores prior state afterwards, panics included. Everything else is
/// delegated to the wrapped executor unchanged.
pub struct ContextAwareExecutor<E> {
    inner: E,
    runtime: Option<Arc<Runtime>>,
}

impl<E: Executor> ContextAwareExecutor<E> {
    /// Wrap `inner`, capturing snapshots from the global runtime.
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            runtime: None,
        }
    }

    /// Wrap `inner`, capturing snapshots from `runtime` instead of the
    /// global one.
    pub fn with_runtime(inner: E, runtime: Arc<Runtime>) -> Self {
        Self {
            inner,
            runtime: Some(runtime),
        }
    }

    /// The wrapped executor.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    fn snapshot(&self) -> ContextSnapshot {
        match &self.runtime {
            Some(runtime) => runtime.capture(),
            None => capture(),
        }
    }

    /// Submit a value-returning job.
    ///
    /// The returned future completes with the job's result once it has run
    /// under the submission-time snapshot; a panicking job completes it
    /// exceptionally.
    pub fn submit<T, F>(&self, job: F) -> ContextFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let future = ContextFuture::with_snapshot(self.snapshot());
        let handle = future.clone();
        self.inner.execute(Box::new(move || handle.run_supplier(job)));
        future
    }

    /// Submit a batch of value-returning jobs, one future each.
    ///
    /// The whole batch shares a single snapshot captured once at
    /// submission time.
    pub fn submit_all<T, F>(&self, jobs: impl IntoIterator<Item = F>) -> Vec<ContextFuture<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let snapshot = self.snapshot();
        jobs.into_iter()
            .map(|job| {
                let future = ContextFuture::with_snapshot(snapshot.clone());
                let handle = future.clone();
                self.inner.execute(Box::new(move || handle.run_supplier(job)));
                future
            })
            .collect()
    }
}

impl<E: Executor> Executor for ContextAwareExecutor<E> {
    fn execute(&self, job: Job) {
        let task = ContextTask::new(self.snapshot(), job);
        self.inner.execute(Box::new(move || {
            if let Err(error) = task.run() {
                tracing::warn!(%error, "job not run: context reactivation failed");
            }
        }));
    }
}

impl<E: fmt::Debug> fmt::Debug for ContextAwareExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextAwareExecutor")
            .field("inner", &self.inner)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}
