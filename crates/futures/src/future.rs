//! A completable future whose continuations run under a context snapshot.
//!
//! Construction captures a snapshot (or takes one from the caller). Every
//! continuation callback is wrapped so it runs under that snapshot, which
//! means stages observe the context as of future *creation*, never as of
//! continuation registration. In take-new-snapshot mode, each completed
//! stage captures a fresh snapshot at its completion instant and hands it
//! to the stages behind it.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use ambit_core::{ContextError, ContextSnapshot, capture};

use crate::executor::{Executor, Job, ThreadPerTask};
use crate::task::ContextCall;

/// Why a future completed exceptionally.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    /// A supplier or continuation panicked.
    #[error("continuation panicked: {0}")]
    Panicked(String),

    /// The stage's snapshot could not be reactivated.
    #[error("context reactivation failed")]
    Reactivation(#[source] Arc<ContextError>),

    /// The future was completed exceptionally by the caller.
    #[error("{0}")]
    Failed(String),
}

impl CompletionError {
    /// An exceptional completion with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<ContextError> for CompletionError {
    fn from(error: ContextError) -> Self {
        Self::Reactivation(Arc::new(error))
    }
}

/// The terminal result of a [`ContextFuture`].
pub type Outcome<T> = Result<T, CompletionError>;

type Callback<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

struct Shared<T> {
    outcome: OnceLock<Outcome<T>>,
    callbacks: Mutex<Vec<Callback<T>>>,
    completed: Mutex<bool>,
    signal: Condvar,
    take_new: bool,
    /// The snapshot continuations bind to. In take-new-snapshot mode, the
    /// stage that completes this future overwrites it with a fresh capture.
    snapshot: RwLock<ContextSnapshot>,
}

/// A completable, thread-safe future that runs every continuation under a
/// context snapshot.
///
/// Cheap to clone; clones share the same completion state.
#[must_use = "a future does nothing unless completed or chained"]
pub struct ContextFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ContextFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> ContextFuture<T> {
    fn pending(snapshot: ContextSnapshot, take_new: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                outcome: OnceLock::new(),
                callbacks: Mutex::new(Vec::new()),
                completed: Mutex::new(false),
                signal: Condvar::new(),
                take_new,
                snapshot: RwLock::new(snapshot),
            }),
        }
    }

    /// An incomplete future bound to a snapshot of the global runtime's
    /// current context.
    pub fn new() -> Self {
        Self::pending(capture(), false)
    }

    /// An incomplete future bound to `snapshot`.
    pub fn with_snapshot(snapshot: ContextSnapshot) -> Self {
        Self::pending(snapshot, false)
    }

    /// Configure snapshot, executor and take-new-snapshot mode before
    /// creating a future.
    pub fn builder() -> FutureBuilder {
        FutureBuilder::new()
    }

    /// Run `supplier` on a fresh thread under the current context and
    /// complete the returned future with its result.
    pub fn supply_async<F>(supplier: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::builder().supply(supplier)
    }

    /// Like [`supply_async`](ContextFuture::supply_async), but on the
    /// given executor.
    pub fn supply_async_on<F>(executor: impl Executor + 'static, supplier: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::builder().executor(executor).supply(supplier)
    }

    /// Complete with `value`. Returns whether this call won the
    /// completion race.
    pub fn complete(&self, value: T) -> bool {
        self.complete_outcome(Ok(value))
    }

    /// Complete exceptionally with `error`. Returns whether this call won
    /// the completion race.
    pub fn complete_exceptionally(&self, error: CompletionError) -> bool {
        self.complete_outcome(Err(error))
    }

    /// Whether the future has completed, normally or exceptionally.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// The outcome, if already completed.
    #[must_use]
    pub fn try_outcome(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        self.shared.outcome.get().cloned()
    }

    /// Block until completion and return the outcome.
    pub fn join(&self) -> Outcome<T>
    where
        T: Clone,
    {
        let mut completed = self.shared.completed.lock();
        while !*completed {
            self.shared.signal.wait(&mut completed);
        }
        drop(completed);
        self.shared.outcome.get().expect("signalled complete").clone()
    }

    /// Block until completion or until `timeout` elapses.
    pub fn join_timeout(&self, timeout: Duration) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        let mut completed = self.shared.completed.lock();
        let _ = self
            .shared
            .signal
            .wait_while_for(&mut completed, |done| !*done, timeout);
        if !*completed {
            return None;
        }
        drop(completed);
        self.shared.outcome.get().map(Outcome::clone)
    }

    fn complete_outcome(&self, outcome: Outcome<T>) -> bool {
        if self.shared.outcome.set(outcome).is_err() {
            return false;
        }
        {
            let mut completed = self.shared.completed.lock();
            *completed = true;
        }
        self.shared.signal.notify_all();
        let callbacks = std::mem::take(&mut *self.shared.callbacks.lock());
        let outcome = self.shared.outcome.get().expect("just completed");
        for callback in callbacks {
            callback(outcome);
        }
        true
    }

    /// Run `callback` with the outcome: immediately if already complete,
    /// otherwise when completion happens, on the completing thread.
    fn register(&self, callback: Callback<T>) {
        {
            let mut callbacks = self.shared.callbacks.lock();
            if self.shared.outcome.get().is_none() {
                callbacks.push(callback);
                return;
            }
        }
        callback(self.shared.outcome.get().expect("checked while locked"));
    }

    /// The snapshot continuations currently bind to.
    fn slot(&self) -> ContextSnapshot {
        self.shared.snapshot.read().clone()
    }

    fn child<U: Send + Sync + 'static>(&self) -> ContextFuture<U> {
        ContextFuture::pending(self.slot(), self.shared.take_new)
    }

    pub(crate) fn run_supplier(&self, supplier: impl FnOnce() -> T) {
        run_stage(self.slot(), self, supplier);
    }

    // ------------------------------------------------------------------
    // Continuations. Each wraps the user callback so it runs under this
    // future's snapshot slot and completes the child with its outcome.
    // ------------------------------------------------------------------

    /// Apply `f` to the value on the completing thread.
    pub fn then_apply<U, F>(&self, f: F) -> ContextFuture<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let child = self.child::<U>();
        let parent = Arc::clone(&self.shared);
        let handle = child.clone();
        self.register(Box::new(move |outcome| match outcome {
            Ok(value) => run_stage(parent.snapshot.read().clone(), &handle, || f(value)),
            Err(error) => {
                handle.complete_outcome(Err(error.clone()));
            }
        }));
        child
    }

    /// Apply `f` to the value on a fresh thread.
    pub fn then_apply_async<U, F>(&self, f: F) -> ContextFuture<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.then_apply_async_on(ThreadPerTask, f)
    }

    /// Apply `f` to the value on `executor`.
    pub fn then_apply_async_on<U, F>(
        &self,
        executor: impl Executor + 'static,
        f: F,
    ) -> ContextFuture<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let child = self.child::<U>();
        let parent = Arc::clone(&self.shared);
        let handle = child.clone();
        self.register(Box::new(move |_outcome| {
            let job: Job = Box::new(move || {
                let outcome = parent.outcome.get().expect("parent completed");
                match outcome {
                    Ok(value) => {
                        run_stage(parent.snapshot.read().clone(), &handle, || f(value));
                    }
                    Err(error) => {
                        handle.complete_outcome(Err(error.clone()));
                    }
                }
            });
            executor.execute(job);
        }));
        child
    }

    /// Consume the value on the completing thread.
    pub fn then_accept<F>(&self, f: F) -> ContextFuture<()>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.then_apply(move |value| f(value))
    }

    /// Consume the value on a fresh thread.
    pub fn then_accept_async<F>(&self, f: F) -> ContextFuture<()>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.then_apply_async(move |value| f(value))
    }

    /// Run `f` (ignoring the value) on the completing thread.
    pub fn then_run<F>(&self, f: F) -> ContextFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_apply(move |_| f())
    }

    /// Run `f` (ignoring the value) on a fresh thread.
    pub fn then_run_async<F>(&self, f: F) -> ContextFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_apply_async(move |_| f())
    }

    /// Chain a future-returning function; the result completes when the
    /// inner future does.
    pub fn then_compose<U, F>(&self, f: F) -> ContextFuture<U>
    where
        U: Send + Sync + Clone + 'static,
        F: FnOnce(&T) -> ContextFuture<U> + Send + 'static,
    {
        let child = self.child::<U>();
        let parent = Arc::clone(&self.shared);
        let handle = child.clone();
        self.register(Box::new(move |outcome| match outcome {
            Ok(value) => {
                let snapshot = parent.snapshot.read().clone();
                let mut call = ContextCall::new(snapshot, || f(value));
                if handle.shared.take_new {
                    let slot = Arc::clone(&handle.shared);
                    call = call.with_snapshot_consumer(move |fresh| {
                        *slot.snapshot.write() = fresh;
                    });
                }
                match catch_unwind(AssertUnwindSafe(|| call.invoke())) {
                    Ok(Ok(inner)) => {
                        let forward = handle.clone();
                        inner.register(Box::new(move |inner_outcome| {
                            forward.complete_outcome(inner_outcome.clone());
                        }));
                    }
                    Ok(Err(error)) => {
                        handle.complete_outcome(Err(error.into()));
                    }
                    Err(payload) => {
                        handle.complete_outcome(Err(CompletionError::Panicked(panic_message(
                            payload.as_ref(),
                        ))));
                    }
                }
            }
            Err(error) => {
                handle.complete_outcome(Err(error.clone()));
            }
        }));
        child
    }

    /// Shared machinery of the both-input combinators: once both futures
    /// complete, run the merge under this future's snapshot slot, inline
    /// on the last completing thread or dispatched to `executor`.
    fn combine_with<U, V, F>(
        &self,
        other: &ContextFuture<U>,
        executor: Option<Arc<dyn Executor>>,
        f: F,
    ) -> ContextFuture<V>
    where
        U: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: FnOnce(&T, &U) -> V + Send + 'static,
    {
        let child = self.child::<V>();
        let remaining = Arc::new(AtomicUsize::new(2));
        let action = Arc::new(Mutex::new(Some(f)));
        let left = Arc::clone(&self.shared);
        let right = Arc::clone(&other.shared);
        let handle = child.clone();

        let fire = Arc::new(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            let left = Arc::clone(&left);
            let right = Arc::clone(&right);
            let handle = handle.clone();
            let action = Arc::clone(&action);
            let merge = move || {
                let left_outcome = left.outcome.get().expect("left completed");
                let right_outcome = right.outcome.get().expect("right completed");
                match (left_outcome, right_outcome) {
                    (Ok(a), Ok(b)) => {
                        let f = action.lock().take().expect("combine runs once");
                        run_stage(left.snapshot.read().clone(), &handle, || f(a, b));
                    }
                    (Err(error), _) | (_, Err(error)) => {
                        handle.complete_outcome(Err(error.clone()));
                    }
                }
            };
            match &executor {
                Some(executor) => executor.execute(Box::new(merge)),
                None => merge(),
            }
        });

        let first = Arc::clone(&fire);
        self.register(Box::new(move |_| first()));
        other.register(Box::new(move |_| fire()));
        child
    }

    /// Combine the values of two futures once both complete. An
    /// exceptional completion of either propagates.
    pub fn then_combine<U, V, F>(&self, other: &ContextFuture<U>, f: F) -> ContextFuture<V>
    where
        U: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: FnOnce(&T, &U) -> V + Send + 'static,
    {
        self.combine_with(other, None, f)
    }

    /// Combine the values of two futures on a fresh thread.
    pub fn then_combine_async<U, V, F>(&self, other: &ContextFuture<U>, f: F) -> ContextFuture<V>
    where
        U: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: FnOnce(&T, &U) -> V + Send + 'static,
    {
        self.combine_with(other, Some(Arc::new(ThreadPerTask)), f)
    }

    /// Combine the values of two futures on `executor`.
    pub fn then_combine_async_on<U, V, F>(
        &self,
        other: &ContextFuture<U>,
        executor: impl Executor + 'static,
        f: F,
    ) -> ContextFuture<V>
    where
        U: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: FnOnce(&T, &U) -> V + Send + 'static,
    {
        self.combine_with(other, Some(Arc::new(executor)), f)
    }

    /// Consume the values of two futures once both complete.
    pub fn then_accept_both<U, F>(&self, other: &ContextFuture<U>, f: F) -> ContextFuture<()>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T, &U) + Send + 'static,
    {
        self.then_combine(other, move |a, b| f(a, b))
    }

    /// Consume the values of two futures on a fresh thread.
    pub fn then_accept_both_async<U, F>(&self, other: &ContextFuture<U>, f: F) -> ContextFuture<()>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T, &U) + Send + 'static,
    {
        self.then_combine_async(other, move |a, b| f(a, b))
    }

    /// Consume the values of two futures on `executor`.
    pub fn then_accept_both_async_on<U, F>(
        &self,
        other: &ContextFuture<U>,
        executor: impl Executor + 'static,
        f: F,
    ) -> ContextFuture<()>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T, &U) + Send + 'static,
    {
        self.then_combine_async_on(other, executor, move |a, b| f(a, b))
    }

    /// Run `f` once both futures complete, ignoring their values.
    pub fn run_after_both<U, F>(&self, other: &ContextFuture<U>, f: F) -> ContextFuture<()>
    where
        U: Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.then_combine(other, move |_, _| f())
    }

    /// Run `f` on a fresh thread once both futures complete.
    pub fn run_after_both_async<U, F>(&self, other: &ContextFuture<U>, f: F) -> ContextFuture<()>
    where
        U: Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.then_combine_async(other, move |_, _| f())
    }

    /// Run `f` on `executor` once both futures complete.
    pub fn run_after_both_async_on<U, F>(
        &self,
        other: &ContextFuture<U>,
        executor: impl Executor + 'static,
        f: F,
    ) -> ContextFuture<()>
    where
        U: Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.then_combine_async_on(other, executor, move |_, _| f())
    }

    /// Shared machinery of the either-input combinators: the first future
    /// to complete wins, and its outcome feeds the action under this
    /// future's snapshot slot, inline on the winning thread or dispatched
    /// to `executor`.
    fn either_with<U, F>(
        &self,
        other: &ContextFuture<T>,
        executor: Option<Arc<dyn Executor>>,
        f: F,
    ) -> ContextFuture<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let child = self.child::<U>();
        let action = Arc::new(Mutex::new(Some(f)));
        let parent = Arc::clone(&self.shared);
        let handle = child.clone();

        // The winner's callback hands over its own shared state, so the
        // dispatched action reads the first outcome even if the loser has
        // completed by then.
        let fire = Arc::new(move |winner: Arc<Shared<T>>| {
            let Some(f) = action.lock().take() else {
                return;
            };
            let parent = Arc::clone(&parent);
            let handle = handle.clone();
            let run = move || {
                let outcome = winner.outcome.get().expect("winner completed");
                match outcome {
                    Ok(value) => run_stage(parent.snapshot.read().clone(), &handle, || f(value)),
                    Err(error) => {
                        handle.complete_outcome(Err(error.clone()));
                    }
                }
            };
            match &executor {
                Some(executor) => executor.execute(Box::new(run)),
                None => run(),
            }
        });

        let self_shared = Arc::clone(&self.shared);
        let first = Arc::clone(&fire);
        self.register(Box::new(move |_| first(self_shared)));
        let other_shared = Arc::clone(&other.shared);
        other.register(Box::new(move |_| fire(other_shared)));
        child
    }

    /// Apply `f` to the value of whichever future completes first.
    pub fn apply_to_either<U, F>(&self, other: &ContextFuture<T>, f: F) -> ContextFuture<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.either_with(other, None, f)
    }

    /// Apply `f` to the first value on a fresh thread.
    pub fn apply_to_either_async<U, F>(&self, other: &ContextFuture<T>, f: F) -> ContextFuture<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.either_with(other, Some(Arc::new(ThreadPerTask)), f)
    }

    /// Apply `f` to the first value on `executor`.
    pub fn apply_to_either_async_on<U, F>(
        &self,
        other: &ContextFuture<T>,
        executor: impl Executor + 'static,
        f: F,
    ) -> ContextFuture<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.either_with(other, Some(Arc::new(executor)), f)
    }

    /// Consume the value of whichever future completes first.
    pub fn accept_either<F>(&self, other: &ContextFuture<T>, f: F) -> ContextFuture<()>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.apply_to_either(other, move |value| f(value))
    }

    /// Consume the first value on a fresh thread.
    pub fn accept_either_async<F>(&self, other: &ContextFuture<T>, f: F) -> ContextFuture<()>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.apply_to_either_async(other, move |value| f(value))
    }

    /// Consume the first value on `executor`.
    pub fn accept_either_async_on<F>(
        &self,
        other: &ContextFuture<T>,
        executor: impl Executor + 'static,
        f: F,
    ) -> ContextFuture<()>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.apply_to_either_async_on(other, executor, move |value| f(value))
    }

    /// Run `f` when either future completes, ignoring the value.
    pub fn run_after_either<F>(&self, other: &ContextFuture<T>, f: F) -> ContextFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.apply_to_either(other, move |_| f())
    }

    /// Run `f` on a fresh thread when either future completes.
    pub fn run_after_either_async<F>(&self, other: &ContextFuture<T>, f: F) -> ContextFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.apply_to_either_async(other, move |_| f())
    }

    /// Run `f` on `executor` when either future completes.
    pub fn run_after_either_async_on<F>(
        &self,
        other: &ContextFuture<T>,
        executor: impl Executor + 'static,
        f: F,
    ) -> ContextFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.apply_to_either_async_on(other, executor, move |_| f())
    }

    /// Fold the outcome (value or error) into a new value.
    pub fn handle<U, F>(&self, f: F) -> ContextFuture<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&Outcome<T>) -> U + Send + 'static,
    {
        let child = self.child::<U>();
        let parent = Arc::clone(&self.shared);
        let handle = child.clone();
        self.register(Box::new(move |outcome| {
            run_stage(parent.snapshot.read().clone(), &handle, || f(outcome));
        }));
        child
    }

    /// Observe the outcome without changing it. A panicking action on a
    /// normal outcome completes the result exceptionally.
    pub fn when_complete<F>(&self, f: F) -> ContextFuture<T>
    where
        T: Clone,
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let child = self.child::<T>();
        let parent = Arc::clone(&self.shared);
        let handle = child.clone();
        self.register(Box::new(move |outcome| {
            let snapshot = parent.snapshot.read().clone();
            let mut call = ContextCall::new(snapshot, || f(outcome));
            if handle.shared.take_new {
                let slot = Arc::clone(&handle.shared);
                call = call.with_snapshot_consumer(move |fresh| {
                    *slot.snapshot.write() = fresh;
                });
            }
            let action_result = catch_unwind(AssertUnwindSafe(|| call.invoke()));
            let forwarded = match (action_result, outcome) {
                (Ok(Ok(())), _) => outcome.clone(),
                (Ok(Err(error)), Ok(_)) => Err(error.into()),
                (Err(payload), Ok(_)) => {
                    Err(CompletionError::Panicked(panic_message(payload.as_ref())))
                }
                // The original failure wins over an action failure.
                (_, Err(error)) => Err(error.clone()),
            };
            handle.complete_outcome(forwarded);
        }));
        child
    }

    /// Recover from an exceptional completion; a normal value passes
    /// through unchanged.
    pub fn exceptionally<F>(&self, f: F) -> ContextFuture<T>
    where
        T: Clone,
        F: FnOnce(&CompletionError) -> T + Send + 'static,
    {
        let child = self.child::<T>();
        let parent = Arc::clone(&self.shared);
        let handle = child.clone();
        self.register(Box::new(move |outcome| match outcome {
            Ok(value) => {
                handle.complete_outcome(Ok(value.clone()));
            }
            Err(error) => run_stage(parent.snapshot.read().clone(), &handle, || f(error)),
        }));
        child
    }
}

impl ContextFuture<()> {
    /// Run `task` on a fresh thread under the current context; the future
    /// completes when it finishes.
    pub fn run_async<F>(task: F) -> ContextFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::builder().run(task)
    }

    /// Like [`run_async`](ContextFuture::run_async), but on the given
    /// executor.
    pub fn run_async_on<F>(executor: impl Executor + 'static, task: F) -> ContextFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::builder().executor(executor).run(task)
    }
}

impl<T: Send + Sync + 'static> Default for ContextFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ContextFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextFuture")
            .field("done", &self.shared.outcome.get().is_some())
            .field("take_new", &self.shared.take_new)
            .finish()
    }
}

/// Run `f` under `snapshot` and complete `target` with its outcome. In
/// take-new-snapshot mode the fresh capture lands in `target`'s slot
/// before completion, so dependents see the stage's mutations.
fn run_stage<U: Send + Sync + 'static>(
    snapshot: ContextSnapshot,
    target: &ContextFuture<U>,
    f: impl FnOnce() -> U,
) {
    let mut call = ContextCall::new(snapshot, f);
    if target.shared.take_new {
        let slot = Arc::clone(&target.shared);
        call = call.with_snapshot_consumer(move |fresh| {
            *slot.snapshot.write() = fresh;
        });
    }
    let outcome = match catch_unwind(AssertUnwindSafe(|| call.invoke())) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(CompletionError::from(error)),
        Err(payload) => Err(CompletionError::Panicked(panic_message(payload.as_ref()))),
    };
    target.complete_outcome(outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Configures how a [`ContextFuture`] is created.
///
/// ```rust
/// use ambit_core::Runtime;
/// use ambit_futures::FutureBuilder;
///
/// let runtime = Runtime::new();
/// let future = FutureBuilder::new()
///     .snapshot(runtime.capture())
///     .take_new_snapshots(true)
///     .supply(|| 21 * 2);
/// assert_eq!(future.join().unwrap(), 42);
/// ```
pub struct FutureBuilder {
    snapshot: Option<ContextSnapshot>,
    take_new: bool,
    executor: Option<Arc<dyn Executor>>,
}

impl FutureBuilder {
    /// A builder with no snapshot, no executor and take-new-snapshot mode
    /// off.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: None,
            take_new: false,
            executor: None,
        }
    }

    /// Bind the future to `snapshot` instead of capturing one from the
    /// global runtime.
    #[must_use]
    pub fn snapshot(mut self, snapshot: ContextSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Capture a fresh snapshot at each stage's completion instant and
    /// propagate it to the stages behind it.
    #[must_use]
    pub fn take_new_snapshots(mut self, enabled: bool) -> Self {
        self.take_new = enabled;
        self
    }

    /// Run the initial stage on `executor` instead of a fresh thread.
    #[must_use]
    pub fn executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Create the future and run `supplier` for its value.
    pub fn supply<T, F>(self, supplier: F) -> ContextFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let snapshot = self.snapshot.unwrap_or_else(capture);
        let future = ContextFuture::pending(snapshot, self.take_new);
        let handle = future.clone();
        let job: Job = Box::new(move || handle.run_supplier(supplier));
        match self.executor {
            Some(executor) => executor.execute(job),
            None => ThreadPerTask.execute(job),
        }
        future
    }

    /// Create the future and run `task`; it completes when the task
    /// finishes.
    pub fn run<F>(self, task: F) -> ContextFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.supply(move || {
            task();
        })
    }
}

impl Default for FutureBuilder {
    fn default() -> Self {
        Self::new()
    }
}
