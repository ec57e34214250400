//! Closure wrappers that reactivate a snapshot around a delegate.
//!
//! Each wrapper holds a snapshot (or a supplier deferred to invocation
//! time), a delegate, and an optional snapshot consumer. Invocation
//! reactivates the snapshot in a scoped block that is guaranteed to close
//! on every exit path; just before the scope closes, a fresh snapshot is
//! captured and handed to the consumer, which is how chained futures carry
//! context mutations onward.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use ambit_core::{ContextError, ContextSnapshot, Reactivation};

/// Where a wrapper gets its snapshot: fixed at construction, or deferred
/// to invocation time so suppliers may postpone the capture.
#[derive(Clone)]
pub enum SnapshotSource {
    /// Use this snapshot on every invocation.
    Fixed(ContextSnapshot),
    /// Call the supplier at each invocation.
    Deferred(Arc<dyn Fn() -> ContextSnapshot + Send + Sync>),
}

impl SnapshotSource {
    fn get(&self) -> ContextSnapshot {
        match self {
            SnapshotSource::Fixed(snapshot) => snapshot.clone(),
            SnapshotSource::Deferred(supplier) => supplier(),
        }
    }
}

impl fmt::Debug for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotSource::Fixed(snapshot) => f.debug_tuple("Fixed").field(snapshot).finish(),
            SnapshotSource::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Runs the consumer and closes the reactivation on every exit path,
/// including unwinds out of the delegate.
struct ScopedRun<'a> {
    snapshot: &'a ContextSnapshot,
    consumer: Option<Box<dyn FnOnce(ContextSnapshot) + 'a>>,
    reactivation: Option<Reactivation>,
}

fn erase<'a>(
    consumer: Box<dyn FnOnce(ContextSnapshot) + Send + 'a>,
) -> Box<dyn FnOnce(ContextSnapshot) + 'a> {
    consumer
}

impl Drop for ScopedRun<'_> {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            // The fresh snapshot is taken while the reactivation is still
            // open, so it sees both the captured values and anything the
            // delegate left active.
            let fresh = self.snapshot.refresh();
            if catch_unwind(AssertUnwindSafe(|| consumer(fresh))).is_err() {
                tracing::warn!("snapshot consumer panicked; continuing");
            }
        }
        if let Some(reactivation) = self.reactivation.take() {
            reactivation.close();
        }
    }
}

/// Wrapper for a one-shot task without a result.
pub struct ContextTask<F> {
    source: SnapshotSource,
    delegate: F,
    consumer: Option<Box<dyn FnOnce(ContextSnapshot) + Send>>,
}

impl<F: FnOnce()> ContextTask<F> {
    /// Run `delegate` under `snapshot`.
    pub fn new(snapshot: ContextSnapshot, delegate: F) -> Self {
        Self::from_source(SnapshotSource::Fixed(snapshot), delegate)
    }

    /// Run `delegate` under a snapshot obtained from `supplier` at
    /// invocation time.
    pub fn deferred(
        supplier: impl Fn() -> ContextSnapshot + Send + Sync + 'static,
        delegate: F,
    ) -> Self {
        Self::from_source(SnapshotSource::Deferred(Arc::new(supplier)), delegate)
    }

    /// Run `delegate` under the given [`SnapshotSource`].
    pub fn from_source(source: SnapshotSource, delegate: F) -> Self {
        Self {
            source,
            delegate,
            consumer: None,
        }
    }

    /// Hand a fresh snapshot, captured inside the closing scope, to
    /// `consumer`.
    #[must_use]
    pub fn with_snapshot_consumer(
        mut self,
        consumer: impl FnOnce(ContextSnapshot) + Send + 'static,
    ) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }

    /// Reactivate, run the delegate, restore. A panicking delegate still
    /// restores (and still feeds the consumer) before the panic resumes.
    pub fn run(self) -> Result<(), ContextError> {
        let snapshot = self.source.get();
        let reactivation = snapshot.reactivate()?;
        let _guard = ScopedRun {
            snapshot: &snapshot,
            consumer: self.consumer.map(erase),
            reactivation: Some(reactivation),
        };
        (self.delegate)();
        Ok(())
    }
}

/// Wrapper for a one-shot computation with a result.
pub struct ContextCall<F> {
    source: SnapshotSource,
    delegate: F,
    consumer: Option<Box<dyn FnOnce(ContextSnapshot) + Send>>,
}

impl<F> ContextCall<F> {
    /// Run `delegate` under `snapshot`.
    pub fn new(snapshot: ContextSnapshot, delegate: F) -> Self {
        Self::from_source(SnapshotSource::Fixed(snapshot), delegate)
    }

    /// Run `delegate` under a snapshot obtained from `supplier` at
    /// invocation time.
    pub fn deferred(
        supplier: impl Fn() -> ContextSnapshot + Send + Sync + 'static,
        delegate: F,
    ) -> Self {
        Self::from_source(SnapshotSource::Deferred(Arc::new(supplier)), delegate)
    }

    /// Run `delegate` under the given [`SnapshotSource`].
    pub fn from_source(source: SnapshotSource, delegate: F) -> Self {
        Self {
            source,
            delegate,
            consumer: None,
        }
    }

    /// Hand a fresh snapshot, captured inside the closing scope, to
    /// `consumer`.
    #[must_use]
    pub fn with_snapshot_consumer(
        mut self,
        consumer: impl FnOnce(ContextSnapshot) + Send + 'static,
    ) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }

    /// Reactivate, invoke the delegate, restore, and forward the result
    /// unchanged.
    pub fn invoke<T>(self) -> Result<T, ContextError>
    where
        F: FnOnce() -> T,
    {
        let snapshot = self.source.get();
        let reactivation = snapshot.reactivate()?;
        let _guard = ScopedRun {
            snapshot: &snapshot,
            consumer: self.consumer.map(erase),
            reactivation: Some(reactivation),
        };
        Ok((self.delegate)())
    }
}

/// Reusable wrapper for a function of one argument.
///
/// Compositions made with [`and_then`](ContextFn::and_then) and
/// [`compose`](ContextFn::compose) reactivate the *same* snapshot once
/// around the whole composed call.
pub struct ContextFn<A, B> {
    source: SnapshotSource,
    delegate: Box<dyn Fn(A) -> B + Send + Sync>,
    consumer: Option<Arc<dyn Fn(ContextSnapshot) + Send + Sync>>,
}

impl<A: 'static, B: 'static> ContextFn<A, B> {
    /// Run `delegate` under `snapshot` on every call.
    pub fn new(snapshot: ContextSnapshot, delegate: impl Fn(A) -> B + Send + Sync + 'static) -> Self {
        Self::from_source(SnapshotSource::Fixed(snapshot), delegate)
    }

    /// Run `delegate` under a snapshot obtained from `supplier` at each
    /// call.
    pub fn deferred(
        supplier: impl Fn() -> ContextSnapshot + Send + Sync + 'static,
        delegate: impl Fn(A) -> B + Send + Sync + 'static,
    ) -> Self {
        Self::from_source(SnapshotSource::Deferred(Arc::new(supplier)), delegate)
    }

    /// Run `delegate` under the given [`SnapshotSource`].
    pub fn from_source(
        source: SnapshotSource,
        delegate: impl Fn(A) -> B + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            delegate: Box::new(delegate),
            consumer: None,
        }
    }

    /// Hand a fresh snapshot, captured inside the closing scope, to
    /// `consumer` after every call.
    #[must_use]
    pub fn with_snapshot_consumer(
        mut self,
        consumer: impl Fn(ContextSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.consumer = Some(Arc::new(consumer));
        self
    }

    /// Reactivate, apply the delegate to `input`, restore, and forward
    /// the result unchanged.
    pub fn call(&self, input: A) -> Result<B, ContextError> {
        let snapshot = self.source.get();
        let reactivation = snapshot.reactivate()?;
        let consumer = self.consumer.clone();
        let _guard = ScopedRun {
            snapshot: &snapshot,
            consumer: consumer.map(|consumer| {
                Box::new(move |fresh| consumer(fresh)) as Box<dyn FnOnce(ContextSnapshot)>
            }),
            reactivation: Some(reactivation),
        };
        Ok((self.delegate)(input))
    }

    /// A wrapper applying `self` and then `after`, under one reactivation
    /// of the same snapshot.
    #[must_use]
    pub fn and_then<C: 'static>(
        self,
        after: impl Fn(B) -> C + Send + Sync + 'static,
    ) -> ContextFn<A, C> {
        let delegate = self.delegate;
        ContextFn {
            source: self.source,
            delegate: Box::new(move |input| after(delegate(input))),
            consumer: self.consumer,
        }
    }

    /// A wrapper applying `before` and then `self`, under one reactivation
    /// of the same snapshot.
    #[must_use]
    pub fn compose<Z: 'static>(
        self,
        before: impl Fn(Z) -> A + Send + Sync + 'static,
    ) -> ContextFn<Z, B> {
        let delegate = self.delegate;
        ContextFn {
            source: self.source,
            delegate: Box::new(move |input| delegate(before(input))),
            consumer: self.consumer,
        }
    }
}
