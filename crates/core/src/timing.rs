//! Capture/reactivate latency measurement.
//!
//! Every snapshot capture and reactivation is timed, per manager and as a
//! whole. Measurements go to the `context.timing` tracing target at TRACE
//! level and to any registered [`TimingListener`]s. Listener failures are
//! swallowed; timing must never affect context flow.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Subject label for whole-operation measurements, as opposed to a single
/// manager's share.
pub const SNAPSHOT_SUBJECT: &str = "snapshot";

/// The timed operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ContextOp {
    /// Reading active values into a snapshot.
    Capture,
    /// Re-establishing a snapshot's values.
    Reactivate,
}

impl ContextOp {
    /// Stable string form, as used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContextOp::Capture => "capture",
            ContextOp::Reactivate => "reactivate",
        }
    }
}

impl fmt::Display for ContextOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timing measurement.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct TimingSample {
    /// Manager type name, or [`SNAPSHOT_SUBJECT`] for the whole pass.
    pub subject: String,
    /// Which operation was timed.
    pub op: ContextOp,
    /// Elapsed wall-clock time in nanoseconds.
    pub nanos: u64,
}

/// Receiver for timing measurements.
pub trait TimingListener: Send + Sync + 'static {
    /// Called once per measurement. Implementations should be fast and
    /// must not rely on any ambient context being active.
    fn record(&self, subject: &str, op: ContextOp, elapsed: Duration);
}

static LISTENERS: Lazy<RwLock<Vec<Arc<dyn TimingListener>>>> =
    Lazy::new(|| RwLock::new(Vec::new()));

/// Register a timing listener.
pub fn register_timing_listener(listener: Arc<dyn TimingListener>) {
    LISTENERS.write().push(listener);
}

/// Remove every registered timing listener. Intended for tests.
pub fn clear_timing_listeners() {
    LISTENERS.write().clear();
}

pub(crate) fn record(subject: &str, op: ContextOp, elapsed: Duration) {
    tracing::trace!(
        target: "context.timing",
        subject,
        op = op.as_str(),
        nanos = elapsed.as_nanos() as u64,
        "context timing"
    );
    let listeners: Vec<_> = {
        let listeners = LISTENERS.read();
        if listeners.is_empty() {
            return;
        }
        listeners.iter().cloned().collect()
    };
    for listener in listeners {
        let outcome = catch_unwind(AssertUnwindSafe(|| listener.record(subject, op, elapsed)));
        if outcome.is_err() {
            tracing::warn!(subject, op = op.as_str(), "timing listener panicked; continuing");
        }
    }
}
