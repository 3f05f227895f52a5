//! Observer interfaces
//!
//! The coordinator reports layer-hit distribution and payload hotness through
//! [`HitCounter`], and the redis layers report per-call latency through
//! [`LatencyTimer`]. Callers that don't care pass `None` to the registry and
//! get the no-op implementations, so the rest of the system stays
//! unconditional.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Counts labelled events per cache instance.
pub trait HitCounter: Send + Sync {
    fn inc(&self, instance: &str, label: &str);
}

impl fmt::Debug for dyn HitCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HitCounter")
    }
}

/// Observes the latency of a single layer operation.
pub trait LatencyTimer: Send + Sync {
    fn observe_since(&self, layer: &str, op: &str, start: Instant);
}

impl fmt::Debug for dyn LatencyTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LatencyTimer")
    }
}

/// Counter that drops everything.
pub struct DummyCounter;

impl HitCounter for DummyCounter {
    fn inc(&self, _instance: &str, _label: &str) {}
}

/// Timer that drops everything.
pub struct DummyTimer;

impl LatencyTimer for DummyTimer {
    fn observe_since(&self, _layer: &str, _op: &str, _start: Instant) {}
}

pub(crate) fn counter_or_dummy(counter: Option<Arc<dyn HitCounter>>) -> Arc<dyn HitCounter> {
    counter.unwrap_or_else(|| Arc::new(DummyCounter))
}

pub(crate) fn timer_or_dummy(timer: Option<Arc<dyn LatencyTimer>>) -> Arc<dyn LatencyTimer> {
    timer.unwrap_or_else(|| Arc::new(DummyTimer))
}
