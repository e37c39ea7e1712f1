//! Instrumentation Hooks
//!
//! Optional measurement sinks the facade reports into.
//!
//! ## Sinks
//! - get / put / delete latency ([`Timer`])
//! - misses, bytes read, bytes written ([`Meter`])
//!
//! Every sink is optional. [`Instruments`] hides the optionality: the facade
//! calls the same helpers whether or not anything is attached, and a missing
//! sink turns the call into a no-op. Sinks are shared across threads, so
//! implementations must tolerate concurrent updates.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records operation latencies
pub trait Timer: Send + Sync {
    fn update(&self, elapsed: Duration);
}

/// Counts events or bytes
pub trait Meter: Send + Sync {
    fn mark(&self, n: u64);
}

/// The set of sinks attached to one database handle
#[derive(Clone, Default)]
pub struct Instruments {
    get_timer: Option<Arc<dyn Timer>>,
    put_timer: Option<Arc<dyn Timer>>,
    delete_timer: Option<Arc<dyn Timer>>,
    miss_meter: Option<Arc<dyn Meter>>,
    read_meter: Option<Arc<dyn Meter>>,
    write_meter: Option<Arc<dyn Meter>>,
}

impl Instruments {
    /// An empty set: every hook is a no-op
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.get_timer = Some(timer);
        self
    }

    pub fn with_put_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.put_timer = Some(timer);
        self
    }

    pub fn with_delete_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.delete_timer = Some(timer);
        self
    }

    /// Meter marked once per lookup of an absent key
    pub fn with_miss_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.miss_meter = Some(meter);
        self
    }

    /// Meter marked with the stored (compressed) size of each value read
    pub fn with_read_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.read_meter = Some(meter);
        self
    }

    /// Meter marked with the stored (compressed) size of each value written
    pub fn with_write_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.write_meter = Some(meter);
        self
    }

    pub(crate) fn time_get(&self) -> TimerGuard<'_> {
        TimerGuard::start(self.get_timer.as_deref())
    }

    pub(crate) fn time_put(&self) -> TimerGuard<'_> {
        TimerGuard::start(self.put_timer.as_deref())
    }

    pub(crate) fn time_delete(&self) -> TimerGuard<'_> {
        TimerGuard::start(self.delete_timer.as_deref())
    }

    pub(crate) fn mark_miss(&self) {
        if let Some(meter) = &self.miss_meter {
            meter.mark(1);
        }
    }

    pub(crate) fn mark_read(&self, bytes: usize) {
        if let Some(meter) = &self.read_meter {
            meter.mark(bytes as u64);
        }
    }

    pub(crate) fn mark_written(&self, bytes: usize) {
        if let Some(meter) = &self.write_meter {
            meter.mark(bytes as u64);
        }
    }
}

impl fmt::Debug for Instruments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruments")
            .field("get_timer", &self.get_timer.is_some())
            .field("put_timer", &self.put_timer.is_some())
            .field("delete_timer", &self.delete_timer.is_some())
            .field("miss_meter", &self.miss_meter.is_some())
            .field("read_meter", &self.read_meter.is_some())
            .field("write_meter", &self.write_meter.is_some())
            .finish()
    }
}

/// Records the elapsed time into its timer when dropped, so every exit path
/// of the timed call produces exactly one sample.
#[must_use = "the sample is recorded when the guard is dropped"]
pub(crate) struct TimerGuard<'a> {
    timer: Option<&'a dyn Timer>,
    start: Instant,
}

impl<'a> TimerGuard<'a> {
    fn start(timer: Option<&'a dyn Timer>) -> Self {
        Self {
            timer,
            start: Instant::now(),
        }
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer {
            timer.update(self.start.elapsed());
        }
    }
}

// =============================================================================
// Standard Sinks
// =============================================================================

/// Lock-free timer keeping count, total and maximum latency
#[derive(Debug, Default)]
pub struct StandardTimer {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl StandardTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples recorded
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all samples
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    /// Largest single sample
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed))
    }

    /// Mean sample, zero when nothing was recorded
    pub fn mean(&self) -> Duration {
        match self.count() {
            0 => Duration::ZERO,
            n => Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed) / n),
        }
    }
}

impl Timer for StandardTimer {
    fn update(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }
}

/// Lock-free monotonically increasing counter
#[derive(Debug, Default)]
pub struct StandardMeter {
    count: AtomicU64,
}

impl StandardMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Meter for StandardMeter {
    fn mark(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }
}

/// One standard sink per hook, ready to attach to a database
#[derive(Debug, Clone, Default)]
pub struct DatabaseMetrics {
    pub get_timer: Arc<StandardTimer>,
    pub put_timer: Arc<StandardTimer>,
    pub delete_timer: Arc<StandardTimer>,
    pub misses: Arc<StandardMeter>,
    pub bytes_read: Arc<StandardMeter>,
    pub bytes_written: Arc<StandardMeter>,
}

impl DatabaseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook set reporting into these sinks
    pub fn instruments(&self) -> Instruments {
        Instruments::new()
            .with_get_timer(self.get_timer.clone())
            .with_put_timer(self.put_timer.clone())
            .with_delete_timer(self.delete_timer.clone())
            .with_miss_meter(self.misses.clone())
            .with_read_meter(self.bytes_read.clone())
            .with_write_meter(self.bytes_written.clone())
    }
}
