//! Time sources and the deadline-bound ticker that paces sweep cycles.
//!
//! Production code uses [`SystemClock`]. Tests inject a [`ManualClock`], whose
//! `sleep` advances virtual time instead of waiting, so a full 50 second
//! invocation runs instantly.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Clock abstraction for time operations.
pub trait Clock: Send + Sync + Debug {
    /// Monotonic instant for measuring elapsed time.
    fn now(&self) -> Instant;

    /// Wall-clock time in seconds since the Unix epoch.
    fn epoch_secs(&self) -> i64;

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    elapsed_ns: Arc<AtomicU64>,
    epoch_start: Arc<AtomicI64>,
    base: Instant,
}

impl ManualClock {
    pub fn starting_at(epoch_secs: i64) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            epoch_start: Arc::new(AtomicI64::new(epoch_secs)),
            base: Instant::now(),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Total virtual time advanced so far.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(1_700_000_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn epoch_secs(&self) -> i64 {
        let secs = i64::try_from(self.elapsed().as_secs()).unwrap_or(i64::MAX);
        self.epoch_start.load(Ordering::Acquire).saturating_add(secs)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

/// Paces repeated work inside a fixed budget.
///
/// Each call to [`Ticker::pace`] waits out whatever is left of the cadence
/// since the cycle started, but never past the budget deadline.
#[derive(Debug, Clone)]
pub struct Ticker {
    clock: Arc<dyn Clock>,
    started: Instant,
    budget: Duration,
    cadence: Duration,
}

impl Ticker {
    pub fn start(clock: Arc<dyn Clock>, budget: Duration, cadence: Duration) -> Self {
        let started = clock.now();
        Self { clock, started, budget, cadence }
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started)
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Marks the start of a cycle; pass the result to [`Ticker::pace`].
    pub fn cycle_start(&self) -> Instant {
        self.clock.now()
    }

    pub async fn pace(&self, cycle_started: Instant) {
        let spent = self.clock.now().saturating_duration_since(cycle_started);
        if spent >= self.cadence {
            return;
        }
        let wait = (self.cadence - spent).min(self.remaining());
        if !wait.is_zero() {
            self.clock.sleep(wait).await;
        }
    }
}
