//! Minute driver — one bounded invocation of repeated sweep cycles.
//!
//! An external trigger calls this at most once a minute. The driver loads the
//! task snapshot once, then runs a sweep cycle roughly every `cadence` until
//! `budget` has elapsed (defaults 10 s and 50 s, leaving headroom under a 60 s
//! caller timeout). Overlapping invocations are not coordinated, so a task can
//! occasionally be dispatched twice: delivery is at-least-once.

use std::sync::Arc;
use std::time::Duration;

use tickhook_core::config::DriverConfig;

use crate::clock::Ticker;
use crate::engine::{CycleReport, SweepEngine};

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The store could not be scanned or held no tasks.
    NothingToDo { reason: String },
    /// The full budget was spent sweeping.
    Accepted { cycles: u32, totals: CycleReport },
}

#[derive(Clone)]
pub struct MinuteDriver {
    engine: SweepEngine,
    budget: Duration,
    cadence: Duration,
}

impl MinuteDriver {
    pub fn new(engine: SweepEngine, config: &DriverConfig) -> Self {
        Self {
            engine,
            budget: Duration::from_secs(config.budget_secs),
            // A zero cadence would spin through the whole budget.
            cadence: Duration::from_secs(config.cadence_secs.max(1)),
        }
    }

    pub async fn run(&self) -> InvocationOutcome {
        let ticker = Ticker::start(Arc::clone(self.engine.clock()), self.budget, self.cadence);

        let mut snapshot = match self.engine.store().scan() {
            Ok(tasks) if tasks.is_empty() => {
                return InvocationOutcome::NothingToDo {
                    reason: "There is no task in the store.".into(),
                };
            }
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!("Task scan failed, skipping invocation: {e}");
                return InvocationOutcome::NothingToDo {
                    reason: "Task store is unavailable or the scan has failed.".into(),
                };
            }
        };
        tracing::info!(tasks = snapshot.len(), budget_secs = self.budget.as_secs(), "Minute invocation started");

        let mut cycles = 0u32;
        let mut totals = CycleReport::default();
        while !ticker.is_exhausted() {
            let cycle_started = ticker.cycle_start();
            let report = self.engine.run_cycle(&mut snapshot).await;
            cycles += 1;
            totals.absorb(&report);
            if report.due > 0 {
                tracing::debug!(cycle = cycles, ?report, "Sweep cycle finished");
            }
            ticker.pace(cycle_started).await;
        }

        tracing::info!(
            cycles,
            dispatched = totals.due,
            deleted = totals.deleted,
            remaining = snapshot.len(),
            "Minute invocation finished"
        );
        InvocationOutcome::Accepted { cycles, totals }
    }
}
