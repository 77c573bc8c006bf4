//! Sweep engine — one due-task scan, concurrent dispatch, outcome
//! classification and persistence pass.
//!
//! ```text
//! snapshot ──filter due──▶ [task clones] ──spawn──▶ dispatch ×N (parallel)
//!                                                   │ each worker counts down
//!                                                   ▼
//!                                             CycleLatch == 0
//!                                                   │
//!      classify ─▶ failure reschedules ─▶ success reschedules ─▶ deletes
//!                     (upsert)                (upsert)             (delete)
//! ```
//!
//! The snapshot is owned by the caller and passed in mutably: reschedules are
//! written back into it and deleted tasks are removed from it, so the next
//! cycle of the same invocation sees the new state without re-reading the
//! store.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::clock::Clock;
use crate::dispatch::{DispatchResult, Dispatcher};
use crate::store::TaskStore;
use crate::tasks::ScheduledTask;

/// Why a task is being kept for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPath {
    Failure,
    Success,
}

/// Why a task is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    /// The response status is in `cancelOnReturnCodes`.
    CancelCode(u16),
    /// Succeeded with `cancelRetryOnSuccess`.
    Succeeded,
    /// The retry budget is used up.
    Exhausted,
}

/// What happens to a task after one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Reschedule(RetryPath),
    Delete(DeleteReason),
}

/// Decide a task's fate from its dispatch result. Rules apply in order, first
/// match wins:
///
/// 1. status in `cancelOnReturnCodes` → delete;
/// 2. success and `cancelRetryOnSuccess` → delete;
/// 3. otherwise reschedule while the retry budget allows, else delete.
pub fn classify(task: &ScheduledTask, result: &DispatchResult) -> Outcome {
    if task.cancels_on(result.status) {
        return Outcome::Delete(DeleteReason::CancelCode(result.status));
    }
    if result.success && task.cancel_retry_on_success {
        return Outcome::Delete(DeleteReason::Succeeded);
    }
    if !task.has_retry_budget() {
        return Outcome::Delete(DeleteReason::Exhausted);
    }
    if result.success {
        Outcome::Reschedule(RetryPath::Success)
    } else {
        Outcome::Reschedule(RetryPath::Failure)
    }
}

/// Countdown that releases a waiter once every dispatch in a cycle finished.
#[derive(Debug)]
pub struct CycleLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl CycleLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            notify: Notify::new(),
        }
    }

    pub fn count_down(&self) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.notify.notify_waiters();
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a final count_down between the
            // check and the await is not lost.
            notified.as_mut().enable();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Counts the latch down when dropped, including during a panic unwind.
struct CountDownOnDrop(Arc<CycleLatch>);

impl Drop for CountDownOnDrop {
    fn drop(&mut self) {
        self.0.count_down();
    }
}

/// Tally of one sweep cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub due: usize,
    pub rescheduled_after_failure: usize,
    pub rescheduled_after_success: usize,
    pub deleted: usize,
    /// Store writes that failed; the in-memory snapshot was still updated.
    pub store_errors: usize,
}

impl CycleReport {
    pub fn absorb(&mut self, other: &CycleReport) {
        self.due += other.due;
        self.rescheduled_after_failure += other.rescheduled_after_failure;
        self.rescheduled_after_success += other.rescheduled_after_success;
        self.deleted += other.deleted;
        self.store_errors += other.store_errors;
    }
}

/// Runs sweep cycles over a caller-owned task snapshot.
#[derive(Clone)]
pub struct SweepEngine {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
}

impl SweepEngine {
    pub fn new(store: Arc<dyn TaskStore>, dispatcher: Arc<dyn Dispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self { store, dispatcher, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Run one cycle: fire every due task, then reconcile outcomes into the
    /// store and the snapshot.
    pub async fn run_cycle(&self, snapshot: &mut Vec<ScheduledTask>) -> CycleReport {
        let now = self.clock.epoch_secs();
        let due: Vec<usize> = snapshot
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_due(now))
            .map(|(i, _)| i)
            .collect();

        let mut report = CycleReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return report;
        }
        tracing::info!(due = due.len(), pending = snapshot.len(), "Sweep cycle dispatching");

        let results = self.dispatch_all(snapshot, &due).await;

        let mut failed = Vec::new();
        let mut succeeded = Vec::new();
        let mut deletes = Vec::new();
        for (idx, result) in due.into_iter().zip(results) {
            let task = &snapshot[idx];
            let outcome = classify(task, &result);
            tracing::debug!(
                url = %task.url,
                status = result.status,
                retried = task.retried_count,
                ?outcome,
                "Classified dispatch"
            );
            match outcome {
                Outcome::Reschedule(RetryPath::Failure) => failed.push(idx),
                Outcome::Reschedule(RetryPath::Success) => succeeded.push(idx),
                Outcome::Delete(reason) => {
                    tracing::info!(url = %task.url, ?reason, "Task finished");
                    deletes.push(idx);
                }
            }
        }

        let now = self.clock.epoch_secs();
        report.rescheduled_after_failure = failed.len();
        report.rescheduled_after_success = succeeded.len();
        for idx in failed.into_iter().chain(succeeded) {
            let task = &mut snapshot[idx];
            task.reschedule(now);
            if let Err(e) = self.store.upsert(task) {
                report.store_errors += 1;
                tracing::warn!(url = %task.url, "Failed to persist rescheduled task: {e}");
            }
        }

        report.deleted = deletes.len();
        let mut removed = HashSet::with_capacity(deletes.len());
        for idx in deletes {
            let url = &snapshot[idx].url;
            if let Err(e) = self.store.delete(url) {
                report.store_errors += 1;
                tracing::warn!(url = %url, "Failed to delete finished task: {e}");
            }
            removed.insert(url.clone());
        }
        snapshot.retain(|t| !removed.contains(&t.url));

        report
    }

    /// Fire every selected task concurrently and collect results in input order.
    async fn dispatch_all(&self, snapshot: &[ScheduledTask], due: &[usize]) -> Vec<DispatchResult> {
        let latch = Arc::new(CycleLatch::new(due.len()));
        let mut handles = Vec::with_capacity(due.len());

        for &idx in due {
            let task = snapshot[idx].clone();
            let dispatcher = self.dispatcher.clone();
            let guard = CountDownOnDrop(latch.clone());
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                dispatcher.dispatch(&task).await
            }));
        }

        latch.wait().await;

        let joined = futures::future::join_all(handles).await;
        joined
            .into_iter()
            .zip(due)
            .map(|(joined, &idx)| match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(url = %snapshot[idx].url, "Dispatch worker crashed: {e}");
                    DispatchResult::transport_failure(format!("dispatch worker crashed: {e}"))
                }
            })
            .collect()
    }
}
