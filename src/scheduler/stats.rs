//! Dispatcher statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::evaluation::{OutcomeStatus, TaskOutcome};

/// Point-in-time view of the dispatcher counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub num_workers: usize,
    pub active_workers: usize,
    pub evaluated: u64,
    pub skipped: u64,
    pub errored: u64,
    /// Evaluated tasks whose verdict has `task_ok`.
    pub task_ok: u64,
    pub task_perfect: u64,
    #[serde(serialize_with = "as_secs")]
    pub average_task_duration: Duration,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl PoolStats {
    pub fn total_processed(&self) -> u64 {
        self.evaluated + self.skipped + self.errored
    }

    /// Share of processed tasks that were fully evaluated, in percent.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.evaluated as f64 / total as f64) * 100.0
    }
}

/// Counters shared between workers.
#[derive(Debug, Default)]
pub struct SharedPoolStats {
    evaluated: AtomicU64,
    skipped: AtomicU64,
    errored: AtomicU64,
    task_ok: AtomicU64,
    task_perfect: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &TaskOutcome, duration: Duration) {
        let counter = match outcome.status {
            OutcomeStatus::Evaluated => &self.evaluated,
            OutcomeStatus::Skipped => &self.skipped,
            OutcomeStatus::Errored => &self.errored,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        if outcome.task_ok() {
            self.task_ok.fetch_add(1, Ordering::SeqCst);
        }
        if outcome.task_perfect() {
            self.task_perfect.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self, num_workers: usize) -> PoolStats {
        let evaluated = self.evaluated.load(Ordering::SeqCst);
        let skipped = self.skipped.load(Ordering::SeqCst);
        let errored = self.errored.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total = evaluated + skipped + errored;
        let average_task_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            evaluated,
            skipped,
            errored,
            task_ok: self.task_ok.load(Ordering::SeqCst),
            task_perfect: self.task_perfect.load(Ordering::SeqCst),
            average_task_duration,
        }
    }
}
