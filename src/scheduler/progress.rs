//! Background progress monitor for long batches.
//!
//! Periodically logs dispatcher counters so operators can follow a run
//! without reading the per-task log lines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::stats::SharedPoolStats;

/// Logs progress every `interval` until stopped.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    pub fn start(
        stats: Arc<SharedPoolStats>,
        num_workers: usize,
        total_tasks: usize,
        interval: Duration,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // first tick is immediate

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = stats.snapshot(num_workers);
                let done = snap.total_processed();
                let pct = if total_tasks > 0 {
                    (done as f64 / total_tasks as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };
                let elapsed = start.elapsed().as_secs_f64();
                let per_min = if elapsed > 0.0 {
                    done as f64 / elapsed * 60.0
                } else {
                    0.0
                };

                tracing::info!(
                    done,
                    total = total_tasks,
                    evaluated = snap.evaluated,
                    skipped = snap.skipped,
                    errored = snap.errored,
                    task_ok = snap.task_ok,
                    active_workers = snap.active_workers,
                    progress_pct = format!("{:.1}%", pct),
                    tasks_per_min = format!("{:.2}", per_min),
                    elapsed_secs = elapsed as u64,
                    "Evaluation progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signals the monitor and waits for it to exit.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_monitor_start_stop() {
        let stats = Arc::new(SharedPoolStats::new());
        stats.increment_active();
        let monitor = ProgressMonitor::start(stats, 2, 10, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(70)).await;
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_returns_promptly_with_long_interval() {
        let monitor = ProgressMonitor::start(
            Arc::new(SharedPoolStats::new()),
            1,
            1,
            Duration::from_secs(3600),
        );
        tokio::time::timeout(Duration::from_secs(2), monitor.stop())
            .await
            .unwrap();
    }
}
