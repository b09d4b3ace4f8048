//! Bounded worker pool over a batch of tasks.
//!
//! ```text
//!  tasks ──► queue ──► worker 1..n ──► results ──► writer ──► out.jsonl
//! ```
//!
//! Each worker evaluates one task at a time with its own repository handle.
//! Tasks that share a (repository, commit) pair share a working tree and
//! sandbox names, so they are serialized through a keyed lock. A panic
//! while evaluating a task is caught at its join handle and written as an
//! errored record; the batch continues.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use crate::error::DispatchError;
use crate::evaluation::{Evaluator, TaskOutcome};
use crate::task::{completed_ids, JsonlWriter, Task};

use super::progress::ProgressMonitor;
use super::stats::{PoolStats, SharedPoolStats};

/// What each worker does with a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Full three-phase evaluation.
    #[default]
    Evaluate,
    /// Build probe only.
    Probe,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub n_jobs: usize,
    pub mode: DispatchMode,
    /// Drop raw phase results from output records.
    pub delete_log: bool,
    /// Append to an existing output and skip tasks already in it.
    pub resume: bool,
    pub progress_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            n_jobs: 1,
            mode: DispatchMode::Evaluate,
            delete_log: false,
            resume: false,
            progress_interval: Duration::from_secs(60),
        }
    }
}

impl DispatcherConfig {
    pub fn new(n_jobs: usize) -> Self {
        Self {
            n_jobs,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_delete_log(mut self, delete_log: bool) -> Self {
        self.delete_log = delete_log;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Totals of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub input_tasks: usize,
    /// Tasks skipped because the output already held their record.
    pub resumed: usize,
    pub written: usize,
    pub output: PathBuf,
    pub stats: PoolStats,
}

/// One lock per key, created on first use and dropped by the last holder.
#[derive(Default)]
pub struct KeyedLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let lock = self.entries().entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyedGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    fn release(&self, key: &str) {
        let mut locks = self.entries();
        // the map's own reference is the only one left: nobody holds or waits
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held while a key is locked.
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.owner.release(&self.key);
    }
}

pub struct Dispatcher {
    evaluator: Evaluator,
    config: DispatcherConfig,
    stats: Arc<SharedPoolStats>,
}

impl Dispatcher {
    pub fn new(evaluator: Evaluator, config: DispatcherConfig) -> Self {
        Self {
            evaluator,
            config,
            stats: Arc::new(SharedPoolStats::new()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot(self.config.n_jobs.max(1))
    }

    /// Runs every task and writes one record per task to `output`.
    ///
    /// Only output failures stop the batch.
    pub async fn run(&self, tasks: Vec<Task>, output: &Path) -> Result<DispatchSummary, DispatchError> {
        let input_tasks = tasks.len();
        let done: HashSet<String> = if self.config.resume {
            completed_ids(output)?
        } else {
            HashSet::new()
        };
        let pending: Vec<Task> = tasks
            .into_iter()
            .filter(|task| !done.contains(&task.task_id()))
            .collect();
        let resumed = input_tasks - pending.len();
        if resumed > 0 {
            tracing::info!(resumed, "Skipping tasks already present in the output");
        }

        let writer = JsonlWriter::open(output, self.config.resume)?;
        let n_jobs = self.config.n_jobs.max(1);
        tracing::info!(
            tasks = pending.len(),
            n_jobs,
            backend = self.evaluator.backend_name(),
            mode = ?self.config.mode,
            output = %output.display(),
            "Starting batch"
        );

        let monitor = ProgressMonitor::start(
            self.stats.clone(),
            n_jobs,
            pending.len(),
            self.config.progress_interval,
        );

        let (record_tx, mut record_rx) = mpsc::channel::<Value>(n_jobs * 2);
        let writer_task = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            while let Some(record) = record_rx.blocking_recv() {
                writer.write_record(&record)?;
            }
            Ok::<usize, DispatchError>(writer.written())
        });

        let (task_tx, task_rx) = mpsc::channel::<Task>(n_jobs);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let locks = Arc::new(KeyedLocks::default());

        let mut workers = Vec::with_capacity(n_jobs);
        for id in 0..n_jobs {
            let worker = Worker {
                id,
                evaluator: self.evaluator.clone(),
                mode: self.config.mode,
                delete_log: self.config.delete_log,
                queue: task_rx.clone(),
                records: record_tx.clone(),
                locks: locks.clone(),
                stats: self.stats.clone(),
            };
            workers.push(tokio::spawn(worker.run()));
        }
        drop(record_tx);

        for task in pending {
            if task_tx.send(task).await.is_err() {
                tracing::error!("All workers stopped before the queue was drained");
                break;
            }
        }
        drop(task_tx);

        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        monitor.stop().await;

        let written = writer_task
            .await
            .map_err(|e| DispatchError::WriterFailed(e.to_string()))??;

        let stats = self.stats();
        tracing::info!(
            written,
            evaluated = stats.evaluated,
            skipped = stats.skipped,
            errored = stats.errored,
            task_ok = stats.task_ok,
            task_perfect = stats.task_perfect,
            "Batch finished"
        );

        Ok(DispatchSummary {
            input_tasks,
            resumed,
            written,
            output: output.to_path_buf(),
            stats,
        })
    }
}

struct Worker {
    id: usize,
    evaluator: Evaluator,
    mode: DispatchMode,
    delete_log: bool,
    queue: Arc<Mutex<mpsc::Receiver<Task>>>,
    records: mpsc::Sender<Value>,
    locks: Arc<KeyedLocks>,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = self.queue.lock().await.recv().await;
            let Some(task) = next else {
                break;
            };

            self.stats.increment_active();
            let started = Instant::now();
            let outcome = self.process(&task).await;
            self.stats.record(&outcome, started.elapsed());
            self.stats.decrement_active();

            if self
                .records
                .send(outcome.to_record(self.delete_log))
                .await
                .is_err()
            {
                tracing::error!(worker = self.id, "Result writer stopped; worker exiting");
                break;
            }
        }
        tracing::debug!(worker = self.id, "Worker finished");
    }

    async fn process(&self, task: &Task) -> TaskOutcome {
        let _guard = self
            .locks
            .lock(&format!("{}@{}", task.repo, task.base_commit))
            .await;

        let evaluator = self.evaluator.clone();
        let mode = self.mode;
        let owned = task.clone();
        let handle = tokio::spawn(async move {
            match mode {
                DispatchMode::Evaluate => evaluator.evaluate(&owned).await,
                DispatchMode::Probe => evaluator.probe(&owned).await,
            }
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(worker = self.id, repo = %task.repo, error = %e, "Task panicked");
                self.evaluator.release_sandbox(task).await;
                TaskOutcome::panicked(task, format!("worker panicked: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::scripted::{Reply, ScriptedBackend};
    use crate::repo::fixture::{git_available, Origin};
    use crate::repo::HandleSettings;

    fn read_records(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn skipped_task(n: usize) -> Task {
        let mut task = Task::new(format!("owner/repo{n}"), format!("{n:040}"));
        task.repo_build = Some(0);
        task
    }

    fn evaluator() -> Evaluator {
        let backend = Arc::new(ScriptedBackend::new(|_, _, _| Reply::Fail("unused".into())));
        Evaluator::new(backend, HandleSettings::default())
    }

    #[tokio::test]
    async fn test_every_task_gets_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out/results.jsonl");
        let mut tasks: Vec<Task> = (0..5).map(skipped_task).collect();
        tasks.push(Task::new("not a repo", "abc"));

        let dispatcher = Dispatcher::new(evaluator(), DispatcherConfig::new(3).with_delete_log(true));
        let summary = dispatcher.run(tasks, &out).await.unwrap();
        assert_eq!(summary.input_tasks, 6);
        assert_eq!(summary.written, 6);
        assert_eq!(summary.stats.skipped, 5);
        assert_eq!(summary.stats.errored, 1);

        let records = read_records(&out);
        assert_eq!(records.len(), 6);
        let invalid = records.iter().find(|r| r["repo"] == "not a repo").unwrap();
        assert_eq!(invalid["run_status"], -1);
        assert_eq!(invalid["exception_kind"], "invalid");
    }

    #[tokio::test]
    async fn test_resume_skips_written_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("results.jsonl");
        let tasks: Vec<Task> = (0..4).map(skipped_task).collect();

        Dispatcher::new(evaluator(), DispatcherConfig::new(2))
            .run(tasks[..2].to_vec(), &out)
            .await
            .unwrap();
        let summary = Dispatcher::new(evaluator(), DispatcherConfig::new(2).with_resume(true))
            .run(tasks.clone(), &out)
            .await
            .unwrap();
        assert_eq!(summary.resumed, 2);
        assert_eq!(summary.written, 2);
        assert_eq!(read_records(&out).len(), 4);

        let fresh = Dispatcher::new(evaluator(), DispatcherConfig::new(2))
            .run(tasks, &out)
            .await
            .unwrap();
        assert_eq!(fresh.resumed, 0);
        assert_eq!(read_records(&out).len(), 4);
    }

    #[tokio::test]
    async fn test_panicking_task_is_recorded() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let origin = Origin::init(&dir.path().join("origin"), "acme/calc");
        origin.write("calc.py", "x = 1\n");
        let commit = origin.commit("initial");

        let backend = Arc::new(ScriptedBackend::new(|_, _, _| -> Reply {
            panic!("backend exploded")
        }));
        let scripted = backend.clone();
        let settings = HandleSettings {
            cache_root: dir.path().join("cache"),
            git_base_url: origin.base.display().to_string(),
            home: None,
            ..Default::default()
        };
        let evaluator = Evaluator::new(backend, settings);
        let out = dir.path().join("results.jsonl");
        let tasks = vec![Task::new("acme/calc", commit), skipped_task(1)];

        let summary = Dispatcher::new(evaluator, DispatcherConfig::new(2))
            .run(tasks, &out)
            .await
            .unwrap();
        assert_eq!(summary.written, 2);
        let records = read_records(&out);
        let panicked = records.iter().find(|r| r["repo"] == "acme/calc").unwrap();
        assert_eq!(panicked["exception_kind"], "panic");
        assert_eq!(panicked["run_status"], -1);
        assert_eq!(scripted.running(), 0);
        assert!(scripted.events().iter().any(|e| e == "stop"));
    }

    #[tokio::test]
    async fn test_keyed_locks_serialize_same_key() {
        let locks = Arc::new(KeyedLocks::default());
        let first = locks.lock("a@1").await;
        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock("b@1")).await;
        assert!(other.is_ok());

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.lock("a@1")).await;
        assert!(blocked.is_err());
        drop(first);
        let acquired = tokio::time::timeout(Duration::from_millis(500), locks.lock("a@1")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_keyed_locks_forget_released_keys() {
        let locks = KeyedLocks::default();
        let first = locks.lock("a@1").await;
        let second = locks.lock("b@2").await;
        assert_eq!(locks.len(), 2);

        drop(second);
        assert_eq!(locks.len(), 1);

        let waiter = async {
            let _again = locks.lock("a@1").await;
        };
        let release = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            // a queued waiter keeps the entry alive
            drop(first);
            assert_eq!(locks.len(), 1);
        };
        tokio::join!(waiter, release);
        assert!(locks.is_empty());
    }
}
