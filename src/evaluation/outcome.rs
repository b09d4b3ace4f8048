//! Per-phase results and the immutable per-task outcome record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Phase, TaskError};
use crate::repo::ExecutionResult;
use crate::report::TestReport;
use crate::task::Task;

use super::verdict::CorrectnessVerdict;

/// Exception recorded for tasks skipped because their build probe failed.
pub const SKIP_NOT_BUILT: &str = "skip, not built";

/// Result of the build phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    #[serde(flatten)]
    pub execution: ExecutionResult,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.execution.success() || self.execution.reused_image
    }

    pub fn return_code(&self) -> i64 {
        self.execution.return_code
    }
}

impl From<ExecutionResult> for BuildResult {
    fn from(execution: ExecutionResult) -> Self {
        Self { execution }
    }
}

/// Result of one of the three test phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPhaseResult {
    pub phase: Phase,
    #[serde(flatten)]
    pub execution: ExecutionResult,
}

impl TestPhaseResult {
    pub fn new(phase: Phase, execution: ExecutionResult) -> Self {
        Self { phase, execution }
    }

    pub fn report(&self) -> TestReport {
        self.execution.report_or_unknown()
    }
}

/// How far a task got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Evaluated,
    Skipped,
    Errored,
}

impl OutcomeStatus {
    /// Integer form written as `run_status`.
    pub fn code(self) -> i64 {
        match self {
            Self::Evaluated => 1,
            Self::Skipped => 0,
            Self::Errored => -1,
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evaluated => write!(f, "evaluated"),
            Self::Skipped => write!(f, "skipped"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Everything known about one task once it has finished.
///
/// Phase results that ran before a failure are kept so the failure can be
/// diagnosed from the record alone.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: Task,
    pub task_id: String,
    pub status: OutcomeStatus,
    /// `1` built and tests passed, `0` built without passing tests, `-1` error.
    pub repo_build: Option<i64>,
    pub build: Option<BuildResult>,
    pub before: Option<TestPhaseResult>,
    pub after: Option<TestPhaseResult>,
    pub gold: Option<TestPhaseResult>,
    pub verdict: Option<CorrectnessVerdict>,
    pub exception: Option<String>,
    pub exception_kind: Option<String>,
    pub finished_at: DateTime<Utc>,
    /// Build probe outcomes carry no correctness fields.
    pub probe: bool,
}

impl TaskOutcome {
    /// An outcome with nothing run yet.
    pub fn pending(task: &Task) -> Self {
        Self {
            task_id: task.task_id(),
            task: task.clone(),
            status: OutcomeStatus::Errored,
            repo_build: task.repo_build,
            build: None,
            before: None,
            after: None,
            gold: None,
            verdict: None,
            exception: None,
            exception_kind: None,
            finished_at: Utc::now(),
            probe: false,
        }
    }

    pub fn for_probe(task: &Task) -> Self {
        Self {
            probe: true,
            ..Self::pending(task)
        }
    }

    /// Build probe finished with the given `repo_build` status.
    pub fn probed(mut self, repo_build: i64) -> Self {
        self.status = OutcomeStatus::Evaluated;
        self.repo_build = Some(repo_build);
        self.finished_at = Utc::now();
        self
    }

    pub fn evaluated(mut self, verdict: CorrectnessVerdict) -> Self {
        self.status = OutcomeStatus::Evaluated;
        self.verdict = Some(verdict);
        self.finished_at = Utc::now();
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.status = OutcomeStatus::Skipped;
        self.exception = Some(reason.into());
        self.finished_at = Utc::now();
        self
    }

    pub fn errored(mut self, error: &TaskError) -> Self {
        self.status = OutcomeStatus::Errored;
        self.exception = Some(error.to_string());
        self.exception_kind = Some(error.kind().to_string());
        self.finished_at = Utc::now();
        self
    }

    /// Errored outcome for a task whose worker panicked.
    pub fn panicked(task: &Task, message: impl Into<String>) -> Self {
        let mut outcome = Self::pending(task);
        outcome.exception = Some(message.into());
        outcome.exception_kind = Some("panic".to_string());
        outcome
    }

    pub fn task_ok(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.task_ok)
    }

    pub fn task_perfect(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.task_perfect)
    }

    /// The input record enriched with the outcome fields. `delete_log`
    /// drops the raw phase results.
    pub fn to_record(&self, delete_log: bool) -> Value {
        let mut record = match serde_json::to_value(&self.task) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        if let Some(repo_build) = self.repo_build {
            record.insert("repo_build".into(), repo_build.into());
        }
        if !self.probe {
            record.insert("task_ok".into(), self.task_ok().into());
            record.insert("task_perfect".into(), self.task_perfect().into());

            let verdict = self.verdict.clone().unwrap_or_default();
            if let Ok(Value::Object(sets)) = serde_json::to_value(&verdict) {
                for key in ["PASS_TO_PASS", "FAIL_TO_PASS", "NEWLY_PASSING"] {
                    if let Some(value) = sets.get(key) {
                        record.insert(key.into(), value.clone());
                    }
                }
            }
        }

        record.insert("run_status".into(), self.status.code().into());
        record.insert(
            "exception".into(),
            self.exception.clone().map_or(Value::Null, Value::String),
        );
        record.insert(
            "exception_kind".into(),
            self.exception_kind.clone().map_or(Value::Null, Value::String),
        );
        record.insert("task_id".into(), self.task_id.clone().into());
        record.insert("finished_at".into(), self.finished_at.to_rfc3339().into());

        if !delete_log {
            let phases = [
                ("build_result", self.build.as_ref().map(serde_json::to_value)),
                ("before_result", self.before.as_ref().map(serde_json::to_value)),
                ("after_result", self.after.as_ref().map(serde_json::to_value)),
                ("gold_result", self.gold.as_ref().map(serde_json::to_value)),
            ];
            for (key, value) in phases {
                if let Some(Ok(value)) = value {
                    record.insert(key.into(), value);
                }
            }
        }

        Value::Object(record)
    }
}
