//! swe-testbed: sandboxed, multi-language test harness.
//!
//! Checks out a repository at a commit, builds it once inside a sandbox,
//! and runs its test suite in three phases (before any patch, with the test
//! patch, with the test patch and the candidate patch). Test outcomes from
//! any supported framework are normalized into one report shape and compared
//! across phases to classify tests as PASS_TO_PASS or FAIL_TO_PASS.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod execution;
pub mod language;
pub mod repo;
pub mod report;
pub mod scheduler;
pub mod task;

pub use config::{BackendKind, HarnessConfig};
pub use error::{ConfigError, DispatchError, GitError, Phase, SandboxError, TaskError};
pub use evaluation::{CorrectnessVerdict, Evaluator, TaskOutcome};
pub use report::{TestCase, TestReport, TestStatus, TestSummary};
pub use task::Task;
