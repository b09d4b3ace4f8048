//! Error types for swe-testbed operations.
//!
//! Defines the error taxonomy for each subsystem:
//! - Sandbox backends (container runtime or host processes)
//! - Git working-tree operations
//! - Per-task evaluation failures surfaced in output records
//! - Configuration loading
//! - Batch dispatch

use thiserror::Error;

/// Errors raised by a sandbox backend.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Container runtime not available: {0}")]
    DaemonUnavailable(String),

    #[error("Failed to start sandbox '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    #[error("Command execution failed in '{container}': {reason}")]
    ExecFailed { container: String, reason: String },

    #[error("Failed to commit '{image}' after {attempts} attempt(s): {reason}")]
    CommitFailed {
        image: String,
        attempts: u32,
        reason: String,
    },

    #[error("Volume '{name}' operation failed: {reason}")]
    Volume { name: String, reason: String },

    #[error("Failed to pull image '{image}': {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Command timed out after {seconds} seconds")]
    Timeout {
        seconds: u64,
        stdout: String,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Returns true for the deadline variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors raised while preparing or mutating the checked-out working tree.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Repo missing or deleted: clone of '{repo}' failed: {reason}")]
    CloneFailed { repo: String, reason: String },

    #[error("Checkout of commit '{commit}' failed: {reason}")]
    CheckoutFailed { commit: String, reason: String },

    #[error("Patch does not apply: {reason}")]
    PatchFailed { reason: String },

    #[error("Failed to reset working tree: {0}")]
    ResetFailed(String),

    #[error("Invalid git input: {0}")]
    InvalidInput(String),

    #[error("git {operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Phase of the evaluation protocol an error or result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prepare,
    Build,
    Before,
    After,
    Gold,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::Build => write!(f, "build"),
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
            Self::Gold => write!(f, "gold"),
        }
    }
}

/// Task-level failure. Every variant aborts only the task it occurred in.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{phase} timed out after {seconds} seconds")]
    Timeout { phase: Phase, seconds: u64 },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Build exited with code {return_code}")]
    BuildFailed { return_code: i64 },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Invalid handle transition from '{from}' to '{to}'")]
    InvalidState { from: String, to: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Stable error class written to output records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Sandbox(SandboxError::Timeout { .. }) => "timeout",
            Self::Git(_) => "git",
            Self::Sandbox(_) => "sandbox",
            Self::BuildFailed { .. } => "build",
            Self::InvalidTask(_) => "invalid",
            Self::InvalidState { .. } => "state",
            Self::Io(_) => "io",
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that stop a whole batch (never a single task's failure).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Result writer stopped unexpectedly: {0}")]
    WriterFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_kinds() {
        let timeout = TaskError::Timeout {
            phase: Phase::Build,
            seconds: 300,
        };
        assert_eq!(timeout.kind(), "timeout");
        assert_eq!(timeout.to_string(), "build timed out after 300 seconds");

        let git: TaskError = GitError::PatchFailed {
            reason: "hunk #1 failed".to_string(),
        }
        .into();
        assert_eq!(git.kind(), "git");

        let sandbox_timeout: TaskError = SandboxError::Timeout {
            seconds: 5,
            stdout: String::new(),
            stderr: String::new(),
        }
        .into();
        assert_eq!(sandbox_timeout.kind(), "timeout");

        assert_eq!(TaskError::BuildFailed { return_code: 1 }.kind(), "build");
    }

    #[test]
    fn test_clone_failure_message_mentions_missing_repo() {
        let err = GitError::CloneFailed {
            repo: "owner/gone".to_string(),
            reason: "not found".to_string(),
        };
        assert!(err.to_string().starts_with("Repo missing or deleted"));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Gold.to_string(), "gold");
        assert_eq!(
            serde_json::to_string(&Phase::Before).unwrap(),
            "\"before\""
        );
    }
}
