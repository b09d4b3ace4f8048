use serde::{Deserialize, Serialize};

use crate::execution::CommandOutput;
use crate::report::TestReport;

/// Return code recorded for a test command killed at its deadline.
pub const TIMEOUT_RETURN_CODE: i64 = 2;

/// Stderr recorded for a test command killed at its deadline.
pub const TIMEOUT_MESSAGE: &str = "Timeout exception";

/// Raw outcome of one command run through a repository handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub return_code: i64,
    pub duration_secs: f64,
    /// Parsed test evidence; absent for builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<TestReport>,
    /// `TaskError::kind` of a failure that did not abort the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
    /// The build was skipped because a committed image already existed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reused_image: bool,
}

impl ExecutionResult {
    pub fn from_output(command: impl Into<String>, output: CommandOutput) -> Self {
        Self {
            command: command.into(),
            stdout: output.stdout,
            stderr: output.stderr,
            return_code: output.exit_code,
            duration_secs: output.duration.as_secs_f64(),
            ..Default::default()
        }
    }

    /// Result of a test command that hit its deadline. Output captured
    /// before the kill is kept.
    pub fn timed_out(command: impl Into<String>, stdout: String, stderr: String, seconds: u64) -> Self {
        let stderr = if stderr.trim().is_empty() {
            TIMEOUT_MESSAGE.to_string()
        } else {
            format!("{}\n{TIMEOUT_MESSAGE}", stderr.trim_end())
        };
        Self {
            command: command.into(),
            stdout,
            stderr,
            return_code: TIMEOUT_RETURN_CODE,
            duration_secs: seconds as f64,
            error_kind: Some("timeout".to_string()),
            timed_out: true,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.return_code == 0 && !self.timed_out
    }

    /// Report of a test run; builds and reportless runs yield the unknown
    /// report.
    pub fn report_or_unknown(&self) -> TestReport {
        self.report.clone().unwrap_or_else(TestReport::unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timed_out_result() {
        let result = ExecutionResult::timed_out("pytest", "collected 3 items".into(), String::new(), 10);
        assert_eq!(result.return_code, TIMEOUT_RETURN_CODE);
        assert_eq!(result.stderr, TIMEOUT_MESSAGE);
        assert_eq!(result.error_kind.as_deref(), Some("timeout"));
        assert!(!result.success());

        let partial = ExecutionResult::timed_out("pytest", String::new(), "warn\n".into(), 10);
        assert_eq!(partial.stderr, "warn\nTimeout exception");
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let result = ExecutionResult::from_output(
            "make",
            CommandOutput {
                stdout: "ok".into(),
                stderr: String::new(),
                exit_code: 0,
                duration: Duration::from_millis(1500),
            },
        );
        assert!(result.success());
        assert_eq!(result.duration_secs, 1.5);
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("report").is_none());
        assert!(value.get("reused_image").is_none());
        assert_eq!(value["return_code"], 0);
        assert!(result.report_or_unknown().is_unknown());
    }
}
