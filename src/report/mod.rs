//! Canonical test report shared by every language backend.
//!
//! All parsers converge on [`TestReport`]:
//!
//! ```text
//! summary: { total, passed, failed, skipped, errors, collected }
//! tests:   [ { name, classname, time, status, message?, details? } ]
//! status:  passed | failed | unknown
//! ```
//!
//! A report with `total == 0` is always `unknown`: the run produced no test
//! evidence and must be treated as inconclusive, never as a pass.

pub mod artifacts;
pub mod json;
pub mod junit;
pub mod ndjson;
pub mod normalize;
pub mod text;

use serde::{Deserialize, Serialize};

pub use artifacts::{collect_reports, discover_artifacts, remove_stale_artifacts};
pub use normalize::{normalize, sniff, ReportFormat};
pub use text::TextDialect;

/// Outcome of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestStatus {
    /// Failed and errored cases both count against the run.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Overall verdict of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Passed,
    Failed,
    #[default]
    Unknown,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Aggregate counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub passed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub errors: u64,
    /// Tests discovered by the runner, even if the run stopped early.
    #[serde(default)]
    pub collected: u64,
}

impl TestSummary {
    /// Builds a summary from per-outcome counts; `total` is their sum.
    pub fn from_outcomes(passed: u64, failed: u64, skipped: u64, errors: u64) -> Self {
        let total = passed + failed + skipped + errors;
        Self {
            total,
            passed,
            failed,
            skipped,
            errors,
            collected: total,
        }
    }

    /// Builds a summary from a reported total, deriving `passed`.
    ///
    /// If the non-passing counts exceed the reported total, the total is
    /// raised to their sum so the counts stay consistent.
    pub fn from_total(total: u64, failed: u64, errors: u64, skipped: u64) -> Self {
        let non_passing = failed + errors + skipped;
        let total = total.max(non_passing);
        Self {
            total,
            passed: total - non_passing,
            failed,
            skipped,
            errors,
            collected: total,
        }
    }

    /// Counts outcomes of individual test cases.
    pub fn from_tests(tests: &[TestCase]) -> Self {
        let mut summary = Self::default();
        for test in tests {
            match test.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
                TestStatus::Error => summary.errors += 1,
            }
        }
        summary.total = summary.passed + summary.failed + summary.skipped + summary.errors;
        summary.collected = summary.total;
        summary
    }

    /// Records how many tests were discovered. Never lower than `total`.
    pub fn with_collected(mut self, collected: u64) -> Self {
        self.collected = collected.max(self.total);
        self
    }

    /// Field-wise sum.
    pub fn add(&mut self, other: &TestSummary) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.collected += other.collected;
    }

    /// True when the outcome counts add up to `total`.
    pub fn is_consistent(&self) -> bool {
        self.total == 0 || self.passed + self.failed + self.skipped + self.errors == self.total
    }

    /// Verdict implied by the counts.
    pub fn status(&self) -> ReportStatus {
        if self.total == 0 {
            ReportStatus::Unknown
        } else if self.failed + self.errors > 0 {
            ReportStatus::Failed
        } else {
            ReportStatus::Passed
        }
    }
}

/// One executed (or skipped) test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub classname: String,
    /// Duration in seconds.
    #[serde(default)]
    pub time: f64,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, status: TestStatus) -> Self {
        Self {
            name: name.into(),
            classname: String::new(),
            time: 0.0,
            status,
            message: None,
            details: None,
        }
    }

    pub fn with_classname(mut self, classname: impl Into<String>) -> Self {
        self.classname = classname.into();
        self
    }

    pub fn with_time(mut self, seconds: f64) -> Self {
        self.time = seconds;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if !message.trim().is_empty() {
            self.message = Some(message);
        }
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        let details = details.into();
        if !details.trim().is_empty() {
            self.details = Some(details);
        }
        self
    }

    /// Name used to compare tests across runs: `classname::name`, unless the
    /// name already carries the classname.
    pub fn qualified_name(&self) -> String {
        if self.classname.is_empty() || self.name.contains(&self.classname) {
            self.name.clone()
        } else {
            format!("{}::{}", self.classname, self.name)
        }
    }
}

/// Canonical, language-agnostic report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub summary: TestSummary,
    #[serde(default)]
    pub tests: Vec<TestCase>,
    #[serde(default)]
    pub status: ReportStatus,
}

impl TestReport {
    /// The report used when no test evidence could be found.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Combines an authoritative summary with whatever per-test entries were
    /// recovered. The summary wins when the two disagree.
    pub fn new(summary: TestSummary, tests: Vec<TestCase>) -> Self {
        let status = summary.status();
        Self {
            summary,
            tests,
            status,
        }
    }

    /// Builds a report whose summary is counted from `tests`.
    pub fn from_tests(tests: Vec<TestCase>) -> Self {
        Self::new(TestSummary::from_tests(&tests), tests)
    }

    /// True when the report carries any evidence about the suite.
    pub fn has_evidence(&self) -> bool {
        self.summary.total > 0 || self.summary.collected > 0 || !self.tests.is_empty()
    }

    pub fn is_unknown(&self) -> bool {
        self.status == ReportStatus::Unknown
    }

    /// Merges reports produced by different tools or files.
    ///
    /// Summaries are summed field by field and test lists concatenated, so
    /// merging is associative.
    pub fn merge<I>(reports: I) -> Self
    where
        I: IntoIterator<Item = TestReport>,
    {
        let mut summary = TestSummary::default();
        let mut tests = Vec::new();
        for report in reports {
            summary.add(&report.summary);
            tests.extend(report.tests);
        }
        Self::new(summary, tests)
    }
}

/// Parses a duration written as seconds, optionally suffixed (`"0.012s"`,
/// `"12 ms"`, `"1,234.5"`).
pub(crate) fn parse_seconds(raw: &str) -> f64 {
    let trimmed = raw.trim().replace(',', "");
    let (number, scale) = if let Some(ms) = trimmed.strip_suffix("ms") {
        (ms.trim(), 0.001)
    } else if let Some(s) = trimmed.strip_suffix("sec") {
        (s.trim(), 1.0)
    } else if let Some(s) = trimmed.strip_suffix('s') {
        (s.trim(), 1.0)
    } else {
        (trimmed.as_str(), 1.0)
    };
    number.parse::<f64>().map(|v| v * scale).unwrap_or(0.0)
}
