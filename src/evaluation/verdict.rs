//! Set algebra over the `after` and `gold` phase reports.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::report::{TestReport, TestStatus};

/// Passing and failing test names of one phase.
///
/// Names are qualified (`classname::name`). A name reported more than once
/// counts as failing if any occurrence did not pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSets {
    pub passed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
}

impl TestSets {
    /// Anything other than a pass (skips included) lands in `failed`.
    pub fn from_report(report: &TestReport) -> Self {
        let mut status: BTreeMap<String, bool> = BTreeMap::new();
        for case in &report.tests {
            let failed = case.status != TestStatus::Passed;
            let entry = status.entry(case.qualified_name()).or_insert(failed);
            *entry |= failed;
        }

        let mut sets = Self::default();
        for (name, failed) in status {
            if failed {
                sets.failed.insert(name);
            } else {
                sets.passed.insert(name);
            }
        }
        sets
    }
}

/// Ground-truth sets and correctness flags derived from one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectnessVerdict {
    /// Tests passing with the fix applied.
    #[serde(rename = "PASS_TO_PASS")]
    pub pass_to_pass: BTreeSet<String>,
    /// Tests not passing with the fix applied.
    #[serde(rename = "FAIL_TO_PASS")]
    pub fail_to_pass: BTreeSet<String>,
    /// Tests that pass with the fix but not with the tests alone.
    #[serde(rename = "NEWLY_PASSING")]
    pub newly_passing: BTreeSet<String>,
    /// The fix makes at least one test newly pass.
    pub task_ok: bool,
    /// The fix strictly extends the passing set without regressions.
    pub task_perfect: bool,
}

impl CorrectnessVerdict {
    pub fn from_sets(after: &TestSets, gold: &TestSets) -> Self {
        let newly_passing: BTreeSet<String> =
            gold.passed.difference(&after.passed).cloned().collect();
        let task_ok = !newly_passing.is_empty();
        let task_perfect =
            gold.passed.len() > after.passed.len() && after.passed.is_subset(&gold.passed);
        Self {
            pass_to_pass: gold.passed.clone(),
            fail_to_pass: gold.failed.clone(),
            newly_passing,
            task_ok,
            task_perfect,
        }
    }

    pub fn from_reports(after: &TestReport, gold: &TestReport) -> Self {
        Self::from_sets(&TestSets::from_report(after), &TestSets::from_report(gold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::TestCase;

    fn sets(passed: &[&str], failed: &[&str]) -> TestSets {
        TestSets {
            passed: passed.iter().map(|s| s.to_string()).collect(),
            failed: failed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_new_passes_are_perfect() {
        let verdict = CorrectnessVerdict::from_sets(&sets(&[], &[]), &sets(&["t1", "t2"], &[]));
        assert!(verdict.task_ok);
        assert!(verdict.task_perfect);
        assert_eq!(verdict.newly_passing.len(), 2);
        assert!(verdict.fail_to_pass.is_empty());
    }

    #[test]
    fn test_regression_is_not_perfect() {
        let verdict = CorrectnessVerdict::from_sets(&sets(&["t1"], &[]), &sets(&["t2"], &["t1"]));
        assert!(verdict.task_ok);
        assert!(!verdict.task_perfect);
        assert_eq!(verdict.newly_passing, BTreeSet::from(["t2".to_string()]));
        assert_eq!(verdict.fail_to_pass, BTreeSet::from(["t1".to_string()]));
    }

    #[test]
    fn test_no_change_is_not_ok() {
        let verdict = CorrectnessVerdict::from_sets(&sets(&["a", "b"], &["c"]), &sets(&["a", "b"], &[]));
        assert!(!verdict.task_ok);
        assert!(!verdict.task_perfect);
        assert_eq!(verdict.pass_to_pass.len(), 2);
    }

    #[test]
    fn test_fail_to_pass_is_everything_gold_did_not_pass() {
        let after = TestReport::from_tests(vec![TestCase::new("a", TestStatus::Passed)]);
        let gold = TestReport::from_tests(vec![
            TestCase::new("a", TestStatus::Passed),
            TestCase::new("b", TestStatus::Passed),
            TestCase::new("c", TestStatus::Failed),
            TestCase::new("d", TestStatus::Skipped),
        ]);

        let verdict = CorrectnessVerdict::from_reports(&after, &gold);
        assert_eq!(
            verdict.fail_to_pass,
            BTreeSet::from(["c".to_string(), "d".to_string()])
        );
        assert_eq!(verdict.newly_passing, BTreeSet::from(["b".to_string()]));
        assert_eq!(
            verdict.pass_to_pass,
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert!(verdict.task_ok);
        assert!(verdict.task_perfect);
    }

    #[test]
    fn test_failure_wins_for_duplicate_names() {
        let report = TestReport::from_tests(vec![
            TestCase::new("test_a", TestStatus::Passed).with_classname("pkg"),
            TestCase::new("test_a", TestStatus::Failed).with_classname("pkg"),
            TestCase::new("test_b", TestStatus::Passed),
            TestCase::new("test_c", TestStatus::Skipped),
            TestCase::new("test_d", TestStatus::Error),
        ]);
        let sets = TestSets::from_report(&report);
        assert_eq!(sets.passed, BTreeSet::from(["test_b".to_string()]));
        assert_eq!(
            sets.failed,
            BTreeSet::from([
                "pkg::test_a".to_string(),
                "test_c".to_string(),
                "test_d".to_string()
            ])
        );
    }

    #[test]
    fn test_serialized_field_names() {
        let verdict = CorrectnessVerdict::from_sets(&sets(&[], &[]), &sets(&["x"], &["y"]));
        let value = serde_json::to_value(&verdict).unwrap();
        assert_eq!(value["PASS_TO_PASS"], serde_json::json!(["x"]));
        assert_eq!(value["FAIL_TO_PASS"], serde_json::json!(["y"]));
        assert_eq!(value["NEWLY_PASSING"], serde_json::json!(["x"]));
        assert_eq!(value["task_ok"], true);
    }
}
