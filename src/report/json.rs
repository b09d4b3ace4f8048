//! Structured JSON report parsing.
//!
//! Recognises the schema by its keys rather than by file name, since several
//! tools write `*.json`:
//!
//! | Schema | Marker |
//! |---|---|
//! | canonical | `summary.total` plus `tests[].status` |
//! | pytest-json-report | `tests[].nodeid` or `exitcode` |
//! | Jest `--json` | `numTotalTests` |
//! | RSpec `--format json` | `examples` plus `summary.example_count` |
//! | gtest `--gtest_output=json` | `testsuites[].testsuite` |
//! | mocha `--reporter json` | `stats.passes` |
//!
//! Durations are normalised to seconds.

use std::collections::HashSet;

use serde_json::Value;

use super::{parse_seconds, TestCase, TestReport, TestStatus, TestSummary};

/// Detected JSON schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonSchema {
    Canonical,
    Pytest,
    Jest,
    Rspec,
    Gtest,
    Mocha,
}

/// Identifies the schema of a parsed JSON document.
pub fn detect_schema(value: &Value) -> Option<JsonSchema> {
    let obj = value.as_object()?;
    if obj.contains_key("numTotalTests") {
        return Some(JsonSchema::Jest);
    }
    if obj.contains_key("examples")
        && obj
            .get("summary")
            .and_then(|s| s.get("example_count"))
            .is_some()
    {
        return Some(JsonSchema::Rspec);
    }
    if obj
        .get("testsuites")
        .and_then(Value::as_array)
        .is_some_and(|suites| suites.iter().any(|s| s.get("testsuite").is_some()))
    {
        return Some(JsonSchema::Gtest);
    }
    if obj.get("stats").and_then(|s| s.get("passes")).is_some() {
        return Some(JsonSchema::Mocha);
    }
    let tests = obj.get("tests").and_then(Value::as_array);
    if obj.contains_key("exitcode")
        || tests.is_some_and(|t| t.iter().any(|case| case.get("nodeid").is_some()))
    {
        return Some(JsonSchema::Pytest);
    }
    if obj.get("summary").and_then(|s| s.get("total")).is_some() {
        return Some(JsonSchema::Canonical);
    }
    None
}

/// Parses a JSON report of any recognised schema.
pub fn parse_json(value: &Value) -> Option<TestReport> {
    match detect_schema(value)? {
        JsonSchema::Canonical => parse_canonical(value),
        JsonSchema::Pytest => Some(parse_pytest(value)),
        JsonSchema::Jest => Some(parse_jest(value)),
        JsonSchema::Rspec => Some(parse_rspec(value)),
        JsonSchema::Gtest => Some(parse_gtest(value)),
        JsonSchema::Mocha => Some(parse_mocha(value)),
    }
}

fn count(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn string<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Accepts numbers or numeric strings (`"0.004s"`).
fn seconds(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_seconds(s),
        _ => 0.0,
    }
}

fn millis(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(0.0) / 1000.0
}

/// A report already in the canonical shape (re-reading our own output).
fn parse_canonical(value: &Value) -> Option<TestReport> {
    let report: TestReport = serde_json::from_value(value.clone()).ok()?;
    let summary = if report.summary.is_consistent() {
        report.summary
    } else {
        TestSummary::from_total(
            report.summary.total,
            report.summary.failed,
            report.summary.errors,
            report.summary.skipped,
        )
        .with_collected(report.summary.collected)
    };
    Some(TestReport::new(summary, report.tests))
}

/// pytest-json-report.
fn parse_pytest(value: &Value) -> TestReport {
    let tests: Vec<TestCase> = value
        .get("tests")
        .and_then(Value::as_array)
        .map(|cases| cases.iter().map(pytest_case).collect())
        .unwrap_or_default();

    let Some(summary) = value.get("summary") else {
        return TestReport::from_tests(tests);
    };
    let passed = count(summary, "passed") + count(summary, "xpassed");
    let failed = count(summary, "failed");
    let errors = count(summary, "error") + count(summary, "errors");
    let skipped = count(summary, "skipped") + count(summary, "xfailed");
    let collected = count(summary, "collected").max(count(summary, "total"));

    let counts = TestSummary::from_outcomes(passed, failed, skipped, errors);
    let counts = if counts.total == 0 && !tests.is_empty() {
        TestSummary::from_tests(&tests)
    } else {
        counts
    };
    TestReport::new(counts.with_collected(collected), tests)
}

fn pytest_case(case: &Value) -> TestCase {
    let nodeid = string(case, "nodeid");
    let file = nodeid.split("::").next().unwrap_or_default();
    let status = match string(case, "outcome") {
        "passed" | "xpassed" => TestStatus::Passed,
        "failed" => TestStatus::Failed,
        "skipped" | "xfailed" => TestStatus::Skipped,
        _ => TestStatus::Error,
    };
    let time: f64 = ["setup", "call", "teardown"]
        .iter()
        .map(|stage| seconds(case.get(*stage).and_then(|s| s.get("duration"))))
        .sum();

    let mut test = TestCase::new(nodeid, status)
        .with_classname(file)
        .with_time(time);

    if status.is_failure() {
        let stage = ["call", "setup", "teardown"]
            .iter()
            .filter_map(|stage| case.get(*stage))
            .find(|s| string(s, "outcome") == "failed" || s.get("longrepr").is_some());
        if let Some(stage) = stage {
            if let Some(message) = stage
                .get("crash")
                .and_then(|c| c.get("message"))
                .and_then(Value::as_str)
            {
                test = test.with_message(message);
            }
            if let Some(longrepr) = stage.get("longrepr").and_then(Value::as_str) {
                test = test.with_details(longrepr);
            }
        }
    }
    test
}

/// Jest `--json` output.
fn parse_jest(value: &Value) -> TestReport {
    let mut tests = Vec::new();
    for suite in value
        .get("testResults")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let file = suite
            .get("name")
            .or_else(|| suite.get("testFilePath"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let assertions = suite
            .get("assertionResults")
            .or_else(|| suite.get("testResults"))
            .and_then(Value::as_array);

        match assertions {
            Some(assertions) if !assertions.is_empty() => {
                for assertion in assertions {
                    tests.push(jest_case(assertion, file));
                }
            }
            _ => {
                // a suite that failed to run at all (syntax error, missing module)
                if string(suite, "status") == "failed" {
                    tests.push(
                        TestCase::new(file, TestStatus::Error)
                            .with_classname(file)
                            .with_message(string(suite, "message")),
                    );
                }
            }
        }
    }

    let passed = count(value, "numPassedTests");
    let failed = count(value, "numFailedTests");
    let skipped = count(value, "numPendingTests") + count(value, "numTodoTests");
    let errors = count(value, "numRuntimeErrorTestSuites");
    let summary = TestSummary::from_outcomes(passed, failed, skipped, errors)
        .with_collected(count(value, "numTotalTests"));
    TestReport::new(summary, tests)
}

fn jest_case(assertion: &Value, file: &str) -> TestCase {
    let title = string(assertion, "title");
    let full_name = assertion
        .get("fullName")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let mut parts: Vec<&str> = assertion
                .get("ancestorTitles")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            parts.push(title);
            parts.join(" ")
        });
    let status = match string(assertion, "status") {
        "passed" => TestStatus::Passed,
        "failed" => TestStatus::Failed,
        "pending" | "todo" | "skipped" | "disabled" => TestStatus::Skipped,
        _ => TestStatus::Error,
    };
    let failures: Vec<&str> = assertion
        .get("failureMessages")
        .and_then(Value::as_array)
        .map(|m| m.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut case = TestCase::new(full_name, status)
        .with_classname(file)
        .with_time(millis(assertion.get("duration")));
    if let Some(first) = failures.first() {
        case = case
            .with_message(first.lines().next().unwrap_or_default())
            .with_details(failures.join("\n"));
    }
    case
}

/// RSpec `--format json`.
fn parse_rspec(value: &Value) -> TestReport {
    let tests: Vec<TestCase> = value
        .get("examples")
        .and_then(Value::as_array)
        .map(|examples| examples.iter().map(rspec_case).collect())
        .unwrap_or_default();

    let summary = value.get("summary").cloned().unwrap_or(Value::Null);
    let total = count(&summary, "example_count");
    let failed = count(&summary, "failure_count");
    let skipped = count(&summary, "pending_count");
    let outside = count(&summary, "errors_outside_of_examples_count");

    let counts = TestSummary::from_total(total, failed, 0, skipped);
    let counts = TestSummary {
        total: counts.total + outside,
        errors: outside,
        collected: counts.collected + outside,
        ..counts
    };
    TestReport::new(counts, tests)
}

fn rspec_case(example: &Value) -> TestCase {
    let status = match string(example, "status") {
        "passed" => TestStatus::Passed,
        "failed" => TestStatus::Failed,
        "pending" | "skipped" => TestStatus::Skipped,
        _ => TestStatus::Error,
    };
    let name = example
        .get("full_description")
        .or_else(|| example.get("description"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut case = TestCase::new(name, status)
        .with_classname(string(example, "file_path"))
        .with_time(seconds(example.get("run_time")));
    if let Some(exception) = example.get("exception") {
        case = case.with_message(string(exception, "message"));
        if let Some(backtrace) = exception.get("backtrace").and_then(Value::as_array) {
            let lines: Vec<&str> = backtrace.iter().filter_map(Value::as_str).collect();
            case = case.with_details(lines.join("\n"));
        }
    }
    case
}

/// googletest `--gtest_output=json:...`.
fn parse_gtest(value: &Value) -> TestReport {
    let mut tests = Vec::new();
    for suite in value
        .get("testsuites")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let suite_name = string(suite, "name");
        for case in suite
            .get("testsuite")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let failures: Vec<&str> = case
                .get("failures")
                .and_then(Value::as_array)
                .map(|f| {
                    f.iter()
                        .filter_map(|entry| entry.get("failure").and_then(Value::as_str))
                        .collect()
                })
                .unwrap_or_default();

            let status = if !failures.is_empty() {
                TestStatus::Failed
            } else if string(case, "status") == "NOTRUN"
                || matches!(string(case, "result"), "SKIPPED" | "SUPPRESSED")
            {
                TestStatus::Skipped
            } else {
                TestStatus::Passed
            };

            let classname = case
                .get("classname")
                .and_then(Value::as_str)
                .unwrap_or(suite_name);
            let mut test = TestCase::new(string(case, "name"), status)
                .with_classname(classname)
                .with_time(seconds(case.get("time")));
            if let Some(first) = failures.first() {
                test = test
                    .with_message(first.lines().next().unwrap_or_default())
                    .with_details(failures.join("\n"));
            }
            tests.push(test);
        }
    }

    let summary = TestSummary::from_tests(&tests).with_collected(count(value, "tests"));
    TestReport::new(summary, tests)
}

/// mocha `--reporter json`.
fn parse_mocha(value: &Value) -> TestReport {
    let titles = |key: &str| -> HashSet<String> {
        value
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|t| string(t, "fullTitle").to_string())
                    .collect()
            })
            .unwrap_or_default()
    };
    let failing = titles("failures");
    let pending = titles("pending");

    let tests: Vec<TestCase> = value
        .get("tests")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|test| {
            let full_title = string(test, "fullTitle");
            let err = test.get("err").filter(|e| e.as_object().is_some_and(|o| !o.is_empty()));
            let status = if failing.contains(full_title) || err.is_some() {
                TestStatus::Failed
            } else if pending.contains(full_title) || test.get("pending") == Some(&Value::Bool(true)) {
                TestStatus::Skipped
            } else {
                TestStatus::Passed
            };
            let mut case = TestCase::new(full_title, status)
                .with_classname(string(test, "file"))
                .with_time(millis(test.get("duration")));
            if let Some(err) = err {
                case = case
                    .with_message(string(err, "message"))
                    .with_details(string(err, "stack"));
            }
            case
        })
        .collect();

    let stats = value.get("stats").cloned().unwrap_or(Value::Null);
    let summary = TestSummary::from_outcomes(
        count(&stats, "passes"),
        count(&stats, "failures"),
        count(&stats, "pending"),
        0,
    )
    .with_collected(count(&stats, "tests"));
    TestReport::new(summary, tests)
}
