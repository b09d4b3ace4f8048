//! Console output parsing.
//!
//! When a run leaves no structured artifact behind, the combined
//! stdout/stderr is scanned for the summary and per-test lines printed by
//! the common runners. Each [`TextDialect`] knows one runner's output.
//! Summary lines are authoritative; per-test lines fill in names.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::{parse_seconds, TestCase, TestReport, TestStatus, TestSummary};

/// Console output dialects understood by [`parse_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDialect {
    Pytest,
    Unittest,
    Cargo,
    GoTest,
    Jest,
    Mocha,
    PhpUnit,
    Sbt,
    Gradle,
    Maven,
    Rspec,
    Ctest,
}

impl TextDialect {
    /// Fallback order when no hint matches. More distinctive formats first.
    pub const ALL: [TextDialect; 12] = [
        Self::Pytest,
        Self::Cargo,
        Self::GoTest,
        Self::Jest,
        Self::Mocha,
        Self::PhpUnit,
        Self::Maven,
        Self::Gradle,
        Self::Sbt,
        Self::Rspec,
        Self::Ctest,
        Self::Unittest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pytest => "pytest",
            Self::Unittest => "unittest",
            Self::Cargo => "cargo",
            Self::GoTest => "gotest",
            Self::Jest => "jest",
            Self::Mocha => "mocha",
            Self::PhpUnit => "phpunit",
            Self::Sbt => "sbt",
            Self::Gradle => "gradle",
            Self::Maven => "maven",
            Self::Rspec => "rspec",
            Self::Ctest => "ctest",
        }
    }

    /// Parses `text` as this dialect only.
    pub fn parse(&self, text: &str) -> Option<TestReport> {
        let patterns = patterns()?;
        let clean = patterns.ansi.replace_all(text, "");
        self.parse_with(&clean, patterns)
    }

    fn parse_with(&self, text: &str, p: &Patterns) -> Option<TestReport> {
        match self {
            Self::Pytest => parse_pytest(text, p),
            Self::Unittest => parse_unittest(text, p),
            Self::Cargo => parse_cargo(text, p),
            Self::GoTest => parse_gotest(text, p),
            Self::Jest => parse_jest(text, p),
            Self::Mocha => parse_mocha(text, p),
            Self::PhpUnit => parse_phpunit(text, p),
            Self::Sbt => parse_sbt(text, p),
            Self::Gradle => parse_gradle(text, p),
            Self::Maven => parse_maven(text, p),
            Self::Rspec => parse_rspec(text, p),
            Self::Ctest => parse_ctest(text, p),
        }
    }
}

impl std::fmt::Display for TextDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses runner console output, trying the `hints` first and then every
/// other dialect. Returns the first report carrying any evidence.
pub fn parse_text(text: &str, hints: &[TextDialect]) -> Option<TestReport> {
    let patterns = patterns()?;
    let clean = patterns.ansi.replace_all(text, "");

    let mut tried: Vec<TextDialect> = Vec::with_capacity(TextDialect::ALL.len());
    for dialect in hints.iter().chain(TextDialect::ALL.iter()) {
        if tried.contains(dialect) {
            continue;
        }
        tried.push(*dialect);
        if let Some(report) = dialect.parse_with(&clean, patterns) {
            if report.has_evidence() {
                tracing::debug!(dialect = %dialect, total = report.summary.total, "Parsed console output");
                return Some(report);
            }
        }
    }
    None
}

struct Patterns {
    ansi: Regex,
    count_word: Regex,

    pytest_summary: Regex,
    pytest_verbose: Regex,
    pytest_short: Regex,
    pytest_collected: Regex,

    unittest_ran: Regex,
    unittest_verdict: Regex,
    unittest_kv: Regex,
    unittest_case: Regex,
    unittest_header: Regex,

    cargo_running: Regex,
    cargo_case: Regex,
    cargo_result: Regex,

    go_case: Regex,
    go_run: Regex,
    go_build_failed: Regex,
    go_package: Regex,

    jest_tests: Regex,
    jest_case: Regex,

    mocha_passing: Regex,
    mocha_failing: Regex,
    mocha_pending: Regex,
    mocha_pass_case: Regex,
    mocha_fail_case: Regex,
    mocha_pending_case: Regex,

    phpunit_ok: Regex,
    phpunit_tests: Regex,
    phpunit_kv: Regex,
    phpunit_section: Regex,
    phpunit_case: Regex,

    sbt_total: Regex,
    sbt_kv: Regex,
    scalatest_summary: Regex,
    sbt_spec: Regex,
    sbt_case: Regex,
    sbt_timing: Regex,

    gradle_completed: Regex,
    gradle_case: Regex,

    maven_tests_run: Regex,
    maven_junit4_case: Regex,
    maven_junit5_case: Regex,

    rspec_summary: Regex,
    rspec_failed: Regex,

    ctest_summary: Regex,
    ctest_case: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            ansi: Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]")?,
            count_word: Regex::new(r"(\d+) ([a-z]+)")?,

            pytest_summary: Regex::new(r"(?m)^[= ]*((?:\d+ \w+(?:, )?)+) in [\d.]+s")?,
            pytest_verbose: Regex::new(
                r"(?m)^(\S+::[^\[\s]+(?:\[[^\]\n]*\])?) (PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\b",
            )?,
            pytest_short: Regex::new(
                r"(?m)^(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS) (\S+::[^\[\s]+(?:\[[^\]\n]*\])?)(?: - (.*))?$",
            )?,
            pytest_collected: Regex::new(r"collected (\d+) items?")?,

            unittest_ran: Regex::new(r"(?m)^Ran (\d+) tests? in [\d.]+s")?,
            unittest_verdict: Regex::new(r"(?m)^(OK|FAILED)(?: \(([^)\n]*)\))?\s*$")?,
            unittest_kv: Regex::new(r"([a-z ]+)=(\d+)")?,
            unittest_case: Regex::new(
                r"(?m)^(\w+) \(([\w.]+)\)[^\n]*? \.\.\. (ok|FAIL|ERROR|skipped|expected failure|unexpected success)",
            )?,
            unittest_header: Regex::new(r"(?m)^(FAIL|ERROR): (\w+) \(([\w.]+)\)")?,

            cargo_running: Regex::new(r"(?m)^running (\d+) tests?\s*$")?,
            cargo_case: Regex::new(r"(?m)^test (\S.*?) \.\.\. (ok|FAILED|ignored)")?,
            cargo_result: Regex::new(
                r"(?m)^test result: (?:ok|FAILED)\. (\d+) passed; (\d+) failed; (\d+) ignored;",
            )?,

            go_case: Regex::new(r"(?m)^\s*--- (PASS|FAIL|SKIP): (\S+) \(([\d.]+)s\)")?,
            go_run: Regex::new(r"(?m)^=== RUN\s+(\S+)")?,
            go_build_failed: Regex::new(r"(?m)^FAIL\s+(\S+)\s+\[(?:build|setup) failed\]")?,
            go_package: Regex::new(r"(?m)^(ok|FAIL)\s+(\S+)\s+(?:[\d.]+s|\(cached\))")?,

            jest_tests: Regex::new(r"(?m)^Tests:\s+(.+)$")?,
            jest_case: Regex::new(
                r"(?m)^\s+(✓|√|✕|×|○|✎) (?:skipped |todo )?(.+?)(?: \((\d+(?:\.\d+)?) ?m?s\))?\s*$",
            )?,

            mocha_passing: Regex::new(r"(?m)^\s*(\d+) passing\b")?,
            mocha_failing: Regex::new(r"(?m)^\s*(\d+) failing\b")?,
            mocha_pending: Regex::new(r"(?m)^\s*(\d+) pending\b")?,
            mocha_pass_case: Regex::new(r"(?m)^\s+(?:✓|✔|√) (.+?)(?: \((\d+) ?ms\))?\s*$")?,
            mocha_fail_case: Regex::new(r"(?m)^\s+\d+\) (.+?)\s*$")?,
            mocha_pending_case: Regex::new(r"(?m)^\s+- (.+?)\s*$")?,

            phpunit_ok: Regex::new(r"(?m)^OK \((\d+) tests?, \d+ assertions?\)")?,
            phpunit_tests: Regex::new(r"(?m)^Tests: (\d+), Assertions: \d+(.*)$")?,
            phpunit_kv: Regex::new(
                r"(Errors|Failures|Skipped|Incomplete|Risky|Warnings|Deprecations|Notices): (\d+)",
            )?,
            phpunit_section: Regex::new(
                r"^There (?:was|were) \d+ (failure|error|skipped test|incomplete test|risky test|warning|deprecation|notice)s?:",
            )?,
            phpunit_case: Regex::new(r"^\d+\) ([\w\\]+)::(\w+)")?,

            sbt_total: Regex::new(r"(?m)(?:Passed|Failed|Error): Total (\d+)(.*)$")?,
            sbt_kv: Regex::new(r"(Failed|Errors|Skipped|Ignored|Canceled|Pending) (\d+)")?,
            scalatest_summary: Regex::new(
                r"Tests: succeeded (\d+), failed (\d+), canceled (\d+), ignored (\d+), pending (\d+)",
            )?,
            sbt_spec: Regex::new(r"^\[info\] ([A-Za-z_][\w.$]*):\s*$")?,
            sbt_case: Regex::new(r"^\[info\] - (.+)$")?,
            sbt_timing: Regex::new(
                r"\s*\(\d+(?:\.\d+)? (?:milliseconds?|seconds?|ms|s)\)\s*$",
            )?,

            gradle_completed: Regex::new(
                r"(?m)(\d+) tests? completed(?:, (\d+) failed)?(?:, (\d+) skipped)?",
            )?,
            gradle_case: Regex::new(r"(?m)^(\S[^\n>]*?) > (.+?) (PASSED|FAILED|SKIPPED)\s*$")?,

            maven_tests_run: Regex::new(
                r"(?m)^(?:\[\w+\]\s+)?Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)(.*)$",
            )?,
            maven_junit4_case: Regex::new(
                r"(?m)^\[ERROR\]\s+(\w+)\(([\w.$]+)\)\s+Time elapsed:.*?<<<\s*(FAILURE|ERROR)!",
            )?,
            maven_junit5_case: Regex::new(
                r"(?m)^\[ERROR\]\s+([\w.$]+)\.(\w+)(?:\(\))?\s+Time elapsed:.*?<<<\s*(FAILURE|ERROR)!",
            )?,

            rspec_summary: Regex::new(
                r"(?m)^(\d+) examples?, (\d+) failures?(?:, (\d+) pending)?(?:, (\d+) errors? occurred outside of examples)?",
            )?,
            rspec_failed: Regex::new(r"(?m)^rspec (\./\S+?)(?::\d+|\[[\d:]+\]) # (.+?)\s*$")?,

            ctest_summary: Regex::new(r"(\d+)% tests passed, (\d+) tests? failed out of (\d+)")?,
            ctest_case: Regex::new(
                r"(?m)Test\s+#\d+: (\S+) \.+\**\s*(.*?)\s+[\d.]+ sec\s*$",
            )?,
        })
    }
}

static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();

fn patterns() -> Option<&'static Patterns> {
    PATTERNS
        .get_or_init(|| match Patterns::compile() {
            Ok(patterns) => Some(patterns),
            Err(e) => {
                tracing::error!(error = %e, "Console output patterns failed to compile");
                None
            }
        })
        .as_ref()
}

fn num(caps: &Captures<'_>, index: usize) -> u64 {
    caps.get(index)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Ordered set of test cases keyed by name. Later sightings update the
/// status; a failure is never downgraded.
#[derive(Default)]
struct CaseList {
    cases: Vec<TestCase>,
    index: HashMap<String, usize>,
}

impl CaseList {
    fn upsert(&mut self, case: TestCase) {
        let key = case.qualified_name();
        match self.index.get(&key) {
            Some(&i) => {
                let existing = &mut self.cases[i];
                if !existing.status.is_failure() || case.status.is_failure() {
                    existing.status = case.status;
                }
                if case.message.is_some() {
                    existing.message = case.message;
                }
                if case.time > 0.0 {
                    existing.time = case.time;
                }
            }
            None => {
                self.index.insert(key, self.cases.len());
                self.cases.push(case);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    fn into_vec(self) -> Vec<TestCase> {
        self.cases
    }
}

/// Combines the evidence a dialect found. `None` when there was none.
fn assemble(summary: Option<TestSummary>, tests: Vec<TestCase>, collected: u64) -> Option<TestReport> {
    match summary {
        Some(summary) if summary.total > 0 || collected > 0 || !tests.is_empty() => {
            let summary = if summary.total == 0 && !tests.is_empty() {
                TestSummary::from_tests(&tests)
            } else {
                summary
            };
            Some(TestReport::new(summary.with_collected(collected), tests))
        }
        _ if !tests.is_empty() => {
            let summary = TestSummary::from_tests(&tests).with_collected(collected);
            Some(TestReport::new(summary, tests))
        }
        _ if collected > 0 => Some(TestReport::new(
            TestSummary::default().with_collected(collected),
            Vec::new(),
        )),
        _ => None,
    }
}

fn parse_pytest(text: &str, p: &Patterns) -> Option<TestReport> {
    let summary = p.pytest_summary.captures_iter(text).last().and_then(|caps| {
        let mut counts = (0u64, 0u64, 0u64, 0u64);
        let mut known = false;
        for pair in p.count_word.captures_iter(&caps[1]) {
            let n = num(&pair, 1);
            match &pair[2] {
                "passed" | "xpassed" => counts.0 += n,
                "failed" => counts.1 += n,
                "skipped" | "xfailed" => counts.2 += n,
                "error" | "errors" => counts.3 += n,
                _ => continue,
            }
            known = true;
        }
        known.then(|| TestSummary::from_outcomes(counts.0, counts.1, counts.2, counts.3))
    });

    let mut cases = CaseList::default();
    for caps in p.pytest_verbose.captures_iter(text) {
        cases.upsert(pytest_case(&caps[1], &caps[2], None));
    }
    for caps in p.pytest_short.captures_iter(text) {
        cases.upsert(pytest_case(&caps[2], &caps[1], caps.get(3).map(|m| m.as_str())));
    }

    let collected = p
        .pytest_collected
        .captures_iter(text)
        .map(|caps| num(&caps, 1))
        .sum();
    assemble(summary, cases.into_vec(), collected)
}

fn pytest_case(nodeid: &str, outcome: &str, message: Option<&str>) -> TestCase {
    let status = match outcome {
        "PASSED" | "XPASS" => TestStatus::Passed,
        "FAILED" => TestStatus::Failed,
        "ERROR" => TestStatus::Error,
        _ => TestStatus::Skipped,
    };
    let file = nodeid.split("::").next().unwrap_or_default();
    let mut case = TestCase::new(nodeid, status).with_classname(file);
    if let Some(message) = message {
        case = case.with_message(message);
    }
    case
}

fn parse_unittest(text: &str, p: &Patterns) -> Option<TestReport> {
    let ran: Vec<u64> = p
        .unittest_ran
        .captures_iter(text)
        .map(|caps| num(&caps, 1))
        .collect();

    let mut cases = CaseList::default();
    for caps in p.unittest_case.captures_iter(text) {
        let status = match &caps[3] {
            "ok" | "unexpected success" => TestStatus::Passed,
            "FAIL" => TestStatus::Failed,
            "ERROR" => TestStatus::Error,
            _ => TestStatus::Skipped,
        };
        cases.upsert(unittest_case(&caps[1], &caps[2], status));
    }
    for caps in p.unittest_header.captures_iter(text) {
        let status = if &caps[1] == "FAIL" {
            TestStatus::Failed
        } else {
            TestStatus::Error
        };
        cases.upsert(unittest_case(&caps[2], &caps[3], status));
    }

    if ran.is_empty() {
        return assemble(None, cases.into_vec(), 0);
    }
    let total: u64 = ran.iter().sum();

    let verdicts: Vec<Captures<'_>> = p.unittest_verdict.captures_iter(text).collect();
    if verdicts.is_empty() {
        // interrupted before the verdict line
        return assemble(None, cases.into_vec(), total);
    }
    let (mut failed, mut errors, mut skipped) = (0, 0, 0);
    for verdict in &verdicts {
        let Some(details) = verdict.get(2) else {
            continue;
        };
        for kv in p.unittest_kv.captures_iter(details.as_str()) {
            let n = num(&kv, 2);
            match kv[1].trim() {
                "failures" | "unexpected successes" => failed += n,
                "errors" => errors += n,
                "skipped" | "expected failures" => skipped += n,
                _ => {}
            }
        }
    }
    let summary = TestSummary::from_total(total, failed, errors, skipped);
    assemble(Some(summary), cases.into_vec(), total)
}

fn unittest_case(name: &str, class: &str, status: TestStatus) -> TestCase {
    // python 3.11+ prints the full test id inside the parentheses
    let class = class
        .strip_suffix(name)
        .and_then(|c| c.strip_suffix('.'))
        .unwrap_or(class);
    TestCase::new(name, status).with_classname(class)
}

fn parse_cargo(text: &str, p: &Patterns) -> Option<TestReport> {
    let collected: u64 = p
        .cargo_running
        .captures_iter(text)
        .map(|caps| num(&caps, 1))
        .sum();

    let mut cases = CaseList::default();
    for caps in p.cargo_case.captures_iter(text) {
        let status = match &caps[2] {
            "ok" => TestStatus::Passed,
            "FAILED" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        };
        cases.upsert(TestCase::new(&caps[1], status));
    }

    let mut summary: Option<TestSummary> = None;
    for caps in p.cargo_result.captures_iter(text) {
        let block = TestSummary::from_outcomes(num(&caps, 1), num(&caps, 2), num(&caps, 3), 0);
        summary.get_or_insert_with(TestSummary::default).add(&block);
    }
    assemble(summary, cases.into_vec(), collected)
}

fn parse_gotest(text: &str, p: &Patterns) -> Option<TestReport> {
    let mut cases = CaseList::default();
    for caps in p.go_case.captures_iter(text) {
        let status = match &caps[1] {
            "PASS" => TestStatus::Passed,
            "FAIL" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        };
        cases.upsert(TestCase::new(&caps[2], status).with_time(parse_seconds(&caps[3])));
    }

    let runs: std::collections::HashSet<&str> = p
        .go_run
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    if cases.is_empty() {
        // without -v only package verdicts are printed
        for caps in p.go_package.captures_iter(text) {
            let status = if &caps[1] == "ok" {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            };
            cases.upsert(TestCase::new(&caps[2], status));
        }
    }
    for caps in p.go_build_failed.captures_iter(text) {
        cases.upsert(
            TestCase::new(&caps[1], TestStatus::Error).with_message("package failed to build"),
        );
    }

    assemble(None, cases.into_vec(), runs.len() as u64)
}

fn parse_jest(text: &str, p: &Patterns) -> Option<TestReport> {
    let summary = p.jest_tests.captures_iter(text).last().and_then(|caps| {
        let (mut failed, mut skipped, mut total) = (0, 0, None);
        for pair in p.count_word.captures_iter(&caps[1]) {
            let n = num(&pair, 1);
            match &pair[2] {
                "failed" => failed += n,
                "skipped" | "todo" => skipped += n,
                "total" => total = Some(n),
                _ => {}
            }
        }
        total.map(|total| TestSummary::from_total(total, failed, 0, skipped))
    });

    let mut cases = CaseList::default();
    for caps in p.jest_case.captures_iter(text) {
        let status = match &caps[1] {
            "✓" | "√" => TestStatus::Passed,
            "✕" | "×" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        };
        let time = caps
            .get(3)
            .map(|m| parse_seconds(m.as_str()) / 1000.0)
            .unwrap_or(0.0);
        cases.upsert(TestCase::new(caps[2].trim(), status).with_time(time));
    }
    assemble(summary, cases.into_vec(), 0)
}

fn parse_mocha(text: &str, p: &Patterns) -> Option<TestReport> {
    let passing = p.mocha_passing.captures_iter(text).last();
    let mut cases = CaseList::default();

    let Some(passing) = passing else {
        for caps in p.mocha_pass_case.captures_iter(text) {
            cases.upsert(TestCase::new(&caps[1], TestStatus::Passed));
        }
        return assemble(None, cases.into_vec(), 0);
    };

    let summary = TestSummary::from_outcomes(
        num(&passing, 1),
        p.mocha_failing.captures_iter(text).last().map(|c| num(&c, 1)).unwrap_or(0),
        p.mocha_pending.captures_iter(text).last().map(|c| num(&c, 1)).unwrap_or(0),
        0,
    );

    // per-test lines precede the summary; numbered lines after it are
    // failure details
    let listing = passing
        .get(0)
        .map(|m| &text[..m.start()])
        .unwrap_or(text);
    for caps in p.mocha_pass_case.captures_iter(listing) {
        let time = caps.get(2).map(|m| parse_seconds(m.as_str()) / 1000.0).unwrap_or(0.0);
        cases.upsert(TestCase::new(&caps[1], TestStatus::Passed).with_time(time));
    }
    for caps in p.mocha_fail_case.captures_iter(listing) {
        cases.upsert(TestCase::new(&caps[1], TestStatus::Failed));
    }
    for caps in p.mocha_pending_case.captures_iter(listing) {
        cases.upsert(TestCase::new(&caps[1], TestStatus::Skipped));
    }
    assemble(Some(summary), cases.into_vec(), 0)
}

fn parse_phpunit(text: &str, p: &Patterns) -> Option<TestReport> {
    let summary = if let Some(caps) = p.phpunit_tests.captures_iter(text).last() {
        let total = num(&caps, 1);
        let (mut failed, mut errors, mut skipped) = (0, 0, 0);
        for kv in p.phpunit_kv.captures_iter(&caps[2]) {
            let n = num(&kv, 2);
            match &kv[1] {
                "Failures" => failed += n,
                "Errors" => errors += n,
                "Skipped" | "Incomplete" => skipped += n,
                _ => {}
            }
        }
        Some(TestSummary::from_total(total, failed, errors, skipped))
    } else {
        p.phpunit_ok
            .captures_iter(text)
            .last()
            .map(|caps| TestSummary::from_total(num(&caps, 1), 0, 0, 0))
    };

    let mut cases = CaseList::default();
    let mut section: Option<TestStatus> = None;
    for line in text.lines() {
        if let Some(caps) = p.phpunit_section.captures(line) {
            section = match &caps[1] {
                "failure" => Some(TestStatus::Failed),
                "error" => Some(TestStatus::Error),
                "skipped test" | "incomplete test" => Some(TestStatus::Skipped),
                _ => None,
            };
            continue;
        }
        let Some(status) = section else {
            continue;
        };
        if let Some(caps) = p.phpunit_case.captures(line) {
            cases.upsert(TestCase::new(&caps[2], status).with_classname(&caps[1]));
        }
    }
    assemble(summary, cases.into_vec(), 0)
}

fn parse_sbt(text: &str, p: &Patterns) -> Option<TestReport> {
    let mut summary: Option<TestSummary> = None;
    for caps in p.sbt_total.captures_iter(text) {
        let total = num(&caps, 1);
        let (mut failed, mut errors, mut skipped) = (0, 0, 0);
        for kv in p.sbt_kv.captures_iter(&caps[2]) {
            let n = num(&kv, 2);
            match &kv[1] {
                "Failed" => failed += n,
                "Errors" => errors += n,
                _ => skipped += n,
            }
        }
        summary
            .get_or_insert_with(TestSummary::default)
            .add(&TestSummary::from_total(total, failed, errors, skipped));
    }
    if summary.is_none() {
        for caps in p.scalatest_summary.captures_iter(text) {
            let block = TestSummary::from_outcomes(
                num(&caps, 1),
                num(&caps, 2),
                num(&caps, 3) + num(&caps, 4) + num(&caps, 5),
                0,
            );
            summary.get_or_insert_with(TestSummary::default).add(&block);
        }
    }

    let mut cases = CaseList::default();
    let mut spec = String::new();
    for line in text.lines() {
        let line = line.trim_end();
        if let Some(caps) = p.sbt_spec.captures(line) {
            spec = caps[1].to_string();
            continue;
        }
        let Some(caps) = p.sbt_case.captures(line) else {
            continue;
        };
        let raw = p.sbt_timing.replace(&caps[1], "");
        let (name, status) = if let Some(name) = raw.strip_suffix("*** FAILED ***") {
            (name, TestStatus::Failed)
        } else if let Some(name) = raw
            .strip_suffix("!!! IGNORED !!!")
            .or_else(|| raw.strip_suffix("!!! CANCELED !!!"))
            .or_else(|| raw.strip_suffix("(pending)"))
        {
            (name, TestStatus::Skipped)
        } else {
            (&*raw, TestStatus::Passed)
        };
        cases.upsert(TestCase::new(name.trim(), status).with_classname(spec.as_str()));
    }
    assemble(summary, cases.into_vec(), 0)
}

fn parse_gradle(text: &str, p: &Patterns) -> Option<TestReport> {
    let mut summary: Option<TestSummary> = None;
    for caps in p.gradle_completed.captures_iter(text) {
        let block = TestSummary::from_total(num(&caps, 1), num(&caps, 2), 0, num(&caps, 3));
        summary.get_or_insert_with(TestSummary::default).add(&block);
    }

    let mut cases = CaseList::default();
    for caps in p.gradle_case.captures_iter(text) {
        let status = match &caps[3] {
            "PASSED" => TestStatus::Passed,
            "FAILED" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        };
        cases.upsert(TestCase::new(caps[2].trim(), status).with_classname(caps[1].trim()));
    }
    assemble(summary, cases.into_vec(), 0)
}

fn parse_maven(text: &str, p: &Patterns) -> Option<TestReport> {
    let mut totals: Option<TestSummary> = None;
    let mut per_class: Option<TestSummary> = None;
    for caps in p.maven_tests_run.captures_iter(text) {
        let block = TestSummary::from_total(num(&caps, 1), num(&caps, 2), num(&caps, 3), num(&caps, 4));
        let bucket = if caps[5].contains("Time elapsed") {
            &mut per_class
        } else {
            &mut totals
        };
        bucket.get_or_insert_with(TestSummary::default).add(&block);
    }

    let mut cases = CaseList::default();
    for caps in p.maven_junit4_case.captures_iter(text) {
        cases.upsert(TestCase::new(&caps[1], surefire_status(&caps[3])).with_classname(&caps[2]));
    }
    for caps in p.maven_junit5_case.captures_iter(text) {
        cases.upsert(TestCase::new(&caps[2], surefire_status(&caps[3])).with_classname(&caps[1]));
    }
    assemble(totals.or(per_class), cases.into_vec(), 0)
}

fn surefire_status(marker: &str) -> TestStatus {
    if marker == "ERROR" {
        TestStatus::Error
    } else {
        TestStatus::Failed
    }
}

fn parse_rspec(text: &str, p: &Patterns) -> Option<TestReport> {
    let summary = p.rspec_summary.captures_iter(text).last().map(|caps| {
        TestSummary::from_total(num(&caps, 1), num(&caps, 2), num(&caps, 4), num(&caps, 3))
    });

    let mut cases = CaseList::default();
    for caps in p.rspec_failed.captures_iter(text) {
        cases.upsert(TestCase::new(&caps[2], TestStatus::Failed).with_classname(&caps[1]));
    }
    assemble(summary, cases.into_vec(), 0)
}

fn parse_ctest(text: &str, p: &Patterns) -> Option<TestReport> {
    let summary = p
        .ctest_summary
        .captures_iter(text)
        .last()
        .map(|caps| TestSummary::from_total(num(&caps, 3), num(&caps, 2), 0, 0));

    let mut cases = CaseList::default();
    for caps in p.ctest_case.captures_iter(text) {
        let outcome = caps[2].trim_start_matches('*');
        let status = if outcome.starts_with("Passed") {
            TestStatus::Passed
        } else if outcome.starts_with("Not Run")
            || outcome.starts_with("Disabled")
            || outcome.starts_with("Skipped")
        {
            TestStatus::Skipped
        } else {
            TestStatus::Failed
        };
        let case = TestCase::new(&caps[1], status);
        let case = if status.is_failure() {
            case.with_message(outcome)
        } else {
            case
        };
        cases.upsert(case);
    }
    assemble(summary, cases.into_vec(), 0)
}
