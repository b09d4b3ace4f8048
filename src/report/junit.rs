//! XML report parsing.
//!
//! Handles JUnit-style XML (surefire, gradle, sbt, mocha-junit-reporter,
//! PHPUnit, ctest `--output-junit`) and the CTest dashboard `Test.xml`.
//!
//! Documents are read with `xmlparser` into a small element tree. A document
//! truncated mid-write (a runner killed by a timeout) keeps every element
//! that was opened before the cut.

use xmlparser::{ElementEnd, Token, Tokenizer};

use super::{parse_seconds, TestCase, TestReport, TestStatus, TestSummary};

/// Minimal element tree.
#[derive(Debug, Clone, Default)]
pub(crate) struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attr(key).and_then(|v| {
            let v = v.trim();
            v.parse::<u64>()
                .ok()
                .or_else(|| v.parse::<f64>().ok().map(|f| f.max(0.0) as u64))
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Collects descendants named `name`, not descending into matches.
    fn outermost<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            } else {
                child.outermost(name, out);
            }
        }
    }

    /// Collects every descendant named `name`.
    fn descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }

    fn text_trimmed(&self) -> &str {
        self.text.trim()
    }
}

/// Parses `text` into a document node whose children are the top-level
/// elements. Returns `None` when not even one element could be read.
pub(crate) fn parse_tree(text: &str) -> Option<XmlNode> {
    let text = text.trim_start_matches('\u{feff}');
    let mut stack = vec![XmlNode::new("#document")];
    // set while a start tag is still missing its closing `>`
    let mut start_tag_open = false;

    for token in Tokenizer::from(text) {
        let token = match token {
            Ok(token) => token,
            Err(_) => break,
        };
        match token {
            Token::ElementStart { local, .. } => {
                stack.push(XmlNode::new(local.as_str()));
                start_tag_open = true;
            }
            Token::Attribute { local, value, .. } => {
                if let Some(node) = stack.last_mut() {
                    node.attrs
                        .push((local.as_str().to_string(), unescape(value.as_str())));
                }
            }
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => start_tag_open = false,
                ElementEnd::Close(..) | ElementEnd::Empty => {
                    start_tag_open = false;
                    if stack.len() > 1 {
                        if let Some(node) = stack.pop() {
                            if let Some(parent) = stack.last_mut() {
                                parent.children.push(node);
                            }
                        }
                    }
                }
            },
            Token::Text { text } => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&unescape(text.as_str()));
                }
            }
            Token::Cdata { text, .. } => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(text.as_str());
                }
            }
            _ => {}
        }
    }

    if start_tag_open && stack.len() > 1 {
        stack.pop();
    }
    while stack.len() > 1 {
        let node = stack.pop()?;
        stack.last_mut()?.children.push(node);
    }
    let document = stack.pop()?;
    if document.children.is_empty() {
        None
    } else {
        Some(document)
    }
}

/// Decodes the predefined XML entities and numeric character references.
pub(crate) fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find(';').filter(|&end| end <= 10) else {
            out.push('&');
            rest = after;
            continue;
        };
        let entity = &after[..end];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parses any supported XML report. `None` means the document is not a
/// recognised test report.
pub fn parse_xml(text: &str) -> Option<TestReport> {
    let document = parse_tree(text)?;
    let root = document.children.first()?;
    match root.name.as_str() {
        "Site" => parse_ctest_site(root),
        _ => parse_junit(&document),
    }
}

/// Parses JUnit XML from a document tree.
///
/// Counts come from the `tests/failures/errors/skipped` attributes of the
/// outermost `<testsuite>` elements (nested suites carry aggregated counts
/// already); `passed = total - failed - errors - skipped`. Suites without
/// count attributes fall back to counting their test cases.
pub(crate) fn parse_junit(document: &XmlNode) -> Option<TestReport> {
    let mut suites = Vec::new();
    document.outermost("testsuite", &mut suites);

    let mut all_cases = Vec::new();
    document.descendants("testcase", &mut all_cases);
    let tests: Vec<TestCase> = all_cases.into_iter().map(junit_case).collect();

    let mut summary = TestSummary::default();
    if suites.is_empty() {
        let root = document.children.first()?;
        if root.name != "testsuites" {
            return None;
        }
        summary = match root.attr_u64("tests") {
            Some(total) => suite_counts(root, total),
            None => TestSummary::from_tests(&tests),
        };
    } else {
        for suite in suites {
            let counts = match suite.attr_u64("tests") {
                Some(total) => suite_counts(suite, total),
                None => {
                    let mut cases = Vec::new();
                    suite.descendants("testcase", &mut cases);
                    let cases: Vec<TestCase> = cases.into_iter().map(junit_case).collect();
                    TestSummary::from_tests(&cases)
                }
            };
            summary.add(&counts);
        }
    }

    if summary.total == 0 && !tests.is_empty() {
        summary = TestSummary::from_tests(&tests);
    }
    Some(TestReport::new(summary, tests))
}

fn suite_counts(suite: &XmlNode, total: u64) -> TestSummary {
    let failed = suite.attr_u64("failures").unwrap_or(0);
    let errors = suite.attr_u64("errors").unwrap_or(0);
    let skipped = suite
        .attr_u64("skipped")
        .or_else(|| suite.attr_u64("skips"))
        .unwrap_or(0)
        + suite.attr_u64("disabled").unwrap_or(0);
    TestSummary::from_total(total, failed, errors, skipped)
}

fn junit_case(node: &XmlNode) -> TestCase {
    let name = node.attr("name").unwrap_or_default();
    let classname = node
        .attr("classname")
        .or_else(|| node.attr("class"))
        .unwrap_or_default();
    let time = node.attr("time").map(parse_seconds).unwrap_or(0.0);

    let mut case = TestCase::new(name, TestStatus::Passed)
        .with_classname(classname)
        .with_time(time);

    let outcome = ["failure", "error", "skipped"]
        .iter()
        .find_map(|tag| node.child(tag).map(|child| (*tag, child)));

    if let Some((tag, child)) = outcome {
        case.status = match tag {
            "failure" => TestStatus::Failed,
            "error" => TestStatus::Error,
            _ => TestStatus::Skipped,
        };
        if let Some(message) = child.attr("message") {
            case = case.with_message(message);
        }
        case = case.with_details(child.text_trimmed());
    } else if let Some(status) = node.attr("status") {
        // ctest junit marks outcomes with an attribute
        case.status = match status.to_ascii_lowercase().as_str() {
            "fail" | "failed" => TestStatus::Failed,
            "disabled" | "notrun" | "skipped" => TestStatus::Skipped,
            "error" => TestStatus::Error,
            _ => TestStatus::Passed,
        };
    }
    case
}

/// Parses a CTest dashboard `Testing/<tag>/Test.xml`.
fn parse_ctest_site(site: &XmlNode) -> Option<TestReport> {
    let testing = site.child("Testing")?;
    let tests: Vec<TestCase> = testing
        .children
        .iter()
        .filter(|node| node.name == "Test" && node.attr("Status").is_some())
        .map(ctest_case)
        .collect();
    let collected = testing
        .child("TestList")
        .map(|list| list.children.iter().filter(|c| c.name == "Test").count() as u64)
        .unwrap_or(0);

    let summary = TestSummary::from_tests(&tests).with_collected(collected);
    Some(TestReport::new(summary, tests))
}

fn ctest_case(node: &XmlNode) -> TestCase {
    let name = node
        .child("Name")
        .map(|n| n.text_trimmed().to_string())
        .unwrap_or_default();
    let status = match node.attr("Status").unwrap_or_default() {
        "passed" => TestStatus::Passed,
        "failed" => TestStatus::Failed,
        "disabled" => TestStatus::Skipped,
        _ => TestStatus::Error,
    };

    let mut time = 0.0;
    let mut output = String::new();
    if let Some(results) = node.child("Results") {
        for measurement in results.children.iter().filter(|c| c.name == "NamedMeasurement") {
            if measurement.attr("name") == Some("Execution Time") {
                time = measurement
                    .child("Value")
                    .map(|v| parse_seconds(v.text_trimmed()))
                    .unwrap_or(0.0);
            }
        }
        if let Some(measurement) = results.child("Measurement") {
            if let Some(value) = measurement.child("Value") {
                output = value.text_trimmed().to_string();
            }
        }
    }

    let mut case = TestCase::new(name, status).with_time(time);
    if status.is_failure() {
        case = case.with_details(output);
    }
    case
}
