//! `go test -json` event stream parsing.
//!
//! Each line is one event: `{"Action":"pass","Package":"p","Test":"T","Elapsed":0.1}`.
//! Events are folded per `(Package, Test)`; the terminal action decides the
//! outcome. Lines that are not JSON objects (build output mixed into the
//! stream) are ignored.

use std::collections::HashMap;

use serde::Deserialize;

use super::{TestCase, TestReport, TestStatus, TestSummary};

#[derive(Debug, Deserialize)]
struct GoEvent {
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Package", default)]
    package: String,
    #[serde(rename = "Test", default)]
    test: Option<String>,
    #[serde(rename = "Elapsed", default)]
    elapsed: Option<f64>,
    #[serde(rename = "Output", default)]
    output: Option<String>,
}

#[derive(Debug, Default)]
struct TestState {
    status: Option<TestStatus>,
    elapsed: f64,
    output: String,
}

#[derive(Debug, Default)]
struct PackageState {
    failed: bool,
    has_tests: bool,
    output: String,
}

/// Parses a `go test -json` stream. Returns `None` when no line decoded as
/// a test event.
pub fn parse_ndjson(text: &str) -> Option<TestReport> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut tests: HashMap<(String, String), TestState> = HashMap::new();
    let mut packages: HashMap<String, PackageState> = HashMap::new();
    let mut package_order: Vec<String> = Vec::new();
    let mut events = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(event) = serde_json::from_str::<GoEvent>(line) else {
            continue;
        };
        if event.action.is_empty() {
            continue;
        }
        events += 1;

        if !packages.contains_key(&event.package) {
            package_order.push(event.package.clone());
        }
        let package = packages.entry(event.package.clone()).or_default();

        match event.test {
            Some(test) => {
                package.has_tests = true;
                let key = (event.package, test);
                if !tests.contains_key(&key) {
                    order.push(key.clone());
                }
                let state = tests.entry(key).or_default();
                match event.action.as_str() {
                    "pass" => state.status = Some(TestStatus::Passed),
                    "fail" => state.status = Some(TestStatus::Failed),
                    "skip" => state.status = Some(TestStatus::Skipped),
                    "output" => {
                        if let Some(output) = event.output {
                            state.output.push_str(&output);
                        }
                    }
                    _ => {}
                }
                if let Some(elapsed) = event.elapsed {
                    state.elapsed = elapsed;
                }
            }
            None => match event.action.as_str() {
                "fail" => package.failed = true,
                "output" => {
                    if let Some(output) = event.output {
                        package.output.push_str(&output);
                    }
                }
                _ => {}
            },
        }
    }

    if events == 0 {
        return None;
    }

    let collected = order.len() as u64;
    let mut cases = Vec::with_capacity(order.len());
    for key in &order {
        let Some(state) = tests.remove(key) else {
            continue;
        };
        // started but never finished: the binary crashed or was killed
        let Some(status) = state.status else {
            continue;
        };
        let (package, test) = key;
        let mut case = TestCase::new(test.clone(), status)
            .with_classname(package.clone())
            .with_time(state.elapsed);
        if status.is_failure() {
            case = case.with_details(state.output.trim_end());
        }
        cases.push(case);
    }

    // a package that failed without running tests did not compile
    for name in package_order {
        let Some(package) = packages.get(&name) else {
            continue;
        };
        if package.failed && !package.has_tests {
            let label = if name.is_empty() { "build" } else { name.as_str() };
            cases.push(
                TestCase::new(label, TestStatus::Error)
                    .with_message("package failed without running tests")
                    .with_details(package.output.trim_end()),
            );
        }
    }

    let summary = TestSummary::from_tests(&cases).with_collected(collected);
    Some(TestReport::new(summary, cases))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportStatus;

    const STREAM: &str = r#"{"Action":"run","Package":"example.com/m","Test":"TestAdd"}
{"Action":"output","Package":"example.com/m","Test":"TestAdd","Output":"=== RUN   TestAdd\n"}
{"Action":"pass","Package":"example.com/m","Test":"TestAdd","Elapsed":0.01}
{"Action":"run","Package":"example.com/m","Test":"TestSub"}
{"Action":"output","Package":"example.com/m","Test":"TestSub","Output":"    sub_test.go:9: want 1 got 2\n"}
{"Action":"fail","Package":"example.com/m","Test":"TestSub","Elapsed":0.02}
{"Action":"run","Package":"example.com/m","Test":"TestSkip"}
{"Action":"skip","Package":"example.com/m","Test":"TestSkip","Elapsed":0}
{"Action":"fail","Package":"example.com/m","Elapsed":0.5}
"#;

    #[test]
    fn test_folds_events_per_test() {
        let report = parse_ndjson(STREAM).unwrap();
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.status, ReportStatus::Failed);

        let failed = report.tests.iter().find(|t| t.name == "TestSub").unwrap();
        assert_eq!(failed.classname, "example.com/m");
        assert!(failed.details.as_deref().unwrap().contains("want 1 got 2"));
        assert_eq!(failed.qualified_name(), "example.com/m::TestSub");
    }

    #[test]
    fn test_ignores_non_json_lines() {
        let stream = format!("go: downloading foo v1.0.0\n{STREAM}ok  \texample.com/other\n");
        let report = parse_ndjson(&stream).unwrap();
        assert_eq!(report.summary.total, 3);
    }

    #[test]
    fn test_build_failure_becomes_error_case() {
        let stream = r##"{"Action":"output","Package":"example.com/broken","Output":"# example.com/broken\nundefined: x\n"}
{"Action":"fail","Package":"example.com/broken","Elapsed":0}
"##;
        let report = parse_ndjson(stream).unwrap();
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.tests[0].name, "example.com/broken");
        assert_eq!(report.status, ReportStatus::Failed);
    }

    #[test]
    fn test_unfinished_test_counts_as_collected_only() {
        let stream = r#"{"Action":"run","Package":"p","Test":"TestHang"}
{"Action":"run","Package":"p","Test":"TestOk"}
{"Action":"pass","Package":"p","Test":"TestOk","Elapsed":0.1}
"#;
        let report = parse_ndjson(stream).unwrap();
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.summary.collected, 2);
    }

    #[test]
    fn test_no_events_is_none() {
        assert!(parse_ndjson("PASS\nok  \tpkg\t0.1s\n").is_none());
        assert!(parse_ndjson("{\"foo\": 1}").is_none());
    }
}
