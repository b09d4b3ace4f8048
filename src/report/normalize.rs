//! Format detection and dispatch to the individual parsers.

use serde::{Deserialize, Serialize};

use super::json::parse_json;
use super::junit::parse_xml;
use super::ndjson::parse_ndjson;
use super::text::{parse_text, TextDialect};
use super::TestReport;

/// Broad shape of a report payload, decided from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Ndjson,
    Xml,
    Text,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Ndjson => write!(f, "ndjson"),
            Self::Xml => write!(f, "xml"),
            Self::Text => write!(f, "text"),
        }
    }
}

fn strip_bom(text: &str) -> &str {
    text.trim_start_matches('\u{feff}').trim_start()
}

/// Classifies a payload. `{`/`[` is JSON unless the document only parses
/// line by line, `<` is XML, anything else is console text.
pub fn sniff(bytes: &[u8]) -> ReportFormat {
    let text = String::from_utf8_lossy(bytes);
    let body = strip_bom(&text);
    match body.chars().next() {
        Some('{') | Some('[') => {
            if serde_json::from_str::<serde_json::Value>(body).is_ok() {
                ReportFormat::Json
            } else if body.starts_with('{') {
                ReportFormat::Ndjson
            } else {
                ReportFormat::Text
            }
        }
        Some('<') => ReportFormat::Xml,
        _ => ReportFormat::Text,
    }
}

/// Normalizes any report payload into a [`TestReport`].
///
/// Structured formats are tried first; when they yield nothing the payload
/// is scanned as console output using the `hints` dialects first. Never
/// fails: a payload without test evidence becomes the unknown report.
pub fn normalize(bytes: &[u8], hints: &[TextDialect]) -> TestReport {
    try_normalize(bytes, hints).unwrap_or_else(TestReport::unknown)
}

/// Like [`normalize`], but `None` when the payload holds no test evidence.
pub fn try_normalize(bytes: &[u8], hints: &[TextDialect]) -> Option<TestReport> {
    let text = String::from_utf8_lossy(bytes);
    let body = strip_bom(&text);
    if body.is_empty() {
        return None;
    }

    let format = sniff(bytes);
    let structured = match format {
        ReportFormat::Json => serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| parse_json(&value)),
        ReportFormat::Ndjson => parse_ndjson(body),
        ReportFormat::Xml => parse_xml(body),
        ReportFormat::Text => None,
    }
    .filter(TestReport::has_evidence);
    // a one-event `go test -json` stream is also a single JSON document
    let structured = match structured {
        None if format == ReportFormat::Json && body.starts_with('{') => {
            parse_ndjson(body).filter(TestReport::has_evidence)
        }
        other => other,
    };
    if let Some(report) = structured {
        tracing::debug!(format = %format, total = report.summary.total, "Normalized structured report");
        return Some(report);
    }
    parse_text(body, hints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportStatus;

    #[test]
    fn test_sniff() {
        assert_eq!(sniff(b"  {\"tests\": []}"), ReportFormat::Json);
        assert_eq!(sniff(b"[1, 2]"), ReportFormat::Json);
        assert_eq!(
            sniff(b"{\"Action\":\"run\"}\n{\"Action\":\"pass\"}\n"),
            ReportFormat::Ndjson
        );
        assert_eq!(sniff("\u{feff}<?xml version=\"1.0\"?>".as_bytes()), ReportFormat::Xml);
        assert_eq!(sniff(b"== 1 passed in 0.1s =="), ReportFormat::Text);
        assert_eq!(sniff(b""), ReportFormat::Text);
    }

    #[test]
    fn test_normalize_junit_bytes() {
        let xml = br#"<?xml version="1.0"?>
<testsuite name="s" tests="2" failures="1" errors="0" skipped="0">
  <testcase classname="a.B" name="ok"/>
  <testcase classname="a.B" name="bad"><failure message="boom"/></testcase>
</testsuite>"#;
        let report = normalize(xml, &[]);
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.status, ReportStatus::Failed);
    }

    #[test]
    fn test_single_go_event_is_an_event_stream() {
        let line = b"{\"Action\":\"pass\",\"Package\":\"example.com/m\",\"Test\":\"TestAdd\",\"Elapsed\":0.01}\n";
        assert_eq!(sniff(line), ReportFormat::Json);

        let report = normalize(line, &[]);
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.status, ReportStatus::Passed);
        assert_eq!(report.tests[0].qualified_name(), "example.com/m::TestAdd");
    }

    #[test]
    fn test_normalize_falls_back_to_text() {
        let out = b"[gw0] starting\n==== 3 passed in 0.20s ====\n";
        let report = normalize(out, &[TextDialect::Pytest]);
        assert_eq!(report.summary.passed, 3);
    }

    #[test]
    fn test_unrecognized_json_is_scanned_as_text() {
        let report = normalize(br#"{"hello": "world"}"#, &[]);
        assert!(report.is_unknown());
        assert!(!report.has_evidence());
    }

    #[test]
    fn test_garbage_is_unknown() {
        assert!(normalize(b"\x00\x01\x02", &[]).is_unknown());
        assert!(normalize(b"   \n", &[]).is_unknown());
        assert!(try_normalize(b"nothing here", &[]).is_none());
    }
}
