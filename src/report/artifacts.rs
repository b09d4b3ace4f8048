//! Discovery of report files a test run left in the working tree.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use walkdir::{DirEntry, WalkDir};

use super::normalize::try_normalize;
use super::text::TextDialect;
use super::TestReport;

/// Directories never searched for reports.
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "venv",
    "__pycache__",
    "site-packages",
    "bower_components",
];

/// Report files larger than this are ignored.
const MAX_REPORT_BYTES: u64 = 64 * 1024 * 1024;

const MAX_DEPTH: usize = 16;

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

fn compile(patterns: &[&str]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|raw| match Pattern::new(raw) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::warn!(pattern = %raw, error = %e, "Ignoring invalid report glob");
                None
            }
        })
        .collect()
}

fn is_searchable(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_ref())
}

/// Lists files under `workdir` whose path relative to it matches any of
/// `patterns`, sorted for a stable merge order.
pub fn discover_artifacts(workdir: &Path, patterns: &[&str]) -> Vec<PathBuf> {
    let compiled = compile(patterns);
    if compiled.is_empty() || !workdir.is_dir() {
        return Vec::new();
    }
    let options = match_options();

    let mut found: Vec<PathBuf> = WalkDir::new(workdir)
        .follow_links(false)
        .max_depth(MAX_DEPTH)
        .into_iter()
        .filter_entry(is_searchable)
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .strip_prefix(workdir)
                .map(|rel| {
                    compiled
                        .iter()
                        .any(|pattern| pattern.matches_path_with(rel, options))
                })
                .unwrap_or(false)
        })
        .map(DirEntry::into_path)
        .collect();
    found.sort();
    found
}

fn parse_files(files: &[PathBuf], hints: &[TextDialect]) -> Vec<TestReport> {
    let mut reports = Vec::new();
    for path in files {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size == 0 || size > MAX_REPORT_BYTES {
            tracing::debug!(path = %path.display(), size, "Skipping report file");
            continue;
        }
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read report file");
                continue;
            }
        };
        match try_normalize(&bytes, hints) {
            Some(report) => {
                tracing::debug!(
                    path = %path.display(),
                    total = report.summary.total,
                    status = %report.status,
                    "Parsed report artifact"
                );
                reports.push(report);
            }
            None => tracing::debug!(path = %path.display(), "Report file holds no test evidence"),
        }
    }
    reports
}

/// Collects and merges every report artifact in `workdir`.
///
/// `fallback` globs are consulted only when the primary `globs` produced no
/// report with evidence. Returns `None` when nothing was found.
pub fn collect_reports(
    workdir: &Path,
    globs: &[&str],
    fallback: &[&str],
    hints: &[TextDialect],
) -> Option<TestReport> {
    let mut reports = parse_files(&discover_artifacts(workdir, globs), hints);
    if reports.is_empty() && !fallback.is_empty() {
        reports = parse_files(&discover_artifacts(workdir, fallback), hints);
    }
    if reports.is_empty() {
        return None;
    }
    Some(TestReport::merge(reports))
}

/// Deletes report files left over from an earlier run, sparing every path
/// for which `keep` returns true. Returns how many were removed.
pub fn remove_stale_artifacts<F>(
    workdir: &Path,
    patterns: &[&str],
    keep: F,
) -> std::io::Result<usize>
where
    F: Fn(&Path) -> bool,
{
    let mut removed = 0;
    for path in discover_artifacts(workdir, patterns) {
        if keep(&path) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    if removed > 0 {
        tracing::debug!(workdir = %workdir.display(), removed, "Removed stale report artifacts");
    }
    Ok(removed)
}
