//! Helpers over unified diffs carried by tasks.

use std::collections::BTreeSet;

use crate::language::Language;
use crate::task::validation::validate_file_path;

/// Markers git writes for binary hunks, which `git apply` handles but which
/// carry no test file names worth extracting.
const BINARY_MARKERS: [&str; 2] = ["GIT binary patch", "Binary files "];

/// Test files added or modified by `patch`, sorted and deduplicated.
///
/// A file counts when its `+++ b/` target path contains `test`. Binary
/// patches yield nothing, and so do paths unsafe to splice into a shell
/// command.
pub fn test_files_in_patch(patch: &str) -> Vec<String> {
    if patch.trim().is_empty() || BINARY_MARKERS.iter().any(|m| patch.contains(m)) {
        return Vec::new();
    }

    let mut files = BTreeSet::new();
    for line in patch.lines() {
        let Some(path) = line.strip_prefix("+++ b/") else {
            continue;
        };
        let path = path.trim_end();
        if !path.to_lowercase().contains("test") {
            continue;
        }
        match validate_file_path(path) {
            Ok(()) => {
                files.insert(path.to_string());
            }
            Err(e) => tracing::warn!(path = %path, error = %e, "Skipping unsafe test path"),
        }
    }
    files.into_iter().collect()
}

/// Test command restricted to `files`, when the ecosystem supports one.
///
/// Only python has a focused form; other languages run the full suite.
pub fn focused_test_command(language: Language, files: &[String]) -> Option<String> {
    match language {
        Language::Python => {
            let py: Vec<&str> = files
                .iter()
                .map(String::as_str)
                .filter(|f| f.ends_with(".py"))
                .collect();
            if py.is_empty() {
                return None;
            }
            Some(format!(
                "pytest {} --json-report --json-report-file=report_pytest.json",
                py.join(" ")
            ))
        }
        _ => None,
    }
}
