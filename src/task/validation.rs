//! Input checks for values interpolated into git invocations and shell
//! commands run in the sandbox.

use crate::error::TaskError;

const MAX_REF_LEN: usize = 256;
const MAX_REPO_LEN: usize = 256;
const MAX_PATH_LEN: usize = 4096;

fn invalid(message: String) -> Result<(), TaskError> {
    Err(TaskError::InvalidTask(message))
}

/// Accepts commit SHAs and ordinary ref names (`main`, `v1.2`, `HEAD~1`).
///
/// A leading `-` would be read as a git flag, `..` as a range.
pub fn validate_git_ref(s: &str) -> Result<(), TaskError> {
    if s.is_empty() {
        return invalid("git ref is empty".to_string());
    }
    if s.len() > MAX_REF_LEN {
        return invalid(format!("git ref too long ({} chars, max {MAX_REF_LEN})", s.len()));
    }
    if s.starts_with('-') {
        return invalid(format!("git ref '{s}' must not start with '-'"));
    }
    if s.contains("..") {
        return invalid(format!("git ref '{s}' must not contain '..'"));
    }
    if let Some(ch) = s
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(*ch, '/' | '.' | '-' | '_' | '~' | '^')))
    {
        return invalid(format!("invalid character '{ch}' in git ref '{s}'"));
    }
    Ok(())
}

/// Accepts `owner/name` where both parts are non-empty, do not start with
/// `.` or `-`, and contain only alphanumerics, `-`, `_` and `.`.
pub fn validate_repo_name(s: &str) -> Result<(), TaskError> {
    if s.is_empty() {
        return invalid("repository name is empty".to_string());
    }
    if s.len() > MAX_REPO_LEN {
        return invalid(format!(
            "repository name too long ({} chars, max {MAX_REPO_LEN})",
            s.len()
        ));
    }
    let Some((owner, name)) = s.split_once('/') else {
        return invalid(format!("repository '{s}' is not in 'owner/name' form"));
    };
    if name.contains('/') {
        return invalid(format!("repository '{s}' is not in 'owner/name' form"));
    }
    for part in [owner, name] {
        if part.is_empty() || part.starts_with('.') || part.starts_with('-') {
            return invalid(format!(
                "repository '{s}': parts must be non-empty and not start with '.' or '-'"
            ));
        }
        if let Some(ch) = part
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(*ch, '-' | '_' | '.')))
        {
            return invalid(format!("invalid character '{ch}' in repository '{s}'"));
        }
    }
    Ok(())
}

/// Accepts relative paths without traversal or shell metacharacters, as
/// used when test file names are spliced into a focused test command.
pub fn validate_file_path(path: &str) -> Result<(), TaskError> {
    if path.is_empty() {
        return invalid("file path is empty".to_string());
    }
    if path.len() > MAX_PATH_LEN {
        return invalid(format!("file path too long ({} chars)", path.len()));
    }
    if path.contains('\0') {
        return invalid("file path contains a null byte".to_string());
    }
    if path.contains("..") {
        return invalid(format!("file path '{path}' contains '..'"));
    }
    if path.starts_with('/') {
        return invalid(format!("file path '{path}' must be relative"));
    }
    if let Some(ch) = path.chars().find(|ch| {
        matches!(
            *ch,
            '\'' | '"' | '`' | '$' | '!' | '&' | '|' | ';' | '(' | ')' | '{' | '}' | '<' | '>'
                | '\\' | '\n' | '\r' | ' ' | '\t' | '*' | '?'
        )
    }) {
        return invalid(format!(
            "invalid character '{}' in file path '{path}'",
            ch.escape_default()
        ));
    }
    Ok(())
}
