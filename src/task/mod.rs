//! Evaluation task records.
//!
//! A [`Task`] is one (repository, commit, patch) unit read from JSONL.
//! Unknown fields are preserved verbatim so output records are the input
//! records enriched in place.

pub mod io;
pub mod patch;
pub mod validation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::TaskError;
use crate::language::{Language, LanguageProfile};

pub use io::{completed_ids, read_tasks, read_tasks_with_timeouts, JsonlWriter};
pub use patch::{focused_test_command, test_files_in_patch};
pub use validation::{validate_file_path, validate_git_ref, validate_repo_name};

pub const DEFAULT_TIMEOUT_BUILD: u64 = 300;
pub const DEFAULT_TIMEOUT_TEST: u64 = 600;

fn default_timeout_build() -> u64 {
    DEFAULT_TIMEOUT_BUILD
}

fn default_timeout_test() -> u64 {
    DEFAULT_TIMEOUT_TEST
}

/// One evaluation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Repository identifier, `owner/name`.
    pub repo: String,
    pub base_commit: String,
    /// Sandbox image; the language default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_test: Option<String>,
    /// The fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// New or changed tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_patch: Option<String>,
    #[serde(default = "default_timeout_build")]
    pub timeout_build: u64,
    #[serde(default = "default_timeout_test")]
    pub timeout_test: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Result of an earlier build probe (1 ok, 0 no tests, -1 error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_build: Option<i64>,
    /// Every other input field, carried through to the output untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Task {
    pub fn new(repo: impl Into<String>, base_commit: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            base_commit: base_commit.into(),
            image_name: None,
            command_build: None,
            command_test: None,
            patch: None,
            test_patch: None,
            timeout_build: DEFAULT_TIMEOUT_BUILD,
            timeout_test: DEFAULT_TIMEOUT_TEST,
            language: None,
            repo_build: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language.as_str().to_string());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image_name = Some(image.into());
        self
    }

    pub fn with_commands(mut self, build: impl Into<String>, test: impl Into<String>) -> Self {
        self.command_build = Some(build.into());
        self.command_test = Some(test.into());
        self
    }

    pub fn with_patches(mut self, patch: impl Into<String>, test_patch: impl Into<String>) -> Self {
        self.patch = Some(patch.into());
        self.test_patch = Some(test_patch.into());
        self
    }

    pub fn with_timeouts(mut self, build: u64, test: u64) -> Self {
        self.timeout_build = build;
        self.timeout_test = test;
        self
    }

    /// Repository name without the owner.
    pub fn repo_name(&self) -> &str {
        self.repo.rsplit('/').next().unwrap_or(&self.repo)
    }

    pub fn patch_text(&self) -> &str {
        self.patch.as_deref().unwrap_or_default()
    }

    pub fn test_patch_text(&self) -> &str {
        self.test_patch.as_deref().unwrap_or_default()
    }

    /// Resolves the task language, falling back to `default`.
    pub fn language_or(&self, default: Language) -> Result<Language, TaskError> {
        match self.language.as_deref() {
            None | Some("") => Ok(default),
            Some(raw) => raw.parse().map_err(TaskError::InvalidTask),
        }
    }

    pub fn image_or_default(&self, profile: &LanguageProfile) -> String {
        non_empty(&self.image_name).unwrap_or(profile.default_image).to_string()
    }

    pub fn build_command_or_default(&self, profile: &LanguageProfile) -> String {
        non_empty(&self.command_build)
            .unwrap_or(profile.default_build_command)
            .to_string()
    }

    pub fn test_command_or_default(&self, profile: &LanguageProfile) -> String {
        non_empty(&self.command_test)
            .unwrap_or(profile.default_test_command)
            .to_string()
    }

    /// Deterministic identifier: `<name>-<last 4 of commit>-<4 hex>`, the
    /// hex taken from a SHA-256 over the sorted-key JSON of the
    /// configuration fields. Identical configurations share an id no matter
    /// where they appear in the input.
    pub fn task_id(&self) -> String {
        let config: BTreeMap<&str, Value> = BTreeMap::from([
            ("repo", Value::from(self.repo.as_str())),
            ("base_commit", Value::from(self.base_commit.as_str())),
            ("image_name", Value::from(self.image_name.clone())),
            ("command_build", Value::from(self.command_build.clone())),
            ("command_test", Value::from(self.command_test.clone())),
            ("patch", Value::from(self.patch.clone())),
            ("test_patch", Value::from(self.test_patch.clone())),
            ("timeout_build", Value::from(self.timeout_build)),
            ("timeout_test", Value::from(self.timeout_test)),
            ("language", Value::from(self.language.clone())),
        ]);
        // BTreeMap serialization cannot fail.
        let canonical = serde_json::to_string(&config).unwrap_or_default();
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));

        let chars: Vec<char> = self.base_commit.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("{}-{}-{}", self.repo_name(), tail, &digest[..4])
    }

    /// Checks every field interpolated into git or shell commands.
    pub fn validate(&self) -> Result<(), TaskError> {
        validate_repo_name(&self.repo)?;
        validate_git_ref(&self.base_commit)?;
        if self.timeout_build == 0 || self.timeout_test == 0 {
            return Err(TaskError::InvalidTask(
                "timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMIT: &str = "9f1c2d3e4b5a69788796a5b4c3d2e1f0a1b2c3d4";

    #[test]
    fn test_task_id_is_deterministic() {
        let a = Task::new("psf/requests", COMMIT).with_patches("fix", "tests");
        let b = a.clone();
        assert_eq!(a.task_id(), b.task_id());

        let id = a.task_id();
        assert!(id.starts_with("requests-c3d4-"));
        assert_eq!(id.len(), "requests-c3d4-".len() + 4);
    }

    #[test]
    fn test_task_id_depends_on_configuration_only() {
        let base = Task::new("psf/requests", COMMIT);
        let mut annotated = base.clone();
        annotated
            .extra
            .insert("instance_note".to_string(), Value::from("ignored"));
        assert_eq!(base.task_id(), annotated.task_id());

        let other = base.clone().with_timeouts(10, 20);
        assert_ne!(base.task_id(), other.task_id());
    }

    #[test]
    fn test_defaults_and_extra_fields_round_trip() {
        let line = r#"{"repo":"o/r","base_commit":"abc123","instance_id":"o__r-1","patch":null}"#;
        let task: Task = serde_json::from_str(line).unwrap();
        assert_eq!(task.timeout_build, 300);
        assert_eq!(task.timeout_test, 600);
        assert_eq!(task.patch_text(), "");
        assert_eq!(task.extra.get("instance_id"), Some(&Value::from("o__r-1")));

        let out = serde_json::to_value(&task).unwrap();
        assert_eq!(out["instance_id"], "o__r-1");
        assert_eq!(out["timeout_test"], 600);
        assert!(out.get("image_name").is_none());
    }

    #[test]
    fn test_profile_fallbacks() {
        let profile = Language::Python.profile();
        let task = Task::new("o/r", COMMIT);
        assert_eq!(task.image_or_default(profile), "python:3.11");
        assert_eq!(
            task.test_command_or_default(profile),
            profile.default_test_command
        );

        let custom = task.with_image("python:3.12").with_commands("make", " ");
        assert_eq!(custom.image_or_default(profile), "python:3.12");
        assert_eq!(custom.build_command_or_default(profile), "make");
        assert_eq!(
            custom.test_command_or_default(profile),
            profile.default_test_command
        );
    }

    #[test]
    fn test_language_resolution() {
        let task = Task::new("o/r", COMMIT);
        assert_eq!(task.language_or(Language::Go).unwrap(), Language::Go);
        let rust = task.clone().with_language(Language::Rust);
        assert_eq!(rust.language_or(Language::Go).unwrap(), Language::Rust);

        let mut bad = task;
        bad.language = Some("cobol".to_string());
        assert!(matches!(
            bad.language_or(Language::Python),
            Err(TaskError::InvalidTask(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(Task::new("o/r", COMMIT).validate().is_ok());
        assert!(Task::new("o/r; rm -rf /", COMMIT).validate().is_err());
        assert!(Task::new("o/r", "--upload-pack=evil").validate().is_err());
        assert!(Task::new("o/r", COMMIT)
            .with_timeouts(0, 10)
            .validate()
            .is_err());
    }
}
