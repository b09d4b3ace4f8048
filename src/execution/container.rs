//! Sandbox container description and resource naming.
//!
//! Container, image and volume names are derived from the repository and
//! commit only, so two workers never race on the same named resource unless
//! they evaluate the same (repository, commit) pair.

use std::path::PathBuf;

use crate::execution::resources::ExecutionLimits;

/// Mount point of the task working tree inside every container.
pub const SANDBOX_WORKDIR: &str = "/run_dir";

/// Prefix of every image the harness commits.
pub const IMAGE_NAMESPACE: &str = "swe-testbed";

/// Length of the commit prefix embedded in names.
const COMMIT_PREFIX_LEN: usize = 12;

/// Everything needed to start one sandbox.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name; any stale container with this name is replaced.
    pub name: String,
    pub image: String,
    /// Host directory mounted at the sandbox working directory.
    pub host_workdir: PathBuf,
    /// Extra `source:target:mode` binds (package caches).
    pub binds: Vec<String>,
    pub env: Vec<(String, String)>,
    pub limits: ExecutionLimits,
    pub network_mode: Option<String>,
    pub shm_size: Option<i64>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, host_workdir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            host_workdir: host_workdir.into(),
            binds: Vec::new(),
            env: Vec::new(),
            limits: ExecutionLimits::default(),
            network_mode: Some("bridge".to_string()),
            shm_size: None,
        }
    }

    pub fn with_binds(mut self, binds: Vec<String>) -> Self {
        self.binds = binds;
        self
    }

    pub fn with_env<K, V, I>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        let mode = mode.into();
        self.network_mode = if mode.is_empty() { None } else { Some(mode) };
        self
    }

    pub fn with_shm_size(mut self, bytes: Option<i64>) -> Self {
        self.shm_size = bytes;
        self
    }

    /// Environment in `KEY=value` form.
    pub fn env_strings(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Lowercases and replaces every character Docker rejects in names.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for ch in raw.chars().flat_map(char::to_lowercase) {
        let ch = if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
            ch
        } else {
            '-'
        };
        if ch == '-' && last_dash {
            continue;
        }
        last_dash = ch == '-';
        out.push(ch);
    }
    out.trim_matches(|c| c == '-' || c == '.').to_string()
}

fn commit_prefix(commit: &str) -> String {
    sanitize_name(&commit.chars().take(COMMIT_PREFIX_LEN).collect::<String>())
}

/// Image a built (repository, commit) environment is committed to:
/// `swe-testbed/<owner>-<name>:<commit12>`.
pub fn image_name_for(repo: &str, commit: &str) -> String {
    format!(
        "{IMAGE_NAMESPACE}/{}:{}",
        sanitize_name(repo),
        commit_prefix(commit)
    )
}

/// Container name for a (repository, commit) pair.
pub fn container_name_for(repo: &str, commit: &str) -> String {
    format!(
        "{IMAGE_NAMESPACE}-{}-{}",
        sanitize_name(repo),
        commit_prefix(commit)
    )
}

/// Splits `repo[:tag]` into repository and tag. A colon inside a registry
/// host (`host:5000/img`) is not a tag separator.
pub fn split_image_reference(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        Some(i) if !image[i + 1..].contains('/') => (&image[..i], &image[i + 1..]),
        _ => (image, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Owner/Repo.Name"), "owner-repo.name");
        assert_eq!(sanitize_name("--a//b__"), "a-b__");
        assert_eq!(sanitize_name("ünï"), "n");
    }

    #[test]
    fn test_derived_names() {
        let commit = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(
            image_name_for("psf/Requests", commit),
            "swe-testbed/psf-requests:0123456789ab"
        );
        assert_eq!(
            container_name_for("psf/Requests", commit),
            "swe-testbed-psf-requests-0123456789ab"
        );
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("python:3.11"), ("python", "3.11"));
        assert_eq!(split_image_reference("python"), ("python", "latest"));
        assert_eq!(
            split_image_reference("registry:5000/team/img"),
            ("registry:5000/team/img", "latest")
        );
        assert_eq!(
            split_image_reference("registry:5000/team/img:v2"),
            ("registry:5000/team/img", "v2")
        );
    }

    #[test]
    fn test_spec_builder() {
        let spec = ContainerSpec::new("c", "python:3.11", "/tmp/w")
            .with_env([("A", "1"), ("B", "two")])
            .with_network_mode("")
            .with_shm_size(Some(64));
        assert_eq!(spec.env_strings(), vec!["A=1", "B=two"]);
        assert_eq!(spec.network_mode, None);
        assert_eq!(spec.shm_size, Some(64));
        assert!(spec.limits.is_unlimited());
    }
}
