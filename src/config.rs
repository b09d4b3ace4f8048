//! Harness configuration.
//!
//! Values are layered, later layers winning: built-in defaults, then
//! `SWE_TESTBED_*` environment variables, then an optional YAML file, then
//! command-line flags (applied by the CLI through the `with_*` builders).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheMode;
use crate::error::ConfigError;
use crate::execution::{ExecutionLimits, DEFAULT_COMMIT_ATTEMPTS, DEFAULT_COMMIT_DELAY};
use crate::language::Language;
use crate::repo::HandleSettings;
use crate::task::{DEFAULT_TIMEOUT_BUILD, DEFAULT_TIMEOUT_TEST};

const ENV_PREFIX: &str = "SWE_TESTBED_";

/// Which sandbox backend runs the commands.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Docker,
    /// Host processes, no isolation.
    Local,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "local" => Ok(Self::Local),
            other => Err(format!("Unknown backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root of cloned working trees and local caches.
    pub cache_root: PathBuf,
    pub cache_mode: CacheMode,
    pub backend: BackendKind,
    /// Number of tasks evaluated concurrently.
    pub n_jobs: usize,
    /// Build timeout in seconds for tasks that do not set one.
    pub timeout_build: u64,
    /// Test timeout in seconds for tasks that do not set one.
    pub timeout_test: u64,
    /// Commit successful builds as images for reuse.
    pub commit_image: bool,
    pub keep_containers: bool,
    /// Drop raw phase results from output records.
    pub delete_log: bool,
    pub limits: ExecutionLimits,
    /// Docker network mode; empty for the daemon default.
    pub network_mode: String,
    /// Clone and fetch timeout in seconds.
    pub clone_timeout: u64,
    pub default_language: Language,
    /// Prefix of clone URLs; empty for GitHub.
    pub git_base_url: String,
    /// Seconds between progress log lines.
    pub progress_interval: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            cache_mode: CacheMode::Volume,
            backend: BackendKind::Docker,
            n_jobs: 1,
            timeout_build: DEFAULT_TIMEOUT_BUILD,
            timeout_test: DEFAULT_TIMEOUT_TEST,
            commit_image: true,
            keep_containers: false,
            delete_log: false,
            limits: ExecutionLimits::default(),
            network_mode: "bridge".to_string(),
            clone_timeout: 600,
            default_language: Language::Python,
            git_base_url: String::new(),
            progress_interval: 60,
        }
    }
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("swe-testbed")
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `SWE_TESTBED_CACHE_ROOT`: working tree root (default: `~/.cache/swe-testbed`)
    /// - `SWE_TESTBED_CACHE_MODE`: `download`, `shared`, `local` or `volume`
    /// - `SWE_TESTBED_BACKEND`: `docker` or `local`
    /// - `SWE_TESTBED_N_JOBS`: concurrent tasks (default: 1)
    /// - `SWE_TESTBED_TIMEOUT_BUILD`, `SWE_TESTBED_TIMEOUT_TEST`: seconds
    /// - `SWE_TESTBED_COMMIT_IMAGE`, `SWE_TESTBED_KEEP_CONTAINERS`,
    ///   `SWE_TESTBED_DELETE_LOG`: booleans
    /// - `SWE_TESTBED_MEMORY_MB`, `SWE_TESTBED_CPU_CORES`,
    ///   `SWE_TESTBED_MAX_PROCESSES`: container limits (0 = unlimited)
    /// - `SWE_TESTBED_NETWORK_MODE`, `SWE_TESTBED_CLONE_TIMEOUT`,
    ///   `SWE_TESTBED_DEFAULT_LANGUAGE`, `SWE_TESTBED_GIT_BASE_URL`,
    ///   `SWE_TESTBED_PROGRESS_INTERVAL`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Applies variables read through `lookup`, which receives full keys
    /// such as `SWE_TESTBED_N_JOBS`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, val)) = var("CACHE_ROOT") {
            self.cache_root = PathBuf::from(val);
        }
        if let Some((key, val)) = var("CACHE_MODE") {
            self.cache_mode = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("BACKEND") {
            self.backend = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("N_JOBS") {
            self.n_jobs = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("TIMEOUT_BUILD") {
            self.timeout_build = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("TIMEOUT_TEST") {
            self.timeout_test = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("COMMIT_IMAGE") {
            self.commit_image = parse_env_bool(&val, &key)?;
        }
        if let Some((key, val)) = var("KEEP_CONTAINERS") {
            self.keep_containers = parse_env_bool(&val, &key)?;
        }
        if let Some((key, val)) = var("DELETE_LOG") {
            self.delete_log = parse_env_bool(&val, &key)?;
        }
        if let Some((key, val)) = var("MEMORY_MB") {
            self.limits.memory_mb = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("CPU_CORES") {
            self.limits.cpu_cores = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("MAX_PROCESSES") {
            self.limits.max_processes = parse_env_value(&val, &key)?;
        }
        if let Some((_, val)) = var("NETWORK_MODE") {
            self.network_mode = val;
        }
        if let Some((key, val)) = var("CLONE_TIMEOUT") {
            self.clone_timeout = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("DEFAULT_LANGUAGE") {
            self.default_language = parse_env_value(&val, &key)?;
        }
        if let Some((_, val)) = var("GIT_BASE_URL") {
            self.git_base_url = val;
        }
        if let Some((key, val)) = var("PROGRESS_INTERVAL") {
            self.progress_interval = parse_env_value(&val, &key)?;
        }
        Ok(self)
    }

    /// Overrides the keys present in a YAML document. Keys the document
    /// leaves out keep their current value.
    pub fn apply_yaml(self, text: &str) -> Result<Self, ConfigError> {
        let overrides: serde_yaml::Value = serde_yaml::from_str(text)?;
        if overrides.is_null() {
            return Ok(self);
        }
        if !overrides.is_mapping() {
            return Err(ConfigError::ValidationFailed(
                "configuration file must be a mapping".to_string(),
            ));
        }
        let mut base = serde_yaml::to_value(&self)?;
        merge_yaml(&mut base, overrides);
        Ok(serde_yaml::from_value(base)?)
    }

    pub fn apply_yaml_file(self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        self.apply_yaml(&text)
    }

    /// Defaults, environment and an optional file, validated.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_env()?;
        if let Some(path) = file {
            config = config.apply_yaml_file(path)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_jobs == 0 {
            return Err(ConfigError::ValidationFailed(
                "n_jobs must be greater than 0".to_string(),
            ));
        }

        if self.timeout_build == 0 || self.timeout_test == 0 {
            return Err(ConfigError::ValidationFailed(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        if self.clone_timeout == 0 {
            return Err(ConfigError::ValidationFailed(
                "clone_timeout must be greater than 0".to_string(),
            ));
        }

        if self.progress_interval == 0 {
            return Err(ConfigError::ValidationFailed(
                "progress_interval must be greater than 0".to_string(),
            ));
        }

        if self.cache_root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "cache_root cannot be empty".to_string(),
            ));
        }

        self.limits.validate()
    }

    /// Settings every repository handle of this run is created with.
    pub fn handle_settings(&self) -> HandleSettings {
        HandleSettings {
            cache_root: self.cache_root.clone(),
            cache_mode: self.cache_mode,
            home: dirs::home_dir(),
            limits: self.limits,
            network_mode: self.network_mode.clone(),
            commit_image: self.commit_image,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
            commit_delay: DEFAULT_COMMIT_DELAY,
            keep_containers: self.keep_containers,
            clone_timeout: Duration::from_secs(self.clone_timeout),
            git_base_url: self.git_base_url.clone(),
        }
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_n_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    pub fn with_timeouts(mut self, build: u64, test: u64) -> Self {
        self.timeout_build = build;
        self.timeout_test = test;
        self
    }

    pub fn with_delete_log(mut self, delete_log: bool) -> Self {
        self.delete_log = delete_log;
        self
    }

    pub fn with_keep_containers(mut self, keep: bool) -> Self {
        self.keep_containers = keep;
        self
    }

    pub fn with_commit_image(mut self, commit: bool) -> Self {
        self.commit_image = commit;
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_default_language(mut self, language: Language) -> Self {
        self.default_language = language;
        self
    }
}

fn merge_yaml(base: &mut serde_yaml::Value, overrides: serde_yaml::Value) {
    match (base, overrides) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Parse an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
