//! Language ecosystems supported by the harness.
//!
//! Every ecosystem is described by one [`LanguageProfile`] value: default
//! image, default commands, package-cache locations, report globs and the
//! console dialects used when no report artifact exists. The repository
//! handle is generic over this value, so adding an ecosystem means adding a
//! profile, not a new handle type.

mod profiles;

use serde::{Deserialize, Serialize};

use crate::report::TextDialect;

pub use profiles::profile_for;

/// Supported ecosystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Kotlin,
    Scala,
    Go,
    Rust,
    Javascript,
    Typescript,
    Nodejs,
    Php,
    Ruby,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 12] = [
        Self::Python,
        Self::Java,
        Self::Kotlin,
        Self::Scala,
        Self::Go,
        Self::Rust,
        Self::Javascript,
        Self::Typescript,
        Self::Nodejs,
        Self::Php,
        Self::Ruby,
        Self::Cpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::Scala => "scala",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Nodejs => "nodejs",
            Self::Php => "php",
            Self::Ruby => "ruby",
            Self::Cpp => "cpp",
        }
    }

    pub fn profile(&self) -> &'static LanguageProfile {
        profile_for(*self)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "java" => Ok(Self::Java),
            "kotlin" | "kt" => Ok(Self::Kotlin),
            "scala" => Ok(Self::Scala),
            "go" | "golang" => Ok(Self::Go),
            "rust" | "rs" => Ok(Self::Rust),
            "javascript" | "js" => Ok(Self::Javascript),
            "typescript" | "ts" => Ok(Self::Typescript),
            "nodejs" | "node" => Ok(Self::Nodejs),
            "php" => Ok(Self::Php),
            "ruby" | "rb" => Ok(Self::Ruby),
            "cpp" | "c++" | "cxx" => Ok(Self::Cpp),
            other => Err(format!("Unknown language: {}", other)),
        }
    }
}

/// One package or build cache an ecosystem keeps between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLocation {
    /// Short identifier, used for volume and local directory names.
    pub name: &'static str,
    /// Absolute path inside the sandbox.
    pub mount_point: &'static str,
    /// Cache directory of the invoking user, relative to their home.
    pub user_dir: &'static str,
}

/// Everything the harness needs to know about one ecosystem.
#[derive(Debug, Clone, Copy)]
pub struct LanguageProfile {
    pub language: Language,
    pub default_image: &'static str,
    pub default_build_command: &'static str,
    pub default_test_command: &'static str,
    pub caches: &'static [CacheLocation],
    /// Report files the test command is expected to leave in the tree.
    pub report_globs: &'static [&'static str],
    /// Searched only when `report_globs` yield nothing.
    pub fallback_report_globs: &'static [&'static str],
    /// Console dialects tried first when parsing stdout/stderr.
    pub text_dialects: &'static [TextDialect],
    /// Prepended to every command (file-descriptor limits for node tooling).
    pub command_prefix: Option<&'static str>,
    pub env: &'static [(&'static str, &'static str)],
    pub shm_size: Option<i64>,
}

impl LanguageProfile {
    /// Prepares a build command for execution in the sandbox.
    pub fn prepare_build_command(&self, command: &str) -> String {
        let command = command.trim();
        let command = if command.contains("gradlew") {
            format!("chmod +x gradlew 2>/dev/null || true; {command}")
        } else {
            command.to_string()
        };
        self.with_prefix(command)
    }

    /// Prepares a test command for execution in the sandbox rooted at
    /// `workdir`.
    ///
    /// `ctest` is told to write a JUnit file under `<workdir>/test-results`
    /// unless the command already chooses an output.
    pub fn prepare_test_command(&self, command: &str, workdir: &str) -> String {
        let mut command = self.prepare_build_command(command);
        if command.contains("ctest") && !command.contains("--output-junit") {
            let dir = format!("{}/test-results", workdir.trim_end_matches('/'));
            command = format!("mkdir -p {dir} && {command} --output-junit {dir}/junit.xml");
        }
        command
    }

    fn with_prefix(&self, command: String) -> String {
        match self.command_prefix {
            Some(prefix) if !command.starts_with(prefix) => format!("{prefix} {command}"),
            _ => command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("golang".parse::<Language>().unwrap(), Language::Go);
        assert_eq!("C++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("node".parse::<Language>().unwrap(), Language::Nodejs);
        assert_eq!(" TS ".parse::<Language>().unwrap(), Language::Typescript);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for language in Language::ALL {
            assert_eq!(language.to_string().parse::<Language>().unwrap(), language);
            assert_eq!(language.profile().language, language);
        }
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Language::Javascript).unwrap();
        assert_eq!(json, "\"javascript\"");
        let parsed: Language = serde_json::from_str("\"cpp\"").unwrap();
        assert_eq!(parsed, Language::Cpp);
    }

    #[test]
    fn test_node_prefix_applied_once() {
        let profile = Language::Javascript.profile();
        let once = profile.prepare_test_command("npm test", "/run_dir");
        assert!(once.starts_with("ulimit -n 65535;"));
        let twice = profile.prepare_test_command(&once, "/run_dir");
        assert_eq!(once, twice);

        let python = Language::Python.profile();
        assert_eq!(python.prepare_test_command("pytest", "/run_dir"), "pytest");
    }

    #[test]
    fn test_ctest_gets_junit_output() {
        let profile = Language::Cpp.profile();
        let command = profile.prepare_test_command("cd build && ctest -V", "/run_dir/");
        assert!(command.starts_with("mkdir -p /run_dir/test-results && "));
        assert!(command.ends_with("--output-junit /run_dir/test-results/junit.xml"));

        let explicit = profile.prepare_test_command("ctest --output-junit out.xml", "/run_dir");
        assert_eq!(explicit, "ctest --output-junit out.xml");
    }

    #[test]
    fn test_gradle_wrapper_made_executable() {
        let profile = Language::Kotlin.profile();
        let command = profile.prepare_build_command("./gradlew build -x test");
        assert!(command.starts_with("chmod +x gradlew"));
        assert!(command.ends_with("./gradlew build -x test"));
    }
}
