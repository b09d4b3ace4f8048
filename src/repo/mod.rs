//! Repository handle: one (repository, commit) checkout and its sandbox.
//!
//! [`RepositoryHandle`] is generic over a [`LanguageProfile`] value, so
//! every ecosystem shares the same lifecycle, timeout and commit logic and
//! differs only in data (image, commands, caches, report locations).
//!
//! # State machine
//!
//! ```text
//! UNBUILT → BUILDING → BUILT ⇄ TESTING
//!               any step → FAILED (terminal)
//! ```
//!
//! `clean()` is a self-loop on `UNBUILT`, `BUILT` and `TESTING`.

#[cfg(test)]
pub(crate) mod fixture;
pub mod git;
pub mod result;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{plan_cache_mounts, CacheMode, CachePlan};
use crate::error::{Phase, SandboxError, TaskError};
use crate::execution::{
    commit_image_with_retry, container_name_for, image_name_for, ContainerSpec, ExecutionLimits,
    SandboxBackend, DEFAULT_COMMIT_ATTEMPTS, DEFAULT_COMMIT_DELAY,
};
use crate::language::LanguageProfile;
use crate::report::{collect_reports, normalize::try_normalize, remove_stale_artifacts, TestReport};

pub use git::{clone_url, GitWorkspace};
pub use result::{ExecutionResult, TIMEOUT_MESSAGE, TIMEOUT_RETURN_CODE};

/// Shell used to run build and test commands in the sandbox.
const SHELL: &str = "sh";

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Unbuilt,
    Building,
    Built,
    Testing,
    Failed,
}

impl HandleState {
    fn can_become(self, next: HandleState) -> bool {
        use HandleState::*;
        match (self, next) {
            (Failed, _) => false,
            (_, Failed) => true,
            (Unbuilt | Built, Building) => true,
            (Building, Built) => true,
            (Built, Testing) | (Testing, Built) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbuilt => write!(f, "unbuilt"),
            Self::Building => write!(f, "building"),
            Self::Built => write!(f, "built"),
            Self::Testing => write!(f, "testing"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Harness-wide settings every handle is created with.
#[derive(Debug, Clone)]
pub struct HandleSettings {
    /// Root under which working trees live (`<root>/repos/<owner>/<name>/<commit>`).
    pub cache_root: PathBuf,
    pub cache_mode: CacheMode,
    /// Home directory used by `shared` cache mode.
    pub home: Option<PathBuf>,
    pub limits: ExecutionLimits,
    pub network_mode: String,
    /// Commit successful builds as reusable images.
    pub commit_image: bool,
    pub commit_attempts: u32,
    pub commit_delay: Duration,
    /// Leave stopped containers behind for inspection.
    pub keep_containers: bool,
    pub clone_timeout: Duration,
    /// Clone URL prefix; empty means GitHub.
    pub git_base_url: String,
}

impl Default for HandleSettings {
    fn default() -> Self {
        Self {
            cache_root: std::env::temp_dir().join("swe-testbed"),
            cache_mode: CacheMode::default(),
            home: dirs::home_dir(),
            limits: ExecutionLimits::default(),
            network_mode: "bridge".to_string(),
            commit_image: true,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
            commit_delay: DEFAULT_COMMIT_DELAY,
            keep_containers: false,
            clone_timeout: Duration::from_secs(600),
            git_base_url: String::new(),
        }
    }
}

/// A checked-out repository bound to one sandbox name and one image name.
pub struct RepositoryHandle {
    repo: String,
    commit: String,
    base_image: String,
    committed_image: String,
    container_name: String,
    profile: &'static LanguageProfile,
    backend: Arc<dyn SandboxBackend>,
    settings: HandleSettings,
    workspace: GitWorkspace,
    state: HandleState,
}

impl RepositoryHandle {
    pub fn new(
        repo: impl Into<String>,
        commit: impl Into<String>,
        base_image: impl Into<String>,
        profile: &'static LanguageProfile,
        backend: Arc<dyn SandboxBackend>,
        settings: HandleSettings,
    ) -> Self {
        let repo = repo.into();
        let commit = commit.into();
        let workdir = settings
            .cache_root
            .join("repos")
            .join(&repo)
            .join(&commit);
        Self {
            committed_image: image_name_for(&repo, &commit),
            container_name: container_name_for(&repo, &commit),
            workspace: GitWorkspace::new(workdir, settings.clone_timeout),
            base_image: base_image.into(),
            repo,
            commit,
            profile,
            backend,
            settings,
            state: HandleState::Unbuilt,
        }
    }

    /// Uses `path` as the working tree instead of the cache-root location.
    pub fn with_workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace = GitWorkspace::new(path, self.settings.clone_timeout);
        self
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn workdir(&self) -> &Path {
        self.workspace.path()
    }

    pub fn committed_image(&self) -> &str {
        &self.committed_image
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn profile(&self) -> &'static LanguageProfile {
        self.profile
    }

    fn transition(&mut self, next: HandleState) -> Result<(), TaskError> {
        if !self.state.can_become(next) {
            return Err(TaskError::InvalidState {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(repo = %self.repo, from = %self.state, to = %next, "Handle transition");
        self.state = next;
        Ok(())
    }

    fn fail(&mut self) {
        if self.state != HandleState::Failed {
            tracing::debug!(repo = %self.repo, from = %self.state, "Handle failed");
            self.state = HandleState::Failed;
        }
    }

    fn require_idle(&self, operation: &str) -> Result<(), TaskError> {
        match self.state {
            HandleState::Unbuilt | HandleState::Built | HandleState::Testing => Ok(()),
            other => Err(TaskError::InvalidState {
                from: other.to_string(),
                to: operation.to_string(),
            }),
        }
    }

    /// Clones the repository (once per cache root) and checks out the commit.
    pub async fn prepare(&mut self) -> Result<(), TaskError> {
        self.require_idle("prepare")?;
        let url = clone_url(&self.settings.git_base_url, &self.repo);
        if let Err(e) = self.workspace.prepare(&url, &self.repo, &self.commit).await {
            tracing::error!(repo = %self.repo, commit = %self.commit, error = %e, "Prepare failed");
            self.fail();
            return Err(e.into());
        }
        Ok(())
    }

    /// True when a committed image for this (repository, commit) exists.
    pub async fn was_built(&self) -> bool {
        self.backend.image_exists(&self.committed_image).await
    }

    fn cache_plan(&self) -> CachePlan {
        if !self.backend.supports_mounts() {
            return CachePlan::default();
        }
        plan_cache_mounts(
            self.settings.cache_mode,
            self.profile,
            self.workspace.path(),
            self.settings.home.as_deref(),
        )
    }

    async fn materialize(&self, plan: &CachePlan) -> Result<(), TaskError> {
        for volume in plan.volumes() {
            self.backend.create_volume(volume).await?;
        }
        for dir in plan.host_dirs() {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    fn container_spec(&self, image: &str, plan: &CachePlan) -> ContainerSpec {
        ContainerSpec::new(self.container_name.clone(), image, self.workspace.path())
            .with_binds(plan.bind_strings())
            .with_env(self.profile.env.iter().copied())
            .with_limits(self.settings.limits)
            .with_network_mode(self.settings.network_mode.clone())
            .with_shm_size(self.profile.shm_size)
    }

    async fn start_sandbox(&self, image: &str) -> Result<String, TaskError> {
        let plan = self.cache_plan();
        self.materialize(&plan).await?;
        let spec = self.container_spec(image, &plan);
        Ok(self.backend.start(&spec).await?)
    }

    async fn stop_sandbox(&self, sandbox: &str) {
        self.backend
            .stop(sandbox, !self.settings.keep_containers)
            .await;
    }

    fn shell(command: &str) -> Vec<String> {
        vec![SHELL.to_string(), "-c".to_string(), command.to_string()]
    }

    /// Builds the environment, reusing a committed image when one exists.
    ///
    /// A zero exit commits the container (when enabled) and leaves the
    /// handle `BUILT`; any other exit leaves it `FAILED` and is returned as
    /// a result, not an error. A timeout stops the sandbox before the error
    /// is returned.
    pub async fn build(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, TaskError> {
        self.transition(HandleState::Building)?;

        if self.was_built().await {
            tracing::info!(repo = %self.repo, image = %self.committed_image, "Reusing committed image");
            self.transition(HandleState::Built)?;
            return Ok(ExecutionResult {
                command: command.to_string(),
                reused_image: true,
                ..Default::default()
            });
        }

        let prepared = self.profile.prepare_build_command(command);
        let sandbox = match self.start_sandbox(&self.base_image).await {
            Ok(id) => id,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };

        tracing::info!(repo = %self.repo, image = %self.base_image, "Building environment");
        let outcome = self
            .backend
            .exec(&sandbox, &Self::shell(&prepared), timeout)
            .await;

        let result = match outcome {
            Ok(output) => ExecutionResult::from_output(prepared, output),
            Err(SandboxError::Timeout { seconds, .. }) => {
                self.stop_sandbox(&sandbox).await;
                self.fail();
                tracing::error!(repo = %self.repo, seconds, "Build timed out");
                return Err(TaskError::Timeout {
                    phase: Phase::Build,
                    seconds,
                });
            }
            Err(e) => {
                self.stop_sandbox(&sandbox).await;
                self.fail();
                return Err(e.into());
            }
        };

        tracing::info!(
            repo = %self.repo,
            return_code = result.return_code,
            duration_secs = result.duration_secs,
            "Build finished"
        );
        tracing::debug!(stdout = %result.stdout, stderr = %result.stderr, "Build output");

        if result.success() && self.settings.commit_image {
            let committed = commit_image_with_retry(
                self.backend.as_ref(),
                &sandbox,
                &self.committed_image,
                self.settings.commit_attempts,
                self.settings.commit_delay,
            )
            .await;
            if let Err(e) = committed {
                self.stop_sandbox(&sandbox).await;
                self.fail();
                return Err(e.into());
            }
        }

        self.stop_sandbox(&sandbox).await;
        if result.success() {
            self.transition(HandleState::Built)?;
        } else {
            self.fail();
        }
        Ok(result)
    }

    /// Runs the test command and returns its result with a report attached.
    ///
    /// A timeout is not an error: the result carries the reserved return
    /// code and whatever output was captured. Only sandbox failures are
    /// returned as errors.
    pub async fn run_test(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, TaskError> {
        self.transition(HandleState::Testing)?;
        match self.run_test_inner(command, timeout).await {
            Ok(result) => {
                self.transition(HandleState::Built)?;
                Ok(result)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    async fn run_test_inner(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, TaskError> {
        self.remove_stale_reports().await;

        let image = if self.was_built().await {
            self.committed_image.clone()
        } else {
            self.base_image.clone()
        };
        let sandbox = self.start_sandbox(&image).await?;

        let workdir = self.backend.workdir_in_sandbox(self.workspace.path());
        let prepared = self.profile.prepare_test_command(command, &workdir);
        let outcome = self
            .backend
            .exec(&sandbox, &Self::shell(&prepared), timeout)
            .await;
        self.stop_sandbox(&sandbox).await;

        let mut result = match outcome {
            Ok(output) => ExecutionResult::from_output(prepared, output),
            Err(SandboxError::Timeout {
                seconds,
                stdout,
                stderr,
            }) => {
                tracing::warn!(repo = %self.repo, seconds, "Test command timed out");
                ExecutionResult::timed_out(prepared, stdout, stderr, seconds)
            }
            Err(e) => return Err(e.into()),
        };

        let report = self.collect_report(&result).await;
        tracing::info!(
            repo = %self.repo,
            return_code = result.return_code,
            duration_secs = result.duration_secs,
            total = report.summary.total,
            passed = report.summary.passed,
            status = %report.status,
            "Test run finished"
        );
        result.report = Some(report);
        Ok(result)
    }

    /// Report artifacts first, captured console output second, unknown last.
    async fn collect_report(&self, result: &ExecutionResult) -> TestReport {
        let workdir = self.workspace.path().to_path_buf();
        let profile = self.profile;
        let from_files = tokio::task::spawn_blocking(move || {
            collect_reports(
                &workdir,
                profile.report_globs,
                profile.fallback_report_globs,
                profile.text_dialects,
            )
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Report collection task failed");
            None
        });
        if let Some(report) = from_files {
            return report;
        }

        let console = format!("{}\n{}", result.stdout, result.stderr);
        match try_normalize(console.as_bytes(), profile.text_dialects) {
            Some(report) => report,
            None => {
                tracing::warn!(repo = %self.repo, "No test evidence in reports or output");
                TestReport::unknown()
            }
        }
    }

    async fn remove_stale_reports(&self) {
        let tracked: HashSet<PathBuf> = match self.workspace.tracked_files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::debug!(error = %e, "Tracked file listing unavailable");
                HashSet::new()
            }
        };
        let workdir = self.workspace.path().to_path_buf();
        let profile = self.profile;
        let removal = tokio::task::spawn_blocking(move || {
            let patterns: Vec<&str> = profile
                .report_globs
                .iter()
                .chain(profile.fallback_report_globs)
                .copied()
                .collect();
            remove_stale_artifacts(&workdir, &patterns, |path| tracked.contains(path))
        })
        .await;
        match removal {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to remove stale reports"),
            Err(e) => tracing::warn!(error = %e, "Stale report removal task failed"),
        }
    }

    /// Applies a unified diff to the working tree. A conflict leaves the
    /// handle `FAILED`.
    pub async fn apply_patch(&mut self, diff: &str) -> Result<(), TaskError> {
        self.require_idle("apply_patch")?;
        if let Err(e) = self.workspace.apply_patch(diff).await {
            tracing::error!(repo = %self.repo, error = %e, "Patch does not apply");
            self.fail();
            return Err(e.into());
        }
        Ok(())
    }

    /// Resets the working tree to the checked-out commit.
    pub async fn clean(&mut self) -> Result<(), TaskError> {
        self.require_idle("clean")?;
        if let Err(e) = self.workspace.reset(&self.commit).await {
            self.fail();
            return Err(e.into());
        }
        Ok(())
    }

    /// Removes any sandbox still registered under this handle's name.
    pub async fn shutdown(&mut self) {
        self.backend
            .stop(&self.container_name, !self.settings.keep_containers)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::scripted::{Reply, ScriptedBackend};
    use crate::language::Language;
    use crate::report::ReportStatus;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    fn settings(root: &Path) -> HandleSettings {
        HandleSettings {
            cache_root: root.to_path_buf(),
            commit_delay: Duration::ZERO,
            home: None,
            ..Default::default()
        }
    }

    fn handle(root: &Path, backend: Arc<ScriptedBackend>) -> RepositoryHandle {
        RepositoryHandle::new(
            "owner/proj",
            COMMIT,
            "python:3.11",
            Language::Python.profile(),
            backend,
            settings(root),
        )
    }

    const PYTEST_JSON: &str = r#"{"summary":{"passed":2,"failed":1,"total":3,"collected":3},
        "tests":[{"nodeid":"t.py::a","outcome":"passed"},{"nodeid":"t.py::b","outcome":"passed"},
                 {"nodeid":"t.py::c","outcome":"failed"}]}"#;

    #[test]
    fn test_state_machine() {
        use HandleState::*;
        assert!(Unbuilt.can_become(Building));
        assert!(Building.can_become(Built));
        assert!(Built.can_become(Testing));
        assert!(Testing.can_become(Built));
        assert!(Testing.can_become(Failed));
        assert!(!Unbuilt.can_become(Testing));
        assert!(!Building.can_become(Testing));
        assert!(!Failed.can_become(Building));
        assert!(!Failed.can_become(Failed));
    }

    #[test]
    fn test_workdir_layout() {
        let root = Path::new("/cache");
        let h = handle(root, Arc::new(ScriptedBackend::new(|_, _, _| Reply::ok(""))));
        assert_eq!(
            h.workdir(),
            Path::new("/cache/repos/owner/proj").join(COMMIT)
        );
        assert_eq!(h.committed_image(), "swe-testbed/owner-proj:0123456789ab");
        assert_eq!(h.container_name(), "swe-testbed-owner-proj-0123456789ab");
    }

    #[tokio::test]
    async fn test_build_commits_and_test_uses_image() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(|_, image, cmd| {
            if cmd.starts_with("pytest") {
                assert!(image.starts_with("swe-testbed/"));
                Reply::code(1, "").with_file("report_pytest.json", PYTEST_JSON)
            } else {
                Reply::ok("installed")
            }
        }));
        let mut h = handle(dir.path(), backend.clone());

        let build = h.build("pip install -e .", Duration::from_secs(5)).await.unwrap();
        assert!(build.success());
        assert!(!build.reused_image);
        assert_eq!(h.state(), HandleState::Built);
        assert!(h.was_built().await);

        let test = h.run_test("pytest --json-report --json-report-file=report_pytest.json", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(test.return_code, 1);
        let report = test.report.unwrap();
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(h.state(), HandleState::Built);
        assert_eq!(backend.running(), 0);

        let events = backend.events();
        assert!(events.contains(&"volume:swe-testbed-pip".to_string()));
        assert!(events.iter().any(|e| e.starts_with("commit:swe-testbed/owner-proj")));
    }

    #[tokio::test]
    async fn test_build_reuses_existing_image() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            ScriptedBackend::new(|_, _, _| Reply::Fail("must not run".into()))
                .with_image("swe-testbed/owner-proj:0123456789ab"),
        );
        let mut h = handle(dir.path(), backend.clone());
        let build = h.build("make", Duration::from_secs(5)).await.unwrap();
        assert!(build.reused_image);
        assert_eq!(h.state(), HandleState::Built);
        assert!(backend.events().is_empty());
    }

    #[tokio::test]
    async fn test_build_timeout_stops_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(|_, _, _| Reply::Timeout {
            stdout: "Collecting".into(),
        }));
        let mut h = handle(dir.path(), backend.clone());
        let err = h.build("pip install -e .", Duration::from_secs(3)).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Timeout {
                phase: Phase::Build,
                seconds: 3
            }
        ));
        assert_eq!(h.state(), HandleState::Failed);
        assert_eq!(backend.running(), 0);
        assert_eq!(backend.events().last().map(String::as_str), Some("stop"));

        let again = h.run_test("pytest", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(again, TaskError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_failed_build_is_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(|_, _, _| Reply::code(2, "error")));
        let mut h = handle(dir.path(), backend.clone());
        let build = h.build("make", Duration::from_secs(5)).await.unwrap();
        assert_eq!(build.return_code, 2);
        assert_eq!(h.state(), HandleState::Failed);
        assert!(!backend.events().iter().any(|e| e.starts_with("commit:")));
    }

    #[tokio::test]
    async fn test_commit_failure_is_fatal_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(|_, _, _| Reply::ok("")).failing_commits(5));
        let mut h = handle(dir.path(), backend.clone());
        let err = h.build("make", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Sandbox(SandboxError::CommitFailed { attempts: 3, .. })
        ));
        assert_eq!(backend.running(), 0);
    }

    #[tokio::test]
    async fn test_test_timeout_yields_reserved_code() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(|_, _, cmd| {
            if cmd.starts_with("pytest") {
                Reply::Timeout {
                    stdout: "collected 4 items\n".into(),
                }
            } else {
                Reply::ok("")
            }
        }));
        let mut h = handle(dir.path(), backend.clone());
        h.build("make", Duration::from_secs(5)).await.unwrap();
        let result = h.run_test("pytest", Duration::from_secs(1)).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.return_code, TIMEOUT_RETURN_CODE);
        assert_eq!(result.stderr, TIMEOUT_MESSAGE);
        assert_eq!(result.error_kind.as_deref(), Some("timeout"));
        let report = result.report.unwrap();
        assert!(report.is_unknown());
        assert_eq!(report.summary.collected, 4);
        assert_eq!(h.state(), HandleState::Built);
        assert_eq!(backend.running(), 0);
    }

    #[tokio::test]
    async fn test_console_fallback_and_stale_reports() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(|_, _, cmd| {
            if cmd.starts_with("pytest") {
                Reply::code(0, "===== 5 passed in 0.12s =====")
            } else {
                Reply::ok("")
            }
        }));
        let mut h = handle(dir.path(), backend);
        std::fs::create_dir_all(h.workdir()).unwrap();
        std::fs::write(h.workdir().join("report_pytest.json"), PYTEST_JSON).unwrap();

        h.build("make", Duration::from_secs(5)).await.unwrap();
        let result = h.run_test("pytest", Duration::from_secs(5)).await.unwrap();
        let report = result.report.unwrap();
        assert!(!h.workdir().join("report_pytest.json").exists());
        assert_eq!(report.summary.passed, 5);
        assert_eq!(report.status, ReportStatus::Passed);
    }

    #[tokio::test]
    async fn test_no_evidence_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(|_, _, _| Reply::ok("nothing to see")));
        let mut h = handle(dir.path(), backend);
        h.build("make", Duration::from_secs(5)).await.unwrap();
        let result = h.run_test("pytest", Duration::from_secs(5)).await.unwrap();
        assert!(result.report.unwrap().is_unknown());
    }
}
