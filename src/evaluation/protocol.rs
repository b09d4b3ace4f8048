//! The three-phase protocol and the build probe.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Phase, TaskError};
use crate::execution::{container_name_for, SandboxBackend};
use crate::language::Language;
use crate::repo::{HandleSettings, RepositoryHandle};
use crate::task::{focused_test_command, test_files_in_patch, Task};

use super::outcome::{BuildResult, TaskOutcome, TestPhaseResult, SKIP_NOT_BUILT};
use super::verdict::CorrectnessVerdict;

/// Runs tasks against fresh repository handles.
#[derive(Clone)]
pub struct Evaluator {
    backend: Arc<dyn SandboxBackend>,
    settings: HandleSettings,
    default_language: Language,
    focused: bool,
}

impl Evaluator {
    pub fn new(backend: Arc<dyn SandboxBackend>, settings: HandleSettings) -> Self {
        Self {
            backend,
            settings,
            default_language: Language::Python,
            focused: false,
        }
    }

    /// Language assumed for tasks that do not name one.
    pub fn with_default_language(mut self, language: Language) -> Self {
        self.default_language = language;
        self
    }

    /// Restrict test runs to files touched by the test patch where the
    /// ecosystem allows it.
    pub fn with_focused(mut self, focused: bool) -> Self {
        self.focused = focused;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Stops the sandbox a task's handle would have started. Used when an
    /// evaluation unwound before it could shut its handle down.
    pub async fn release_sandbox(&self, task: &Task) {
        let name = container_name_for(&task.repo, &task.base_commit);
        self.backend
            .stop(&name, !self.settings.keep_containers)
            .await;
    }

    fn handle_for(&self, task: &Task) -> Result<(RepositoryHandle, Language), TaskError> {
        task.validate()?;
        let language = task.language_or(self.default_language)?;
        let profile = language.profile();
        let handle = RepositoryHandle::new(
            task.repo.clone(),
            task.base_commit.clone(),
            task.image_or_default(profile),
            profile,
            self.backend.clone(),
            self.settings.clone(),
        );
        Ok((handle, language))
    }

    fn test_command(&self, task: &Task, language: Language) -> String {
        if self.focused {
            let files = test_files_in_patch(task.test_patch_text());
            if let Some(command) = focused_test_command(language, &files) {
                tracing::debug!(repo = %task.repo, files = files.len(), "Using focused test command");
                return command;
            }
        }
        task.test_command_or_default(language.profile())
    }

    /// Evaluates one task. Never fails: every error is folded into the
    /// returned outcome, and the sandbox is released on every path.
    pub async fn evaluate(&self, task: &Task) -> TaskOutcome {
        let mut outcome = TaskOutcome::pending(task);

        if task.repo_build.is_some_and(|status| status != 1) {
            tracing::info!(task_id = %outcome.task_id, "Skipping task without a successful build probe");
            return outcome.skipped(SKIP_NOT_BUILT);
        }

        let (mut handle, language) = match self.handle_for(task) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(task_id = %outcome.task_id, error = %e, "Invalid task");
                return outcome.errored(&e);
            }
        };

        tracing::info!(task_id = %outcome.task_id, repo = %task.repo, language = %language, "Evaluating task");
        let result = self
            .run_phases(&mut handle, task, language, &mut outcome)
            .await;
        handle.shutdown().await;

        match result {
            Ok(verdict) => {
                tracing::info!(
                    task_id = %outcome.task_id,
                    task_ok = verdict.task_ok,
                    task_perfect = verdict.task_perfect,
                    fail_to_pass = verdict.fail_to_pass.len(),
                    newly_passing = verdict.newly_passing.len(),
                    pass_to_pass = verdict.pass_to_pass.len(),
                    "Task evaluated"
                );
                outcome.evaluated(verdict)
            }
            Err(e) => {
                tracing::error!(task_id = %outcome.task_id, kind = e.kind(), error = %e, "Task failed");
                outcome.errored(&e)
            }
        }
    }

    async fn run_phases(
        &self,
        handle: &mut RepositoryHandle,
        task: &Task,
        language: Language,
        outcome: &mut TaskOutcome,
    ) -> Result<CorrectnessVerdict, TaskError> {
        handle.prepare().await?;

        let build_command = task.build_command_or_default(language.profile());
        let build = BuildResult::from(
            handle
                .build(&build_command, Duration::from_secs(task.timeout_build))
                .await?,
        );
        let build_ok = build.succeeded();
        let return_code = build.return_code();
        outcome.build = Some(build);
        if !build_ok {
            return Err(TaskError::BuildFailed { return_code });
        }

        let test_command = self.test_command(task, language);
        let timeout = Duration::from_secs(task.timeout_test);

        handle.clean().await?;
        let before = handle.run_test(&test_command, timeout).await?;
        outcome.before = Some(TestPhaseResult::new(Phase::Before, before));

        handle.clean().await?;
        handle.apply_patch(task.test_patch_text()).await?;
        let after = TestPhaseResult::new(Phase::After, handle.run_test(&test_command, timeout).await?);
        let after_report = after.report();
        outcome.after = Some(after);

        handle.clean().await?;
        handle.apply_patch(task.test_patch_text()).await?;
        handle.apply_patch(task.patch_text()).await?;
        let gold = TestPhaseResult::new(Phase::Gold, handle.run_test(&test_command, timeout).await?);
        let gold_report = gold.report();
        outcome.gold = Some(gold);

        handle.clean().await?;
        Ok(CorrectnessVerdict::from_reports(&after_report, &gold_report))
    }

    /// Build probe: builds the task and runs its tests once, unpatched.
    ///
    /// `repo_build` is `1` when at least one test passed, `0` when none did
    /// and `-1` when the build or the run failed.
    pub async fn probe(&self, task: &Task) -> TaskOutcome {
        let mut outcome = TaskOutcome::for_probe(task);
        outcome.repo_build = None;

        let (mut handle, language) = match self.handle_for(task) {
            Ok(pair) => pair,
            Err(e) => {
                outcome.repo_build = Some(-1);
                return outcome.errored(&e);
            }
        };

        let result = self
            .run_probe(&mut handle, task, language, &mut outcome)
            .await;
        handle.shutdown().await;

        match result {
            Ok(status) => {
                tracing::info!(task_id = %outcome.task_id, repo_build = status, "Build probe finished");
                outcome.probed(status)
            }
            Err(e) => {
                tracing::warn!(task_id = %outcome.task_id, error = %e, "Build probe failed");
                outcome.repo_build = Some(-1);
                outcome.errored(&e)
            }
        }
    }

    async fn run_probe(
        &self,
        handle: &mut RepositoryHandle,
        task: &Task,
        language: Language,
        outcome: &mut TaskOutcome,
    ) -> Result<i64, TaskError> {
        handle.prepare().await?;
        let build_command = task.build_command_or_default(language.profile());
        let build = BuildResult::from(
            handle
                .build(&build_command, Duration::from_secs(task.timeout_build))
                .await?,
        );
        let build_ok = build.succeeded();
        let return_code = build.return_code();
        outcome.build = Some(build);
        if !build_ok {
            return Err(TaskError::BuildFailed { return_code });
        }

        let test_command = task.test_command_or_default(language.profile());
        let run = handle
            .run_test(&test_command, Duration::from_secs(task.timeout_test))
            .await?;
        let phase = TestPhaseResult::new(Phase::Before, run);
        let passed = phase.report().summary.passed;
        outcome.before = Some(phase);
        Ok(if passed > 0 { 1 } else { 0 })
    }
}
