//! Sandbox execution layer.
//!
//! A [`SandboxBackend`] starts isolated environments, runs commands in them
//! with a deadline, and optionally snapshots them as images. Two backends
//! exist:
//!
//! - [`DockerClient`] talks to the Docker daemon through bollard.
//! - [`LocalBackend`] runs commands as host processes in the working tree.
//!   It has no isolation and is meant for tests and trusted local runs.
//!
//! # Lifecycle
//!
//! ```text
//! start(spec) → exec(...)* → [commit_image] → stop(remove)
//! ```
//!
//! The caller always calls `stop`, including after a timed-out `exec`.

pub mod container;
pub mod docker_client;
pub mod local;
pub mod resources;
#[cfg(test)]
pub(crate) mod scripted;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SandboxError;

pub use container::{
    container_name_for, image_name_for, ContainerSpec, SANDBOX_WORKDIR,
};
pub use docker_client::DockerClient;
pub use local::LocalBackend;
pub use resources::ExecutionLimits;

/// Default number of commit attempts.
pub const DEFAULT_COMMIT_ATTEMPTS: u32 = 3;

/// Default pause between commit attempts.
pub const DEFAULT_COMMIT_DELAY: Duration = Duration::from_secs(10);

/// Output of one command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An isolated environment provider.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Short identifier used in logs and CLI flags.
    fn name(&self) -> &'static str;

    /// Path at which `host_workdir` is visible to commands in the sandbox.
    fn workdir_in_sandbox(&self, host_workdir: &Path) -> String;

    /// Whether cache mounts reach the sandbox. Backends without mounts get
    /// an empty cache plan.
    fn supports_mounts(&self) -> bool {
        true
    }

    /// Starts a sandbox, replacing any stale one with the same name.
    /// Returns the sandbox identifier used by the other calls.
    async fn start(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    /// Runs `argv` in the sandbox working directory.
    ///
    /// On deadline expiry every process started by the command is killed
    /// and [`SandboxError::Timeout`] carries the output captured so far.
    async fn exec(
        &self,
        sandbox: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError>;

    /// Snapshots the sandbox filesystem as `image`.
    async fn commit_image(&self, sandbox: &str, image: &str) -> Result<(), SandboxError>;

    /// Stops the sandbox, removing it when `remove` is set. Best-effort.
    async fn stop(&self, sandbox: &str, remove: bool);

    async fn image_exists(&self, image: &str) -> bool;

    /// Pulls `image` when it is not available locally.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError>;

    /// Creates a named volume. Creating an existing volume succeeds.
    async fn create_volume(&self, name: &str) -> Result<(), SandboxError>;

    /// Removes a named volume. Removing a missing volume succeeds.
    async fn remove_volume(&self, name: &str) -> Result<(), SandboxError>;
}

/// Commits `sandbox` as `image`, retrying transient failures.
pub async fn commit_image_with_retry(
    backend: &dyn SandboxBackend,
    sandbox: &str,
    image: &str,
    attempts: u32,
    delay: Duration,
) -> Result<(), SandboxError> {
    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match backend.commit_image(sandbox, image).await {
            Ok(()) => {
                tracing::info!(image = %image, attempt, "Committed sandbox image");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    image = %image,
                    attempt,
                    attempts,
                    error = %e,
                    "Image commit failed"
                );
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(SandboxError::CommitFailed {
        image: image.to_string(),
        attempts,
        reason: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend whose commits fail a fixed number of times.
    struct FlakyCommit {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SandboxBackend for FlakyCommit {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn workdir_in_sandbox(&self, host_workdir: &Path) -> String {
            host_workdir.display().to_string()
        }

        async fn start(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
            Ok(spec.name.clone())
        }

        async fn exec(
            &self,
            _sandbox: &str,
            _argv: &[String],
            _timeout: Duration,
        ) -> Result<CommandOutput, SandboxError> {
            Ok(CommandOutput::default())
        }

        async fn commit_image(&self, sandbox: &str, _image: &str) -> Result<(), SandboxError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(SandboxError::ExecFailed {
                    container: sandbox.to_string(),
                    reason: format!("daemon busy ({call})"),
                })
            } else {
                Ok(())
            }
        }

        async fn stop(&self, _sandbox: &str, _remove: bool) {}

        async fn image_exists(&self, _image: &str) -> bool {
            false
        }

        async fn ensure_image(&self, _image: &str) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn create_volume(&self, _name: &str) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn remove_volume(&self, _name: &str) -> Result<(), SandboxError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commit_retry_recovers() {
        let backend = FlakyCommit {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        commit_image_with_retry(&backend, "c", "img:1", 3, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_commit_retry_gives_up() {
        let backend = FlakyCommit {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let err = commit_image_with_retry(&backend, "c", "img:1", 3, Duration::ZERO)
            .await
            .unwrap_err();
        match err {
            SandboxError::CommitFailed {
                image,
                attempts,
                reason,
            } => {
                assert_eq!(image, "img:1");
                assert_eq!(attempts, 3);
                assert!(reason.contains("daemon busy (3)"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }
}
