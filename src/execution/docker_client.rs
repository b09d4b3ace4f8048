//! Docker backend built on the bollard crate.
//!
//! Every sandbox is a long-lived container idling on `tail -f /dev/null`
//! with the task working tree bound at [`SANDBOX_WORKDIR`]. Commands run
//! through the exec API so one container serves a whole phase.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CommitContainerOptions, CreateImageOptions};
use bollard::models::HostConfig;
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures::StreamExt;

use crate::error::SandboxError;
use crate::execution::container::{split_image_reference, ContainerSpec, SANDBOX_WORKDIR};
use crate::execution::{CommandOutput, SandboxBackend};

/// Docker client wrapper implementing [`SandboxBackend`].
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::DaemonUnavailable` if the socket cannot be
    /// opened. Reachability is only checked by [`DockerClient::ping`].
    pub fn new() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map_err(|e| SandboxError::DaemonUnavailable(format!("Ping failed: {e}")))?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), bollard::errors::Error> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn kill(&self, id: &str) {
        if let Err(e) = self
            .docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
        {
            tracing::debug!(container = %id, error = %e, "Kill after timeout failed");
        }
    }

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        let mut binds = vec![format!(
            "{}:{SANDBOX_WORKDIR}:rw",
            spec.host_workdir.display()
        )];
        binds.extend(spec.binds.iter().cloned());

        let cpu_quota = spec.limits.cpu_quota();
        HostConfig {
            memory: spec.limits.memory_bytes(),
            cpu_period: cpu_quota.map(|_| spec.limits.cpu_period()),
            cpu_quota,
            pids_limit: spec.limits.pids_limit(),
            network_mode: spec.network_mode.clone(),
            shm_size: spec.shm_size,
            binds: Some(binds),
            ..Default::default()
        }
    }
}

fn is_not_found(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl SandboxBackend for DockerClient {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn workdir_in_sandbox(&self, _host_workdir: &Path) -> String {
        SANDBOX_WORKDIR.to_string()
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let start_failed = |reason: String| SandboxError::StartFailed {
            name: spec.name.clone(),
            reason,
        };

        if let Err(e) = self.remove_container(&spec.name).await {
            tracing::debug!(container = %spec.name, error = %e, "Stale container removal failed");
        }

        self.ensure_image(&spec.image).await?;

        let env = spec.env_strings();
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            host_config: Some(Self::host_config(spec)),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| start_failed(format!("Failed to create container: {e}")))?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| start_failed(format!("Failed to start container: {e}")))?;

        tracing::debug!(container = %spec.name, image = %spec.image, "Sandbox started");
        Ok(response.id)
    }

    async fn exec(
        &self,
        sandbox: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        let exec_failed = |reason: String| SandboxError::ExecFailed {
            container: sandbox.to_string(),
            reason,
        };
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        let exec_options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(sandbox, exec_options)
            .await
            .map_err(|e| exec_failed(format!("Failed to create exec: {e}")))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| exec_failed(format!("Failed to start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            loop {
                tokio::select! {
                    chunk = output.next() => match chunk {
                        Some(Ok(LogOutput::StdOut { message }))
                        | Some(Ok(LogOutput::Console { message })) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Some(Ok(LogOutput::StdErr { message })) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(exec_failed(format!("Error reading output: {e}")));
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep_until(deadline) => {
                        tracing::warn!(
                            container = %sandbox,
                            seconds = timeout.as_secs(),
                            "Command deadline exceeded, killing sandbox"
                        );
                        self.kill(sandbox).await;
                        return Err(SandboxError::Timeout {
                            seconds: timeout.as_secs(),
                            stdout,
                            stderr,
                        });
                    }
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| exec_failed(format!("Failed to inspect exec: {e}")))?;

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: exec_info.exit_code.unwrap_or(-1),
            duration: started.elapsed(),
        })
    }

    async fn commit_image(&self, sandbox: &str, image: &str) -> Result<(), SandboxError> {
        let (repo, tag) = split_image_reference(image);
        let options = CommitContainerOptions {
            container: sandbox,
            repo,
            tag,
            pause: true,
            ..Default::default()
        };

        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| SandboxError::ExecFailed {
                container: sandbox.to_string(),
                reason: format!("Failed to commit container: {e}"),
            })?;

        Ok(())
    }

    async fn stop(&self, sandbox: &str, remove: bool) {
        let result = if remove {
            self.remove_container(sandbox).await
        } else {
            match self
                .docker
                .stop_container(sandbox, Some(StopContainerOptions { t: 10 }))
                .await
            {
                Err(e) if !is_not_found(&e) => Err(e),
                _ => Ok(()),
            }
        };
        if let Err(e) = result {
            tracing::warn!(container = %sandbox, error = %e, "Failed to stop sandbox");
        }
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.image_exists(image).await {
            return Ok(());
        }

        tracing::info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| SandboxError::ImagePull {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<(), SandboxError> {
        let options = CreateVolumeOptions {
            name,
            ..Default::default()
        };
        self.docker
            .create_volume(options)
            .await
            .map_err(|e| SandboxError::Volume {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), SandboxError> {
        match self
            .docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(SandboxError::Volume {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::resources::ExecutionLimits;

    #[test]
    fn test_host_config_binds_workdir_first() {
        let spec = ContainerSpec::new("c", "python:3.11", "/cache/repos/o/r/abc")
            .with_binds(vec!["swe-testbed-pip:/root/.cache/pip:rw".to_string()]);
        let host = DockerClient::host_config(&spec);
        assert_eq!(
            host.binds.unwrap(),
            vec![
                "/cache/repos/o/r/abc:/run_dir:rw".to_string(),
                "swe-testbed-pip:/root/.cache/pip:rw".to_string(),
            ]
        );
        assert_eq!(host.memory, None);
        assert_eq!(host.cpu_quota, None);
        assert_eq!(host.cpu_period, None);
        assert_eq!(host.network_mode.as_deref(), Some("bridge"));
    }

    #[test]
    fn test_host_config_limits() {
        let spec = ContainerSpec::new("c", "golang:latest", "/w")
            .with_limits(ExecutionLimits::new(1024, 1.5, 256))
            .with_shm_size(Some(2 << 30));
        let host = DockerClient::host_config(&spec);
        assert_eq!(host.memory, Some(1024 * 1024 * 1024));
        assert_eq!(host.cpu_period, Some(100_000));
        assert_eq!(host.cpu_quota, Some(150_000));
        assert_eq!(host.pids_limit, Some(256));
        assert_eq!(host.shm_size, Some(2 << 30));
    }

    #[test]
    fn test_not_found_detection() {
        let missing = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        };
        assert!(is_not_found(&missing));
        assert!(!is_not_found(&conflict));
    }
}
