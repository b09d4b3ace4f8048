//! Host-process backend.
//!
//! Commands run directly in the host working tree with no isolation. Images,
//! commits and volumes are no-ops, so every build runs from scratch. Each
//! command gets its own process group so a deadline kills the whole tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::SandboxError;
use crate::execution::container::ContainerSpec;
use crate::execution::{CommandOutput, SandboxBackend};

/// Grace period for output readers after the command has been killed.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct LocalSandbox {
    workdir: PathBuf,
    env: Vec<(String, String)>,
}

/// Runs sandbox commands as host processes.
#[derive(Default)]
pub struct LocalBackend {
    sandboxes: Mutex<HashMap<String, LocalSandbox>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

fn spawn_reader<R>(mut reader: R, buffer: SharedBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.lock().await.extend_from_slice(&chunk[..n]),
            }
        }
    })
}

async fn drain(buffer: &SharedBuffer) -> String {
    String::from_utf8_lossy(&buffer.lock().await).into_owned()
}

/// SIGKILL the group led by `pid`, then the leader itself.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory.
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(pid, error = %std::io::Error::last_os_error(), "Process group kill failed");
    }
    unsafe {
        let _ = libc::kill(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[async_trait]
impl SandboxBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn workdir_in_sandbox(&self, host_workdir: &Path) -> String {
        host_workdir.display().to_string()
    }

    fn supports_mounts(&self) -> bool {
        false
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        tokio::fs::create_dir_all(&spec.host_workdir)
            .await
            .map_err(|e| SandboxError::StartFailed {
                name: spec.name.clone(),
                reason: format!("Failed to create working directory: {e}"),
            })?;

        self.sandboxes.lock().await.insert(
            spec.name.clone(),
            LocalSandbox {
                workdir: spec.host_workdir.clone(),
                env: spec.env.clone(),
            },
        );
        Ok(spec.name.clone())
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

        let state = self
            .sandboxes
            .lock()
            .await
            .get(sandbox)
            .cloned()
            .ok_or_else(|| exec_failed("sandbox is not running".to_string()))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| exec_failed("empty command".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&state.workdir)
            .envs(state.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| exec_failed(format!("Failed to spawn '{program}': {e}")))?;

        let stdout_buf = SharedBuffer::default();
        let stderr_buf = SharedBuffer::default();
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, stdout_buf.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, stderr_buf.clone()));
        }

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| exec_failed(format!("Failed to wait: {e}")))?,
            Err(_) => {
                tracing::warn!(
                    sandbox = %sandbox,
                    seconds = timeout.as_secs(),
                    "Command deadline exceeded, killing process group"
                );
                if let Some(pid) = child.id() {
                    kill_process_group(pid);
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                for reader in readers {
                    let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
                }
                return Err(SandboxError::Timeout {
                    seconds: timeout.as_secs(),
                    stdout: drain(&stdout_buf).await,
                    stderr: drain(&stderr_buf).await,
                });
            }
        };

        for reader in readers {
            let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
        }

        Ok(CommandOutput {
            stdout: drain(&stdout_buf).await,
            stderr: drain(&stderr_buf).await,
            // Signal deaths have no code.
            exit_code: status.code().map(i64::from).unwrap_or(-1),
            duration: started.elapsed(),
        })
    }

    async fn commit_image(&self, _sandbox: &str, _image: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn stop(&self, sandbox: &str, _remove: bool) {
        self.sandboxes.lock().await.remove(sandbox);
    }

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

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["bash".to_string(), "-c".to_string(), script.to_string()]
    }

    async fn started(dir: &Path) -> (LocalBackend, String) {
        let backend = LocalBackend::new();
        let spec = ContainerSpec::new("local-test", "unused", dir).with_env([("GREETING", "hi")]);
        let id = backend.start(&spec).await.unwrap();
        (backend, id)
    }

    #[tokio::test]
    async fn test_exec_captures_output_and_code() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, id) = started(dir.path()).await;

        let out = backend
            .exec(&id, &sh("echo $GREETING; echo oops >&2; pwd; exit 3"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.stdout.starts_with("hi\n"));
        let pwd = out.stdout.lines().nth(1).unwrap();
        assert_eq!(
            Path::new(pwd).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert_eq!(out.stderr, "oops\n");
        backend.stop(&id, true).await;
    }

    #[tokio::test]
    async fn test_exec_timeout_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, id) = started(dir.path()).await;

        let started_at = Instant::now();
        let err = backend
            .exec(&id, &sh("echo before; sleep 30 & sleep 30; echo after"), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(started_at.elapsed() < Duration::from_secs(10));
        match err {
            SandboxError::Timeout { stdout, .. } => {
                assert!(stdout.contains("before"));
                assert!(!stdout.contains("after"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exec_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, id) = started(dir.path()).await;

        let err = backend
            .exec(
                &id,
                &sh("(sleep 2; echo late > late.txt) & sleep 30"),
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!dir.path().join("late.txt").exists());
        backend.stop(&id, true).await;
    }

    #[tokio::test]
    async fn test_exec_after_stop_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, id) = started(dir.path()).await;
        backend.stop(&id, true).await;
        let err = backend
            .exec(&id, &sh("true"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ExecFailed { .. }));
        assert!(!backend.image_exists("anything").await);
    }
}
