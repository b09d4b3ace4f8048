//! In-memory backend for unit tests: commands are answered by a closure
//! that sees the host working tree, so it can inspect applied patches and
//! drop report files like a real test runner would.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SandboxError;
use crate::execution::container::ContainerSpec;
use crate::execution::{CommandOutput, SandboxBackend};

/// Scripted answer to one exec call.
pub enum Reply {
    Exit {
        code: i64,
        stdout: String,
        stderr: String,
        /// Files written relative to the working tree before returning.
        files: Vec<(String, String)>,
    },
    Timeout {
        stdout: String,
    },
    Fail(String),
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Self::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            files: Vec::new(),
        }
    }

    pub fn code(code: i64, stdout: &str) -> Self {
        Self::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: &str, body: &str) -> Self {
        if let Self::Exit { files, .. } = &mut self {
            files.push((path.to_string(), body.to_string()));
        }
        self
    }
}

type Responder = Box<dyn Fn(&Path, &str, &str) -> Reply + Send + Sync>;

/// Backend answering exec calls through a closure
/// `(host workdir, image, shell command) -> Reply`.
pub struct ScriptedBackend {
    responder: Responder,
    images: Mutex<HashSet<String>>,
    running: Mutex<HashMap<String, (PathBuf, String)>>,
    events: Mutex<Vec<String>>,
    commit_failures: Mutex<u32>,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Path, &str, &str) -> Reply + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            images: Mutex::new(HashSet::new()),
            running: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            commit_failures: Mutex::new(0),
        }
    }

    pub fn with_image(self, image: &str) -> Self {
        self.images.lock().unwrap().insert(image.to_string());
        self
    }

    pub fn failing_commits(self, count: u32) -> Self {
        *self.commit_failures.lock().unwrap() = count;
        self
    }

    /// Calls received so far, e.g. `start:<image>`, `exec:<cmd>`, `stop`.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn running(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl SandboxBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn workdir_in_sandbox(&self, _host_workdir: &Path) -> String {
        "/run_dir".to_string()
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        self.record(format!("start:{}", spec.image));
        self.running.lock().unwrap().insert(
            spec.name.clone(),
            (spec.host_workdir.clone(), spec.image.clone()),
        );
        Ok(spec.name.clone())
    }

    async fn exec(
        &self,
        sandbox: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        let command = argv.last().cloned().unwrap_or_default();
        self.record(format!("exec:{command}"));
        let (workdir, image) = self
            .running
            .lock()
            .unwrap()
            .get(sandbox)
            .cloned()
            .ok_or_else(|| SandboxError::ExecFailed {
                container: sandbox.to_string(),
                reason: "not running".to_string(),
            })?;

        match (self.responder)(&workdir, &image, &command) {
            Reply::Exit {
                code,
                stdout,
                stderr,
                files,
            } => {
                for (rel, body) in files {
                    let path = workdir.join(rel);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, body)?;
                }
                Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code: code,
                    duration: Duration::from_millis(5),
                })
            }
            Reply::Timeout { stdout } => Err(SandboxError::Timeout {
                seconds: timeout.as_secs(),
                stdout,
                stderr: String::new(),
            }),
            Reply::Fail(reason) => Err(SandboxError::ExecFailed {
                container: sandbox.to_string(),
                reason,
            }),
        }
    }

    async fn commit_image(&self, sandbox: &str, image: &str) -> Result<(), SandboxError> {
        self.record(format!("commit:{image}"));
        let mut failures = self.commit_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(SandboxError::ExecFailed {
                container: sandbox.to_string(),
                reason: "tag in use".to_string(),
            });
        }
        self.images.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn stop(&self, sandbox: &str, _remove: bool) {
        self.record("stop".to_string());
        self.running.lock().unwrap().remove(sandbox);
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.images.lock().unwrap().contains(image)
    }

    async fn ensure_image(&self, _image: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<(), SandboxError> {
        self.record(format!("volume:{name}"));
        Ok(())
    }

    async fn remove_volume(&self, _name: &str) -> Result<(), SandboxError> {
        Ok(())
    }
}
