//! Host-side git working tree of a task.
//!
//! The tree lives under the cache root and is the same directory the
//! sandbox sees at its working directory, so patching and resetting happen
//! on the host without a running container.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::cache::LOCAL_CACHE_DIR;
use crate::error::GitError;

/// Deadline for local git operations (everything except clone and fetch).
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Clone URL of `repo` (`owner/name`). An empty `base` means GitHub.
pub fn clone_url(base: &str, repo: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        format!("https://github.com/{repo}.git")
    } else {
        format!("{base}/{repo}")
    }
}

/// A git working tree pinned to one commit.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    path: PathBuf,
    network_timeout: Duration,
    local_timeout: Duration,
}

impl GitWorkspace {
    pub fn new(path: impl Into<PathBuf>, network_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            network_timeout,
            local_timeout: DEFAULT_GIT_TIMEOUT,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_cloned(&self) -> bool {
        self.path.join(".git").exists()
    }

    async fn run(
        &self,
        operation: &str,
        args: &[&str],
        stdin: Option<&str>,
        timeout: Duration,
        cwd: &Path,
    ) -> Result<Output, GitError> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(operation, args = ?args, cwd = %cwd.display(), "Running git");
        let mut child = command.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            if !input.ends_with('\n') {
                pipe.write_all(b"\n").await?;
            }
            drop(pipe);
        }

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(GitError::Timeout {
                operation: operation.to_string(),
                seconds: timeout.as_secs(),
            }),
        }
    }

    async fn run_in_tree(
        &self,
        operation: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<Output, GitError> {
        self.run(operation, args, stdin, self.local_timeout, &self.path)
            .await
    }

    /// Clones `url` into the workspace path unless a clone already exists,
    /// then checks out `commit`, fetching once if it is not present.
    pub async fn prepare(&self, url: &str, repo: &str, commit: &str) -> Result<(), GitError> {
        if !self.is_cloned() {
            self.clone_from(url, repo).await?;
        }

        if !self.commit_exists(commit).await? {
            tracing::info!(repo = %repo, commit = %commit, "Commit not in clone, fetching");
            let fetch = self
                .run(
                    "fetch",
                    &["fetch", "--quiet", "--tags", "origin"],
                    None,
                    self.network_timeout,
                    &self.path,
                )
                .await?;
            if !fetch.status.success() {
                tracing::warn!(repo = %repo, stderr = %stderr_of(&fetch), "git fetch failed");
            }
            if !self.commit_exists(commit).await? {
                return Err(GitError::CheckoutFailed {
                    commit: commit.to_string(),
                    reason: "commit does not exist in the repository".to_string(),
                });
            }
        }

        self.checkout(commit).await
    }

    async fn clone_from(&self, url: &str, repo: &str) -> Result<(), GitError> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;
        let target = self.path.to_string_lossy().into_owned();

        tracing::info!(repo = %repo, path = %target, "Cloning repository");
        let result = self
            .run(
                "clone",
                &["clone", "--quiet", url, &target],
                None,
                self.network_timeout,
                parent,
            )
            .await;

        let failure = match result {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => stderr_of(&output),
            Err(e) => e.to_string(),
        };

        // A partial clone would be mistaken for a complete one next time.
        if self.path.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
                tracing::warn!(path = %target, error = %e, "Failed to remove partial clone");
            }
        }
        Err(GitError::CloneFailed {
            repo: repo.to_string(),
            reason: failure,
        })
    }

    /// True when `commit` names a commit object in the clone.
    pub async fn commit_exists(&self, commit: &str) -> Result<bool, GitError> {
        if commit.starts_with('-') {
            return Err(GitError::InvalidInput(format!("invalid commit '{commit}'")));
        }
        let object = format!("{commit}^{{commit}}");
        let output = self
            .run_in_tree("cat-file", &["cat-file", "-e", &object], None)
            .await?;
        Ok(output.status.success())
    }

    pub async fn checkout(&self, commit: &str) -> Result<(), GitError> {
        if commit.starts_with('-') {
            return Err(GitError::InvalidInput(format!("invalid commit '{commit}'")));
        }
        let output = self
            .run_in_tree("checkout", &["checkout", "--quiet", "--force", commit], None)
            .await?;
        if !output.status.success() {
            return Err(GitError::CheckoutFailed {
                commit: commit.to_string(),
                reason: stderr_of(&output),
            });
        }
        Ok(())
    }

    /// Applies a unified diff to the tree. An empty diff is a no-op.
    pub async fn apply_patch(&self, diff: &str) -> Result<(), GitError> {
        if diff.trim().is_empty() {
            return Ok(());
        }
        let output = self
            .run_in_tree(
                "apply",
                &["apply", "--whitespace=nowarn", "--binary", "-"],
                Some(diff),
            )
            .await?;
        if !output.status.success() {
            return Err(GitError::PatchFailed {
                reason: stderr_of(&output),
            });
        }
        Ok(())
    }

    /// Restores the tree to `commit`: tracked files are reset and untracked
    /// files removed. Ignored files (build outputs, installed dependencies)
    /// and the local cache directory survive.
    pub async fn reset(&self, commit: &str) -> Result<(), GitError> {
        if commit.starts_with('-') {
            return Err(GitError::InvalidInput(format!("invalid commit '{commit}'")));
        }
        let reset = self
            .run_in_tree("reset", &["reset", "--quiet", "--hard", commit], None)
            .await?;
        if !reset.status.success() {
            return Err(GitError::ResetFailed(stderr_of(&reset)));
        }
        let clean = self
            .run_in_tree(
                "clean",
                &["clean", "--quiet", "-fd", "-e", LOCAL_CACHE_DIR],
                None,
            )
            .await?;
        if !clean.status.success() {
            return Err(GitError::ResetFailed(stderr_of(&clean)));
        }
        Ok(())
    }

    /// Absolute paths of every tracked file.
    pub async fn tracked_files(&self) -> Result<HashSet<PathBuf>, GitError> {
        let output = self.run_in_tree("ls-files", &["ls-files", "-z"], None).await?;
        if !output.status.success() {
            return Err(GitError::ResetFailed(stderr_of(&output)));
        }
        Ok(output
            .stdout
            .split(|b| *b == 0)
            .filter(|entry| !entry.is_empty())
            .map(|entry| self.path.join(String::from_utf8_lossy(entry).as_ref()))
            .collect())
    }

    /// Short status of the tree, empty when clean.
    pub async fn status(&self) -> Result<String, GitError> {
        let output = self
            .run_in_tree("status", &["status", "--porcelain"], None)
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("git exited with {}", output.status)
    } else {
        stderr
    }
}
