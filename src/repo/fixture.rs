//! Scratch git origins for tests that exercise real clones and patches.

use std::path::{Path, PathBuf};
use std::process::Command;

pub(crate) fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A repository at `<base>/<owner>/<name>`, clonable through a handle
/// whose `git_base_url` is `base`.
pub(crate) struct Origin {
    pub base: PathBuf,
    pub repo: String,
    path: PathBuf,
}

impl Origin {
    pub fn init(base: &Path, repo: &str) -> Self {
        let path = base.join(repo);
        std::fs::create_dir_all(&path).unwrap();
        let origin = Self {
            base: base.to_path_buf(),
            repo: repo.to_string(),
            path,
        };
        origin.git(&["init", "-q"]);
        origin
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.path)
            .args([
                "-c",
                "user.name=fixture",
                "-c",
                "user.email=fixture@example.com",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    pub fn write(&self, rel: &str, body: &str) {
        let file = self.path.join(rel);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(file, body).unwrap();
    }

    /// Commits every change and returns the new HEAD.
    pub fn commit(&self, message: &str) -> String {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
        self.git(&["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Unified diff of `edits` against HEAD. The origin is left unchanged.
    pub fn diff(&self, edits: &[(&str, &str)]) -> String {
        for (rel, body) in edits {
            self.write(rel, body);
        }
        self.git(&["add", "-A"]);
        let diff = self.git(&["diff", "--cached"]);
        self.git(&["reset", "-q", "--hard", "HEAD"]);
        diff
    }
}
