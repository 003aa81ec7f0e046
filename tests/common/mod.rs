//! Shared test utilities for integration and E2E tests.
//!
//! Provides throwaway git repositories (a VMR and source repositories) and a
//! preconfigured `vmr-flow` command.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let Some(fixture) = VmrFixture::new() else { return };
//!     let runtime = fixture.source_repo("runtime", &[("a.txt", "hello")]);
//!     // ... test code
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{git, git_available, SourceRepo, VmrFixture};
}

/// Whether a `git` binary can be run. Tests needing one return early
/// without it.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir` with a fixed identity. Panics on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).expect("Failed to create repository directory");
    git(dir, &["init", "--quiet"]);
    git(dir, &["checkout", "--quiet", "-b", "main"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let path = dir.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directory");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }
}

/// A source repository on branch `main`.
pub struct SourceRepo {
    pub path: PathBuf,
}

impl SourceRepo {
    /// Write `files`, commit them and return the new HEAD.
    pub fn commit(&self, files: &[(&str, &str)], message: &str) -> String {
        write_files(&self.path, files);
        git(&self.path, &["add", "-A"]);
        git(&self.path, &["commit", "--quiet", "-m", message]);
        self.head()
    }

    /// Delete `path`, commit and return the new HEAD.
    #[allow(dead_code)]
    pub fn delete(&self, path: &str, message: &str) -> String {
        git(&self.path, &["rm", "--quiet", path]);
        git(&self.path, &["commit", "--quiet", "-m", message]);
        self.head()
    }

    pub fn head(&self) -> String {
        git(&self.path, &["rev-parse", "HEAD"])
    }

    /// The remote URI to put in a mapping.
    pub fn uri(&self) -> String {
        self.path.display().to_string()
    }
}

/// A VMR git repository plus a scratch directory for clones, both inside
/// one temporary directory.
pub struct VmrFixture {
    temp_dir: assert_fs::TempDir,
}

impl VmrFixture {
    /// An empty VMR with an initial commit, or `None` without git.
    pub fn new() -> Option<Self> {
        if !git_available() {
            eprintln!("git is not available, skipping");
            return None;
        }
        let temp_dir = assert_fs::TempDir::new().expect("Failed to create temp directory");
        let vmr = temp_dir.path().join("vmr");
        init_repo(&vmr);
        write_files(&vmr, &[("README.md", "# VMR\n")]);
        git(&vmr, &["add", "-A"]);
        git(&vmr, &["commit", "--quiet", "-m", "Initial commit"]);
        Some(Self { temp_dir })
    }

    pub fn vmr(&self) -> PathBuf {
        self.temp_dir.path().join("vmr")
    }

    pub fn tmp(&self) -> PathBuf {
        self.temp_dir.path().join("tmp")
    }

    /// A source repository with one commit holding `files`.
    pub fn source_repo(&self, name: &str, files: &[(&str, &str)]) -> SourceRepo {
        let path = self.temp_dir.path().join("repos").join(name);
        init_repo(&path);
        let repo = SourceRepo { path };
        repo.commit(files, "Initial commit");
        repo
    }

    /// Write `src/source-mappings.json` and commit it.
    pub fn with_mappings(&self, json: &str) -> &Self {
        self.temp_dir
            .child("vmr/src/source-mappings.json")
            .write_str(json)
            .expect("Failed to write mappings");
        git(&self.vmr(), &["add", "-A"]);
        git(&self.vmr(), &["commit", "--quiet", "-m", "Add source mappings"]);
        self
    }

    /// Write a file into the VMR work tree without committing it.
    #[allow(dead_code)]
    pub fn write(&self, path: &str, content: &[u8]) {
        self.temp_dir
            .child("vmr")
            .child(path)
            .write_binary(content)
            .expect("Failed to write VMR file");
    }

    #[allow(dead_code)]
    pub fn read(&self, path: &str) -> String {
        std::fs::read_to_string(self.vmr().join(path)).expect("Failed to read VMR file")
    }

    #[allow(dead_code)]
    pub fn head(&self) -> String {
        git(&self.vmr(), &["rev-parse", "HEAD"])
    }

    /// A `vmr-flow` command pointed at this VMR and scratch directory.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("vmr-flow");
        cmd.current_dir(self.vmr())
            .env("NO_COLOR", "1")
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .arg("--vmr")
            .arg(self.vmr())
            .arg("--tmp")
            .arg(self.tmp());
        cmd
    }
}

/// Mappings file with one mapping per `(name, uri, exclude)`.
#[allow(dead_code)]
pub fn mappings_json(mappings: &[(&str, &str, &[&str])]) -> String {
    let entries: Vec<serde_json::Value> = mappings
        .iter()
        .map(|(name, uri, exclude)| {
            serde_json::json!({
                "name": name,
                "defaultRemote": uri,
                "exclude": exclude,
            })
        })
        .collect();
    serde_json::to_string_pretty(&serde_json::json!({ "mappings": entries }))
        .expect("Failed to render mappings")
}
