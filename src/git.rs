//! Git subprocess helpers.
//!
//! Everything here shells out to the system `git`, which picks up SSH keys,
//! credential helpers and whatever else is configured in `~/.gitconfig`.
//! Trees are read straight from git objects (`ls-tree` + `cat-file`) so a
//! revision can be inspected without checking it out.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::filesystem::{File, MemoryFS};
use log::{debug, trace};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Run `git` in `dir` and return its stdout.
pub fn run(dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
    trace!("git {} (in {})", args.join(" "), dir.display());
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .map_err(|e| Error::GitCommand {
            command: args.join(" "),
            url: dir.display().to_string(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::GitCommand {
            command: args.join(" "),
            url: dir.display().to_string(),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

fn run_text(dir: &Path, args: &[&str]) -> Result<String> {
    Ok(String::from_utf8_lossy(&run(dir, args)?).trim().to_string())
}

/// Clone `url` into `target_dir` without checking out a work tree.
pub fn clone_no_checkout(url: &str, target_dir: &Path) -> Result<()> {
    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent)?;
    }

    let output = Command::new("git")
        .args(["clone", "--no-checkout", "--quiet", url])
        .arg(target_dir)
        .output()
        .map_err(|e| Error::GitClone {
            url: url.to_string(),
            r#ref: "HEAD".to_string(),
            message: e.to_string(),
            hint: None,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let hint = if stderr.contains("Authentication failed")
            || stderr.contains("Permission denied")
            || stderr.contains("Could not read from remote repository")
        {
            Some("make sure your SSH key or git credentials grant access to this repository".to_string())
        } else {
            None
        };
        return Err(Error::GitClone {
            url: url.to_string(),
            r#ref: "HEAD".to_string(),
            message: stderr.trim().to_string(),
            hint,
        });
    }
    Ok(())
}

/// Create an empty bare repository at `path`.
pub fn init_bare(path: &Path) -> Result<LocalGitRepo> {
    fs::create_dir_all(path)?;
    run(path, &["init", "--bare", "--quiet"])?;
    Ok(LocalGitRepo::new(path))
}

/// One entry of `git ls-tree -r`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: String,
    pub object: String,
    pub path: String,
}

impl TreeEntry {
    pub fn is_submodule(&self) -> bool {
        self.kind == "commit"
    }
}

fn parse_ls_tree(output: &[u8]) -> Vec<TreeEntry> {
    output
        .split(|b| *b == 0)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let record = String::from_utf8_lossy(record);
            let (meta, path) = record.split_once('\t')?;
            let mut parts = meta.split_whitespace();
            Some(TreeEntry {
                mode: parts.next()?.to_string(),
                kind: parts.next()?.to_string(),
                object: parts.next()?.to_string(),
                path: path.to_string(),
            })
        })
        .collect()
}

/// A local git repository (work tree or bare clone).
#[derive(Debug, Clone)]
pub struct LocalGitRepo {
    path: PathBuf,
    cancel: CancellationToken,
}

impl LocalGitRepo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `path` is inside a git repository.
    pub fn is_repository(path: &Path) -> bool {
        path.exists() && run(path, &["rev-parse", "--git-dir"]).is_ok()
    }

    /// Top-level directory of the work tree containing `path`.
    pub fn find_root(path: &Path) -> Result<PathBuf> {
        Ok(PathBuf::from(run_text(path, &["rev-parse", "--show-toplevel"])?))
    }

    fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        self.cancel.check(&format!("git {}", args.first().unwrap_or(&"")))?;
        run(&self.path, args)
    }

    fn git_text(&self, args: &[&str]) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.git(args)?).trim().to_string())
    }

    /// Resolve a revision to a full commit SHA.
    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        self.git_text(&["rev-parse", "--verify", "--quiet", &format!("{}^{{commit}}", rev)])
    }

    pub fn head_sha(&self) -> Result<String> {
        self.rev_parse("HEAD")
    }

    pub fn current_branch(&self) -> Result<String> {
        self.git_text(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn commit_exists(&self, sha: &str) -> bool {
        self.git(&["cat-file", "-e", &format!("{}^{{commit}}", sha)])
            .is_ok()
    }

    /// Parent of `sha`, or `None` for a root commit.
    pub fn parent_of(&self, sha: &str) -> Result<Option<String>> {
        match self.rev_parse(&format!("{}^", sha)) {
            Ok(parent) => Ok(Some(parent)),
            Err(_) if self.commit_exists(sha) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Add `url` as a remote (if needed) and fetch it. Returns the remote name.
    pub fn fetch(&self, url: &str) -> Result<String> {
        let name = crate::path::encode_url_path(url);
        let existing = self.git_text(&["remote"])?;
        if !existing.lines().any(|r| r == name) {
            self.git(&["remote", "add", &name, url])?;
        }
        debug!("Fetching {} into {}", url, self.path.display());
        self.git(&["fetch", "--quiet", "--tags", "--force", &name])?;
        Ok(name)
    }

    /// Fetch a single commit from `url`. Succeeds only if the remote serves it.
    pub fn fetch_commit(&self, url: &str, sha: &str) -> Result<()> {
        self.git(&["fetch", "--quiet", "--no-tags", url, sha])?;
        Ok(())
    }

    /// All entries of the tree at `rev`, optionally restricted to `prefix`.
    pub fn list_tree(&self, rev: &str, prefix: Option<&str>) -> Result<Vec<TreeEntry>> {
        let mut args = vec!["ls-tree", "-r", "-z", "--full-tree", rev];
        if let Some(prefix) = prefix {
            args.push("--");
            args.push(prefix);
        }
        Ok(parse_ls_tree(&self.git(&args)?))
    }

    /// Read the files of `rev` (below `prefix`, re-rooted at it) into memory.
    pub fn load_tree(&self, rev: &str, prefix: Option<&str>) -> Result<MemoryFS> {
        let entries = self.list_tree(rev, prefix)?;
        let strip = prefix.map(|p| format!("{}/", p.trim_end_matches('/')));

        let files: Vec<(String, File)> = entries
            .par_iter()
            .filter(|e| e.kind == "blob")
            .map(|entry| {
                let content = self.git(&["cat-file", "blob", &entry.object])?;
                let path = match &strip {
                    Some(strip) => entry
                        .path
                        .strip_prefix(strip.as_str())
                        .unwrap_or(&entry.path)
                        .to_string(),
                    None => entry.path.clone(),
                };
                Ok((
                    path,
                    File {
                        content,
                        executable: entry.mode == "100755",
                    },
                ))
            })
            .collect::<Result<_>>()?;

        let mut fs = MemoryFS::new();
        for (path, file) in files {
            fs.add_file(&path, file);
        }
        Ok(fs)
    }

    /// Content of `path` at `rev`, or `None` if it does not exist there.
    pub fn show_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        match self.git(&["show", &format!("{}:{}", rev, path)]) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            Err(Error::GitCommand { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stage everything below `paths`, including deletions.
    pub fn stage(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "-A", "--"];
        args.extend_from_slice(paths);
        self.git(&args)?;
        Ok(())
    }

    /// Whether the index differs from HEAD.
    pub fn has_staged_changes(&self) -> Result<bool> {
        match self.git(&["diff", "--cached", "--quiet"]) {
            Ok(_) => Ok(false),
            Err(Error::GitCommand { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Commit the index. Returns the new HEAD.
    pub fn commit(&self, message: &str, allow_empty: bool) -> Result<String> {
        let mut args = vec!["commit", "--quiet", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.git(&args)?;
        self.head_sha()
    }

    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        self.git(&["checkout", "--quiet", "-B", branch])?;
        Ok(())
    }

    /// Switch to an existing local branch. Returns false when there is none.
    pub fn checkout_existing(&self, branch: &str) -> Result<bool> {
        if !self.commit_exists(&format!("refs/heads/{}", branch)) {
            return Ok(false);
        }
        self.git(&["checkout", "--quiet", branch])?;
        Ok(true)
    }

    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.git(&["push", "--quiet", remote, &format!("HEAD:refs/heads/{}", branch)])?;
        Ok(())
    }

    pub fn remote_url(&self, remote: &str) -> Result<String> {
        self.git_text(&["remote", "get-url", remote])
    }

    /// Conventional subject line of `sha`.
    pub fn commit_subject(&self, sha: &str) -> Result<String> {
        self.git_text(&["log", "-1", "--format=%s", sha])
    }
}
