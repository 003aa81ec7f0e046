//! In-memory file trees used to compare a repository with its VMR copy.
//!
//! Paths are stored relative to the tree root with `/` separators so trees
//! loaded from disk and trees read out of git objects compare equal.

use crate::error::{Error, Result};
use crate::path::FileFilter;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Represents a file with content and mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// File content as bytes
    pub content: Vec<u8>,
    pub executable: bool,
}

impl File {
    /// Create a new file with content
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            executable: false,
        }
    }

    /// Create a new file from string content
    pub fn from_string(content: &str) -> Self {
        Self::new(content.as_bytes().to_vec())
    }

    /// Get file size in bytes
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// In-memory file tree, ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFS {
    files: BTreeMap<String, File>,
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}

impl MemoryFS {
    /// Create a new empty filesystem
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every file below `root`, skipping `.git`.
    ///
    /// A missing `root` yields an empty tree.
    pub fn load_dir(root: &Path) -> Result<Self> {
        let mut fs = MemoryFS::new();
        if !root.exists() {
            return Ok(fs);
        }

        for entry in walkdir::WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git")
        {
            let entry = entry.map_err(|e| Error::Filesystem {
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| Error::Filesystem {
                    message: format!(
                        "Failed to make path relative: {}",
                        entry.path().display()
                    ),
                })?;
            let mut file = File::new(fs::read(entry.path())?);
            file.executable = is_executable(&entry.metadata().map_err(|e| Error::Filesystem {
                message: e.to_string(),
            })?);
            fs.add_file(&relative.to_string_lossy(), file);
        }
        Ok(fs)
    }

    /// Add or update a file
    pub fn add_file(&mut self, path: &str, file: File) {
        self.files.insert(normalize(path), file);
    }

    /// Add a file with string content
    pub fn add_file_string(&mut self, path: &str, content: &str) {
        self.add_file(path, File::from_string(content));
    }

    /// Get a file by path
    pub fn get_file(&self, path: &str) -> Option<&File> {
        self.files.get(&normalize(path))
    }

    /// Remove a file
    pub fn remove_file(&mut self, path: &str) -> Option<File> {
        self.files.remove(&normalize(path))
    }

    /// Check if a file exists
    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }

    /// Get the number of files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if filesystem is empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// List all files
    pub fn list_files(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    /// Iterate over all files as (path, file) pairs
    pub fn files(&self) -> impl Iterator<Item = (&String, &File)> {
        self.files.iter()
    }

    /// Keep only the files the filter accepts.
    pub fn filtered(&self, filter: &FileFilter) -> MemoryFS {
        MemoryFS {
            files: self
                .files
                .iter()
                .filter(|(path, _)| filter.matches(path))
                .map(|(p, f)| (p.clone(), f.clone()))
                .collect(),
        }
    }

    /// Files below `prefix`, re-rooted at it.
    pub fn subtree(&self, prefix: &str) -> MemoryFS {
        let prefix = format!("{}/", normalize(prefix).trim_end_matches('/'));
        MemoryFS {
            files: self
                .files
                .iter()
                .filter_map(|(p, f)| p.strip_prefix(&prefix).map(|rest| (rest.to_string(), f.clone())))
                .collect(),
        }
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_remove() {
        let mut fs = MemoryFS::new();
        fs.add_file_string("./src\\main.rs", "fn main() {}");
        assert!(fs.exists("src/main.rs"));
        assert_eq!(fs.get_file("src/main.rs").unwrap().size(), 12);
        assert!(fs.remove_file("src/main.rs").is_some());
        assert!(fs.is_empty());
    }

    #[test]
    fn test_load_dir_skips_git() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join(".git/objects")).unwrap();
        fs::write(temp.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/lib.rs"), "pub fn f() {}").unwrap();
        fs::write(temp.path().join(".gitignore"), "target").unwrap();

        let loaded = MemoryFS::load_dir(temp.path()).unwrap();
        assert_eq!(loaded.list_files(), vec![".gitignore", "src/lib.rs"]);
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        assert!(MemoryFS::load_dir(&temp.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_filtered_and_subtree() {
        let mut fs = MemoryFS::new();
        fs.add_file_string("src/runtime/a.txt", "a");
        fs.add_file_string("src/runtime/b.bin", "b");
        fs.add_file_string("src/runtime-extra/c.txt", "c");

        let runtime = fs.subtree("src/runtime");
        assert_eq!(runtime.list_files(), vec!["a.txt", "b.bin"]);

        let filter = FileFilter::new::<&str>(&[], &["*.bin"]).unwrap();
        assert_eq!(runtime.filtered(&filter).list_files(), vec!["a.txt"]);
    }
}
