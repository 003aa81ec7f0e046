//! Read-only scans of the VMR tree.
//!
//! Cloaked files are files a mapping excludes which nevertheless ended up in
//! `src/<mapping>/`. Binary files are anything with a NUL byte near the
//! start, which the VMR only accepts when listed in a baseline.

use crate::error::Result;
use crate::mapping::SourceMappings;
use crate::path::glob_match;
use log::{debug, info};
use rayon::prelude::*;
use std::fs;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Number of leading bytes inspected for a NUL byte, matching git's heuristic.
const BINARY_PROBE_LEN: usize = 8000;

/// Files below `dir`, as `/`-separated paths relative to `root`. `.git`
/// directories are skipped.
fn walk_files(root: &Path, dir: &Path) -> Vec<String> {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect()
}

/// Files under `src/<mapping>/` matching the mapping's exclude patterns,
/// for `only` or for every mapping. Paths are relative to the VMR.
pub fn scan_cloaked_files(vmr_path: &Path, mappings: &SourceMappings, only: Option<&str>) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for mapping in &mappings.mappings {
        if only.is_some_and(|name| !mapping.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        let dir = vmr_path.join(mapping.vmr_dir());
        if !dir.exists() {
            debug!("{} is not synchronized, skipping", mapping.name);
            continue;
        }
        let filter = mapping.filter()?;
        let prefix = format!("{}/", mapping.vmr_dir());
        found.extend(walk_files(vmr_path, &dir).into_iter().filter(|path| {
            path.strip_prefix(&prefix)
                .is_some_and(|relative| filter.is_excluded(relative))
        }));
    }
    found.sort();
    info!("Found {} cloaked file(s)", found.len());
    Ok(found)
}

fn is_binary(path: &Path) -> Result<bool> {
    let mut buffer = Vec::with_capacity(BINARY_PROBE_LEN);
    fs::File::open(path)?
        .take(BINARY_PROBE_LEN as u64)
        .read_to_end(&mut buffer)?;
    Ok(buffer.contains(&0))
}

/// Binary files under `src/` not matched by any pattern in `baseline`.
pub fn scan_binary_files(vmr_path: &Path, baseline: &[String]) -> Result<Vec<String>> {
    let src = vmr_path.join("src");
    if !src.exists() {
        return Ok(Vec::new());
    }
    let files = walk_files(vmr_path, &src);
    let binaries: Vec<Result<Option<String>>> = files
        .into_par_iter()
        .map(|path| {
            if is_binary(&vmr_path.join(&path))? {
                Ok(Some(path))
            } else {
                Ok(None)
            }
        })
        .collect();

    let mut found = Vec::new();
    for binary in binaries {
        let Some(path) = binary? else { continue };
        let mut allowed = false;
        for pattern in baseline {
            if glob_match(pattern, &path)? {
                allowed = true;
                break;
            }
        }
        if !allowed {
            found.push(path);
        }
    }
    found.sort();
    info!("Found {} binary file(s) outside the baseline", found.len());
    Ok(found)
}

/// Read a baseline file: one glob per line, `#` starts a comment.
pub fn read_baseline(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(|l| l.split('#').next().unwrap_or_default().trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mappings() -> SourceMappings {
        SourceMappings::parse(
            r#"{
                "mappings": [
                    { "name": "runtime", "defaultRemote": "https://github.com/dotnet/runtime", "exclude": ["**/*.bin", "docs/**"] },
                    { "name": "sdk", "defaultRemote": "https://github.com/dotnet/sdk" }
                ]
            }"#,
        )
        .unwrap()
    }

    fn write(root: &Path, path: &str, content: &[u8]) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_cloaked_files() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "src/runtime/a.cs", b"a");
        write(temp.path(), "src/runtime/lib/blob.bin", b"a");
        write(temp.path(), "src/runtime/docs/readme.md", b"a");
        write(temp.path(), "src/sdk/blob.bin", b"a");

        let cloaked = scan_cloaked_files(temp.path(), &mappings(), None).unwrap();
        assert_eq!(
            cloaked,
            vec!["src/runtime/docs/readme.md", "src/runtime/lib/blob.bin"]
        );
        assert!(scan_cloaked_files(temp.path(), &mappings(), Some("sdk"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_scan_binary_files_with_baseline() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "src/runtime/a.cs", b"text only");
        write(temp.path(), "src/runtime/img.png", b"\x89PNG\0\0");
        write(temp.path(), "src/sdk/tool.dll", b"MZ\0\0");
        write(temp.path(), "README.md", b"\0 outside src");

        let all = scan_binary_files(temp.path(), &[]).unwrap();
        assert_eq!(all, vec!["src/runtime/img.png", "src/sdk/tool.dll"]);

        let remaining = scan_binary_files(temp.path(), &["src/**/*.png".to_string()]).unwrap();
        assert_eq!(remaining, vec!["src/sdk/tool.dll"]);
    }

    #[test]
    fn test_read_baseline() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("baseline.txt");
        fs::write(&path, "# allowed binaries\nsrc/**/*.png\n\nsrc/sdk/*.dll # tools\n").unwrap();
        assert_eq!(read_baseline(&path).unwrap(), vec!["src/**/*.png", "src/sdk/*.dll"]);
    }
}
