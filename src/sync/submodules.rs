//! Submodules nested in a synchronized repository.
//!
//! Git records a submodule as a gitlink entry (mode `160000`) in the tree;
//! its remote comes from the repository's `.gitmodules`. Both are combined
//! into manifest submodule records.

use crate::git::TreeEntry;

/// A `[submodule "..."]` section of `.gitmodules`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitModule {
    pub name: String,
    pub path: String,
    pub url: String,
}

/// Parse `.gitmodules` content.
///
/// Sections without both `path` and `url` are skipped.
pub fn parse_gitmodules(content: &str) -> Vec<GitModule> {
    let mut modules = Vec::new();
    let mut current: Option<(String, Option<String>, Option<String>)> = None;

    let mut flush = |section: Option<(String, Option<String>, Option<String>)>| {
        if let Some((name, Some(path), Some(url))) = section {
            modules.push(GitModule { name, path, url });
        }
    };

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            flush(current.take());
            let header = trimmed[1..trimmed.len() - 1].trim();
            current = header
                .strip_prefix("submodule")
                .map(|rest| (rest.trim().trim_matches('"').to_string(), None, None));
        } else if let (Some(section), Some(pos)) = (current.as_mut(), trimmed.find('=')) {
            let key = trimmed[..pos].trim();
            let value = trimmed[pos + 1..].trim().to_string();
            match key {
                "path" => section.1 = Some(value),
                "url" => section.2 = Some(value),
                _ => {}
            }
        }
    }
    flush(current);
    modules
}

/// A submodule found in a repository tree, with its remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmoduleInfo {
    pub path: String,
    pub url: String,
    pub commit: String,
}

/// Join gitlink entries with the `.gitmodules` declarations.
///
/// Gitlinks with no declared URL are dropped.
pub fn resolve_submodules(entries: &[TreeEntry], gitmodules: &str) -> Vec<SubmoduleInfo> {
    let modules = parse_gitmodules(gitmodules);
    entries
        .iter()
        .filter(|e| e.is_submodule())
        .filter_map(|entry| {
            let module = modules.iter().find(|m| m.path == entry.path)?;
            Some(SubmoduleInfo {
                path: entry.path.clone(),
                url: module.url.clone(),
                commit: entry.object.clone(),
            })
        })
        .collect()
}
