//! Aggregated third-party notices of the VMR.

use crate::error::Result;
use crate::mapping::SourceMappings;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

pub const NOTICES_FILE: &str = "THIRD-PARTY-NOTICES.txt";

const NOTICES_PREFIX: &str = "THIRD-PARTY-NOTICES";
const SEPARATOR_WIDTH: usize = 45;

/// Notice files at the root of `src/<mapping>/` for every mapping, sorted by
/// path, paired with the mapping name.
fn find_notices(vmr_path: &Path, mappings: &SourceMappings) -> Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    for mapping in &mappings.mappings {
        let dir = vmr_path.join(mapping.vmr_dir());
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_file() && name.to_uppercase().starts_with(NOTICES_PREFIX) {
                found.push((mapping.name.clone(), entry.path()));
            }
        }
    }
    found.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(found)
}

fn section(repo: &str, content: &str) -> String {
    let rule = "#".repeat(SEPARATOR_WIDTH);
    let mut out = format!("\n{rule}\n### {repo}\n{rule}\n\n{}", content.trim_end());
    out.push('\n');
    out
}

/// Render the aggregated notices: the template header (if the mappings
/// declare one) followed by one section per notice file.
pub fn render_tpn(vmr_path: &Path, mappings: &SourceMappings) -> Result<String> {
    let mut out = match &mappings.third_party_notices_template_path {
        Some(template) => fs::read_to_string(vmr_path.join(template))?,
        None => String::new(),
    };
    for (repo, path) in find_notices(vmr_path, mappings)? {
        debug!("Adding notices from {}", path.display());
        out.push_str(&section(&repo, &String::from_utf8_lossy(&fs::read(&path)?)));
    }
    Ok(out)
}

/// Write `THIRD-PARTY-NOTICES.txt` at the root of the VMR.
pub fn generate_tpn(vmr_path: &Path, mappings: &SourceMappings) -> Result<PathBuf> {
    let path = vmr_path.join(NOTICES_FILE);
    fs::write(&path, render_tpn(vmr_path, mappings)?)?;
    info!("Generated {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_tpn() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/runtime/sub")).unwrap();
        fs::create_dir_all(root.join("src/aspnetcore")).unwrap();
        fs::create_dir_all(root.join("eng")).unwrap();
        fs::write(root.join("eng/THIRD-PARTY-NOTICES.template.txt"), "HEADER\n").unwrap();
        fs::write(root.join("src/runtime/THIRD-PARTY-NOTICES.TXT"), "runtime notices\n").unwrap();
        fs::write(root.join("src/runtime/sub/THIRD-PARTY-NOTICES.txt"), "nested").unwrap();
        fs::write(root.join("src/aspnetcore/THIRD-PARTY-NOTICES.txt"), "aspnet notices").unwrap();

        let mappings = SourceMappings::parse(
            r#"{
                "thirdPartyNoticesTemplatePath": "eng/THIRD-PARTY-NOTICES.template.txt",
                "mappings": [
                    { "name": "runtime", "defaultRemote": "https://github.com/dotnet/runtime" },
                    { "name": "aspnetcore", "defaultRemote": "https://github.com/dotnet/aspnetcore" }
                ]
            }"#,
        )
        .unwrap();

        let rule = "#".repeat(45);
        let text = render_tpn(root, &mappings).unwrap();
        assert_eq!(
            text,
            format!(
                "HEADER\n\n{rule}\n### aspnetcore\n{rule}\n\naspnet notices\n\n{rule}\n### runtime\n{rule}\n\nruntime notices\n"
            )
        );
        assert!(!text.contains("nested"));

        let path = generate_tpn(root, &mappings).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), text);
    }
}
