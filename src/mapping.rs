//! # Source Mappings
//!
//! `src/source-mappings.json` declares which repositories the VMR contains
//! and which of their files are synchronized. A `defaults` block supplies a
//! default ref and include/exclude patterns that are prepended to every
//! mapping's own patterns unless the mapping sets `ignoreDefaults`.

use crate::error::{Error, Result};
use crate::path::{normalize_remote, FileFilter, DEFAULT_INCLUDE};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const RELATIVE_PATH: &str = "src/source-mappings.json";

/// A resolved mapping of one repository into `src/<name>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMapping {
    pub name: String,
    pub default_remote: String,
    pub default_ref: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub disable_synchronization: bool,
    pub version: Option<String>,
}

impl SourceMapping {
    /// Filter selecting the mapping's synchronized files.
    pub fn filter(&self) -> Result<FileFilter> {
        FileFilter::new(&self.include, &self.exclude)
    }

    /// Directory of the mapping inside the VMR, relative to its root.
    pub fn vmr_dir(&self) -> String {
        format!("src/{}", self.name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingDefaults {
    default_ref: Option<String>,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingEntry {
    name: Option<String>,
    default_remote: Option<String>,
    default_ref: Option<String>,
    version: Option<String>,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    disable_synchronization: bool,
    #[serde(default)]
    ignore_defaults: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingsFile {
    #[serde(default)]
    defaults: MappingDefaults,
    #[serde(default)]
    mappings: Vec<MappingEntry>,
    third_party_notices_template_path: Option<String>,
}

/// All mappings of a VMR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMappings {
    pub mappings: Vec<SourceMapping>,
    pub third_party_notices_template_path: Option<String>,
}

impl SourceMappings {
    pub fn parse(json: &str) -> Result<Self> {
        let file: Option<MappingsFile> =
            serde_json::from_str(json).map_err(|e| Error::ConfigParse {
                message: format!("invalid source mappings: {}", e),
                hint: None,
            })?;
        let file = file.ok_or_else(|| Error::ConfigParse {
            message: "source mappings file is empty".to_string(),
            hint: Some(format!("{} must contain a JSON object", RELATIVE_PATH)),
        })?;

        let defaults = file.defaults;
        let default_ref = defaults
            .default_ref
            .clone()
            .unwrap_or_else(|| "main".to_string());

        let mut mappings = Vec::with_capacity(file.mappings.len());
        for (index, entry) in file.mappings.into_iter().enumerate() {
            let name = entry.name.ok_or_else(|| Error::ConfigParse {
                message: format!("mapping #{} has no name", index),
                hint: None,
            })?;
            let default_remote = entry.default_remote.ok_or_else(|| Error::ConfigParse {
                message: format!("mapping '{}' has no defaultRemote", name),
                hint: None,
            })?;

            let (mut include, mut exclude) = if entry.ignore_defaults {
                (Vec::new(), Vec::new())
            } else {
                (defaults.include.clone(), defaults.exclude.clone())
            };
            include.extend(entry.include);
            exclude.extend(entry.exclude);
            if include.is_empty() {
                include.push(DEFAULT_INCLUDE.to_string());
            }

            mappings.push(SourceMapping {
                name,
                default_remote,
                default_ref: entry.default_ref.unwrap_or_else(|| default_ref.clone()),
                include,
                exclude,
                disable_synchronization: entry.disable_synchronization,
                version: entry.version,
            });
        }

        let mut seen = std::collections::BTreeSet::new();
        for mapping in &mappings {
            if !seen.insert(mapping.name.to_lowercase()) {
                return Err(Error::ConfigParse {
                    message: format!("mapping '{}' is declared twice", mapping.name),
                    hint: None,
                });
            }
        }

        Ok(Self {
            mappings,
            third_party_notices_template_path: file.third_party_notices_template_path,
        })
    }

    /// Read the mappings of the VMR rooted at `vmr_path`.
    pub fn load(vmr_path: &Path) -> Result<Self> {
        let path = vmr_path.join(RELATIVE_PATH);
        let text = fs::read_to_string(&path).map_err(|e| Error::ConfigParse {
            message: format!("cannot read {}: {}", path.display(), e),
            hint: Some("is this the root of a VMR?".to_string()),
        })?;
        Self::parse(&text)
    }

    pub fn get(&self, name: &str) -> Result<&SourceMapping> {
        self.mappings
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Mapping {
                name: name.to_string(),
                message: "no such mapping".to_string(),
            })
    }

    /// Mapping whose default remote is `uri`, ignoring a trailing `.git`.
    pub fn find_by_remote(&self, uri: &str) -> Option<&SourceMapping> {
        let wanted = normalize_remote(uri);
        self.mappings
            .iter()
            .find(|m| normalize_remote(&m.default_remote) == wanted)
    }
}

fn read_document(vmr_path: &Path) -> Result<serde_json::Value> {
    let path = vmr_path.join(RELATIVE_PATH);
    if !path.exists() {
        return Ok(serde_json::json!({ "mappings": [] }));
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn write_document(vmr_path: &Path, document: &serde_json::Value) -> Result<()> {
    let path = vmr_path.join(RELATIVE_PATH);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(document)?;
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

fn mappings_array(document: &mut serde_json::Value) -> Result<&mut Vec<serde_json::Value>> {
    let object = document.as_object_mut().ok_or_else(|| Error::ConfigParse {
        message: format!("{} must contain a JSON object", RELATIVE_PATH),
        hint: None,
    })?;
    object
        .entry("mappings")
        .or_insert_with(|| serde_json::Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| Error::ConfigParse {
            message: "\"mappings\" must be an array".to_string(),
            hint: None,
        })
}

/// Append a mapping to the VMR's mappings file, leaving other entries as
/// they are.
pub fn add_mapping_entry(
    vmr_path: &Path,
    name: &str,
    default_remote: &str,
    default_ref: Option<&str>,
) -> Result<()> {
    let mut document = read_document(vmr_path)?;
    let mappings = mappings_array(&mut document)?;
    let exists = mappings.iter().any(|m| {
        m.get("name")
            .and_then(|n| n.as_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    });
    if exists {
        return Err(Error::Mapping {
            name: name.to_string(),
            message: "mapping already exists".to_string(),
        });
    }

    let mut entry = serde_json::json!({
        "name": name,
        "defaultRemote": default_remote,
    });
    if let Some(default_ref) = default_ref {
        entry["defaultRef"] = serde_json::Value::String(default_ref.to_string());
    }
    mappings.push(entry);
    write_document(vmr_path, &document)
}

/// Drop a mapping from the VMR's mappings file.
pub fn remove_mapping_entry(vmr_path: &Path, name: &str) -> Result<()> {
    let mut document = read_document(vmr_path)?;
    let mappings = mappings_array(&mut document)?;
    let before = mappings.len();
    mappings.retain(|m| {
        !m.get("name")
            .and_then(|n| n.as_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    });
    if mappings.len() == before {
        return Err(Error::Mapping {
            name: name.to_string(),
            message: "no such mapping".to_string(),
        });
    }
    write_document(vmr_path, &document)
}
