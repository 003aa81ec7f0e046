//! # Version Files
//!
//! Typed access to the files that declare dependency versions, and the
//! property-level diff/merge used to reconcile them during code flow.
//!
//! - [`git_info`]: per-component `prereqs/git-info/<name>.props` files.
//! - [`all_versions`]: the aggregate `prereqs/git-info/AllRepoVersions.props`.
//! - [`version_details`]: `eng/Version.Details.xml` and the generated
//!   `eng/Version.Details.props` that exposes its versions as properties.
//! - [`properties`]: property bags, diffs and [`properties::select_winning_property`].
//!
//! Every file kind round-trips to a [`properties::PropertyBag`], which is
//! what the reconciliation works on.

pub mod all_versions;
pub mod git_info;
pub mod properties;
pub mod version_details;

use crate::error::{Error, Result};
use properties::{diff_properties, PropertyBag, PropertyChange, PropertyValue};
use regex::Regex;
use xot::{Node, Xot};

/// Relative paths of the files that are reconciled instead of conflicting.
pub const VERSION_DETAILS_XML: &str = "eng/Version.Details.xml";
pub const VERSION_DETAILS_PROPS: &str = "eng/Version.Details.props";
pub const VERSIONS_PROPS: &str = "eng/Versions.props";
pub const GIT_INFO_DIR: &str = "prereqs/git-info";

/// Whether `path` is one of the version files reconciled automatically.
pub fn is_version_file(path: &str) -> bool {
    let path = path.replace('\\', "/");
    path.ends_with(VERSION_DETAILS_XML)
        || path.ends_with(VERSION_DETAILS_PROPS)
        || path.ends_with(VERSIONS_PROPS)
        || (path.contains(GIT_INFO_DIR) && path.ends_with(".props"))
}

/// Thin wrapper over a parsed XML document.
pub(crate) struct XmlDocument {
    xot: Xot,
    document: Node,
    file: String,
}

impl XmlDocument {
    pub(crate) fn parse(file: &str, text: &str) -> Result<Self> {
        let mut xot = Xot::new();
        let document = xot.parse(text).map_err(|e| Error::VersionFile {
            file: file.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            xot,
            document,
            file: file.to_string(),
        })
    }

    pub(crate) fn root(&self) -> Result<Node> {
        self.xot
            .children(self.document)
            .find(|n| self.xot.is_element(*n))
            .ok_or_else(|| Error::VersionFile {
                file: self.file.clone(),
                message: "document has no root element".to_string(),
            })
    }

    pub(crate) fn elements(&self, node: Node) -> Vec<Node> {
        self.xot
            .children(node)
            .filter(|n| self.xot.is_element(*n))
            .collect()
    }

    pub(crate) fn local_name(&self, node: Node) -> &str {
        match self.xot.element(node) {
            Some(element) => self.xot.local_name_str(element.name()),
            None => "",
        }
    }

    pub(crate) fn attribute(&mut self, node: Node, name: &str) -> Option<String> {
        let name = self.xot.add_name(name);
        self.xot.get_attribute(node, name).map(str::to_string)
    }

    pub(crate) fn text(&self, node: Node) -> String {
        self.xot
            .text_content_str(node)
            .map(|t| t.trim().to_string())
            .unwrap_or_default()
    }
}

/// Escape text for inclusion in an XML element or attribute.
pub(crate) fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// An MSBuild `.props` file reduced to the parts version flow cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropsFile {
    /// Unconditional properties with non-empty values.
    pub properties: PropertyBag,
    /// Project paths of unconditional `<Import>` elements, with their condition.
    pub imports: Vec<(String, Option<String>)>,
    /// Names of properties declared more than once.
    pub duplicates: Vec<String>,
}

impl PropsFile {
    pub fn parse(file: &str, text: &str) -> Result<Self> {
        let mut doc = XmlDocument::parse(file, text)?;
        let root = doc.root()?;
        let mut props = PropsFile::default();

        for child in doc.elements(root) {
            let kind = doc.local_name(child).to_string();
            match kind.as_str() {
                "PropertyGroup" => {
                    if doc.attribute(child, "Condition").is_some() {
                        continue;
                    }
                    for property in doc.elements(child) {
                        if doc.attribute(property, "Condition").is_some() {
                            continue;
                        }
                        let value = doc.text(property);
                        if value.is_empty() {
                            continue;
                        }
                        let name = doc.local_name(property).to_string();
                        if props.properties.contains_key(&name) {
                            props.duplicates.push(name.clone());
                        }
                        props.properties.insert(name, PropertyValue::parse(&value));
                    }
                }
                "Import" => {
                    if let Some(project) = doc.attribute(child, "Project") {
                        let condition = doc.attribute(child, "Condition");
                        props.imports.push((project, condition));
                    }
                }
                _ => {}
            }
        }
        Ok(props)
    }
}

/// Render a property bag as a single-group props file.
pub fn render_props(properties: &PropertyBag) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Project>\n  <PropertyGroup>\n");
    for (name, value) in properties {
        out.push_str(&format!(
            "    <{name}>{}</{name}>\n",
            escape(&value.to_string())
        ));
    }
    out.push_str("  </PropertyGroup>\n</Project>\n");
    out
}

/// Apply the difference between `current` and `merged` to props `text`,
/// keeping everything else in the file (imports, conditions, comments) as is.
///
/// Updated properties are rewritten in place, removed ones are dropped and
/// new ones are appended to the first property group.
pub fn update_props_text(text: &str, current: &PropertyBag, merged: &PropertyBag) -> Result<String> {
    let mut out = text.to_string();
    let mut added = Vec::new();

    for change in diff_properties(current, merged) {
        match change {
            PropertyChange::Updated { name, value } => {
                let element = Regex::new(&format!(
                    r"<{name}>[^<]*</{name}>",
                    name = regex::escape(&name)
                ))?;
                let replacement = format!("<{name}>{}</{name}>", escape(&value.to_string()));
                out = element
                    .replacen(&out, 1, regex::NoExpand(&replacement))
                    .into_owned();
            }
            PropertyChange::Removed { name } => {
                let line = Regex::new(&format!(
                    r"(?m)^[ \t]*<{name}>[^<]*</{name}>[ \t]*\r?\n?",
                    name = regex::escape(&name)
                ))?;
                out = line.replacen(&out, 1, "").into_owned();
            }
            PropertyChange::Added { name, value } => added.push((name, value)),
        }
    }

    if !added.is_empty() {
        let insert_at = out.find("</PropertyGroup>").ok_or_else(|| Error::VersionFile {
            file: "props".to_string(),
            message: "no <PropertyGroup> to add properties to".to_string(),
        })?;
        let mut block = String::new();
        for (name, value) in added {
            block.push_str(&format!(
                "  <{name}>{}</{name}>\n  ",
                escape(&value.to_string())
            ));
        }
        out.insert_str(insert_at, &block);
    }
    Ok(out)
}
