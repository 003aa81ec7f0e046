//! `eng/Version.Details.xml` and the generated `eng/Version.Details.props`.
//!
//! The XML lists every dependency a repository consumes. The props file
//! exposes each dependency's version as MSBuild properties named after the
//! sanitized dependency name. After a back flow, the XML also records where
//! the repository was last synchronized from (the `<Source>` element).

use super::properties::{compare_precedence, PropertyBag, PropertyValue};
use super::{escape, render_props, XmlDocument};
use crate::error::{Error, Result};
use crate::flow::Asset;
use crate::path::sanitize_property_name;
use log::info;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DependencyType {
    Product,
    Toolset,
}

/// One `<Dependency>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub uri: String,
    pub sha: String,
    pub pinned: bool,
    pub skip_property: bool,
    pub coherent_parent: Option<String>,
    pub kind: DependencyType,
}

/// The `<Source>` element recording the last VMR flow into the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDependency {
    pub uri: String,
    pub mapping: String,
    pub sha: String,
    pub bar_id: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionDetails {
    pub dependencies: Vec<Dependency>,
    pub source: Option<SourceDependency>,
}

impl VersionDetails {
    pub fn parse(file: &str, text: &str) -> Result<Self> {
        let mut doc = XmlDocument::parse(file, text)?;
        let root = doc.root()?;
        if doc.local_name(root) != "Dependencies" {
            return Err(Error::VersionFile {
                file: file.to_string(),
                message: format!("unexpected root element <{}>", doc.local_name(root)),
            });
        }

        let mut details = VersionDetails::default();
        for section in doc.elements(root) {
            let section_name = doc.local_name(section).to_string();
            let kind = match section_name.as_str() {
                "ProductDependencies" => DependencyType::Product,
                "ToolsetDependencies" => DependencyType::Toolset,
                "Source" => {
                    details.source = Some(SourceDependency {
                        uri: doc.attribute(section, "Uri").unwrap_or_default(),
                        mapping: doc.attribute(section, "Mapping").unwrap_or_default(),
                        sha: doc.attribute(section, "Sha").unwrap_or_default(),
                        bar_id: doc
                            .attribute(section, "BarId")
                            .and_then(|id| id.parse().ok()),
                    });
                    continue;
                }
                _ => continue,
            };

            for element in doc.elements(section) {
                if doc.local_name(element) != "Dependency" {
                    continue;
                }
                let name = doc.attribute(element, "Name").ok_or_else(|| Error::VersionFile {
                    file: file.to_string(),
                    message: "dependency without a Name attribute".to_string(),
                })?;
                let mut dependency = Dependency {
                    version: doc.attribute(element, "Version").unwrap_or_default(),
                    pinned: is_true(doc.attribute(element, "Pinned")),
                    skip_property: is_true(doc.attribute(element, "SkipProperty")),
                    coherent_parent: doc.attribute(element, "CoherentParentDependency"),
                    name,
                    uri: String::new(),
                    sha: String::new(),
                    kind,
                };
                for child in doc.elements(element) {
                    match doc.local_name(child) {
                        "Uri" => dependency.uri = doc.text(child),
                        "Sha" => dependency.sha = doc.text(child),
                        _ => {}
                    }
                }
                details.dependencies.push(dependency);
            }
        }
        Ok(details)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Dependencies>\n");
        if let Some(source) = &self.source {
            out.push_str(&format!(
                "  <Source Uri=\"{}\" Mapping=\"{}\" Sha=\"{}\"{} />\n",
                escape(&source.uri),
                escape(&source.mapping),
                escape(&source.sha),
                source
                    .bar_id
                    .map(|id| format!(" BarId=\"{}\"", id))
                    .unwrap_or_default()
            ));
        }
        for (kind, tag) in [
            (DependencyType::Product, "ProductDependencies"),
            (DependencyType::Toolset, "ToolsetDependencies"),
        ] {
            out.push_str(&format!("  <{}>\n", tag));
            for dep in self.dependencies.iter().filter(|d| d.kind == kind) {
                out.push_str(&format!(
                    "    <Dependency Name=\"{}\" Version=\"{}\"",
                    escape(&dep.name),
                    escape(&dep.version)
                ));
                if dep.pinned {
                    out.push_str(" Pinned=\"true\"");
                }
                if dep.skip_property {
                    out.push_str(" SkipProperty=\"true\"");
                }
                if let Some(parent) = &dep.coherent_parent {
                    out.push_str(&format!(" CoherentParentDependency=\"{}\"", escape(parent)));
                }
                out.push_str(">\n");
                out.push_str(&format!("      <Uri>{}</Uri>\n", escape(&dep.uri)));
                out.push_str(&format!("      <Sha>{}</Sha>\n", escape(&dep.sha)));
                out.push_str("    </Dependency>\n");
            }
            out.push_str(&format!("  </{}>\n", tag));
        }
        out.push_str("</Dependencies>\n");
        out
    }

    /// Dependency versions keyed by name, the reconciliation view of the XML.
    pub fn to_properties(&self) -> PropertyBag {
        self.dependencies
            .iter()
            .map(|d| (d.name.clone(), PropertyValue::String(d.version.clone())))
            .collect()
    }

    /// The properties `Version.Details.props` must declare for these
    /// dependencies: `<Name>PackageVersion` holding the version and
    /// `<Name>Version` referencing it.
    pub fn expected_properties(&self) -> BTreeMap<String, String> {
        let mut expected = BTreeMap::new();
        for dep in self.dependencies.iter().filter(|d| !d.skip_property) {
            let name = sanitize_property_name(&dep.name);
            expected.insert(format!("{}PackageVersion", name), dep.version.clone());
            expected.insert(
                format!("{}Version", name),
                format!("$({}PackageVersion)", name),
            );
        }
        expected
    }

    /// Generate `eng/Version.Details.props` for these dependencies.
    pub fn render_props(&self) -> String {
        let bag: PropertyBag = self
            .expected_properties()
            .into_iter()
            .map(|(k, v)| (k, PropertyValue::String(v)))
            .collect();
        render_props(&bag)
    }

    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}

fn is_true(value: Option<String>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn newer_version<'a>(a: &'a Dependency, b: &'a Dependency) -> &'a Dependency {
    match (
        semver::Version::parse(&a.version),
        semver::Version::parse(&b.version),
    ) {
        (Ok(x), Ok(y)) if compare_precedence(&y, &x).is_gt() => b,
        _ => a,
    }
}

/// Three-way merge of dependency lists at the dependency level.
///
/// `ours` is the side being flowed into, `theirs` the incoming side. Assets
/// produced by the build being flowed always win. When both sides updated a
/// dependency the newer version wins, falling back to `ours` when versions
/// are not comparable. Removal on one side against an update or addition on
/// the other is a [`Error::ConflictingDependencyUpdate`].
pub fn merge_dependencies(
    base: &VersionDetails,
    ours: &VersionDetails,
    theirs: &VersionDetails,
    build_assets: &[Asset],
) -> Result<VersionDetails> {
    let names: BTreeSet<&str> = base
        .dependencies
        .iter()
        .chain(&ours.dependencies)
        .chain(&theirs.dependencies)
        .map(|d| d.name.as_str())
        .collect();

    let mut merged = Vec::new();
    for name in names {
        let original = base.get(name);
        let mine = ours.get(name);
        let other = theirs.get(name);
        let mine_changed = mine != original;
        let other_changed = other != original;

        let mut chosen = match (mine_changed, other_changed) {
            (false, false) => original.cloned(),
            (true, false) => mine.cloned(),
            (false, true) => other.cloned(),
            (true, true) => match (mine, other) {
                (Some(m), Some(o)) => Some(newer_version(m, o).clone()),
                (None, None) => None,
                _ => {
                    return Err(Error::ConflictingDependencyUpdate {
                        name: name.to_string(),
                        message: "removed on one side and changed on the other".to_string(),
                    })
                }
            },
        };

        if let (Some(dep), Some(asset)) = (
            chosen.as_mut(),
            build_assets.iter().find(|a| a.name == name),
        ) {
            if !dep.pinned && dep.version != asset.version {
                info!(
                    "Asset {} contained in build, updating to {}",
                    name, asset.version
                );
                dep.version = asset.version.clone();
            }
        }

        if let Some(dep) = chosen {
            merged.push(dep);
        }
    }

    merged.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
    Ok(VersionDetails {
        dependencies: merged,
        source: theirs.source.clone().or_else(|| ours.source.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Dependencies>
  <Source Uri="https://github.com/dotnet/dotnet" Mapping="runtime" Sha="aaa111" BarId="555" />
  <ProductDependencies>
    <Dependency Name="Microsoft.NETCore.App.Ref" Version="9.0.0-preview.1">
      <Uri>https://github.com/dotnet/runtime</Uri>
      <Sha>bbb222</Sha>
    </Dependency>
  </ProductDependencies>
  <ToolsetDependencies>
    <Dependency Name="Microsoft.DotNet.Arcade.Sdk" Version="9.0.0-beta.24" Pinned="true">
      <Uri>https://github.com/dotnet/arcade</Uri>
      <Sha>ccc333</Sha>
    </Dependency>
    <Dependency Name="Skipped" Version="1.0.0" SkipProperty="true">
      <Uri>https://github.com/dotnet/skipped</Uri>
      <Sha>ddd444</Sha>
    </Dependency>
  </ToolsetDependencies>
</Dependencies>
"#;

    fn dep(name: &str, version: &str) -> Dependency {
        Dependency {
            name: name.to_string(),
            version: version.to_string(),
            uri: "https://github.com/dotnet/x".to_string(),
            sha: "sha".to_string(),
            pinned: false,
            skip_property: false,
            coherent_parent: None,
            kind: DependencyType::Product,
        }
    }

    fn details(deps: Vec<Dependency>) -> VersionDetails {
        VersionDetails {
            dependencies: deps,
            source: None,
        }
    }

    #[test]
    fn test_parse_sample() {
        let details = VersionDetails::parse("Version.Details.xml", SAMPLE).unwrap();
        assert_eq!(details.dependencies.len(), 3);
        let arcade = details.get("Microsoft.DotNet.Arcade.Sdk").unwrap();
        assert!(arcade.pinned);
        assert_eq!(arcade.kind, DependencyType::Toolset);
        assert_eq!(arcade.sha, "ccc333");
        let source = details.source.unwrap();
        assert_eq!(source.mapping, "runtime");
        assert_eq!(source.bar_id, Some(555));
    }

    #[test]
    fn test_render_round_trip() {
        let details = VersionDetails::parse("Version.Details.xml", SAMPLE).unwrap();
        let reparsed = VersionDetails::parse("Version.Details.xml", &details.render()).unwrap();
        assert_eq!(reparsed, details);
    }

    #[test]
    fn test_expected_properties_are_sanitized() {
        let details = VersionDetails::parse("Version.Details.xml", SAMPLE).unwrap();
        let expected = details.expected_properties();
        assert_eq!(
            expected.get("MicrosoftNETCoreAppRefPackageVersion").map(String::as_str),
            Some("9.0.0-preview.1")
        );
        assert_eq!(
            expected.get("MicrosoftNETCoreAppRefVersion").map(String::as_str),
            Some("$(MicrosoftNETCoreAppRefPackageVersion)")
        );
        assert!(!expected.keys().any(|k| k.starts_with("Skipped")));
    }

    #[test]
    fn test_merge_both_updated_newer_wins() {
        let base = details(vec![dep("A", "1.0.0")]);
        let ours = details(vec![dep("A", "1.2.0")]);
        let theirs = details(vec![dep("A", "1.1.0")]);
        let merged = merge_dependencies(&base, &ours, &theirs, &[]).unwrap();
        assert_eq!(merged.get("A").unwrap().version, "1.2.0");
    }

    #[test]
    fn test_merge_unparsable_keeps_ours() {
        let base = details(vec![dep("A", "1.0.0")]);
        let ours = details(vec![dep("A", "custom-a")]);
        let theirs = details(vec![dep("A", "2.0.0")]);
        let merged = merge_dependencies(&base, &ours, &theirs, &[]).unwrap();
        assert_eq!(merged.get("A").unwrap().version, "custom-a");
    }

    #[test]
    fn test_merge_added_on_both_sides() {
        let base = details(vec![]);
        let ours = details(vec![dep("A", "2.0.0")]);
        let theirs = details(vec![dep("A", "3.0.0")]);
        let merged = merge_dependencies(&base, &ours, &theirs, &[]).unwrap();
        assert_eq!(merged.get("A").unwrap().version, "3.0.0");
    }

    #[test]
    fn test_merge_remove_versus_update_conflicts() {
        let base = details(vec![dep("A", "1.0.0")]);
        let ours = details(vec![]);
        let theirs = details(vec![dep("A", "1.1.0")]);
        assert!(matches!(
            merge_dependencies(&base, &ours, &theirs, &[]),
            Err(Error::ConflictingDependencyUpdate { .. })
        ));
    }

    #[test]
    fn test_merge_build_assets_win() {
        let base = details(vec![dep("A", "1.0.0")]);
        let ours = details(vec![dep("A", "1.0.0")]);
        let theirs = details(vec![dep("A", "1.0.0")]);
        let assets = vec![Asset {
            name: "A".to_string(),
            version: "1.5.0".to_string(),
        }];
        let merged = merge_dependencies(&base, &ours, &theirs, &assets).unwrap();
        assert_eq!(merged.get("A").unwrap().version, "1.5.0");
    }
}
