//! # Dependency Flow Model
//!
//! Builds, channels and subscriptions, plus the machinery that turns a newly
//! published build into code-flow pull requests:
//!
//! - [`updater`]: the per-subscription (or per batch) pull-request state
//!   machine.
//! - [`events`]: build-inserted hooks and default-channel promotion.
//! - [`executor`]: runs flows against a local VMR working copy.

pub mod events;
pub mod executor;
pub mod updater;

use crate::codeflow::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A package produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub name: String,
    pub version: String,
}

/// A build registered in the build registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: u64,
    pub repository: String,
    pub branch: String,
    pub commit: String,
    /// Build number of the official build, e.g. `20240322.9`
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub channels: Vec<String>,
}

impl Build {
    /// The package version of the build, taken from its first asset.
    pub fn package_version(&self) -> Option<&str> {
        self.assets.first().map(|a| a.version.as_str())
    }
}

/// Rule that promotes builds of a repository branch to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultChannel {
    pub repository: String,
    pub branch: String,
    pub channel: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A merge policy configured on a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePolicyDefinition {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl MergePolicyDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A standing request to flow builds of `source_repository` published to
/// `channel` into `target_repository`@`target_branch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub source_repository: String,
    pub target_repository: String,
    pub target_branch: String,
    pub channel: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub batchable: bool,
    #[serde(default)]
    pub merge_policies: Vec<MergePolicyDefinition>,
    #[serde(default)]
    pub excluded_assets: Vec<String>,
    /// Mapping flowed out of the VMR (back flow)
    #[serde(default)]
    pub source_directory: Option<String>,
    /// Mapping flowed into the VMR (forward flow)
    #[serde(default)]
    pub target_directory: Option<String>,
}

impl Subscription {
    /// Direction of the code flow, or `None` for a dependency-only subscription.
    pub fn direction(&self) -> Option<Direction> {
        if self.target_directory.is_some() {
            Some(Direction::Forward)
        } else if self.source_directory.is_some() {
            Some(Direction::Back)
        } else {
            None
        }
    }

    /// The VMR mapping this subscription flows.
    pub fn mapping_name(&self) -> Option<&str> {
        self.target_directory
            .as_deref()
            .or(self.source_directory.as_deref())
    }

    pub fn updater_id(&self) -> UpdaterId {
        if self.batchable {
            UpdaterId::Batch(BatchKey {
                repository: self.target_repository.clone(),
                branch: self.target_branch.clone(),
            })
        } else {
            UpdaterId::Subscription(self.id.clone())
        }
    }

    /// Whether an asset is excluded from this subscription's updates.
    pub fn is_asset_excluded(&self, asset: &str) -> bool {
        self.excluded_assets.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(asset))
                .unwrap_or(false)
        })
    }
}

/// Updates to the same target repository branch grouped into one PR.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchKey {
    pub repository: String,
    pub branch: String,
}

/// Identity of a pull-request updater. Work for the same id is never run
/// concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UpdaterId {
    Subscription(String),
    Batch(BatchKey),
}

impl fmt::Display for UpdaterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdaterId::Subscription(id) => write!(f, "subscription:{}", id),
            UpdaterId::Batch(key) => write!(f, "batch:{}@{}", key.repository, key.branch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> Subscription {
        serde_yaml::from_str(
            r#"
id: 4a7e1a2c
sourceRepository: https://github.com/dotnet/runtime
targetRepository: https://github.com/dotnet/dotnet
targetBranch: main
channel: .NET 10
targetDirectory: runtime
excludedAssets: ["Microsoft.DotNet.*"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_direction_from_directories() {
        let mut sub = subscription();
        assert_eq!(sub.direction(), Some(Direction::Forward));
        assert_eq!(sub.mapping_name(), Some("runtime"));
        assert!(sub.enabled);

        sub.target_directory = None;
        sub.source_directory = Some("runtime".to_string());
        assert_eq!(sub.direction(), Some(Direction::Back));

        sub.source_directory = None;
        assert_eq!(sub.direction(), None);
    }

    #[test]
    fn test_updater_id_uses_batch_key_when_batchable() {
        let mut sub = subscription();
        assert_eq!(sub.updater_id(), UpdaterId::Subscription("4a7e1a2c".to_string()));
        sub.batchable = true;
        assert_eq!(
            sub.updater_id().to_string(),
            "batch:https://github.com/dotnet/dotnet@main"
        );
    }

    #[test]
    fn test_excluded_assets() {
        let sub = subscription();
        assert!(sub.is_asset_excluded("Microsoft.DotNet.Arcade.Sdk"));
        assert!(!sub.is_asset_excluded("Microsoft.NETCore.App.Ref"));
    }
}
