//! # Configuration
//!
//! `vmr-flow` reads an optional `.vmr-flow.yaml` file next to the VMR (or
//! wherever `--config` points). CLI flags and environment variables override
//! the values it holds.
//!
//! Besides the working settings (VMR location, temp directory, patch
//! retention, worker count) the file may describe the build registry the CLI
//! works against: subscriptions, builds and default channels. The service
//! proper gets those from its database; the CLI and the tests get them from
//! here.
//!
//! ```yaml
//! vmr: ../dotnet
//! tmp: /tmp/vmr-flow
//! keepPatches: true
//! workerCount: 4
//! additionalRemotes:
//!   - runtime:https://github.com/me/runtime
//! subscriptions:
//!   - id: 1f2e
//!     sourceRepository: https://github.com/dotnet/runtime
//!     targetRepository: https://github.com/dotnet/dotnet
//!     targetBranch: main
//!     channel: .NET 10
//!     targetDirectory: runtime
//! ```

use crate::error::{Error, Result};
use crate::flow::{Build, DefaultChannel, Subscription};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".vmr-flow.yaml";

/// Settings shared by every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmrConfig {
    /// Root of the VMR working tree.
    #[serde(default)]
    pub vmr: Option<PathBuf>,
    /// Directory for clones, patches and pending conflict records.
    #[serde(default)]
    pub tmp: Option<PathBuf>,
    /// Keep generated patches on disk after applying them.
    #[serde(default)]
    pub keep_patches: bool,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Deliveries of a work item before it is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub additional_remotes: Vec<AdditionalRemote>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub builds: Vec<Build>,
    #[serde(default)]
    pub default_channels: Vec<DefaultChannel>,
}

fn default_worker_count() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for VmrConfig {
    fn default() -> Self {
        Self {
            vmr: None,
            tmp: None,
            keep_patches: false,
            worker_count: default_worker_count(),
            max_attempts: default_max_attempts(),
            additional_remotes: Vec::new(),
            subscriptions: Vec::new(),
            builds: Vec::new(),
            default_channels: Vec::new(),
        }
    }
}

impl VmrConfig {
    /// Parse configuration from YAML.
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: VmrConfig = serde_yaml::from_str(yaml).map_err(|e| Error::ConfigParse {
            message: e.to_string(),
            hint: Some(format!("check the syntax of {}", CONFIG_FILE)),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::Io)?;
        Self::parse(&content)
    }

    /// Load `explicit` when given, else `.vmr-flow.yaml` in `dir` if present,
    /// else defaults.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let candidate = dir.join(CONFIG_FILE);
                if candidate.exists() {
                    Self::from_file(candidate)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::ConfigParse {
                message: "workerCount must be at least 1".to_string(),
                hint: None,
            });
        }
        if self.max_attempts == 0 {
            return Err(Error::ConfigParse {
                message: "maxAttempts must be at least 1".to_string(),
                hint: None,
            });
        }
        let mut ids = std::collections::BTreeSet::new();
        for subscription in &self.subscriptions {
            if !ids.insert(subscription.id.as_str()) {
                return Err(Error::ConfigParse {
                    message: format!("subscription '{}' is declared twice", subscription.id),
                    hint: None,
                });
            }
        }
        Ok(())
    }

    /// Resolve the temp directory, falling back to the platform cache dir.
    pub fn tmp_dir(&self) -> PathBuf {
        self.tmp
            .clone()
            .unwrap_or_else(crate::defaults::default_tmp_dir)
    }

    /// Remotes to try for `mapping`, additional remotes first.
    pub fn remotes_for(&self, mapping: &str, default_remote: &str) -> Vec<String> {
        let mut remotes: Vec<String> = self
            .additional_remotes
            .iter()
            .filter(|r| r.mapping.eq_ignore_ascii_case(mapping))
            .map(|r| r.uri.clone())
            .collect();
        if !remotes.iter().any(|r| r == default_remote) {
            remotes.push(default_remote.to_string());
        }
        remotes
    }
}

/// `mapping:uri` override of the remote a mapping is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AdditionalRemote {
    pub mapping: String,
    pub uri: String,
}

impl FromStr for AdditionalRemote {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((mapping, uri)) if !mapping.is_empty() && !uri.is_empty() => Ok(Self {
                mapping: mapping.to_string(),
                uri: uri.to_string(),
            }),
            _ => Err(Error::ConfigParse {
                message: format!("invalid additional remote '{}'", s),
                hint: Some("expected mapping:uri, e.g. runtime:https://github.com/me/runtime".to_string()),
            }),
        }
    }
}

impl TryFrom<String> for AdditionalRemote {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AdditionalRemote> for String {
    fn from(value: AdditionalRemote) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AdditionalRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mapping, self.uri)
    }
}

/// What a repository spec points at after the mapping name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoTarget {
    /// Use the mapping's default ref.
    Default,
    /// A commit, branch or tag.
    Revision(String),
    /// A local clone of the repository.
    Path(PathBuf),
}

/// Repository argument of the form `name`, `name:revision` or `name:path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub name: String,
    pub target: RepoTarget,
}

impl FromStr for RepoSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, rest) = match s.split_once(':') {
            Some((name, rest)) => (name, Some(rest)),
            None => (s, None),
        };
        if name.is_empty() {
            return Err(Error::ConfigParse {
                message: format!("invalid repository spec '{}'", s),
                hint: Some("expected name[:revision] or name:path".to_string()),
            });
        }
        let target = match rest {
            None | Some("") => RepoTarget::Default,
            Some(rest) if looks_like_path(rest) => RepoTarget::Path(PathBuf::from(rest)),
            Some(rest) => RepoTarget::Revision(rest.to_string()),
        };
        Ok(Self {
            name: name.to_string(),
            target,
        })
    }
}

fn looks_like_path(value: &str) -> bool {
    value.starts_with('.')
        || value.starts_with('/')
        || value.starts_with('~')
        || value.contains('\\')
        || Path::new(value).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
vmr: ../dotnet
keepPatches: true
workerCount: 2
additionalRemotes:
  - runtime:https://github.com/me/runtime
subscriptions:
  - id: "1"
    sourceRepository: https://github.com/dotnet/runtime
    targetRepository: https://github.com/dotnet/dotnet
    targetBranch: main
    channel: .NET 10
    targetDirectory: runtime
    mergePolicies:
      - name: Standard
builds:
  - id: 100
    repository: https://github.com/dotnet/runtime
    branch: main
    commit: abc
    assets:
      - name: Microsoft.NETCore.App.Ref
        version: 10.0.0-preview.1
    channels: [".NET 10"]
"#;
        let config = VmrConfig::parse(yaml).unwrap();
        assert_eq!(config.vmr, Some(PathBuf::from("../dotnet")));
        assert!(config.keep_patches);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.additional_remotes[0].mapping, "runtime");
        assert_eq!(config.additional_remotes[0].uri, "https://github.com/me/runtime");
        assert_eq!(config.subscriptions[0].merge_policies[0].name, "Standard");
        assert_eq!(config.builds[0].package_version(), Some("10.0.0-preview.1"));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = VmrConfig::parse("").unwrap();
        assert_eq!(config.worker_count, 4);
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            VmrConfig::parse("workerCount: 0"),
            Err(Error::ConfigParse { .. })
        ));
        assert!(matches!(
            VmrConfig::parse("additionalRemotes: [nocolon]"),
            Err(Error::ConfigParse { .. })
        ));
        assert!(VmrConfig::parse("vmr: [").is_err());
    }

    #[test]
    fn test_duplicate_subscription_ids() {
        let yaml = r#"
subscriptions:
  - {id: a, sourceRepository: s, targetRepository: t, targetBranch: main, channel: c}
  - {id: a, sourceRepository: s, targetRepository: t, targetBranch: main, channel: c}
"#;
        assert!(VmrConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_additional_remote_splits_at_first_colon() {
        let remote: AdditionalRemote = "runtime:https://github.com/a/b".parse().unwrap();
        assert_eq!(remote.mapping, "runtime");
        assert_eq!(remote.uri, "https://github.com/a/b");
        assert_eq!(remote.to_string(), "runtime:https://github.com/a/b");
        assert!(":x".parse::<AdditionalRemote>().is_err());
        assert!("x:".parse::<AdditionalRemote>().is_err());
    }

    #[test]
    fn test_remotes_for_prefers_additional() {
        let mut config = VmrConfig::default();
        config.additional_remotes = vec![
            "runtime:/tmp/runtime".parse().unwrap(),
            "sdk:/tmp/sdk".parse().unwrap(),
        ];
        assert_eq!(
            config.remotes_for("runtime", "https://github.com/dotnet/runtime"),
            vec!["/tmp/runtime", "https://github.com/dotnet/runtime"]
        );
        assert_eq!(config.remotes_for("arcade", "u"), vec!["u"]);
    }

    #[test]
    fn test_repo_spec() {
        let spec: RepoSpec = "runtime".parse().unwrap();
        assert_eq!(spec.target, RepoTarget::Default);

        let spec: RepoSpec = "runtime:abc123".parse().unwrap();
        assert_eq!(spec.name, "runtime");
        assert_eq!(spec.target, RepoTarget::Revision("abc123".to_string()));

        let spec: RepoSpec = "runtime:../runtime".parse().unwrap();
        assert_eq!(spec.target, RepoTarget::Path(PathBuf::from("../runtime")));

        assert!(":abc".parse::<RepoSpec>().is_err());
    }
}
