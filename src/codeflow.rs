//! Code-flow direction model.
//!
//! A [`Codeflow`] describes one synchronization between a repository and the
//! VMR. Forward flow goes repository → VMR, back flow goes VMR → repository.
//! The `source_sha` is always the commit being flowed and `target_sha` the
//! commit it is flowed onto; [`Codeflow::repo_sha`] and [`Codeflow::vmr_sha`]
//! resolve to the right one for either direction.

use crate::path::short_sha;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "camelCase")]
pub enum Codeflow {
    #[serde(rename_all = "camelCase")]
    ForwardFlow {
        source_sha: String,
        target_sha: String,
    },
    #[serde(rename_all = "camelCase")]
    Backflow {
        source_sha: String,
        target_sha: String,
    },
}

/// Direction of a flow, without the SHAs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Forward,
    Back,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Back => "back",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Codeflow {
    /// Flow of repository commit `repo_sha` into VMR commit `vmr_sha`.
    pub fn forward(repo_sha: &str, vmr_sha: &str) -> Self {
        Codeflow::ForwardFlow {
            source_sha: repo_sha.to_string(),
            target_sha: vmr_sha.to_string(),
        }
    }

    /// Flow of VMR commit `vmr_sha` into repository commit `repo_sha`.
    pub fn backflow(vmr_sha: &str, repo_sha: &str) -> Self {
        Codeflow::Backflow {
            source_sha: vmr_sha.to_string(),
            target_sha: repo_sha.to_string(),
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Codeflow::ForwardFlow { .. } => Direction::Forward,
            Codeflow::Backflow { .. } => Direction::Back,
        }
    }

    pub fn name(&self) -> &'static str {
        self.direction().name()
    }

    pub fn source_sha(&self) -> &str {
        match self {
            Codeflow::ForwardFlow { source_sha, .. } | Codeflow::Backflow { source_sha, .. } => {
                source_sha
            }
        }
    }

    pub fn target_sha(&self) -> &str {
        match self {
            Codeflow::ForwardFlow { target_sha, .. } | Codeflow::Backflow { target_sha, .. } => {
                target_sha
            }
        }
    }

    pub fn repo_sha(&self) -> &str {
        match self {
            Codeflow::ForwardFlow { source_sha, .. } => source_sha,
            Codeflow::Backflow { target_sha, .. } => target_sha,
        }
    }

    pub fn vmr_sha(&self) -> &str {
        match self {
            Codeflow::ForwardFlow { target_sha, .. } => target_sha,
            Codeflow::Backflow { source_sha, .. } => source_sha,
        }
    }

    /// `darc/<direction>/<short-source>-<short-target>`
    pub fn branch_name(&self) -> String {
        format!(
            "darc/{}/{}-{}",
            self.name(),
            short_sha(self.source_sha()),
            short_sha(self.target_sha())
        )
    }
}
