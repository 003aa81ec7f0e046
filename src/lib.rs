//! # vmr-flow
//!
//! Code flow between a Virtual Monolithic Repository (VMR) and the
//! individual repositories it is assembled from. The VMR keeps a copy of each
//! repository under `src/<mapping>/`; this library moves changes between the
//! two and tracks where every copy came from.
//!
//! ## Quick Example
//!
//! ```
//! use vmr_flow::manifest::SourceManifest;
//!
//! let mut manifest = SourceManifest::new();
//! manifest.update_version(
//!     "runtime",
//!     "https://github.com/dotnet/runtime",
//!     "7ab1ed3a1d5b4dd3a33cc07b6e3d0e9b2b7a1c0f",
//!     Some("10.0.0-preview.3.25171.5"),
//!     Some(264315),
//! );
//!
//! let json = manifest.to_json().unwrap();
//! let parsed = SourceManifest::from_json(&json).unwrap();
//! assert_eq!(parsed, manifest);
//! assert_eq!(
//!     parsed.get_version("runtime").unwrap().package_version.as_deref(),
//!     Some("10.0.0-preview.3.25171.5")
//! );
//! ```
//!
//! ## Core Concepts
//!
//! - **Source manifest (`manifest`)**: `src/source-manifest.json`, the record
//!   of which commit of which repository each VMR directory holds.
//! - **Version files (`version_files`)**: `eng/Version.Details.xml`, the
//!   generated props files and git-info, plus the reconciliation of
//!   conflicting property values.
//! - **Mappings (`mapping`)**: `src/source-mappings.json`, which repository
//!   lands where and which files are cloaked.
//! - **Synchronization (`sync`)**: tree diffs, patch application, forward and
//!   back flow, conflict resolution, and VMR maintenance (scans, notices,
//!   band merges, push).
//! - **Merge policies (`policy`)**: checks gating code-flow pull requests.
//! - **Dependency flow (`flow`, `queue`, `remote`)**: subscriptions, the
//!   pull-request updater and the work-item queue driving it.
//!
//! ## Execution Flow
//!
//! A forward flow of `runtime`:
//!
//! 1.  **Clone**: fetch `runtime` into a cached no-checkout clone.
//! 2.  **Diff**: build a patch between the last synchronized commit and the
//!     target commit, both filtered by the mapping's include/exclude rules.
//! 3.  **Apply**: apply the patch to `src/runtime`, reconciling version files
//!     and reporting other diverged files as conflicts.
//! 4.  **Record**: update the source manifest, git-info and
//!     `AllRepoVersions.props`, then commit on a `darc/forward/...` branch.

pub mod cancel;
pub mod codeflow;
pub mod config;
pub mod defaults;
pub mod error;
pub mod filesystem;
pub mod flow;
pub mod git;
pub mod manifest;
pub mod mapping;
pub mod output;
pub mod path;
pub mod policy;
pub mod queue;
pub mod remote;
pub mod repository;
pub mod sync;
pub mod version_files;

#[cfg(test)]
mod path_proptest;
