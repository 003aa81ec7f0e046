//! # CLI Command Implementations
//!
//! One module per subcommand. Each defines an `Args` struct derived with
//! `clap` and an `execute` function taking the parsed arguments and the
//! shared [`Context`], returning the process exit code.
//!
//! Commands that change the VMR commit their result unless `--no-commit` is
//! given; `reset` only stages.

pub mod add_repo;
pub mod backflow;
pub mod cherry_pick;
pub mod diff;
pub mod forwardflow;
pub mod generate_tpn;
pub mod initialize;
pub mod merge_bands;
pub mod push;
pub mod remove_repo;
pub mod reset;
pub mod resolve;
pub mod resolve_conflict;
pub mod scan_binary_files;
pub mod scan_cloaked_files;
pub mod update;

use anyhow::{Context as _, Result};
use std::future::Future;
use std::path::PathBuf;

use vmr_flow::cancel::CancellationToken;
use vmr_flow::config::VmrConfig;
use vmr_flow::flow::Build;
use vmr_flow::output::{Marker, OutputConfig};
use vmr_flow::remote::{BuildRegistry, MemoryRegistry};
use vmr_flow::sync::{SyncOptions, SyncResult, VmrSynchronizer};

/// State shared by every command.
pub struct Context {
    pub vmr: PathBuf,
    pub config: VmrConfig,
    pub output: OutputConfig,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn synchronizer(&self) -> Result<VmrSynchronizer> {
        VmrSynchronizer::new(&self.vmr, self.config.clone(), self.cancel.clone())
            .with_context(|| format!("Failed to open VMR at {}", self.vmr.display()))
    }

    /// Registry over the builds and subscriptions of the configuration file.
    pub fn registry(&self) -> MemoryRegistry {
        MemoryRegistry::from_config(&self.config)
    }

    /// Run a future to completion on a single-threaded runtime.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;
        Ok(runtime.block_on(future))
    }

    /// The build `--build <id>` refers to.
    pub fn build(&self, id: Option<u64>) -> Result<Option<Build>> {
        let Some(id) = id else {
            return Ok(None);
        };
        let registry = self.registry();
        let build = self.block_on(registry.get_build(id))??;
        Ok(Some(build))
    }

    pub fn sync_options(&self, build: Option<Build>, recursive: bool, force: bool) -> SyncOptions {
        SyncOptions {
            build,
            recursive,
            force,
            ..SyncOptions::default()
        }
    }

    pub fn print(&self, marker: Marker, text: &str) {
        println!("{}", self.output.line(marker, text));
    }

    /// Print one line per synchronized mapping and every conflicted file.
    /// Returns whether any mapping has conflicts.
    pub fn report(&self, results: &[SyncResult]) -> bool {
        let mut conflicted = false;
        for result in results {
            if result.has_conflicts() {
                conflicted = true;
                self.print(
                    Marker::Conflict,
                    &format!(
                        "{}: {} file(s) in conflict",
                        result.mapping,
                        result.conflicted_files.len()
                    ),
                );
                for file in &result.conflicted_files {
                    println!("    {}", file);
                }
            } else if result.has_changes() {
                self.print(
                    Marker::Success,
                    &format!(
                        "{}: {} file(s) updated to {}",
                        result.mapping,
                        result.applied.len(),
                        vmr_flow::path::short_sha(&result.to_sha)
                    ),
                );
            } else {
                self.print(Marker::Info, &format!("{}: already up to date", result.mapping));
            }
        }
        conflicted
    }

    /// Point at `resolve` after a flow stopped on conflicts.
    pub fn conflict_hint(&self, mapping: &str) {
        self.print(
            Marker::Warning,
            &format!(
                "Resolve the conflicts, then run `vmr-flow resolve {}` to finish the flow",
                mapping
            ),
        );
    }
}

/// Commit message of a synchronization, e.g. `[VMR] Update runtime to 1a2b3c4`.
pub fn sync_message(verb: &str, results: &[SyncResult]) -> String {
    let mut lines = results.iter().filter(|r| r.has_changes());
    match (lines.next(), lines.next()) {
        (Some(only), None) => format!(
            "[VMR] {} {} to {}",
            verb,
            only.mapping,
            vmr_flow::path::short_sha(&only.to_sha)
        ),
        _ => {
            let mut message = format!("[VMR] {} repositories\n", verb);
            for result in results.iter().filter(|r| r.has_changes()) {
                message.push_str(&format!(
                    "\n- {} to {}",
                    result.mapping,
                    vmr_flow::path::short_sha(&result.to_sha)
                ));
            }
            message
        }
    }
}
