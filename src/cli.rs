//! CLI argument parsing and command dispatch

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::commands::{self, Context};
use vmr_flow::cancel::CancellationToken;
use vmr_flow::config::{AdditionalRemote, VmrConfig};
use vmr_flow::git::LocalGitRepo;
use vmr_flow::output::OutputConfig;

/// vmr-flow - Move code between a VMR and its source repositories
#[derive(Parser, Debug)]
#[command(name = "vmr-flow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Root of the VMR. Defaults to the git work tree containing the
    /// current directory.
    #[arg(long, global = true, value_name = "DIR", env = "VMR_FLOW_VMR")]
    vmr: Option<PathBuf>,

    /// Directory for clones, patches and pending conflicts.
    #[arg(long, global = true, value_name = "DIR", env = "VMR_FLOW_TMP")]
    tmp: Option<PathBuf>,

    /// Configuration file. Defaults to `.vmr-flow.yaml` in the VMR root.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Extra remotes to fetch mappings from, as `mapping:uri`.
    #[arg(long = "additional-remotes", global = true, value_name = "MAPPING:URI", value_delimiter = ',')]
    additional_remotes: Vec<AdditionalRemote>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synchronize repositories into the VMR for the first time
    Initialize(commands::initialize::InitializeArgs),

    /// Synchronize repositories already in the VMR to a newer commit
    Update(commands::update::UpdateArgs),

    /// Add a source mapping and synchronize it
    AddRepo(commands::add_repo::AddRepoArgs),

    /// Remove repositories from the VMR
    RemoveRepo(commands::remove_repo::RemoveRepoArgs),

    /// Reset a mapping to a commit, a build or the latest build of a channel
    Reset(commands::reset::ResetArgs),

    /// Flow a repository commit into the VMR on a forward-flow branch
    Forwardflow(commands::forwardflow::ForwardflowArgs),

    /// Flow the VMR copy of a mapping back into a local repository clone
    Backflow(commands::backflow::BackflowArgs),

    /// Finish a flow whose conflicts were resolved by hand
    Resolve(commands::resolve::ResolveArgs),

    /// Write conflict markers for the pending conflicts of a subscription
    ResolveConflict(commands::resolve_conflict::ResolveConflictArgs),

    /// Apply a single commit to the counterpart repository
    CherryPick(commands::cherry_pick::CherryPickArgs),

    /// Compare a mapping with its repository
    Diff(commands::diff::DiffArgs),

    /// Push a VMR branch, optionally verifying synchronized commits are public
    Push(commands::push::PushArgs),

    /// List files in the VMR that the source mappings cloak
    ScanCloakedFiles(commands::scan_cloaked_files::ScanCloakedFilesArgs),

    /// List binary files in the VMR not allowed by a baseline
    ScanBinaryFiles(commands::scan_binary_files::ScanBinaryFilesArgs),

    /// Generate THIRD-PARTY-NOTICES.txt from the notices of every repository
    GenerateTpn(commands::generate_tpn::GenerateTpnArgs),

    /// Merge the source manifest and git-info of another VMR branch
    MergeBands(commands::merge_bands::MergeBandsArgs),
}

impl Cli {
    fn init_logging(&self) {
        let _ = env_logger::Builder::new()
            .parse_filters(&self.log_level)
            .format_timestamp(None)
            .format_target(false)
            .try_init();
    }

    fn context(&self) -> Result<Context> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let vmr = match &self.vmr {
            Some(vmr) => vmr.clone(),
            None => LocalGitRepo::find_root(&cwd).unwrap_or(cwd),
        };
        let mut config = VmrConfig::discover(self.config.as_deref(), &vmr)
            .with_context(|| format!("Failed to load configuration for {}", vmr.display()))?;
        if let Some(tmp) = &self.tmp {
            config.tmp = Some(tmp.clone());
        }
        config
            .additional_remotes
            .extend(self.additional_remotes.iter().cloned());

        Ok(Context {
            vmr,
            config,
            output: OutputConfig::from_env_and_flag(&self.color),
            cancel: CancellationToken::new(),
        })
    }

    /// Execute the CLI command
    pub fn execute(self) -> Result<ExitCode> {
        self.init_logging();
        let ctx = self.context()?;

        match self.command {
            Commands::Initialize(args) => commands::initialize::execute(args, &ctx),
            Commands::Update(args) => commands::update::execute(args, &ctx),
            Commands::AddRepo(args) => commands::add_repo::execute(args, &ctx),
            Commands::RemoveRepo(args) => commands::remove_repo::execute(args, &ctx),
            Commands::Reset(args) => commands::reset::execute(args, &ctx),
            Commands::Forwardflow(args) => commands::forwardflow::execute(args, &ctx),
            Commands::Backflow(args) => commands::backflow::execute(args, &ctx),
            Commands::Resolve(args) => commands::resolve::execute(args, &ctx),
            Commands::ResolveConflict(args) => commands::resolve_conflict::execute(args, &ctx),
            Commands::CherryPick(args) => commands::cherry_pick::execute(args, &ctx),
            Commands::Diff(args) => commands::diff::execute(args, &ctx),
            Commands::Push(args) => commands::push::execute(args, &ctx),
            Commands::ScanCloakedFiles(args) => commands::scan_cloaked_files::execute(args, &ctx),
            Commands::ScanBinaryFiles(args) => commands::scan_binary_files::execute(args, &ctx),
            Commands::GenerateTpn(args) => commands::generate_tpn::execute(args, &ctx),
            Commands::MergeBands(args) => commands::merge_bands::execute(args, &ctx),
        }
    }
}
