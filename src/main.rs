//! # vmr-flow CLI
//!
//! Binary entry point for the `vmr-flow` command-line tool. Parses arguments
//! with `clap`, runs the selected command and turns its outcome into the
//! process exit code. All logic lives in the `vmr_flow` library crate.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    let cli = cli::Cli::parse();
    cli.execute()
}
