//! CLI struct definitions for the autoarchive command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "autoarchive",
    version = env!("CARGO_PKG_VERSION"),
    about = "Date-gated, two-phase archiving of inactive projects and directories.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Debug-level logging regardless of RUST_LOG.
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ConfigArg {
    /// Configuration file (falls back to $AUTOARCHIVE_CONFIG).
    #[clap(long)]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunCli {
    #[clap(flatten)]
    pub config: ConfigArg,
    /// Run as if today were this date (YYYY-MM-DD).
    #[clap(long)]
    pub date: Option<String>,
    /// Dry run: no tag or archive calls, debug state and channel.
    #[clap(long)]
    pub debug: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct StatusCli {
    #[clap(flatten)]
    pub config: ConfigArg,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run one pass for today's date.
    Run(RunCli),
    /// Show what the state store holds.
    Status(StatusCli),
    /// Print the run mode and the next gate date.
    NextDate {
        #[clap(long)]
        date: Option<String>,
    },
    /// Recompute `fully archived` / `partial archived` project tags.
    ReconcileTags(ConfigArg),
    /// Print the version.
    Version,
}
