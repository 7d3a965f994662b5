//! autoarchive: scheduled, two-phase archiving of inactive cloud resources.
//!
//! Runs once a day. On the 1st and 15th of the month it either archives
//! what the previous gate staged or, with nothing pending, discovers and
//! stages what is inactive for the next gate. Every other day it sends a
//! countdown. Nothing is archived without having been announced first.
//!
//! # Layout
//!
//! - [`core`]: catalog access, configuration, persisted state, notifications,
//!   logging, date math.
//! - [`plugins`]: the phases built on top (classification, tags, discovery,
//!   execution, tarball check, summaries, the date-gated workflow).
//!
//! # Examples
//!
//! ```bash
//! # One pass for today
//! autoarchive run --config /etc/autoarchive.toml
//!
//! # Dry run as of a given gate date
//! autoarchive run --config autoarchive.toml --date 2024-01-15 --debug
//!
//! # What is staged right now
//! autoarchive status --config autoarchive.toml --format json
//! ```

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{Cli, Command, RunCli, StatusCli};
use crate::core::catalog::{Catalog, RetryingCatalog, SnapshotCatalog};
use crate::core::config::{self, CatalogBackend, Config};
use crate::core::dx::DxCatalog;
use crate::core::error::ArchiveError;
use crate::core::logging::{self, LogConfig};
use crate::core::members::MemberDirectory;
use crate::core::output::preview_ids;
use crate::core::retry::RetryPolicy;
use crate::core::store::StateStore;
use crate::core::time::{self, parse_date};
use crate::plugins::tags::TagEngine;
use crate::plugins::workflow::{self, PhaseReport, RunMode, RunOutcome, Workflow};
use clap::Parser;
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

/// The catalog selected in configuration, with what is needed to finish it.
enum CatalogHandle {
    Platform(RetryingCatalog<DxCatalog>),
    Snapshot {
        catalog: RetryingCatalog<SnapshotCatalog>,
        path: PathBuf,
    },
}

impl CatalogHandle {
    fn open(config: &Config) -> Result<Self, ArchiveError> {
        let policy = RetryPolicy::with_retries(config.catalog.max_retries);
        match config.catalog.backend {
            CatalogBackend::Dnanexus => {
                let token = config.secrets.catalog_token.as_deref().ok_or_else(|| {
                    ArchiveError::ConfigError(format!("{} is not set", config::CATALOG_TOKEN_ENV))
                })?;
                let dx = DxCatalog::new(
                    &config.catalog.api_url,
                    token,
                    config.catalog.billed_to.clone(),
                )?;
                Ok(CatalogHandle::Platform(RetryingCatalog::new(dx, policy)))
            }
            CatalogBackend::Snapshot => {
                let path = config.catalog.snapshot.clone().ok_or_else(|| {
                    ArchiveError::ConfigError("catalog.snapshot is not set".to_string())
                })?;
                let snapshot = SnapshotCatalog::load(&path)?;
                Ok(CatalogHandle::Snapshot {
                    catalog: RetryingCatalog::new(snapshot, policy),
                    path,
                })
            }
        }
    }

    fn catalog(&self) -> &dyn Catalog {
        match self {
            CatalogHandle::Platform(c) => c,
            CatalogHandle::Snapshot { catalog, .. } => catalog,
        }
    }

    /// Write the snapshot back so the next run sees this run's mutations.
    fn finish(&self, debug: bool) -> Result<(), ArchiveError> {
        match self {
            CatalogHandle::Snapshot { catalog, path } if !debug => catalog.inner().persist(path),
            _ => Ok(()),
        }
    }
}

fn load_config(path: Option<&Path>, debug: bool, date: Option<&str>) -> Result<Config, ArchiveError> {
    let date = date.map(str::to_string);
    Config::load(path, |key: &str| {
        if debug && key == config::DEBUG_ENV {
            return Some("true".to_string());
        }
        if key == config::OVERRIDE_DATE_ENV && date.is_some() {
            return date.clone();
        }
        std::env::var(key).ok()
    })
}

fn start_logging(log_dir: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
    match logging::init_logging(LogConfig { log_dir, verbose }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} {}", "warning:".yellow().bold(), e);
            None
        }
    }
}

fn load_members(config: &Config) -> Result<MemberDirectory, ArchiveError> {
    match &config.paths.members {
        Some(path) => MemberDirectory::load(path),
        None => Ok(MemberDirectory::default()),
    }
}

fn print_outcome(outcome: &RunOutcome) {
    let mode = match outcome.mode {
        RunMode::Countdown { .. } => "countdown",
        RunMode::Gate { .. } => "gate",
    };
    println!(
        "{} {} {} ({}) -> {}",
        "autoarchive".bright_cyan().bold(),
        outcome.date,
        mode,
        outcome.run_id.dimmed(),
        outcome.terminal.as_str().bold()
    );
    match &outcome.phase {
        Some(PhaseReport::Discovered(report)) => {
            println!(
                "  staged {}  no-archive {}  never-archive {}  errors {}",
                report.staged.len().to_string().green(),
                report.no_archive.len(),
                report.never_archive.len(),
                report.errors.len().to_string().red()
            );
            let errored: Vec<String> = report.errors.iter().map(|(id, _)| id.clone()).collect();
            if !errored.is_empty() {
                println!("  {}", preview_ids(&errored, 5, 60).red());
            }
        }
        Some(PhaseReport::Executed(report)) => {
            use crate::core::store::RecordStatus;
            println!(
                "  archived {}  skipped {}  failed {}",
                report.with_status(RecordStatus::Archived).count().to_string().green(),
                report.with_status(RecordStatus::Skipped).count(),
                report.with_status(RecordStatus::Failed).count().to_string().red()
            );
            let failed = report.failed_files();
            if !failed.is_empty() {
                println!("  failed files: {}", preview_ids(&failed, 5, 60).red());
            }
        }
        None => println!("  {}", outcome.notification.headline),
    }
    if let Some(tar) = &outcome.tar {
        println!("  old tarballs {}", tar.tars.len());
    }
    if let Some(e) = &outcome.notify_error {
        println!("  {} {}", "notification failed:".red(), e);
    }
}

fn run_once(cli: RunCli, verbose: bool) -> Result<(), ArchiveError> {
    let config = match load_config(cli.config.config.as_deref(), cli.debug, cli.date.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let _log_guard = start_logging(None, verbose);
            return Err(e);
        }
    };
    let _log_guard = start_logging(config.paths.log_dir.as_deref(), verbose);
    config.log_summary();

    let notifier = crate::core::notify::from_config(&config)?;
    let members = load_members(&config)?;
    let handle = CatalogHandle::open(&config)?;
    let catalog = handle.catalog();

    let today = config.today();
    let outcome = Workflow::new(&catalog, &notifier, &config, &members).run(today);
    handle.finish(config.debug)?;
    let outcome = outcome?;
    print_outcome(&outcome);
    Ok(())
}

fn show_status(cli: StatusCli) -> Result<(), ArchiveError> {
    let config = load_config(cli.config.config.as_deref(), false, None)?;
    let state = StateStore::new(&config.paths.state).load()?;
    let mut outcomes: BTreeMap<&str, usize> = BTreeMap::new();
    for record in state.latest_outcomes().values() {
        *outcomes.entry(record.status.as_str()).or_default() += 1;
    }

    if cli.format == "json" {
        let payload = serde_json::json!({
            "state": config.paths.state.display().to_string(),
            "pending": state.pending_records(),
            "archived_log": state.archived_log.len(),
            "latest_outcomes": outcomes,
            "last_run": state.last_run,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&time::command_envelope("status", "ok", payload))?
        );
        return Ok(());
    }

    println!("{} {}", "state:".bold(), config.paths.state.display());
    match &state.last_run {
        Some(stamp) => println!(
            "{} {} {} ({})",
            "last run:".bold(),
            stamp.date,
            stamp.terminal.as_str(),
            stamp.run_id.dimmed()
        ),
        None => println!("{} never", "last run:".bold()),
    }
    println!(
        "{} {}",
        "pending:".bold(),
        state.pending_archive.len().to_string().yellow()
    );
    for record in state.pending_archive.values() {
        println!(
            "  {} {} {} (staged {})",
            record.kind.as_str(),
            record.resource_id,
            record.name.dimmed(),
            record.staged_at
        );
    }
    println!("{} {}", "log entries:".bold(), state.archived_log.len());
    for (status, count) in &outcomes {
        println!("  {} {}", status, count);
    }
    Ok(())
}

fn show_next_date(date: Option<String>) -> Result<(), ArchiveError> {
    let today = match date {
        Some(raw) => parse_date(&raw)?,
        None => time::today_local(),
    };
    match workflow::run_mode(today) {
        RunMode::Gate { tar_check } => {
            let extra = if tar_check { " (with tarball check)" } else { "" };
            println!("{} is a gate day{}", today, extra);
        }
        RunMode::Countdown {
            next_gate,
            days_left,
        } => println!("{}: {} days till the gate on {}", today, days_left, next_gate),
    }
    Ok(())
}

fn reconcile_tags(path: Option<&Path>, verbose: bool) -> Result<(), ArchiveError> {
    let config = load_config(path, false, None)?;
    let _log_guard = start_logging(config.paths.log_dir.as_deref(), verbose);
    let handle = CatalogHandle::open(&config)?;
    let catalog = handle.catalog();
    catalog.check_access()?;

    let reserved = config.reserved_projects();
    let mut projects = Vec::new();
    for prefix in &config.catalog.project_prefixes {
        projects.extend(
            catalog
                .list_projects(prefix)?
                .into_iter()
                .filter(|p| !reserved.contains(&p.id.as_str())),
        );
    }

    let outcomes = TagEngine::new(&catalog, config.debug).reconcile(&projects);
    handle.finish(config.debug)?;
    for outcome in &outcomes {
        let status = outcome.status.as_ref().map(|s| s.tag()).unwrap_or("-");
        match &outcome.error {
            None => println!("{} {}", outcome.project_id, status.green()),
            Some(e) => println!("{} {} {}", outcome.project_id, status, e.red()),
        }
    }
    println!(
        "{} {} of {} projects retagged",
        "reconcile:".bold(),
        outcomes.iter().filter(|o| o.error.is_none()).count(),
        projects.len()
    );
    Ok(())
}

/// Parse the command line and dispatch.
pub fn run() -> Result<(), ArchiveError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Run(run) => run_once(run, cli.verbose),
        Command::Status(status) => show_status(status),
        Command::NextDate { date } => show_next_date(date),
        Command::ReconcileTags(args) => reconcile_tags(args.config.as_deref(), cli.verbose),
    }
}
