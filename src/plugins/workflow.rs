//! Date-gated run orchestration.
//!
//! A run is one pass: load state, decide the mode from the date, do at most
//! one phase (execute or discover), save state once, send one notification.
//! Countdown runs mutate nothing.

use crate::core::catalog::Catalog;
use crate::core::config::Config;
use crate::core::error::ArchiveError;
use crate::core::members::MemberDirectory;
use crate::core::notify::{Notification, Notifier};
use crate::core::store::{ArchiveState, RunStamp, StateStore, TerminalState};
use crate::core::time::{self, days_until, is_gate_day, next_gate_date};
use crate::plugins::archive::{self, ExecutionReport};
use crate::plugins::discover::{self, DiscoveryReport};
use crate::plugins::summary::{self, DiscoveryContext};
use crate::plugins::tar::{self, TarReport};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum RunMode {
    Countdown { next_gate: NaiveDate, days_left: i64 },
    Gate { tar_check: bool },
}

/// Pure function of the date.
pub fn run_mode(date: NaiveDate) -> RunMode {
    if is_gate_day(date) {
        RunMode::Gate {
            tar_check: date.day() == 1,
        }
    } else {
        let next_gate = next_gate_date(date);
        RunMode::Countdown {
            next_gate,
            days_left: days_until(date, next_gate),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case", tag = "phase")]
pub enum PhaseReport {
    Discovered(DiscoveryReport),
    Executed(ExecutionReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub date: NaiveDate,
    pub mode: RunMode,
    pub terminal: TerminalState,
    pub phase: Option<PhaseReport>,
    pub tar: Option<TarReport>,
    pub notification: Notification,
    pub notify_error: Option<String>,
}

pub struct Workflow<'a, C: Catalog, N: Notifier> {
    pub catalog: &'a C,
    pub notifier: &'a N,
    pub config: &'a Config,
    pub members: &'a MemberDirectory,
}

impl<'a, C: Catalog, N: Notifier> Workflow<'a, C, N> {
    pub fn new(
        catalog: &'a C,
        notifier: &'a N,
        config: &'a Config,
        members: &'a MemberDirectory,
    ) -> Self {
        Self {
            catalog,
            notifier,
            config,
            members,
        }
    }

    fn deliver(&self, notification: &Notification) -> Option<String> {
        match self.notifier.send(notification) {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(
                    kind = notification.kind.as_str(),
                    error = %e,
                    "notification failed"
                );
                Some(e.to_string())
            }
        }
    }

    /// Run one pass for `today`.
    ///
    /// Setup failures (corrupt state, denied catalog access) return `Err`
    /// before anything is mutated. Every `Err` is preceded by a failure
    /// notification.
    pub fn run(&self, today: NaiveDate) -> Result<RunOutcome, ArchiveError> {
        let run_id = time::new_run_id();
        let span = tracing::info_span!("run", run_id = %run_id, date = %today);
        let _guard = span.enter();
        self.run_inner(run_id, today).inspect_err(|e| {
            tracing::error!(error = %e, "run failed");
            self.deliver(&summary::failure(today, &e.to_string()));
        })
    }

    fn run_inner(&self, run_id: String, today: NaiveDate) -> Result<RunOutcome, ArchiveError> {
        let store = StateStore::new(&self.config.paths.state);
        let mut state = store.load()?;
        state.begin_run();

        let mode = run_mode(today);
        tracing::info!(mode = ?mode, pending = state.pending_archive.len(), "run started");

        let tar_check = match mode {
            RunMode::Countdown {
                next_gate,
                days_left,
            } => {
                let notification =
                    summary::countdown(today, next_gate, days_left, state.pending_archive.len());
                let notify_error = self.deliver(&notification);
                return Ok(RunOutcome {
                    run_id,
                    date: today,
                    mode,
                    terminal: TerminalState::CountdownSent,
                    phase: None,
                    tar: None,
                    notification,
                    notify_error,
                });
            }
            RunMode::Gate { tar_check } => tar_check,
        };

        self.catalog.check_access()?;

        let tar = if tar_check {
            match tar::find_old_tars(self.catalog, self.config, today) {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(error = %e, "old tarball check failed");
                    None
                }
            }
        } else {
            None
        };

        let (terminal, phase) = self.run_phase(&mut state, today)?;
        state.last_run = Some(RunStamp {
            run_id: run_id.clone(),
            date: today,
            terminal,
        });
        store.save(&state)?;

        if let PhaseReport::Executed(report) = &phase {
            self.write_reports(report, today);
        }

        let tar_months = self.config.policies.tar_months;
        let notification = match &phase {
            PhaseReport::Executed(report) => {
                summary::execution(report, today, tar.as_ref(), tar_months)
            }
            PhaseReport::Discovered(report) => summary::discovery(
                report,
                &DiscoveryContext {
                    today,
                    archive_date: next_gate_date(today),
                    url_prefix: &self.config.catalog.url_prefix,
                    members: self.members,
                    tar: tar.as_ref(),
                    tar_months,
                },
            ),
        };
        let notify_error = self.deliver(&notification);

        tracing::info!(terminal = terminal.as_str(), "run finished");
        Ok(RunOutcome {
            run_id,
            date: today,
            mode,
            terminal,
            phase: Some(phase),
            tar,
            notification,
            notify_error,
        })
    }

    fn run_phase(
        &self,
        state: &mut ArchiveState,
        today: NaiveDate,
    ) -> Result<(TerminalState, PhaseReport), ArchiveError> {
        if state.has_pending() {
            let report = archive::execute(self.catalog, self.config, state, today)?;
            Ok((TerminalState::Executed, PhaseReport::Executed(report)))
        } else {
            let report = discover::discover(self.catalog, self.config, state, today)?;
            Ok((TerminalState::Discovered, PhaseReport::Discovered(report)))
        }
    }

    /// Append to the archived and failed-archive reports. Report failures
    /// are logged; the state is already saved.
    fn write_reports(&self, report: &ExecutionReport, today: NaiveDate) {
        let paths = &self.config.paths;
        if let Err(e) = archive::append_report(&paths.report, today, &report.archived_lines()) {
            tracing::warn!(path = %paths.report.display(), error = %e, "cannot write archived report");
        }
        if let Err(e) = archive::append_report(&paths.failed_report, today, &report.failed_files())
        {
            tracing::warn!(path = %paths.failed_report.display(), error = %e, "cannot write failed report");
        }
    }
}
