#[path = "../common/mod.rs"]
mod common;

use autoarchive::core::catalog::{ArchivalState, Catalog, SnapshotCatalog};
use autoarchive::core::error::ArchiveError;
use autoarchive::core::members::MemberDirectory;
use autoarchive::core::notify::{MemoryNotifier, NotificationKind};
use autoarchive::core::store::{RecordStatus, StateStore, TerminalState};
use autoarchive::plugins::archive::ArchiveOutcome;
use autoarchive::plugins::tags::{FULLY_ARCHIVED, NO_ARCHIVE, PARTIAL_ARCHIVED};
use autoarchive::plugins::workflow::{PhaseReport, RunMode, Workflow};
use common::*;
use std::fs;
use tempfile::tempdir;

fn gate_snapshot() -> autoarchive::core::catalog::CatalogSnapshot {
    let mut snapshot = base_snapshot();
    snapshot
        .projects
        .push(project("project-A", "002_A", ts(2023, 9, 10), &[]));
    snapshot
        .files
        .push(file("project-A", "file-1", "/", ts(2023, 9, 10)));
    snapshot
        .files
        .push(file(STAGING, "s1", "/run_A", ts(2023, 9, 1)));
    snapshot
        .files
        .push(file(STAGING, "s2", "/keep_me", ts(2023, 9, 1)));
    snapshot
        .files
        .push(file(STAGING, "s3", "/run_new", ts(2023, 12, 20)));
    snapshot
}

fn file_state(catalog: &SnapshotCatalog, project: &str, id: &str) -> ArchivalState {
    catalog
        .snapshot()
        .files
        .into_iter()
        .find(|f| f.project_id == project && f.id == id)
        .map(|f| f.state)
        .unwrap()
}

fn project_tags(catalog: &SnapshotCatalog, id: &str) -> Vec<String> {
    catalog
        .snapshot()
        .projects
        .into_iter()
        .find(|p| p.id == id)
        .map(|p| p.tags.into_iter().collect())
        .unwrap()
}

#[test]
fn test_gate_cycle_discovers_counts_down_then_archives() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let catalog = SnapshotCatalog::new(gate_snapshot());
    let notifier = MemoryNotifier::new();
    let members = MemberDirectory::default();
    let workflow = Workflow::new(&catalog, &notifier, &config, &members);

    let first = workflow.run(d(2024, 1, 1)).unwrap();
    assert_eq!(first.mode, RunMode::Gate { tar_check: true });
    assert_eq!(first.terminal, TerminalState::Discovered);
    let Some(PhaseReport::Discovered(report)) = &first.phase else {
        panic!("expected discovery");
    };
    let mut staged: Vec<&str> = report.staged.iter().map(|s| s.resource.id.as_str()).collect();
    staged.sort();
    assert_eq!(staged, vec!["project-A", "project-staging:/run_A"]);
    assert_eq!(file_state(&catalog, "project-A", "file-1"), ArchivalState::Live);

    let store = StateStore::new(&config.paths.state);
    assert_eq!(store.load().unwrap().pending_archive.len(), 2);
    let saved = fs::read(&config.paths.state).unwrap();

    let countdown = workflow.run(d(2024, 1, 7)).unwrap();
    assert_eq!(countdown.terminal, TerminalState::CountdownSent);
    assert!(countdown.phase.is_none());
    assert!(
        countdown
            .notification
            .headline
            .contains("8 days till archiving on 2024-01-15 (2 staged)")
    );
    assert_eq!(fs::read(&config.paths.state).unwrap(), saved);

    let gate = workflow.run(d(2024, 1, 15)).unwrap();
    assert_eq!(gate.terminal, TerminalState::Executed);
    let Some(PhaseReport::Executed(report)) = &gate.phase else {
        panic!("expected execution");
    };
    assert_eq!(report.with_status(RecordStatus::Archived).count(), 2);

    assert_eq!(file_state(&catalog, "project-A", "file-1"), ArchivalState::Archived);
    assert_eq!(file_state(&catalog, STAGING, "s1"), ArchivalState::Archived);
    assert_eq!(file_state(&catalog, STAGING, "s2"), ArchivalState::Live);
    assert_eq!(file_state(&catalog, STAGING, "s3"), ArchivalState::Live);
    assert!(project_tags(&catalog, "project-A").contains(&FULLY_ARCHIVED.to_string()));
    assert!(project_tags(&catalog, STAGING).contains(&PARTIAL_ARCHIVED.to_string()));

    let state = store.load().unwrap();
    assert!(state.pending_archive.is_empty());
    assert!(state.was_archived("project-A"));
    assert_eq!(state.last_run.unwrap().terminal, TerminalState::Executed);

    let archived = fs::read_to_string(&config.paths.report).unwrap();
    assert!(archived.contains("=== 2024-01-15 ==="));
    assert!(archived.contains("project-A | 002_A | 1"));

    let kinds: Vec<NotificationKind> = notifier.sent().iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        vec![
            NotificationKind::Discovery,
            NotificationKind::Countdown,
            NotificationKind::Execution
        ]
    );

    // Next gate: nothing pending, nothing left to stage.
    let next = workflow.run(d(2024, 2, 1)).unwrap();
    let Some(PhaseReport::Discovered(report)) = &next.phase else {
        panic!("expected discovery");
    };
    assert!(report.staged.iter().all(|s| s.resource.id != "project-A"));
}

#[test]
fn test_countdown_mutates_nothing() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let catalog = SnapshotCatalog::new(gate_snapshot());
    let before = catalog.snapshot();
    let notifier = MemoryNotifier::new();
    let members = MemberDirectory::default();

    let outcome = Workflow::new(&catalog, &notifier, &config, &members)
        .run(d(2024, 1, 7))
        .unwrap();

    assert_eq!(outcome.terminal, TerminalState::CountdownSent);
    assert!(!config.paths.state.exists());
    assert_eq!(catalog.snapshot(), before);
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(notifier.last().unwrap().kind, NotificationKind::Countdown);
}

#[test]
fn test_modified_after_staging_is_skipped() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let notifier = MemoryNotifier::new();
    let members = MemberDirectory::default();

    let catalog = SnapshotCatalog::new(gate_snapshot());
    Workflow::new(&catalog, &notifier, &config, &members)
        .run(d(2024, 1, 1))
        .unwrap();

    let mut touched = catalog.snapshot();
    for p in touched.projects.iter_mut().filter(|p| p.id == "project-A") {
        p.last_modified = Some(ts(2024, 1, 10));
    }
    let catalog = SnapshotCatalog::new(touched);
    let outcome = Workflow::new(&catalog, &notifier, &config, &members)
        .run(d(2024, 1, 15))
        .unwrap();

    let Some(PhaseReport::Executed(report)) = &outcome.phase else {
        panic!("expected execution");
    };
    let a = report
        .executed
        .iter()
        .find(|e| e.record.resource_id == "project-A")
        .unwrap();
    assert_eq!(a.record.status, RecordStatus::Skipped);
    assert_eq!(file_state(&catalog, "project-A", "file-1"), ArchivalState::Live);
    assert!(!project_tags(&catalog, "project-A").contains(&FULLY_ARCHIVED.to_string()));
}

#[test]
fn test_no_archive_added_before_gate_cancels() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let catalog = SnapshotCatalog::new(gate_snapshot());
    let notifier = MemoryNotifier::new();
    let members = MemberDirectory::default();
    let workflow = Workflow::new(&catalog, &notifier, &config, &members);

    workflow.run(d(2024, 1, 1)).unwrap();
    catalog.set_tags("project-A", &[NO_ARCHIVE], &[]).unwrap();
    let outcome = workflow.run(d(2024, 1, 15)).unwrap();

    let Some(PhaseReport::Executed(report)) = &outcome.phase else {
        panic!("expected execution");
    };
    let a = report
        .executed
        .iter()
        .find(|e| e.record.resource_id == "project-A")
        .unwrap();
    assert_eq!(
        a.outcome,
        ArchiveOutcome::Skipped {
            reason: "tagged no-archive".to_string()
        }
    );
    assert_eq!(file_state(&catalog, "project-A", "file-1"), ArchivalState::Live);
}

#[test]
fn test_corrupt_state_fails_loudly() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    fs::write(&config.paths.state, b"{ not a state file").unwrap();
    let catalog = SnapshotCatalog::new(gate_snapshot());
    let before = catalog.snapshot();
    let notifier = MemoryNotifier::new();
    let members = MemberDirectory::default();

    let err = Workflow::new(&catalog, &notifier, &config, &members)
        .run(d(2024, 1, 15))
        .unwrap_err();

    assert!(matches!(err, ArchiveError::StateCorrupt { .. }));
    assert!(err.is_fatal_setup());
    assert_eq!(notifier.last().unwrap().kind, NotificationKind::Failure);
    assert_eq!(
        fs::read(&config.paths.state).unwrap(),
        b"{ not a state file".to_vec()
    );
    assert_eq!(catalog.snapshot(), before);
}

#[test]
fn test_debug_run_is_dry() {
    let tmp = tempdir().unwrap();
    let config = debug_config(tmp.path());
    assert!(config.paths.state.ends_with("state.debug.json"));

    let mut snapshot = gate_snapshot();
    snapshot
        .projects
        .push(project("project-B", "002_B", ts(2023, 8, 1), &[NO_ARCHIVE]));
    snapshot
        .files
        .push(file("project-B", "file-2", "/", ts(2023, 8, 1)));
    let catalog = SnapshotCatalog::new(snapshot);
    let notifier = MemoryNotifier::new();
    let members = MemberDirectory::default();
    let workflow = Workflow::new(&catalog, &notifier, &config, &members);

    let first = workflow.run(d(2024, 1, 1)).unwrap();
    let Some(PhaseReport::Discovered(report)) = &first.phase else {
        panic!("expected discovery");
    };
    let decay = report
        .tag_changes
        .iter()
        .find(|m| m.resource_id == "project-B")
        .unwrap();
    assert!(!decay.applied);
    assert!(project_tags(&catalog, "project-B").contains(&NO_ARCHIVE.to_string()));

    let gate = workflow.run(d(2024, 1, 15)).unwrap();
    let Some(PhaseReport::Executed(report)) = &gate.phase else {
        panic!("expected execution");
    };
    let a = report
        .executed
        .iter()
        .find(|e| e.record.resource_id == "project-A")
        .unwrap();
    assert!(matches!(a.outcome, ArchiveOutcome::Archived { dry_run: true, .. }));
    assert_eq!(file_state(&catalog, "project-A", "file-1"), ArchivalState::Live);
    assert!(project_tags(&catalog, "project-A").is_empty());
    assert!(tmp.path().join("state.debug.json").exists());
    assert!(!tmp.path().join("state.json").exists());
}

#[test]
fn test_notification_failure_keeps_run_result() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let catalog = SnapshotCatalog::new(gate_snapshot());
    let notifier = MemoryNotifier::new();
    notifier.fail_sends(true);
    let members = MemberDirectory::default();

    let outcome = Workflow::new(&catalog, &notifier, &config, &members)
        .run(d(2024, 1, 1))
        .unwrap();

    assert!(outcome.notify_error.is_some());
    assert_eq!(outcome.terminal, TerminalState::Discovered);
    let state = StateStore::new(&config.paths.state).load().unwrap();
    assert_eq!(state.pending_archive.len(), 2);
}
