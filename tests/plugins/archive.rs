#[path = "../common/mod.rs"]
mod common;

use autoarchive::core::catalog::{
    ArchivalState, ArchiveReceipt, Catalog, CatalogError, FileEntry, Resource, ResourceKind,
    ResourceRef, SnapshotCatalog,
};
use autoarchive::core::config::Config;
use autoarchive::core::store::{ArchiveRecord, ArchiveState, RecordStatus};
use autoarchive::plugins::archive::{ArchiveOutcome, append_report, archive_resource, execute};
use autoarchive::plugins::tags::{self, ArchiveStatus, FULLY_ARCHIVED, PARTIAL_ARCHIVED};
use common::*;
use std::fs;
use tempfile::tempdir;

/// Rejects whole-project and whole-folder archive calls; files go through.
struct NoBulkArchive(SnapshotCatalog);

impl Catalog for NoBulkArchive {
    fn list_projects(&self, prefix: &str) -> Result<Vec<Resource>, CatalogError> {
        self.0.list_projects(prefix)
    }
    fn list_tree(&self, project_id: &str) -> Result<Vec<FileEntry>, CatalogError> {
        self.0.list_tree(project_id)
    }
    fn set_tags(&self, resource_id: &str, add: &[&str], remove: &[&str]) -> Result<(), CatalogError> {
        self.0.set_tags(resource_id, add, remove)
    }
    fn archive(&self, resource_id: &str) -> Result<ArchiveReceipt, CatalogError> {
        match ResourceRef::parse(resource_id) {
            Ok(ResourceRef::File { .. }) => self.0.archive(resource_id),
            _ => Err(CatalogError::Other("bulk archive unavailable".to_string())),
        }
    }
}

/// Every project listing times out; trees are still readable.
struct ProjectListingOutage(SnapshotCatalog);

impl Catalog for ProjectListingOutage {
    fn list_projects(&self, _prefix: &str) -> Result<Vec<Resource>, CatalogError> {
        Err(CatalogError::Transient("findProjects: HTTP 504".to_string()))
    }
    fn list_tree(&self, project_id: &str) -> Result<Vec<FileEntry>, CatalogError> {
        self.0.list_tree(project_id)
    }
    fn set_tags(&self, resource_id: &str, add: &[&str], remove: &[&str]) -> Result<(), CatalogError> {
        self.0.set_tags(resource_id, add, remove)
    }
    fn archive(&self, resource_id: &str) -> Result<ArchiveReceipt, CatalogError> {
        self.0.archive(resource_id)
    }
}

fn staged(state: &mut ArchiveState, id: &str, kind: ResourceKind, project: &str) {
    let name = id.split_once(':').map(|(_, p)| p).unwrap_or(id);
    state.stage(ArchiveRecord::pending(id, kind, name, project, d(2024, 1, 1)));
}

fn staging_snapshot() -> autoarchive::core::catalog::CatalogSnapshot {
    let mut snapshot = base_snapshot();
    let old = ts(2023, 6, 1);
    snapshot.files.extend([
        file(STAGING, "f1", "/run_A", old),
        file(STAGING, "f2", "/run_A", old),
        file(STAGING, "f3", "/run_A/sub", old),
    ]);
    let mut notes = file(STAGING, "f4", "/run_A", old);
    notes.name = "keep_notes.txt".to_string();
    snapshot.files.push(notes);
    snapshot
}

fn states(catalog: &SnapshotCatalog) -> Vec<(String, ArchivalState)> {
    catalog
        .snapshot()
        .files
        .into_iter()
        .map(|f| (f.id, f.state))
        .collect()
}

#[test]
fn test_excluded_files_survive_and_failures_are_isolated() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let catalog = SnapshotCatalog::new(staging_snapshot());
    catalog.fail_archive("project-staging:f2");
    let mut state = ArchiveState::default();
    staged(&mut state, "project-staging:/run_A", ResourceKind::StagingDirectory, STAGING);

    let report = execute(&catalog, &config, &mut state, d(2024, 1, 15)).unwrap();

    let run_a = &report.executed[0];
    assert_eq!(run_a.record.status, RecordStatus::Archived);
    assert_eq!(
        run_a.outcome,
        ArchiveOutcome::Archived {
            files: 2,
            excluded: 1,
            failed: vec!["f2".to_string()],
            dry_run: false,
        }
    );
    assert_eq!(
        states(&catalog),
        vec![
            ("f1".to_string(), ArchivalState::Archived),
            ("f2".to_string(), ArchivalState::Live),
            ("f3".to_string(), ArchivalState::Archived),
            ("f4".to_string(), ArchivalState::Live),
        ]
    );
    assert_eq!(report.failed_files(), vec!["f2".to_string()]);
    // A file left behind means the directory is only partly done.
    assert_eq!(report.status_tags[0].status, ArchiveStatus::Partial);
    assert!(state.pending_archive.is_empty());
}

#[test]
fn test_project_listing_outage_fails_only_project_records() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let mut snapshot = base_snapshot();
    snapshot
        .projects
        .push(project("project-A", "002_A", ts(2023, 6, 1), &[]));
    snapshot.files.extend([
        file("project-A", "a1", "/", ts(2023, 6, 1)),
        file(STAGING, "s1", "/run_A", ts(2023, 6, 1)),
    ]);
    let catalog = ProjectListingOutage(SnapshotCatalog::new(snapshot));
    let mut state = ArchiveState::default();
    staged(&mut state, "project-A", ResourceKind::Project002, "project-A");
    staged(&mut state, "project-staging:/run_A", ResourceKind::StagingDirectory, STAGING);

    let report = execute(&catalog, &config, &mut state, d(2024, 1, 15)).unwrap();

    let outcome_of = |id: &str| {
        report
            .executed
            .iter()
            .find(|e| e.record.resource_id == id)
            .unwrap()
    };
    let project_a = outcome_of("project-A");
    assert_eq!(project_a.record.status, RecordStatus::Failed);
    assert!(
        project_a
            .record
            .detail
            .as_deref()
            .unwrap()
            .contains("cannot list projects")
    );
    assert_eq!(outcome_of("project-staging:/run_A").record.status, RecordStatus::Archived);
    assert_eq!(
        states(&catalog.0),
        vec![
            ("a1".to_string(), ArchivalState::Live),
            ("s1".to_string(), ArchivalState::Archived),
        ]
    );
    assert!(state.pending_archive.is_empty());
    assert!(!state.was_archived("project-A"));
}

#[test]
fn test_excluded_file_leaves_project_partial() {
    let tmp = tempdir().unwrap();
    let raw = config_toml(tmp.path(), "").replace(
        "[policy.project_002]\n",
        "[policy.project_002]\nexclude_patterns = [\"^keep_\"]\n",
    );
    let config = Config::from_toml_str(&raw, |_| None).unwrap();
    let mut snapshot = base_snapshot();
    snapshot
        .projects
        .push(project("project-A", "002_A", ts(2023, 6, 1), &[]));
    let mut notes = file("project-A", "a2", "/", ts(2023, 6, 1));
    notes.name = "keep_notes.txt".to_string();
    snapshot
        .files
        .extend([file("project-A", "a1", "/", ts(2023, 6, 1)), notes]);
    let catalog = SnapshotCatalog::new(snapshot);
    let mut state = ArchiveState::default();
    staged(&mut state, "project-A", ResourceKind::Project002, "project-A");

    let report = execute(&catalog, &config, &mut state, d(2024, 1, 15)).unwrap();

    assert_eq!(
        report.executed[0].outcome,
        ArchiveOutcome::Archived {
            files: 1,
            excluded: 1,
            failed: Vec::new(),
            dry_run: false,
        }
    );
    assert_eq!(report.status_tags[0].status, ArchiveStatus::Partial);
    let snapshot = catalog.snapshot();
    let project_a = snapshot.projects.iter().find(|p| p.id == "project-A").unwrap();
    assert!(project_a.tags.contains(PARTIAL_ARCHIVED));
    assert!(!project_a.tags.contains(FULLY_ARCHIVED));
    // The tag agrees with what reconciliation would derive from the files.
    let files = catalog.list_tree("project-A").unwrap();
    assert_eq!(tags::status_from_files(&files), Some(ArchiveStatus::Partial));
}

#[test]
fn test_one_failed_project_does_not_stop_the_batch() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let mut snapshot = base_snapshot();
    for id in ["A", "B", "C"] {
        let project_id = format!("project-{}", id);
        snapshot.projects.push(project(
            &project_id,
            &format!("002_{}", id),
            ts(2023, 6, 1),
            &[],
        ));
        snapshot
            .files
            .push(file(&project_id, &format!("{}1", id.to_lowercase()), "/", ts(2023, 6, 1)));
    }
    let catalog = SnapshotCatalog::new(snapshot);
    catalog.fail_archive("project-B");
    let mut state = ArchiveState::default();
    for id in ["project-A", "project-B", "project-C"] {
        staged(&mut state, id, ResourceKind::Project002, id);
    }

    let report = execute(&catalog, &config, &mut state, d(2024, 1, 15)).unwrap();

    let statuses: Vec<(&str, RecordStatus)> = report
        .executed
        .iter()
        .map(|e| (e.record.resource_id.as_str(), e.record.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("project-A", RecordStatus::Archived),
            ("project-B", RecordStatus::Failed),
            ("project-C", RecordStatus::Archived),
        ]
    );
    assert!(state.pending_archive.is_empty());
    assert_eq!(state.archived_log.len(), 3);
    assert!(state.was_archived("project-A"));
    assert!(!state.was_archived("project-B"));
    assert!(state.was_archived("project-C"));
    assert_eq!(
        states(&catalog),
        vec![
            ("a1".to_string(), ArchivalState::Archived),
            ("b1".to_string(), ArchivalState::Live),
            ("c1".to_string(), ArchivalState::Archived),
        ]
    );
    let tagged: Vec<&str> = report
        .status_tags
        .iter()
        .map(|t| t.project_id.as_str())
        .collect();
    assert_eq!(tagged, vec!["project-A", "project-C"]);
}

#[test]
fn test_whole_archive_failure_falls_back_to_files() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let mut snapshot = base_snapshot();
    snapshot
        .projects
        .push(project("project-A", "002_A", ts(2023, 6, 1), &[]));
    snapshot.files.extend([
        file("project-A", "a1", "/", ts(2023, 6, 1)),
        file("project-A", "a2", "/data", ts(2023, 6, 1)),
    ]);
    let catalog = NoBulkArchive(SnapshotCatalog::new(snapshot));
    let resource = catalog
        .list_projects("002")
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let files = catalog.list_tree("project-A").unwrap();

    let outcome = archive_resource(&catalog, &resource, &files, &config);

    assert_eq!(
        outcome,
        ArchiveOutcome::Archived {
            files: 2,
            excluded: 0,
            failed: Vec::new(),
            dry_run: false,
        }
    );
    assert!(
        states(&catalog.0)
            .iter()
            .all(|(_, s)| *s == ArchivalState::Archived)
    );
}

#[test]
fn test_policy_debug_mode_simulates_archive() {
    let tmp = tempdir().unwrap();
    let mut config = config(tmp.path());
    config.policies.project_002.debug_mode = true;
    let mut snapshot = base_snapshot();
    snapshot
        .projects
        .push(project("project-A", "002_A", ts(2023, 6, 1), &[]));
    snapshot
        .files
        .push(file("project-A", "a1", "/", ts(2023, 6, 1)));
    let catalog = SnapshotCatalog::new(snapshot);
    let resource = catalog
        .list_projects("002")
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let files = catalog.list_tree("project-A").unwrap();

    let outcome = archive_resource(&catalog, &resource, &files, &config);

    assert_eq!(
        outcome,
        ArchiveOutcome::Archived {
            files: 1,
            excluded: 0,
            failed: Vec::new(),
            dry_run: true,
        }
    );
    assert_eq!(states(&catalog), vec![("a1".to_string(), ArchivalState::Live)]);
}

#[test]
fn test_every_file_failing_marks_record_failed() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let mut snapshot = base_snapshot();
    snapshot
        .projects
        .push(project("project-A", "002_A", ts(2023, 6, 1), &[]));
    snapshot
        .files
        .push(file("project-A", "a1", "/", ts(2023, 6, 1)));
    let catalog = SnapshotCatalog::new(snapshot);
    catalog.fail_archive("project-A");
    let mut state = ArchiveState::default();
    staged(&mut state, "project-A", ResourceKind::Project002, "project-A");

    let report = execute(&catalog, &config, &mut state, d(2024, 1, 15)).unwrap();

    assert_eq!(report.executed[0].record.status, RecordStatus::Failed);
    assert_eq!(report.failed_files(), vec!["a1".to_string()]);
    assert!(report.status_tags.is_empty());
    assert!(!state.was_archived("project-A"));
    assert_eq!(state.archived_log[0].status, RecordStatus::Failed);
}

#[test]
fn test_status_tag_failure_downgrades_project() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let mut snapshot = base_snapshot();
    snapshot
        .projects
        .push(project("project-A", "002_A", ts(2023, 6, 1), &[]));
    snapshot
        .files
        .push(file("project-A", "a1", "/", ts(2023, 6, 1)));
    let catalog = SnapshotCatalog::new(snapshot);
    catalog.fail_tags("project-A");
    let mut state = ArchiveState::default();
    staged(&mut state, "project-A", ResourceKind::Project002, "project-A");

    let report = execute(&catalog, &config, &mut state, d(2024, 1, 15)).unwrap();

    let record = &report.executed[0];
    assert_eq!(record.record.status, RecordStatus::Failed);
    assert!(
        record
            .record
            .detail
            .as_deref()
            .unwrap()
            .contains("status tag write failed")
    );
    assert!(report.status_tags[0].error.is_some());
    // The data itself was archived.
    assert_eq!(states(&catalog), vec![("a1".to_string(), ArchivalState::Archived)]);
}

#[test]
fn test_vanished_and_fully_excluded_resources_are_skipped() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let mut snapshot = base_snapshot();
    let mut only_excluded = file(STAGING, "k1", "/run_B", ts(2023, 6, 1));
    only_excluded.name = "keep_everything.txt".to_string();
    snapshot.files.push(only_excluded);
    let catalog = SnapshotCatalog::new(snapshot);
    let mut state = ArchiveState::default();
    staged(&mut state, "project-staging:/run_gone", ResourceKind::StagingDirectory, STAGING);
    staged(&mut state, "project-staging:/run_B", ResourceKind::StagingDirectory, STAGING);

    let report = execute(&catalog, &config, &mut state, d(2024, 1, 15)).unwrap();

    assert_eq!(report.with_status(RecordStatus::Skipped).count(), 2);
    let gone = report
        .executed
        .iter()
        .find(|e| e.record.resource_id == "project-staging:/run_gone")
        .unwrap();
    assert_eq!(
        gone.outcome,
        ArchiveOutcome::Skipped {
            reason: "resource no longer exists".to_string()
        }
    );
    assert!(report.status_tags.is_empty());
    assert!(state.pending_archive.is_empty());
}

#[test]
fn test_append_report_accumulates_sections() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("reports/archived.txt");

    append_report(&path, d(2024, 1, 15), &["project-A | 002_A | 3".to_string()]).unwrap();
    append_report(&path, d(2024, 2, 1), &[]).unwrap();
    append_report(&path, d(2024, 2, 15), &["project-B | 002_B | 1".to_string()]).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("=== 2024-01-15 ===\nproject-A | 002_A | 3"));
    assert!(!raw.contains("2024-02-01"));
    assert!(raw.contains("=== 2024-02-15 ===\nproject-B | 002_B | 1"));
}
