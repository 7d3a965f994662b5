#[path = "../common/mod.rs"]
mod common;

use autoarchive::core::catalog::{
    ArchivalState, ArchiveReceipt, Catalog, CatalogError, CatalogSnapshot, FileEntry, Resource,
    ResourceKind, SnapshotCatalog,
};
use autoarchive::core::store::{ArchiveState, RecordStatus};
use autoarchive::plugins::archive::execute;
use autoarchive::plugins::discover::{SkipReason, discover};
use autoarchive::plugins::tags::{ARCHIVE, NEVER_ARCHIVE, NO_ARCHIVE};
use common::*;
use tempfile::tempdir;

/// Fails every `list_projects` call for one prefix.
struct PrefixOutage(SnapshotCatalog, &'static str);

impl Catalog for PrefixOutage {
    fn list_projects(&self, prefix: &str) -> Result<Vec<Resource>, CatalogError> {
        if prefix == self.1 {
            return Err(CatalogError::Transient("findProjects: HTTP 503".to_string()));
        }
        self.0.list_projects(prefix)
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

fn skip_reason(report: &autoarchive::plugins::discover::DiscoveryReport, id: &str) -> Option<SkipReason> {
    report
        .skipped
        .iter()
        .find(|(skipped, _)| skipped == id)
        .map(|(_, reason)| *reason)
}

fn staged_ids(report: &autoarchive::plugins::discover::DiscoveryReport) -> Vec<String> {
    let mut ids: Vec<String> = report.staged.iter().map(|s| s.resource.id.clone()).collect();
    ids.sort();
    ids
}

fn precedence_snapshot() -> CatalogSnapshot {
    let mut snapshot = base_snapshot();
    let old = ts(2023, 6, 1);
    let recent = ts(2023, 12, 20);
    snapshot.projects.extend([
        project("project-never", "002_never", old, &[NEVER_ARCHIVE, ARCHIVE]),
        project("project-forced", "002_forced", recent, &[ARCHIVE]),
        project("project-both", "002_both", recent, &[NO_ARCHIVE, ARCHIVE]),
        project("project-recent", "002_recent", recent, &[]),
        project("project-plain", "002_plain", old, &[]),
        project("project-dead", "002_dead", old, &[]),
        project("project-held", "002_held", recent, &[NO_ARCHIVE]),
        project("project-expired", "003_expired", old, &[NO_ARCHIVE]),
    ]);
    for id in [
        "project-never",
        "project-forced",
        "project-both",
        "project-recent",
        "project-plain",
        "project-held",
        "project-expired",
    ] {
        snapshot.files.push(file(id, "f", "/", old));
    }
    let mut dead = file("project-dead", "f", "/", old);
    dead.state = ArchivalState::Archived;
    snapshot.files.push(dead);
    snapshot
}

#[test]
fn test_tag_precedence() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let catalog = SnapshotCatalog::new(precedence_snapshot());
    let mut state = ArchiveState::default();

    let report = discover(&catalog, &config, &mut state, d(2024, 1, 1)).unwrap();

    assert_eq!(
        staged_ids(&report),
        vec![
            "project-both",
            "project-expired",
            "project-forced",
            "project-plain"
        ]
    );
    assert_eq!(skip_reason(&report, "project-never"), Some(SkipReason::NeverArchive));
    assert_eq!(skip_reason(&report, "project-recent"), Some(SkipReason::TooRecent));
    assert_eq!(skip_reason(&report, "project-dead"), Some(SkipReason::NoLiveFiles));
    assert_eq!(skip_reason(&report, "project-held"), Some(SkipReason::TooRecent));

    assert_eq!(report.never_archive.len(), 1);
    assert_eq!(report.no_archive.len(), 1);
    assert_eq!(report.no_archive[0].id, "project-held");

    let expired = report
        .staged
        .iter()
        .find(|s| s.resource.id == "project-expired")
        .unwrap();
    assert!(expired.previously_exempt);
    assert_eq!(report.previously_exempt().count(), 1);
    assert_eq!(report.staged_of(ResourceKind::Project002).count(), 3);

    // The expired hold is stripped from the catalog.
    let tags = catalog
        .snapshot()
        .projects
        .into_iter()
        .find(|p| p.id == "project-expired")
        .unwrap()
        .tags;
    assert!(!tags.contains(NO_ARCHIVE));
    assert_eq!(state.pending_archive.len(), 4);
}

#[test]
fn test_archive_tag_overrides_hold_through_execution() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let catalog = SnapshotCatalog::new(precedence_snapshot());
    let mut state = ArchiveState::default();

    let report = discover(&catalog, &config, &mut state, d(2024, 1, 1)).unwrap();
    let both = report
        .staged
        .iter()
        .find(|s| s.resource.id == "project-both")
        .unwrap();
    assert!(!both.previously_exempt);
    assert!(report.no_archive.iter().all(|r| r.id != "project-both"));

    state.begin_run();
    let executed = execute(&catalog, &config, &mut state, d(2024, 1, 15)).unwrap();
    let both = executed
        .executed
        .iter()
        .find(|e| e.record.resource_id == "project-both")
        .unwrap();
    assert_eq!(both.record.status, RecordStatus::Archived);
    assert!(state.was_archived("project-both"));
    let file = catalog
        .snapshot()
        .files
        .into_iter()
        .find(|f| f.project_id == "project-both")
        .unwrap();
    assert_eq!(file.state, ArchivalState::Archived);
}

#[test]
fn test_discovery_is_idempotent() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let catalog = SnapshotCatalog::new(precedence_snapshot());
    let mut state = ArchiveState::default();

    let first = discover(&catalog, &config, &mut state, d(2024, 1, 1)).unwrap();
    let pending = state.pending_archive.clone();
    state.begin_run();
    let second = discover(&catalog, &config, &mut state, d(2024, 1, 1)).unwrap();

    assert!(first.staged.iter().all(|s| s.newly_staged));
    assert!(second.staged.iter().all(|s| !s.newly_staged));
    assert_eq!(staged_ids(&first), staged_ids(&second));
    assert_eq!(state.pending_archive, pending);
}

#[test]
fn test_staging_containers_aggregate_files() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let mut snapshot = base_snapshot();
    snapshot.files.extend([
        // Newest file decides the age of the directory.
        file(STAGING, "a1", "/run_mixed", ts(2023, 6, 1)),
        file(STAGING, "a2", "/run_mixed/sub", ts(2023, 12, 28)),
        file(STAGING, "b1", "/run_old", ts(2023, 6, 1)),
        file(STAGING, "c1", "/keep_refs", ts(2023, 6, 1)),
        file(STAGING, "p1", "/processed/run_X", ts(2023, 6, 1)),
        file(STAGING, "p2", "/processed/run_Y", ts(2023, 12, 28)),
    ]);
    let mut pinned = file(STAGING, "n1", "/run_pinned", ts(2023, 6, 1));
    pinned.tags.insert(NEVER_ARCHIVE.to_string());
    snapshot.files.push(pinned);

    let catalog = SnapshotCatalog::new(snapshot);
    let mut state = ArchiveState::default();
    let report = discover(&catalog, &config, &mut state, d(2024, 1, 1)).unwrap();

    assert_eq!(
        staged_ids(&report),
        vec!["project-staging:/processed/run_X", "project-staging:/run_old"]
    );
    assert_eq!(
        skip_reason(&report, "project-staging:/run_mixed"),
        Some(SkipReason::TooRecent)
    );
    assert_eq!(
        skip_reason(&report, "project-staging:/keep_refs"),
        Some(SkipReason::Excluded)
    );
    assert_eq!(
        skip_reason(&report, "project-staging:/run_pinned"),
        Some(SkipReason::NeverArchive)
    );
    assert!(skip_reason(&report, "project-staging:/processed").is_none());
    assert!(
        report
            .staged
            .iter()
            .all(|s| s.resource.kind == ResourceKind::StagingDirectory)
    );
}

#[test]
fn test_precision_listing_error_is_recorded() {
    let tmp = tempdir().unwrap();
    let config = config_with(
        tmp.path(),
        r#"precision_projects = ["project-precision", "project-gone"]"#,
    );
    let mut snapshot = precedence_snapshot();
    snapshot
        .files
        .push(file(PRECISION, "x1", "/sample_1", ts(2023, 10, 1)));
    let catalog = SnapshotCatalog::new(snapshot);
    let mut state = ArchiveState::default();

    let report = discover(&catalog, &config, &mut state, d(2024, 1, 1)).unwrap();

    assert!(report.errors.iter().any(|(id, _)| id == "project-gone"));
    assert!(
        staged_ids(&report).contains(&"project-precision:/sample_1".to_string())
    );
}

#[test]
fn test_missing_staging_project_is_recorded() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let mut snapshot = precedence_snapshot();
    snapshot.projects.retain(|p| p.id != STAGING);
    let catalog = SnapshotCatalog::new(snapshot);
    let mut state = ArchiveState::default();

    let report = discover(&catalog, &config, &mut state, d(2024, 1, 1)).unwrap();

    assert!(report.errors.iter().any(|(id, _)| id == STAGING));
    assert!(
        report
            .staged
            .iter()
            .all(|s| s.resource.kind != ResourceKind::StagingDirectory)
    );
    assert!(staged_ids(&report).contains(&"project-plain".to_string()));
}

#[test]
fn test_failed_prefix_listing_keeps_other_families() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let mut snapshot = precedence_snapshot();
    snapshot
        .files
        .push(file(STAGING, "s1", "/run_A", ts(2023, 6, 1)));
    let catalog = PrefixOutage(SnapshotCatalog::new(snapshot), "003");
    let mut state = ArchiveState::default();

    let report = discover(&catalog, &config, &mut state, d(2024, 1, 1)).unwrap();

    let (_, reason) = report
        .errors
        .iter()
        .find(|(id, _)| id == "003*")
        .unwrap();
    assert!(reason.contains("project listing failed"));
    let staged = staged_ids(&report);
    assert!(staged.contains(&"project-plain".to_string()));
    assert!(staged.contains(&"project-staging:/run_A".to_string()));
    assert!(!staged.contains(&"project-expired".to_string()));
    assert!(!state.pending_archive.contains_key("project-expired"));
}

#[test]
fn test_failed_hold_removal_is_not_staged() {
    let tmp = tempdir().unwrap();
    let config = config(tmp.path());
    let catalog = SnapshotCatalog::new(precedence_snapshot());
    catalog.fail_tags("project-expired");
    let mut state = ArchiveState::default();

    let report = discover(&catalog, &config, &mut state, d(2024, 1, 1)).unwrap();

    assert!(!staged_ids(&report).contains(&"project-expired".to_string()));
    assert!(report.errors.iter().any(|(id, _)| id == "project-expired"));
    assert!(!state.pending_archive.contains_key("project-expired"));
}
