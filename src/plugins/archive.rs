//! Execution: re-validate staged resources, archive them, and record outcomes.
//!
//! Each pending record is processed independently; one failure never stops
//! the batch. Records are grouped by project so status tags are written only
//! after every child of a project has finished.

use crate::core::catalog::{Catalog, CatalogError, FileEntry, Resource, ResourceKind, file_id};
use crate::core::config::Config;
use crate::core::error::ArchiveError;
use crate::core::store::{ArchiveRecord, ArchiveState, RecordStatus};
use crate::core::tree::FolderNode;
use crate::plugins::classify::{self, Classification};
use crate::plugins::discover::enumerate_containers;
use crate::plugins::tags::{self, ArchiveStatus, TagEngine, TagMutation, TagState};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
pub enum ArchiveOutcome {
    Archived {
        files: u64,
        excluded: usize,
        failed: Vec<String>,
        dry_run: bool,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
        failed: Vec<String>,
    },
}

impl ArchiveOutcome {
    pub fn status(&self) -> RecordStatus {
        match self {
            ArchiveOutcome::Archived { .. } => RecordStatus::Archived,
            ArchiveOutcome::Skipped { .. } => RecordStatus::Skipped,
            ArchiveOutcome::Failed { .. } => RecordStatus::Failed,
        }
    }

    /// Archived with no live file left behind, whether by an error or by
    /// an exclusion pattern.
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            ArchiveOutcome::Archived { failed, excluded, .. } if failed.is_empty() && *excluded == 0
        )
    }

    pub fn failed_files(&self) -> &[String] {
        match self {
            ArchiveOutcome::Archived { failed, .. } | ArchiveOutcome::Failed { failed, .. } => {
                failed
            }
            ArchiveOutcome::Skipped { .. } => &[],
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            ArchiveOutcome::Archived {
                files,
                excluded,
                failed,
                dry_run,
            } => {
                let mut detail = format!("{} files", files);
                if *excluded > 0 {
                    detail.push_str(&format!(", {} excluded", excluded));
                }
                if !failed.is_empty() {
                    detail.push_str(&format!(", {} failed", failed.len()));
                }
                if *dry_run {
                    detail.push_str(", debug run");
                }
                Some(detail)
            }
            ArchiveOutcome::Skipped { reason } | ArchiveOutcome::Failed { reason, .. } => {
                Some(reason.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutedRecord {
    pub record: ArchiveRecord,
    pub outcome: ArchiveOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusTagResult {
    pub project_id: String,
    pub status: ArchiveStatus,
    pub mutation: Option<TagMutation>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub executed: Vec<ExecutedRecord>,
    pub status_tags: Vec<StatusTagResult>,
}

impl ExecutionReport {
    pub fn with_status(&self, status: RecordStatus) -> impl Iterator<Item = &ExecutedRecord> {
        self.executed
            .iter()
            .filter(move |e| e.record.status == status)
    }

    pub fn failed_files(&self) -> Vec<String> {
        self.executed
            .iter()
            .flat_map(|e| e.outcome.failed_files().iter().cloned())
            .collect()
    }

    /// `id | name | files` lines for the archived report.
    pub fn archived_lines(&self) -> Vec<String> {
        self.executed
            .iter()
            .filter_map(|e| match &e.outcome {
                ArchiveOutcome::Archived { files, .. } => Some(format!(
                    "{} | {} | {}",
                    e.record.resource_id, e.record.name, files
                )),
                _ => None,
            })
            .collect()
    }
}

/// Everything known about one project at execution time, listed once.
struct ProjectView {
    project: Option<Resource>,
    tree: Option<FolderNode>,
    list_error: Option<String>,
    /// Set when the project listing itself failed; only project records need it.
    projects_error: Option<String>,
}

impl ProjectView {
    /// Why `record` cannot be evaluated at all, if anything.
    fn listing_error(&self, record: &ArchiveRecord) -> Option<String> {
        if let Some(err) = &self.list_error {
            return Some(format!("cannot list project: {}", err));
        }
        match &self.projects_error {
            Some(err) if record.kind.is_project() => Some(format!("cannot list projects: {}", err)),
            _ => None,
        }
    }

    fn resource_for(&self, record: &ArchiveRecord) -> Option<(Resource, Vec<FileEntry>)> {
        let tree = self.tree.as_ref()?;
        if record.kind.is_project() {
            let project = self.project.clone()?;
            let files = tree.walk().into_iter().cloned().collect();
            return Some((project, files));
        }
        let path = record
            .resource_id
            .split_once(':')
            .map(|(_, p)| p)
            .unwrap_or("/");
        let node = tree.find(path)?;
        let resource = classify::container_resource(&record.project_id, node, record.kind);
        let files = node.walk().into_iter().cloned().collect();
        Some((resource, files))
    }
}

/// List every touched project once. Listing failures are kept on the view
/// so they settle the affected records as failed instead of ending the batch.
fn load_views<C: Catalog>(
    catalog: &C,
    config: &Config,
    groups: &BTreeMap<String, Vec<ArchiveRecord>>,
) -> BTreeMap<String, ProjectView> {
    let mut projects: BTreeMap<String, Resource> = BTreeMap::new();
    let mut projects_error = None;
    let needs_projects = groups
        .values()
        .flatten()
        .any(|r| r.kind.is_project());
    if needs_projects {
        for prefix in &config.catalog.project_prefixes {
            match catalog.list_projects(prefix) {
                Ok(listed) => {
                    for project in listed {
                        projects.entry(project.id.clone()).or_insert(project);
                    }
                }
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "cannot list projects");
                    projects_error = Some(e.to_string());
                }
            }
        }
    }

    let mut views = BTreeMap::new();
    for project_id in groups.keys() {
        let (tree, list_error) = match catalog.list_tree(project_id) {
            Ok(files) => (Some(FolderNode::build(files)), None),
            Err(CatalogError::NotFound(_)) => (None, None),
            Err(e) => {
                tracing::warn!(resource = %project_id, error = %e, "cannot list project files");
                (None, Some(e.to_string()))
            }
        };
        views.insert(
            project_id.clone(),
            ProjectView {
                project: projects.get(project_id).cloned(),
                tree,
                list_error,
                projects_error: projects_error.clone(),
            },
        );
    }
    views
}

/// Re-check a staged resource against its current state.
fn revalidate(
    resource: &Resource,
    files: &[FileEntry],
    config: &Config,
    staged_at: NaiveDate,
    today: NaiveDate,
) -> Result<(), String> {
    let policy = config.policies.for_kind(resource.kind);
    let tag_state = tags::resolve_tag_state(&resource.tags);
    match tag_state {
        TagState::Never => return Err("tagged never-archive".to_string()),
        TagState::Temporary => return Err("tagged no-archive".to_string()),
        _ => {}
    }
    if classify::classify(resource, policy, today) == Classification::Excluded {
        return Err("matches an exclusion pattern".to_string());
    }
    if tag_state != TagState::Forced && classify::reactivated(resource, policy, staged_at, today) {
        return Err("modified since staging".to_string());
    }
    if !files.iter().any(|f| f.state.is_live()) {
        return Err("no live files".to_string());
    }
    Ok(())
}

fn archive_files<C: Catalog>(catalog: &C, files: &[&FileEntry]) -> (u64, Vec<String>) {
    let mut archived = 0;
    let mut failed = Vec::new();
    for file in files {
        let id = file_id(&file.project_id, &file.id);
        match catalog.archive(&id) {
            Ok(receipt) => archived += receipt.count,
            Err(e) => {
                tracing::warn!(resource = %id, error = %e, "file archive failed");
                failed.push(file.id.clone());
            }
        }
    }
    (archived, failed)
}

/// Archive one validated resource.
///
/// Without excluded files the whole resource is archived in one call, falling
/// back to file by file when that call fails. With excluded files only the
/// remaining live files are archived, one at a time.
pub fn archive_resource<C: Catalog>(
    catalog: &C,
    resource: &Resource,
    files: &[FileEntry],
    config: &Config,
) -> ArchiveOutcome {
    let policy = config.policies.for_kind(resource.kind);
    let live: Vec<&FileEntry> = files.iter().filter(|f| f.state.is_live()).collect();
    let (excluded, included): (Vec<&FileEntry>, Vec<&FileEntry>) = live
        .into_iter()
        .partition(|f| classify::is_excluded_name(&f.name, policy));

    if included.is_empty() {
        return ArchiveOutcome::Skipped {
            reason: "every live file matches an exclusion pattern".to_string(),
        };
    }
    if policy.debug_mode {
        tracing::info!(resource = %resource.id, files = included.len(), "debug mode, archive not applied");
        return ArchiveOutcome::Archived {
            files: included.len() as u64,
            excluded: excluded.len(),
            failed: Vec::new(),
            dry_run: true,
        };
    }

    let (files_archived, failed) = if excluded.is_empty() {
        match catalog.archive(&resource.id) {
            Ok(receipt) => (receipt.count, Vec::new()),
            Err(e) => {
                tracing::warn!(
                    resource = %resource.id,
                    error = %e,
                    "archive call failed, archiving file by file"
                );
                archive_files(catalog, &included)
            }
        }
    } else {
        tracing::info!(
            resource = %resource.id,
            excluded = excluded.len(),
            "excluded files present, archiving file by file"
        );
        archive_files(catalog, &included)
    };

    if files_archived == 0 && !failed.is_empty() {
        return ArchiveOutcome::Failed {
            reason: format!("all {} file archive calls failed", failed.len()),
            failed,
        };
    }
    ArchiveOutcome::Archived {
        files: files_archived,
        excluded: excluded.len(),
        failed,
        dry_run: false,
    }
}

/// Constituent ids whose outcome decides a project's status tag.
fn constituents(
    project_id: &str,
    records: &[ArchiveRecord],
    view: &ProjectView,
    config: &Config,
) -> Vec<String> {
    let Some(first) = records.first() else {
        return Vec::new();
    };
    if first.kind.is_project() {
        return vec![project_id.to_string()];
    }
    let Some(tree) = view.tree.as_ref() else {
        return records.iter().map(|r| r.resource_id.clone()).collect();
    };
    let nested: &[String] = if first.kind == ResourceKind::StagingDirectory {
        &config.catalog.staging_nested_roots
    } else {
        &[]
    };
    let mut ids: BTreeSet<String> = enumerate_containers(project_id, tree, first.kind, nested)
        .into_iter()
        .filter(|c| {
            tree.find(&c.name)
                .is_some_and(FolderNode::has_live_files)
        })
        .map(|c| c.id)
        .collect();
    ids.extend(records.iter().map(|r| r.resource_id.clone()));
    ids.into_iter().collect()
}

/// Process every pending record and settle it into the archive log.
pub fn execute<C: Catalog>(
    catalog: &C,
    config: &Config,
    state: &mut ArchiveState,
    today: NaiveDate,
) -> Result<ExecutionReport, ArchiveError> {
    let mut groups: BTreeMap<String, Vec<ArchiveRecord>> = BTreeMap::new();
    for record in state.pending_records() {
        groups
            .entry(record.project_id.clone())
            .or_default()
            .push(record);
    }
    tracing::info!(
        pending = state.pending_archive.len(),
        projects = groups.len(),
        "executing staged archive"
    );

    let views = load_views(catalog, config, &groups);
    let engine = TagEngine::new(catalog, config.debug);
    let mut report = ExecutionReport::default();

    for (project_id, records) in &groups {
        let Some(view) = views.get(project_id) else {
            continue;
        };
        let mut outcomes: Vec<(ArchiveRecord, ArchiveOutcome)> = Vec::new();
        for record in records {
            let outcome = if let Some(reason) = view.listing_error(record) {
                ArchiveOutcome::Failed {
                    reason,
                    failed: Vec::new(),
                }
            } else {
                match view.resource_for(record) {
                    None => ArchiveOutcome::Skipped {
                        reason: "resource no longer exists".to_string(),
                    },
                    Some((resource, files)) => {
                        match revalidate(&resource, &files, config, record.staged_at, today) {
                            Err(reason) => ArchiveOutcome::Skipped { reason },
                            Ok(()) => archive_resource(catalog, &resource, &files, config),
                        }
                    }
                }
            };
            tracing::info!(
                resource = %record.resource_id,
                kind = record.kind.as_str(),
                status = outcome.status().as_str(),
                detail = %outcome.detail().unwrap_or_default(),
                "processed"
            );
            outcomes.push((record.clone(), outcome));
        }

        let succeeded: BTreeSet<&str> = outcomes
            .iter()
            .filter(|(_, o)| o.is_clean())
            .map(|(r, _)| r.resource_id.as_str())
            .collect();
        let results: Vec<bool> = constituents(project_id, records, view, config)
            .iter()
            .map(|id| succeeded.contains(id.as_str()))
            .collect();
        let any_archived = outcomes
            .iter()
            .any(|(_, o)| matches!(o, ArchiveOutcome::Archived { .. }));
        let status = match tags::summarize_status(&results) {
            Some(status) => Some(status),
            None if any_archived => Some(ArchiveStatus::Partial),
            None => None,
        };

        if let Some(status) = status {
            let (mutation, error) = match engine.write_status(project_id, status) {
                Ok(m) => (Some(m), None),
                Err(e) => {
                    tracing::warn!(resource = %project_id, error = %e, "status tag write failed");
                    (None, Some(e.to_string()))
                }
            };
            if let Some(err) = &error {
                for (record, outcome) in outcomes.iter_mut() {
                    if record.kind.is_project() && record.resource_id == *project_id {
                        *outcome = ArchiveOutcome::Failed {
                            reason: format!("archived but status tag write failed: {}", err),
                            failed: outcome.failed_files().to_vec(),
                        };
                    }
                }
            }
            report.status_tags.push(StatusTagResult {
                project_id: project_id.clone(),
                status,
                mutation,
                error,
            });
        }

        for (record, outcome) in outcomes {
            let settled = record.transition(outcome.status(), today, outcome.detail());
            state.settle(settled.clone());
            report.executed.push(ExecutedRecord {
                record: settled,
                outcome,
            });
        }
    }

    tracing::info!(
        archived = report.with_status(RecordStatus::Archived).count(),
        skipped = report.with_status(RecordStatus::Skipped).count(),
        failed = report.with_status(RecordStatus::Failed).count(),
        "execution complete"
    );
    Ok(report)
}

/// Append `lines` under a `=== date ===` header.
pub fn append_report(path: &Path, today: NaiveDate, lines: &[String]) -> Result<(), ArchiveError> {
    if lines.is_empty() {
        return Ok(());
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "=== {} ===", today.format("%Y-%m-%d"))?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    file.sync_all()?;
    Ok(())
}
