//! Discovery: find inactive resources and stage them for the next gate date.

use crate::core::catalog::{Catalog, FileEntry, Resource, ResourceKind};
use crate::core::config::Config;
use crate::core::error::ArchiveError;
use crate::core::store::{ArchiveRecord, ArchiveState, StageResult};
use crate::core::tree::FolderNode;
use crate::plugins::classify::{self, Classification};
use crate::plugins::tags::{self, TagEngine, TagMutation, TagState};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub classification: Classification,
    pub tag_state: TagState,
}

pub fn evaluate(resource: &Resource, config: &Config, today: NaiveDate) -> Verdict {
    let policy = config.policies.for_kind(resource.kind);
    Verdict {
        classification: classify::classify(resource, policy, today),
        tag_state: tags::resolve_tag_state(&resource.tags),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    NeverArchive,
    Excluded,
    AlreadyArchived,
    NoLiveFiles,
    TooRecent,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NeverArchive => "never-archive",
            SkipReason::Excluded => "excluded",
            SkipReason::AlreadyArchived => "already archived",
            SkipReason::NoLiveFiles => "no live files",
            SkipReason::TooRecent => "too recent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "decision")]
pub enum Decision {
    /// `previously_exempt` marks a `no-archive` resource whose tag decays.
    Stage { previously_exempt: bool },
    Skip { reason: SkipReason },
}

/// Combine a verdict with the facts only the catalog and store know.
///
/// Precedence: `never-archive`, exclusion, prior archive, liveness, then
/// `archive` (ignores age), then age.
pub fn decide(verdict: Verdict, has_live_files: bool, already_archived: bool) -> Decision {
    let skip = |reason| Decision::Skip { reason };
    if verdict.tag_state == TagState::Never {
        return skip(SkipReason::NeverArchive);
    }
    if verdict.classification == Classification::Excluded {
        return skip(SkipReason::Excluded);
    }
    if already_archived {
        return skip(SkipReason::AlreadyArchived);
    }
    if !has_live_files {
        return skip(SkipReason::NoLiveFiles);
    }
    match (verdict.tag_state, verdict.classification) {
        (TagState::Forced, _) => Decision::Stage {
            previously_exempt: false,
        },
        (_, Classification::TooRecent) => skip(SkipReason::TooRecent),
        (TagState::Temporary, _) => Decision::Stage {
            previously_exempt: true,
        },
        _ => Decision::Stage {
            previously_exempt: false,
        },
    }
}

/// Top-level folders of `tree` as containers of `kind`. Folders named in
/// `nested_roots` are not containers themselves; their children are.
pub fn enumerate_containers(
    project_id: &str,
    tree: &FolderNode,
    kind: ResourceKind,
    nested_roots: &[String],
) -> Vec<Resource> {
    let nested: BTreeSet<String> = nested_roots
        .iter()
        .map(|r| crate::core::catalog::normalize_folder(r))
        .collect();
    let mut out = Vec::new();
    for folder in tree.subfolders() {
        if nested.contains(&folder.path) {
            out.extend(
                folder
                    .subfolders()
                    .map(|child| classify::container_resource(project_id, child, kind)),
            );
        } else {
            out.push(classify::container_resource(project_id, folder, kind));
        }
    }
    out
}

/// A resource considered during discovery with the evidence behind it.
#[derive(Debug, Clone)]
struct Candidate {
    resource: Resource,
    /// Files below a container; empty for projects until listed.
    files: Vec<FileEntry>,
    has_live_files: Option<bool>,
}

impl Candidate {
    fn container(resource: Resource, tree: &FolderNode) -> Self {
        let path = resource.name.clone();
        let files: Vec<FileEntry> = tree
            .find(&path)
            .map(|node| node.walk().into_iter().cloned().collect())
            .unwrap_or_default();
        let has_live = files.iter().any(|f| f.state.is_live());
        Self {
            resource,
            files,
            has_live_files: Some(has_live),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StagedResource {
    pub resource: Resource,
    pub previously_exempt: bool,
    pub newly_staged: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    pub staged: Vec<StagedResource>,
    /// `no-archive` resources that are not yet age-eligible.
    pub no_archive: Vec<Resource>,
    pub never_archive: Vec<Resource>,
    pub skipped: Vec<(String, SkipReason)>,
    pub tag_changes: Vec<TagMutation>,
    pub errors: Vec<(String, String)>,
}

impl DiscoveryReport {
    pub fn staged_of(&self, kind: ResourceKind) -> impl Iterator<Item = &StagedResource> {
        self.staged
            .iter()
            .filter(move |s| s.resource.kind == kind && !s.previously_exempt)
    }

    pub fn previously_exempt(&self) -> impl Iterator<Item = &StagedResource> {
        self.staged.iter().filter(|s| s.previously_exempt)
    }
}

/// 002/003 projects under every configured prefix. A prefix whose listing
/// fails is recorded and the others are still enumerated.
fn list_projects<C: Catalog>(
    catalog: &C,
    config: &Config,
    report: &mut DiscoveryReport,
) -> Vec<Resource> {
    let reserved = config.reserved_projects();
    let mut seen = BTreeSet::new();
    let mut projects = Vec::new();
    for prefix in &config.catalog.project_prefixes {
        let listed = match catalog.list_projects(prefix) {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(prefix = %prefix, error = %e, "cannot list projects");
                report
                    .errors
                    .push((format!("{}*", prefix), format!("project listing failed: {}", e)));
                continue;
            }
        };
        for project in listed {
            if reserved.contains(&project.id.as_str()) || !seen.insert(project.id.clone()) {
                continue;
            }
            projects.push(project);
        }
    }
    projects
}

fn collect_candidates<C: Catalog>(
    catalog: &C,
    config: &Config,
    report: &mut DiscoveryReport,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = list_projects(catalog, config, report)
        .into_iter()
        .map(|resource| Candidate {
            resource,
            files: Vec::new(),
            has_live_files: None,
        })
        .collect();

    let staging = &config.catalog.staging_project;
    match catalog.list_tree(staging) {
        Ok(files) => {
            let tree = FolderNode::build(files);
            candidates.extend(
                enumerate_containers(
                    staging,
                    &tree,
                    ResourceKind::StagingDirectory,
                    &config.catalog.staging_nested_roots,
                )
                .into_iter()
                .map(|r| Candidate::container(r, &tree)),
            );
        }
        Err(e) => {
            tracing::warn!(resource = %staging, error = %e, "cannot list staging project");
            report.errors.push((staging.clone(), e.to_string()));
        }
    }

    for project in &config.catalog.precision_projects {
        match catalog.list_tree(project) {
            Ok(files) => {
                let tree = FolderNode::build(files);
                candidates.extend(
                    enumerate_containers(project, &tree, ResourceKind::PrecisionFolder, &[])
                        .into_iter()
                        .map(|r| Candidate::container(r, &tree)),
                );
            }
            Err(e) => {
                tracing::warn!(resource = %project, error = %e, "cannot list precision project");
                report.errors.push((project.clone(), e.to_string()));
            }
        }
    }
    candidates
}

/// Enumerate, classify, and stage every eligible resource with
/// `staged_at = today`. Listing failures land in [`DiscoveryReport::errors`]
/// and only hide the resources they cover.
pub fn discover<C: Catalog>(
    catalog: &C,
    config: &Config,
    state: &mut ArchiveState,
    today: NaiveDate,
) -> Result<DiscoveryReport, ArchiveError> {
    let mut report = DiscoveryReport::default();
    let candidates = collect_candidates(catalog, config, &mut report);
    tracing::info!(candidates = candidates.len(), "classifying");

    let verdicts: Vec<Verdict> = candidates
        .par_iter()
        .map(|c| evaluate(&c.resource, config, today))
        .collect();

    let engine = TagEngine::new(catalog, config.debug);
    for (candidate, verdict) in candidates.iter().zip(verdicts) {
        let id = candidate.resource.id.clone();
        match verdict.tag_state {
            TagState::Never => report.never_archive.push(candidate.resource.clone()),
            TagState::Temporary if verdict.classification == Classification::TooRecent => {
                report.no_archive.push(candidate.resource.clone())
            }
            _ => {}
        }

        let worth_listing = verdict.tag_state != TagState::Never
            && verdict.classification != Classification::Excluded
            && (verdict.tag_state == TagState::Forced
                || verdict.classification == Classification::Eligible);
        let has_live = match candidate.has_live_files {
            Some(live) => live,
            // Skipped on other grounds; liveness does not matter.
            None if !worth_listing => true,
            None => match catalog.list_tree(&id) {
                Ok(files) => files.iter().any(|f| f.state.is_live()),
                Err(e) => {
                    tracing::warn!(resource = %id, error = %e, "cannot list project files");
                    report.errors.push((id, e.to_string()));
                    continue;
                }
            },
        };

        let decision = decide(verdict, has_live, state.was_archived(&id));
        let previously_exempt = match decision {
            Decision::Skip { reason } => {
                tracing::debug!(resource = %id, reason = reason.as_str(), "skipped");
                report.skipped.push((id, reason));
                continue;
            }
            Decision::Stage { previously_exempt } => previously_exempt,
        };

        if previously_exempt {
            let files: Vec<&FileEntry> = candidate.files.iter().collect();
            match engine.decay_temporary(&candidate.resource, &files) {
                Ok(changes) => report.tag_changes.extend(changes),
                Err(e) => {
                    tracing::warn!(resource = %id, error = %e, "cannot remove no-archive tag");
                    report.errors.push((id, format!("no-archive removal failed: {}", e)));
                    continue;
                }
            }
        }

        let record = ArchiveRecord::pending(
            &id,
            candidate.resource.kind,
            &candidate.resource.name,
            &candidate.resource.project_id,
            today,
        );
        let newly_staged = match state.stage(record) {
            StageResult::Staged => true,
            StageResult::AlreadyPending => false,
            StageResult::AlreadyArchived => {
                report.skipped.push((id, SkipReason::AlreadyArchived));
                continue;
            }
        };
        tracing::info!(
            resource = %id,
            kind = candidate.resource.kind.as_str(),
            previously_exempt,
            "staged for archiving"
        );
        report.staged.push(StagedResource {
            resource: candidate.resource.clone(),
            previously_exempt,
            newly_staged,
        });
    }

    tracing::info!(
        staged = report.staged.len(),
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        "discovery complete"
    );
    Ok(report)
}
