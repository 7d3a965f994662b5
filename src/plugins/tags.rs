//! Exemption tags and archive status tags.
//!
//! Exemption tags are folded into a [`TagState`] whose ordering is the
//! precedence: `Never` beats `Forced` beats `Temporary` beats `None`. Tags are
//! compared case-insensitively. Tag mutations never touch the age clock; a
//! resource's eligibility is always computed from modification time alone.

use crate::core::catalog::{Catalog, CatalogError, FileEntry, Resource, file_id};
use serde::Serialize;

pub const NEVER_ARCHIVE: &str = "never-archive";
pub const NO_ARCHIVE: &str = "no-archive";
pub const ARCHIVE: &str = "archive";
pub const FULLY_ARCHIVED: &str = "fully archived";
pub const PARTIAL_ARCHIVED: &str = "partial archived";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagState {
    None,
    /// `no-archive`: exempt until the resource next becomes age-eligible.
    Temporary,
    /// `archive`: archive at the next opportunity regardless of age.
    Forced,
    /// `never-archive`: permanent exemption.
    Never,
}

fn normalize(tag: &str) -> String {
    tag.trim().to_ascii_lowercase()
}

pub fn tag_state_of(tag: &str) -> TagState {
    match normalize(tag).as_str() {
        NEVER_ARCHIVE => TagState::Never,
        ARCHIVE => TagState::Forced,
        NO_ARCHIVE => TagState::Temporary,
        _ => TagState::None,
    }
}

pub fn resolve_tag_state<'a, I>(tags: I) -> TagState
where
    I: IntoIterator<Item = &'a String>,
{
    tags.into_iter()
        .map(|t| tag_state_of(t))
        .max()
        .unwrap_or(TagState::None)
}

pub fn has_tag(tags: &std::collections::BTreeSet<String>, wanted: &str) -> bool {
    tags.iter().any(|t| normalize(t) == wanted)
}

/// A tag change on one resource, recorded whether or not it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagMutation {
    pub resource_id: String,
    pub add: Vec<String>,
    pub remove: Vec<String>,
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveStatus {
    Fully,
    Partial,
}

impl ArchiveStatus {
    pub fn tag(&self) -> &'static str {
        match self {
            ArchiveStatus::Fully => FULLY_ARCHIVED,
            ArchiveStatus::Partial => PARTIAL_ARCHIVED,
        }
    }

    pub fn opposite(&self) -> &'static str {
        match self {
            ArchiveStatus::Fully => PARTIAL_ARCHIVED,
            ArchiveStatus::Partial => FULLY_ARCHIVED,
        }
    }
}

/// `Fully` when every constituent succeeded, `Partial` when some did.
pub fn summarize_status(successes: &[bool]) -> Option<ArchiveStatus> {
    let done = successes.iter().filter(|s| **s).count();
    if done == 0 {
        None
    } else if done == successes.len() {
        Some(ArchiveStatus::Fully)
    } else {
        Some(ArchiveStatus::Partial)
    }
}

/// Status implied by the archival state of a project's files.
pub fn status_from_files(files: &[FileEntry]) -> Option<ArchiveStatus> {
    let live = files.iter().filter(|f| f.state.is_live()).count();
    if files.is_empty() || live == files.len() {
        None
    } else if live == 0 {
        Some(ArchiveStatus::Fully)
    } else {
        Some(ArchiveStatus::Partial)
    }
}

pub struct TagEngine<'a, C: Catalog> {
    catalog: &'a C,
    debug: bool,
}

impl<'a, C: Catalog> TagEngine<'a, C> {
    pub fn new(catalog: &'a C, debug: bool) -> Self {
        Self { catalog, debug }
    }

    pub fn apply(&self, mut mutation: TagMutation) -> Result<TagMutation, CatalogError> {
        if self.debug {
            tracing::info!(
                resource = %mutation.resource_id,
                add = ?mutation.add,
                remove = ?mutation.remove,
                "debug mode, tag change not applied"
            );
            mutation.applied = false;
            return Ok(mutation);
        }
        let add: Vec<&str> = mutation.add.iter().map(String::as_str).collect();
        let remove: Vec<&str> = mutation.remove.iter().map(String::as_str).collect();
        self.catalog
            .set_tags(&mutation.resource_id, &add, &remove)?;
        tracing::debug!(
            resource = %mutation.resource_id,
            add = ?mutation.add,
            remove = ?mutation.remove,
            "tags updated"
        );
        mutation.applied = true;
        Ok(mutation)
    }

    /// Strip `no-archive` from an age-eligible resource.
    ///
    /// Projects carry the tag themselves; containers carry it on files, so
    /// each tagged file below the container is updated.
    pub fn decay_temporary(
        &self,
        resource: &Resource,
        files: &[&FileEntry],
    ) -> Result<Vec<TagMutation>, CatalogError> {
        let mut targets: Vec<(String, Vec<String>)> = Vec::new();
        if resource.kind.is_project() {
            let matching = matching_tags(&resource.tags, NO_ARCHIVE);
            if !matching.is_empty() {
                targets.push((resource.id.clone(), matching));
            }
        } else {
            for file in files {
                let matching = matching_tags(&file.tags, NO_ARCHIVE);
                if !matching.is_empty() {
                    targets.push((file_id(&file.project_id, &file.id), matching));
                }
            }
        }
        targets
            .into_iter()
            .map(|(resource_id, remove)| {
                self.apply(TagMutation {
                    resource_id,
                    add: Vec::new(),
                    remove,
                    applied: false,
                })
            })
            .collect()
    }

    /// Tag a project with its archive status, removing the opposite status.
    pub fn write_status(
        &self,
        project_id: &str,
        status: ArchiveStatus,
    ) -> Result<TagMutation, CatalogError> {
        self.apply(TagMutation {
            resource_id: project_id.to_string(),
            add: vec![status.tag().to_string()],
            remove: vec![status.opposite().to_string()],
            applied: false,
        })
    }

    /// Recompute status tags for `projects` from their files' archival state.
    ///
    /// Projects whose tags already match are left alone; projects with every
    /// file live are skipped. Failures are logged per project.
    pub fn reconcile(&self, projects: &[Resource]) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        for project in projects {
            let files = match self.catalog.list_tree(&project.id) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(resource = %project.id, error = %e, "cannot list project");
                    outcomes.push(ReconcileOutcome {
                        project_id: project.id.clone(),
                        status: None,
                        mutation: None,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };
            let Some(status) = status_from_files(&files) else {
                continue;
            };
            if has_tag(&project.tags, status.tag()) && !has_tag(&project.tags, status.opposite()) {
                continue;
            }
            let (mutation, error) = match self.write_status(&project.id, status) {
                Ok(m) => (Some(m), None),
                Err(e) => {
                    tracing::warn!(resource = %project.id, error = %e, "status tag write failed");
                    (None, Some(e.to_string()))
                }
            };
            outcomes.push(ReconcileOutcome {
                project_id: project.id.clone(),
                status: Some(status),
                mutation,
                error,
            });
        }
        outcomes
    }
}

fn matching_tags(tags: &std::collections::BTreeSet<String>, wanted: &str) -> Vec<String> {
    tags.iter()
        .filter(|t| normalize(t) == wanted)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub project_id: String,
    pub status: Option<ArchiveStatus>,
    pub mutation: Option<TagMutation>,
    pub error: Option<String>,
}
