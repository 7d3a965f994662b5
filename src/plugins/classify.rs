//! Inactivity classification.
//!
//! Pure functions over a resource snapshot. Nothing here talks to the catalog,
//! so verdicts can be computed in parallel and re-checked at execution time.

use crate::core::catalog::{Resource, ResourceKind, folder_id};
use crate::core::config::Policy;
use crate::core::time::months_between;
use crate::core::tree::FolderNode;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Eligible,
    TooRecent,
    Excluded,
}

/// True when the id, the name, or any path segment of the resource matches an
/// exclusion pattern.
pub fn is_excluded(resource: &Resource, policy: &Policy) -> bool {
    if policy.exclude_patterns.is_empty() {
        return false;
    }
    let path = resource
        .id
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let mut candidates = vec![resource.id.as_str(), resource.name.as_str()];
    candidates.extend(path.split('/').filter(|s| !s.is_empty()));
    policy
        .exclude_patterns
        .iter()
        .any(|re| candidates.iter().any(|c| re.is_match(c)))
}

/// True when a single file name matches an exclusion pattern.
pub fn is_excluded_name(name: &str, policy: &Policy) -> bool {
    policy.exclude_patterns.iter().any(|re| re.is_match(name))
}

/// Whole calendar months since the last modification, `None` when unknown.
pub fn age_months(resource: &Resource, today: NaiveDate) -> Option<i64> {
    resource
        .last_modified
        .map(|ts| months_between(ts.date_naive(), today))
}

pub fn classify(resource: &Resource, policy: &Policy, today: NaiveDate) -> Classification {
    if is_excluded(resource, policy) {
        return Classification::Excluded;
    }
    let threshold = i64::from(policy.inactivity_months_for(&resource.name));
    match age_months(resource, today) {
        Some(age) if age >= threshold => Classification::Eligible,
        // Unknown timestamps and empty containers count as recent.
        _ => Classification::TooRecent,
    }
}

/// Whether a staged resource saw activity that should cancel its archive:
/// modified after it was staged, or within the grace window before `today`.
pub fn reactivated(
    resource: &Resource,
    policy: &Policy,
    staged_at: NaiveDate,
    today: NaiveDate,
) -> bool {
    let Some(modified) = resource.last_modified else {
        return true;
    };
    let modified = modified.date_naive();
    modified > staged_at
        || months_between(modified, today) < i64::from(policy.modified_grace_months)
}

/// Fold a folder subtree into a single container resource.
///
/// `last_modified` is the newest file below the folder and `tags` the union
/// of every file's tags.
pub fn container_resource(
    project_id: &str,
    node: &FolderNode,
    kind: ResourceKind,
) -> Resource {
    let files = node.walk();
    let tags = files.iter().flat_map(|f| f.tags.iter().cloned()).collect();
    Resource {
        id: folder_id(project_id, &node.path),
        kind,
        name: node.path.clone(),
        project_id: project_id.to_string(),
        last_modified: node.newest_modified(),
        tags,
        size: node.total_size(),
        created_by: None,
    }
}
