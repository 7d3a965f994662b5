//! Resource catalog boundary.
//!
//! The platform that owns projects, files, and tags sits behind the
//! [`Catalog`] trait. Everything above this module works on the plain
//! [`Resource`] and [`FileEntry`] snapshots returned here.
//!
//! Resource identifiers:
//! - `project-XXXX` names a whole project
//! - `project-XXXX:/path` names a folder inside a project
//! - `project-XXXX:file-YYYY` names a single file inside a project

use crate::core::error::ArchiveError;
use crate::core::retry::RetryPolicy;
use crate::core::store::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("transient platform failure: {0}")]
    Transient(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("{0}")]
    Other(String),
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Transient(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Project002,
    Project003,
    StagingDirectory,
    TarArchive,
    PrecisionFolder,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Project002 => "project-002",
            ResourceKind::Project003 => "project-003",
            ResourceKind::StagingDirectory => "staging-directory",
            ResourceKind::TarArchive => "tar-archive",
            ResourceKind::PrecisionFolder => "precision-folder",
        }
    }

    pub fn is_project(&self) -> bool {
        matches!(self, ResourceKind::Project002 | ResourceKind::Project003)
    }

    pub fn from_project_name(name: &str) -> Option<Self> {
        if name.starts_with("002") {
            Some(ResourceKind::Project002)
        } else if name.starts_with("003") {
            Some(ResourceKind::Project003)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivalState {
    Live,
    Archival,
    Archived,
    Unarchiving,
}

impl ArchivalState {
    pub fn is_live(&self) -> bool {
        matches!(self, ArchivalState::Live)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    pub name: String,
    pub project_id: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub folder: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub size: u64,
    pub state: ArchivalState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchiveReceipt {
    /// Files moved out of the live state by the call.
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    Project(String),
    Folder { project: String, path: String },
    File { project: String, file: String },
}

impl ResourceRef {
    pub fn parse(id: &str) -> Result<Self, ArchiveError> {
        let id = id.trim();
        match id.split_once(':') {
            None if id.starts_with("project-") => Ok(ResourceRef::Project(id.to_string())),
            Some((project, rest)) if project.starts_with("project-") && !rest.is_empty() => {
                if rest.starts_with('/') {
                    Ok(ResourceRef::Folder {
                        project: project.to_string(),
                        path: normalize_folder(rest),
                    })
                } else {
                    Ok(ResourceRef::File {
                        project: project.to_string(),
                        file: rest.to_string(),
                    })
                }
            }
            _ => Err(ArchiveError::InvalidResource(id.to_string())),
        }
    }

    pub fn project(&self) -> &str {
        match self {
            ResourceRef::Project(p) => p,
            ResourceRef::Folder { project, .. } => project,
            ResourceRef::File { project, .. } => project,
        }
    }

    pub fn to_id(&self) -> String {
        match self {
            ResourceRef::Project(p) => p.clone(),
            ResourceRef::Folder { project, path } => format!("{}:{}", project, path),
            ResourceRef::File { project, file } => format!("{}:{}", project, file),
        }
    }
}

pub fn folder_id(project_id: &str, path: &str) -> String {
    format!("{}:{}", project_id, normalize_folder(path))
}

pub fn file_id(project_id: &str, file: &str) -> String {
    format!("{}:{}", project_id, file)
}

/// Collapse duplicate and trailing slashes; the root folder is `/`.
pub fn normalize_folder(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

/// True when `folder` is `container` or lies below it.
pub fn path_within(folder: &str, container: &str) -> bool {
    let folder = normalize_folder(folder);
    let container = normalize_folder(container);
    container == "/" || folder == container || folder.starts_with(&format!("{}/", container))
}

pub trait Catalog {
    /// Cheap authenticated call used to fail a run early on bad credentials.
    fn check_access(&self) -> Result<(), CatalogError> {
        Ok(())
    }

    /// Projects whose name starts with `prefix`.
    fn list_projects(&self, prefix: &str) -> Result<Vec<Resource>, CatalogError>;

    /// Every file in a project, at file granularity.
    fn list_tree(&self, project_id: &str) -> Result<Vec<FileEntry>, CatalogError>;

    fn set_tags(&self, resource_id: &str, add: &[&str], remove: &[&str])
    -> Result<(), CatalogError>;

    fn archive(&self, resource_id: &str) -> Result<ArchiveReceipt, CatalogError>;
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn check_access(&self) -> Result<(), CatalogError> {
        (**self).check_access()
    }
    fn list_projects(&self, prefix: &str) -> Result<Vec<Resource>, CatalogError> {
        (**self).list_projects(prefix)
    }
    fn list_tree(&self, project_id: &str) -> Result<Vec<FileEntry>, CatalogError> {
        (**self).list_tree(project_id)
    }
    fn set_tags(
        &self,
        resource_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), CatalogError> {
        (**self).set_tags(resource_id, add, remove)
    }
    fn archive(&self, resource_id: &str) -> Result<ArchiveReceipt, CatalogError> {
        (**self).archive(resource_id)
    }
}

impl<C: Catalog + ?Sized> Catalog for Box<C> {
    fn check_access(&self) -> Result<(), CatalogError> {
        (**self).check_access()
    }
    fn list_projects(&self, prefix: &str) -> Result<Vec<Resource>, CatalogError> {
        (**self).list_projects(prefix)
    }
    fn list_tree(&self, project_id: &str) -> Result<Vec<FileEntry>, CatalogError> {
        (**self).list_tree(project_id)
    }
    fn set_tags(
        &self,
        resource_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), CatalogError> {
        (**self).set_tags(resource_id, add, remove)
    }
    fn archive(&self, resource_id: &str) -> Result<ArchiveReceipt, CatalogError> {
        (**self).archive(resource_id)
    }
}

/// Retries transient failures of the wrapped catalog with bounded backoff.
pub struct RetryingCatalog<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: Catalog> RetryingCatalog<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Catalog> Catalog for RetryingCatalog<C> {
    fn check_access(&self) -> Result<(), CatalogError> {
        self.policy.run("check_access", || self.inner.check_access(), CatalogError::is_transient)
    }

    fn list_projects(&self, prefix: &str) -> Result<Vec<Resource>, CatalogError> {
        self.policy.run(
            "list_projects",
            || self.inner.list_projects(prefix),
            CatalogError::is_transient,
        )
    }

    fn list_tree(&self, project_id: &str) -> Result<Vec<FileEntry>, CatalogError> {
        self.policy.run(
            "list_tree",
            || self.inner.list_tree(project_id),
            CatalogError::is_transient,
        )
    }

    fn set_tags(
        &self,
        resource_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), CatalogError> {
        self.policy.run(
            "set_tags",
            || self.inner.set_tags(resource_id, add, remove),
            CatalogError::is_transient,
        )
    }

    fn archive(&self, resource_id: &str) -> Result<ArchiveReceipt, CatalogError> {
        self.policy.run(
            "archive",
            || self.inner.archive(resource_id),
            CatalogError::is_transient,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Default)]
struct Faults {
    archive: BTreeSet<String>,
    tags: BTreeSet<String>,
    access_denied: bool,
}

/// Catalog backed by an in-memory snapshot, optionally loaded from and
/// persisted to a JSON file. Used for offline replay and in tests.
#[derive(Default)]
pub struct SnapshotCatalog {
    snapshot: Mutex<CatalogSnapshot>,
    faults: Mutex<Faults>,
}

impl SnapshotCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        let raw = fs::read_to_string(path)?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&raw)?;
        Ok(Self::new(snapshot))
    }

    pub fn persist(&self, path: &Path) -> Result<(), ArchiveError> {
        let bytes = serde_json::to_vec_pretty(&self.snapshot())?;
        write_atomic(path, &bytes)
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        self.snapshot.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Make every archive call on `resource_id`, or on anything inside it, fail.
    pub fn fail_archive(&self, resource_id: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.archive.insert(resource_id.to_string());
        }
    }

    /// Make `check_access` fail as if the credentials were rejected.
    pub fn deny_access(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.access_denied = true;
        }
    }

    pub fn fail_tags(&self, resource_id: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.tags.insert(resource_id.to_string());
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CatalogSnapshot>, CatalogError> {
        self.snapshot
            .lock()
            .map_err(|_| CatalogError::Other("snapshot lock poisoned".to_string()))
    }

    fn archive_blocked(&self, target: &ResourceRef, snapshot: &CatalogSnapshot) -> bool {
        let Ok(faults) = self.faults.lock() else {
            return false;
        };
        faults.archive.iter().any(|blocked| {
            let Ok(blocked) = ResourceRef::parse(blocked) else {
                return false;
            };
            covers(&blocked, target, snapshot)
        })
    }
}

fn file_folder<'a>(snapshot: &'a CatalogSnapshot, project: &str, file: &str) -> Option<&'a str> {
    snapshot
        .files
        .iter()
        .find(|f| f.project_id == project && f.id == file)
        .map(|f| f.folder.as_str())
}

fn covers(outer: &ResourceRef, inner: &ResourceRef, snapshot: &CatalogSnapshot) -> bool {
    if outer == inner {
        return true;
    }
    if outer.project() != inner.project() {
        return false;
    }
    match (outer, inner) {
        (ResourceRef::Project(_), _) => true,
        (ResourceRef::Folder { path: outer, .. }, ResourceRef::Folder { path: inner, .. }) => {
            path_within(inner, outer)
        }
        (ResourceRef::Folder { path, .. }, ResourceRef::File { project, file }) => {
            file_folder(snapshot, project, file).is_some_and(|folder| path_within(folder, path))
        }
        _ => false,
    }
}

impl Catalog for SnapshotCatalog {
    fn check_access(&self) -> Result<(), CatalogError> {
        let denied = self.faults.lock().map(|f| f.access_denied).unwrap_or(false);
        if denied {
            return Err(CatalogError::Auth("snapshot access denied".to_string()));
        }
        Ok(())
    }

    fn list_projects(&self, prefix: &str) -> Result<Vec<Resource>, CatalogError> {
        let snapshot = self.lock()?;
        Ok(snapshot
            .projects
            .iter()
            .filter(|p| p.name.starts_with(prefix))
            .filter_map(|p| {
                let kind = ResourceKind::from_project_name(&p.name)?;
                Some(Resource {
                    id: p.id.clone(),
                    kind,
                    name: p.name.clone(),
                    project_id: p.id.clone(),
                    last_modified: p.last_modified,
                    tags: p.tags.clone(),
                    size: p.size,
                    created_by: p.created_by.clone(),
                })
            })
            .collect())
    }

    fn list_tree(&self, project_id: &str) -> Result<Vec<FileEntry>, CatalogError> {
        let snapshot = self.lock()?;
        let known_project = snapshot.projects.iter().any(|p| p.id == project_id);
        let files: Vec<FileEntry> = snapshot
            .files
            .iter()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect();
        if !known_project && files.is_empty() {
            return Err(CatalogError::NotFound(project_id.to_string()));
        }
        Ok(files)
    }

    fn set_tags(
        &self,
        resource_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), CatalogError> {
        let blocked = self
            .faults
            .lock()
            .map(|f| f.tags.contains(resource_id))
            .unwrap_or(false);
        if blocked {
            return Err(CatalogError::Other(format!("tag write rejected for {}", resource_id)));
        }
        let target =
            ResourceRef::parse(resource_id).map_err(|e| CatalogError::InvalidInput(e.to_string()))?;
        let mut snapshot = self.lock()?;
        let tags = match &target {
            ResourceRef::Project(id) => snapshot
                .projects
                .iter_mut()
                .find(|p| &p.id == id)
                .map(|p| &mut p.tags),
            ResourceRef::File { project, file } => snapshot
                .files
                .iter_mut()
                .find(|f| &f.project_id == project && &f.id == file)
                .map(|f| &mut f.tags),
            ResourceRef::Folder { .. } => {
                return Err(CatalogError::InvalidInput(format!(
                    "folders cannot carry tags: {}",
                    resource_id
                )));
            }
        };
        let tags = tags.ok_or_else(|| CatalogError::NotFound(resource_id.to_string()))?;
        for tag in remove {
            tags.remove(*tag);
        }
        for tag in add {
            tags.insert((*tag).to_string());
        }
        Ok(())
    }

    fn archive(&self, resource_id: &str) -> Result<ArchiveReceipt, CatalogError> {
        let target =
            ResourceRef::parse(resource_id).map_err(|e| CatalogError::InvalidInput(e.to_string()))?;
        let mut snapshot = self.lock()?;
        if self.archive_blocked(&target, &snapshot) {
            return Err(CatalogError::Other(format!("archive rejected for {}", resource_id)));
        }

        let project = target.project().to_string();
        if !snapshot.projects.iter().any(|p| p.id == project)
            && !snapshot.files.iter().any(|f| f.project_id == project)
        {
            return Err(CatalogError::NotFound(project));
        }

        let mut matched = false;
        let mut count = 0;
        for file in snapshot.files.iter_mut().filter(|f| f.project_id == project) {
            let hit = match &target {
                ResourceRef::Project(_) => true,
                ResourceRef::Folder { path, .. } => path_within(&file.folder, path),
                ResourceRef::File { file: id, .. } => &file.id == id,
            };
            if !hit {
                continue;
            }
            matched = true;
            if file.state.is_live() {
                file.state = ArchivalState::Archived;
                count += 1;
            }
        }

        if let ResourceRef::File { .. } = target {
            if !matched {
                return Err(CatalogError::NotFound(resource_id.to_string()));
            }
        }
        Ok(ArchiveReceipt { count })
    }
}
