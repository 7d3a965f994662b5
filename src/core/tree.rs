//! In-memory folder tree built once per project per run.
//!
//! Container decisions (newest modification, union of tags) are folds over
//! this snapshot rather than repeated live queries.

use crate::core::catalog::{FileEntry, normalize_folder};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderNode {
    pub path: String,
    pub files: Vec<FileEntry>,
    pub children: BTreeMap<String, FolderNode>,
}

impl FolderNode {
    pub fn build(files: impl IntoIterator<Item = FileEntry>) -> Self {
        let mut root = FolderNode {
            path: "/".to_string(),
            ..Default::default()
        };
        for file in files {
            let folder = normalize_folder(&file.folder);
            let mut node = &mut root;
            for segment in folder.split('/').filter(|s| !s.is_empty()) {
                let child_path = if node.path == "/" {
                    format!("/{}", segment)
                } else {
                    format!("{}/{}", node.path, segment)
                };
                node = node
                    .children
                    .entry(segment.to_string())
                    .or_insert_with(|| FolderNode {
                        path: child_path,
                        ..Default::default()
                    });
            }
            node.files.push(file);
        }
        root
    }

    pub fn find(&self, path: &str) -> Option<&FolderNode> {
        let path = normalize_folder(path);
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    pub fn subfolders(&self) -> impl Iterator<Item = &FolderNode> {
        self.children.values()
    }

    pub fn walk(&self) -> Vec<&FileEntry> {
        let mut out: Vec<&FileEntry> = self.files.iter().collect();
        for child in self.children.values() {
            out.extend(child.walk());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.children.values().all(FolderNode::is_empty)
    }

    pub fn has_live_files(&self) -> bool {
        self.files.iter().any(|f| f.state.is_live())
            || self.children.values().any(FolderNode::has_live_files)
    }

    /// Newest modification across every file below this folder.
    ///
    /// `None` when the folder holds no files or any file lacks a timestamp.
    pub fn newest_modified(&self) -> Option<DateTime<Utc>> {
        let mut newest: Option<DateTime<Utc>> = None;
        for file in &self.files {
            let ts = file.last_modified?;
            newest = Some(newest.map_or(ts, |n| n.max(ts)));
        }
        for child in self.children.values() {
            if child.is_empty() {
                continue;
            }
            let ts = child.newest_modified()?;
            newest = Some(newest.map_or(ts, |n| n.max(ts)));
        }
        newest
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum::<u64>()
            + self.children.values().map(FolderNode::total_size).sum::<u64>()
    }
}
