//! Platform user → chat handle lookup used when formatting notifications.
//!
//! The table is a flat string map stored as TOML or JSON. It only affects how
//! recipients are rendered.

use crate::core::error::ArchiveError;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberDirectory {
    members: BTreeMap<String, String>,
}

impl MemberDirectory {
    pub fn new(members: BTreeMap<String, String>) -> Self {
        Self { members }
    }

    /// Load the lookup table; a missing file yields an empty directory.
    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "member lookup not found, mentions disabled");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let members: BTreeMap<String, String> =
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => serde_json::from_str(&raw)?,
                _ => toml::from_str(&raw)?,
            };
        tracing::info!(count = members.len(), "member lookup loaded");
        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn handle(&self, platform_user: &str) -> Option<&str> {
        let key = platform_user.trim_start_matches("user-");
        self.members
            .get(platform_user)
            .or_else(|| self.members.get(key))
            .map(String::as_str)
    }

    pub fn mention(&self, platform_user: &str) -> String {
        match self.handle(platform_user) {
            Some(handle) => format!("<@{}>", handle),
            None => format!("Cannot find id for: {}", platform_user),
        }
    }
}
