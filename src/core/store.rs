//! Archive state store: the memory carried between invocations.
//!
//! The store is one JSON file holding a versioned envelope around three
//! partitions:
//! - `pending_archive`: resources staged on the last discovery run
//! - `discovered_this_cycle`: what the current run discovered (cleared at start)
//! - `archived_log`: append-only history of execution outcomes
//!
//! The file is read once when a run starts and replaced as a whole when a
//! batch completes. A missing file is a fresh, empty store; a file that is
//! present but cannot be read back is an error, never a silent reset.

use crate::core::catalog::ResourceKind;
use crate::core::error::ArchiveError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const STATE_FORMAT: &str = "autoarchive-state";
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Archived,
    Skipped,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Archived => "archived",
            RecordStatus::Skipped => "skipped",
            RecordStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub name: String,
    pub project_id: String,
    pub staged_at: NaiveDate,
    pub status: RecordStatus,
    #[serde(default)]
    pub decided_at: Option<NaiveDate>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ArchiveRecord {
    pub fn pending(
        resource_id: &str,
        kind: ResourceKind,
        name: &str,
        project_id: &str,
        staged_at: NaiveDate,
    ) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            kind,
            name: name.to_string(),
            project_id: project_id.to_string(),
            staged_at,
            status: RecordStatus::Pending,
            decided_at: None,
            detail: None,
        }
    }

    /// Replace this record with its successor in `status`.
    pub fn transition(self, status: RecordStatus, on: NaiveDate, detail: Option<String>) -> Self {
        Self {
            status,
            decided_at: Some(on),
            detail,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalState {
    CountdownSent,
    Executed,
    Discovered,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::CountdownSent => "countdown-sent",
            TerminalState::Executed => "executed",
            TerminalState::Discovered => "discovered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStamp {
    pub run_id: String,
    pub date: NaiveDate,
    pub terminal: TerminalState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveState {
    #[serde(default)]
    pub pending_archive: BTreeMap<String, ArchiveRecord>,
    #[serde(default)]
    pub discovered_this_cycle: BTreeMap<String, ArchiveRecord>,
    #[serde(default)]
    pub archived_log: Vec<ArchiveRecord>,
    #[serde(default)]
    pub last_run: Option<RunStamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    Staged,
    AlreadyPending,
    AlreadyArchived,
}

impl ArchiveState {
    /// Reset the transient partition; called once at the start of every run.
    pub fn begin_run(&mut self) {
        self.discovered_this_cycle.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_archive.is_empty()
    }

    /// True when the log holds a successful archive entry for `resource_id`.
    pub fn was_archived(&self, resource_id: &str) -> bool {
        self.archived_log
            .iter()
            .any(|r| r.resource_id == resource_id && r.status == RecordStatus::Archived)
    }

    pub fn stage(&mut self, record: ArchiveRecord) -> StageResult {
        if self.was_archived(&record.resource_id) {
            return StageResult::AlreadyArchived;
        }
        self.discovered_this_cycle
            .insert(record.resource_id.clone(), record.clone());
        if self.pending_archive.contains_key(&record.resource_id) {
            return StageResult::AlreadyPending;
        }
        self.pending_archive
            .insert(record.resource_id.clone(), record);
        StageResult::Staged
    }

    /// Move a processed record out of `pending_archive` into the log.
    pub fn settle(&mut self, record: ArchiveRecord) {
        debug_assert!(record.status != RecordStatus::Pending);
        self.pending_archive.remove(&record.resource_id);
        self.archived_log.push(record);
    }

    pub fn pending_records(&self) -> Vec<ArchiveRecord> {
        self.pending_archive.values().cloned().collect()
    }

    /// Most recent log entry for each resource.
    pub fn latest_outcomes(&self) -> BTreeMap<&str, &ArchiveRecord> {
        let mut latest = BTreeMap::new();
        for record in &self.archived_log {
            latest.insert(record.resource_id.as_str(), record);
        }
        latest
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    checksum: String,
    state: serde_json::Value,
}

fn checksum(payload: &serde_json::Value) -> Result<String, ArchiveError> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Handle on the state file at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    pub path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<ArchiveState, ArchiveError> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "no state file yet, starting empty");
            return Ok(ArchiveState::default());
        }
        let corrupt = |reason: String| ArchiveError::StateCorrupt {
            path: self.path.display().to_string(),
            reason,
        };

        let raw = fs::read(&self.path).map_err(|e| corrupt(format!("unreadable: {}", e)))?;
        let envelope: Envelope =
            serde_json::from_slice(&raw).map_err(|e| corrupt(format!("not a state envelope: {}", e)))?;
        if envelope.format != STATE_FORMAT {
            return Err(corrupt(format!("unexpected format '{}'", envelope.format)));
        }
        if envelope.version != STATE_VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {})",
                envelope.version, STATE_VERSION
            )));
        }
        if checksum(&envelope.state)? != envelope.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }
        let state: ArchiveState = serde_json::from_value(envelope.state)
            .map_err(|e| corrupt(format!("malformed state: {}", e)))?;

        tracing::info!(
            path = %self.path.display(),
            pending = state.pending_archive.len(),
            logged = state.archived_log.len(),
            "state loaded"
        );
        Ok(state)
    }

    pub fn save(&self, state: &ArchiveState) -> Result<(), ArchiveError> {
        let payload = serde_json::to_value(state)?;
        let envelope = Envelope {
            format: STATE_FORMAT.to_string(),
            version: STATE_VERSION,
            updated_at: Some(Utc::now()),
            checksum: checksum(&payload)?,
            state: payload,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(&self.path, &bytes)?;
        tracing::info!(
            path = %self.path.display(),
            pending = state.pending_archive.len(),
            logged = state.archived_log.len(),
            "state written"
        );
        Ok(())
    }
}

/// Replace `path` with `bytes` via a temp file in the same directory, so a
/// crash leaves either the old file or the new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ArchiveError::ConfigError(format!("not a file path: {}", path.display())))?;
    let tmp = dir.join(format!(".{}.tmp", file_name));
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
