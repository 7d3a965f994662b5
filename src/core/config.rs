//! Configuration: a TOML file plus a handful of environment overrides.
//!
//! Everything is validated up front. A malformed regex, a missing token for
//! the selected backend, or a zero inactivity threshold stops the run before
//! any state is touched.

use crate::core::catalog::ResourceKind;
use crate::core::error::ArchiveError;
use crate::core::time::parse_date;
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "AUTOARCHIVE_CONFIG";
pub const DEBUG_ENV: &str = "ARCHIVE_DEBUG";
pub const OVERRIDE_DATE_ENV: &str = "ARCHIVE_OVERRIDE_DATE";
pub const CATALOG_TOKEN_ENV: &str = "DNANEXUS_TOKEN";
pub const SLACK_TOKEN_ENV: &str = "SLACK_TOKEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    paths: PathsConfig,
    policy: PolicyFile,
    catalog: CatalogConfig,
    #[serde(default)]
    notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_state_path")]
    pub state: PathBuf,
    #[serde(default = "default_report_path")]
    pub report: PathBuf,
    #[serde(default = "default_failed_report_path")]
    pub failed_report: PathBuf,
    #[serde(default)]
    pub members: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state: default_state_path(),
            report: default_report_path(),
            failed_report: default_failed_report_path(),
            members: None,
            log_dir: None,
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/monitoring/archive_state.json")
}
fn default_report_path() -> PathBuf {
    PathBuf::from("/monitoring/archived.txt")
}
fn default_failed_report_path() -> PathBuf {
    PathBuf::from("/monitoring/failed_archive.txt")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_grace_months")]
    grace_months: u32,
    #[serde(default = "default_tar_months")]
    tar_months: u32,
    #[serde(default = "default_tar_pattern")]
    tar_pattern: String,
    exclude_patterns: Vec<String>,
    #[serde(default)]
    override_date: Option<String>,
    #[serde(default = "default_project_002")]
    project_002: KindPolicyFile,
    #[serde(default = "default_project_003")]
    project_003: KindPolicyFile,
    #[serde(default = "default_staging")]
    staging: KindPolicyFile,
    #[serde(default = "default_precision")]
    precision: KindPolicyFile,
}

fn default_grace_months() -> u32 {
    1
}
fn default_tar_months() -> u32 {
    3
}
fn default_tar_pattern() -> String {
    r"^run.*\.tar\.gz$".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct KindPolicyFile {
    inactivity_months: u32,
    #[serde(default)]
    grace_months: Option<u32>,
    #[serde(default)]
    suffix_months: BTreeMap<String, u32>,
    #[serde(default)]
    exclude_patterns: Vec<String>,
}

impl KindPolicyFile {
    fn months(inactivity_months: u32) -> Self {
        Self {
            inactivity_months,
            grace_months: None,
            suffix_months: BTreeMap::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_project_002() -> KindPolicyFile {
    let mut policy = KindPolicyFile::months(3);
    policy.suffix_months.insert("WES".to_string(), 6);
    policy.suffix_months.insert("CEN".to_string(), 6);
    policy
}
fn default_project_003() -> KindPolicyFile {
    KindPolicyFile::months(1)
}
fn default_staging() -> KindPolicyFile {
    KindPolicyFile::months(3)
}
fn default_precision() -> KindPolicyFile {
    KindPolicyFile::months(1)
}

/// Per-kind archiving policy.
#[derive(Debug, Clone)]
pub struct Policy {
    pub inactivity_months: u32,
    pub modified_grace_months: u32,
    pub exclude_patterns: Vec<Regex>,
    pub debug_mode: bool,
    /// Name suffix → inactivity months, checked before the default.
    pub suffix_months: Vec<(String, u32)>,
}

impl Policy {
    pub fn new(inactivity_months: u32, modified_grace_months: u32) -> Self {
        Self {
            inactivity_months,
            modified_grace_months,
            exclude_patterns: Vec::new(),
            debug_mode: false,
            suffix_months: Vec::new(),
        }
    }

    pub fn with_excludes(mut self, patterns: Vec<Regex>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub fn inactivity_months_for(&self, name: &str) -> u32 {
        self.suffix_months
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix.as_str()))
            .map(|(_, months)| *months)
            .unwrap_or(self.inactivity_months)
    }
}

#[derive(Debug, Clone)]
pub struct PolicySet {
    pub project_002: Policy,
    pub project_003: Policy,
    pub staging: Policy,
    pub precision: Policy,
    pub tar_months: u32,
    pub tar_pattern: Regex,
}

impl PolicySet {
    pub fn for_kind(&self, kind: ResourceKind) -> &Policy {
        match kind {
            ResourceKind::Project002 => &self.project_002,
            ResourceKind::Project003 => &self.project_003,
            ResourceKind::StagingDirectory | ResourceKind::TarArchive => &self.staging,
            ResourceKind::PrecisionFolder => &self.precision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogBackend {
    Dnanexus,
    Snapshot,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_backend")]
    pub backend: CatalogBackend,
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub billed_to: Option<String>,
    #[serde(default = "default_project_prefixes")]
    pub project_prefixes: Vec<String>,
    pub staging_project: String,
    #[serde(default = "default_nested_roots")]
    pub staging_nested_roots: Vec<String>,
    #[serde(default)]
    pub precision_projects: Vec<String>,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_catalog_backend() -> CatalogBackend {
    CatalogBackend::Dnanexus
}
fn default_api_url() -> String {
    "https://api.dnanexus.com".to_string()
}
fn default_project_prefixes() -> Vec<String> {
    vec!["002".to_string(), "003".to_string()]
}
fn default_nested_roots() -> Vec<String> {
    vec!["/processed".to_string()]
}
fn default_url_prefix() -> String {
    "https://platform.dnanexus.com/panx/projects".to_string()
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyBackend {
    Slack,
    Log,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_backend")]
    pub backend: NotifyBackend,
    #[serde(default = "default_alerts_channel")]
    pub alerts_channel: String,
    #[serde(default = "default_logs_channel")]
    pub logs_channel: String,
    #[serde(default = "default_debug_channel")]
    pub debug_channel: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            backend: default_notify_backend(),
            alerts_channel: default_alerts_channel(),
            logs_channel: default_logs_channel(),
            debug_channel: default_debug_channel(),
        }
    }
}

fn default_notify_backend() -> NotifyBackend {
    NotifyBackend::Log
}
fn default_alerts_channel() -> String {
    "#egg-alerts".to_string()
}
fn default_logs_channel() -> String {
    "#egg-logs".to_string()
}
fn default_debug_channel() -> String {
    "#egg-test".to_string()
}

#[derive(Clone, Default)]
pub struct Secrets {
    pub catalog_token: Option<String>,
    pub slack_token: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |s: &Option<String>| if s.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("catalog_token", &mask(&self.catalog_token))
            .field("slack_token", &mask(&self.slack_token))
            .finish()
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    pub policies: PolicySet,
    pub debug: bool,
    pub override_date: Option<NaiveDate>,
    pub catalog: CatalogConfig,
    pub notify: NotifyConfig,
    pub secrets: Secrets,
}

fn compile_patterns(patterns: &[String], what: &str) -> Result<Vec<Regex>, ArchiveError> {
    patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| {
            Regex::new(p).map_err(|e| {
                ArchiveError::ConfigError(format!("invalid {} regex '{}': {}", what, p, e))
            })
        })
        .collect()
}

fn truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `dir/state.json` → `dir/state.debug.json`.
pub fn debug_variant(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.debug.{}", stem, ext.to_string_lossy()),
        None => format!("{}.debug", stem),
    };
    path.with_file_name(name)
}

impl Config {
    /// Load from `path`, falling back to `$AUTOARCHIVE_CONFIG`.
    pub fn load<F>(path: Option<&Path>, env: F) -> Result<Self, ArchiveError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => env(CONFIG_ENV).map(PathBuf::from).ok_or_else(|| {
                ArchiveError::ConfigError(format!(
                    "no configuration file given (use --config or set {})",
                    CONFIG_ENV
                ))
            })?,
        };
        let raw = fs::read_to_string(&path).map_err(|e| {
            ArchiveError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw, env)
    }

    pub fn from_toml_str<F>(raw: &str, env: F) -> Result<Self, ArchiveError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: ConfigFile = toml::from_str(raw)?;
        let policy = file.policy;

        let debug = env(DEBUG_ENV).map(|v| truthy(&v)).unwrap_or(policy.debug);
        let override_date = match env(OVERRIDE_DATE_ENV).or(policy.override_date.clone()) {
            Some(raw) if !raw.trim().is_empty() => Some(parse_date(&raw)?),
            _ => None,
        };

        let global_excludes = compile_patterns(&policy.exclude_patterns, "exclude")?;
        let build = |name: &str, kind: &KindPolicyFile| -> Result<Policy, ArchiveError> {
            if kind.inactivity_months == 0 {
                return Err(ArchiveError::ConfigError(format!(
                    "policy.{}.inactivity_months must be at least 1",
                    name
                )));
            }
            if let Some((suffix, _)) = kind.suffix_months.iter().find(|(_, m)| **m == 0) {
                return Err(ArchiveError::ConfigError(format!(
                    "policy.{}.suffix_months.{} must be at least 1",
                    name, suffix
                )));
            }
            let grace = kind.grace_months.unwrap_or(policy.grace_months);
            // A grace window wider than the threshold would let every
            // eligible resource count as recently modified.
            let shortest = kind
                .suffix_months
                .values()
                .copied()
                .fold(kind.inactivity_months, u32::min);
            if grace > shortest {
                return Err(ArchiveError::ConfigError(format!(
                    "policy.{}.grace_months ({}) must not exceed inactivity_months ({})",
                    name, grace, shortest
                )));
            }
            let mut patterns = global_excludes.clone();
            patterns.extend(compile_patterns(&kind.exclude_patterns, "exclude")?);
            Ok(Policy {
                inactivity_months: kind.inactivity_months,
                modified_grace_months: grace,
                exclude_patterns: patterns,
                debug_mode: debug,
                suffix_months: kind
                    .suffix_months
                    .iter()
                    .map(|(s, m)| (s.clone(), *m))
                    .collect(),
            })
        };

        if policy.tar_months == 0 {
            return Err(ArchiveError::ConfigError(
                "policy.tar_months must be at least 1".to_string(),
            ));
        }
        let tar_pattern = Regex::new(&policy.tar_pattern).map_err(|e| {
            ArchiveError::ConfigError(format!("invalid tar_pattern '{}': {}", policy.tar_pattern, e))
        })?;

        let policies = PolicySet {
            project_002: build("project_002", &policy.project_002)?,
            project_003: build("project_003", &policy.project_003)?,
            staging: build("staging", &policy.staging)?,
            precision: build("precision", &policy.precision)?,
            tar_months: policy.tar_months,
            tar_pattern,
        };

        let catalog = file.catalog;
        if catalog.staging_project.trim().is_empty() {
            return Err(ArchiveError::ConfigError(
                "catalog.staging_project is required".to_string(),
            ));
        }
        if catalog.backend == CatalogBackend::Snapshot && catalog.snapshot.is_none() {
            return Err(ArchiveError::ConfigError(
                "catalog.snapshot is required for the snapshot backend".to_string(),
            ));
        }

        let secrets = Secrets {
            catalog_token: env(CATALOG_TOKEN_ENV).filter(|t| !t.trim().is_empty()),
            slack_token: env(SLACK_TOKEN_ENV).filter(|t| !t.trim().is_empty()),
        };
        if catalog.backend == CatalogBackend::Dnanexus && secrets.catalog_token.is_none() {
            return Err(ArchiveError::ConfigError(format!(
                "{} is required for the dnanexus backend",
                CATALOG_TOKEN_ENV
            )));
        }
        if file.notify.backend == NotifyBackend::Slack && secrets.slack_token.is_none() {
            return Err(ArchiveError::ConfigError(format!(
                "{} is required for the slack backend",
                SLACK_TOKEN_ENV
            )));
        }

        let mut paths = file.paths;
        if debug {
            paths.state = debug_variant(&paths.state);
            paths.report = debug_variant(&paths.report);
            paths.failed_report = debug_variant(&paths.failed_report);
        }

        Ok(Self {
            paths,
            policies,
            debug,
            override_date,
            catalog,
            notify: file.notify,
            secrets,
        })
    }

    /// The run date: override when configured, otherwise the local date.
    pub fn today(&self) -> NaiveDate {
        self.override_date
            .unwrap_or_else(crate::core::time::today_local)
    }

    /// Projects that are never archived as whole projects.
    pub fn reserved_projects(&self) -> Vec<&str> {
        let mut ids = vec![self.catalog.staging_project.as_str()];
        ids.extend(self.catalog.precision_projects.iter().map(String::as_str));
        ids
    }

    pub fn log_summary(&self) {
        tracing::info!(
            debug = self.debug,
            state = %self.paths.state.display(),
            report = %self.paths.report.display(),
            staging_project = %self.catalog.staging_project,
            precision_projects = self.catalog.precision_projects.len(),
            months_002 = self.policies.project_002.inactivity_months,
            months_003 = self.policies.project_003.inactivity_months,
            months_staging = self.policies.staging.inactivity_months,
            months_precision = self.policies.precision.inactivity_months,
            grace_months = self.policies.staging.modified_grace_months,
            tar_months = self.policies.tar_months,
            excludes = self.policies.staging.exclude_patterns.len(),
            override_date = ?self.override_date,
            secrets = ?self.secrets,
            "configuration loaded"
        );
    }
}
