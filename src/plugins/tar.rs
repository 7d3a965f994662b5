//! Old sequencing tarball check, run on the first of the month.
//!
//! Notify-only: matching files are listed, never archived or tagged.

use crate::core::catalog::{Catalog, CatalogError, Resource, ResourceKind, file_id};
use crate::core::config::Config;
use crate::core::time::months_between;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TarReport {
    pub tars: Vec<Resource>,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
}

impl TarReport {
    pub fn is_empty(&self) -> bool {
        self.tars.is_empty()
    }

    /// `file-id<TAB>folder<TAB>name` lines.
    pub fn lines(&self) -> Vec<String> {
        self.tars
            .iter()
            .map(|t| {
                let file = t.id.split_once(':').map(|(_, f)| f).unwrap_or(&t.id);
                let folder = t.name.rsplit_once('/').map(|(f, _)| f).unwrap_or("");
                let name = t.name.rsplit_once('/').map(|(_, n)| n).unwrap_or(&t.name);
                format!("{}\t{}\t{}", file, if folder.is_empty() { "/" } else { folder }, name)
            })
            .collect()
    }
}

/// Live tarballs in the staging project unmodified for `tar_months` months.
pub fn find_old_tars<C: Catalog>(
    catalog: &C,
    config: &Config,
    today: NaiveDate,
) -> Result<TarReport, CatalogError> {
    let staging = &config.catalog.staging_project;
    let pattern = &config.policies.tar_pattern;
    let months = i64::from(config.policies.tar_months);

    let mut tars: Vec<Resource> = catalog
        .list_tree(staging)?
        .into_iter()
        .filter(|f| f.state.is_live() && pattern.is_match(&f.name))
        .filter(|f| {
            f.last_modified
                .is_some_and(|ts| months_between(ts.date_naive(), today) >= months)
        })
        .map(|f| Resource {
            id: file_id(staging, &f.id),
            kind: ResourceKind::TarArchive,
            name: format!("{}/{}", f.folder.trim_end_matches('/'), f.name),
            project_id: staging.clone(),
            last_modified: f.last_modified,
            tags: f.tags,
            size: f.size,
            created_by: None,
        })
        .collect();
    tars.sort_by(|a, b| a.last_modified.cmp(&b.last_modified).then(a.id.cmp(&b.id)));

    let dates = tars
        .iter()
        .filter_map(|t| t.last_modified.map(|ts| ts.date_naive()));
    let report = TarReport {
        earliest: dates.clone().min(),
        latest: dates.max(),
        tars,
    };
    tracing::info!(
        found = report.tars.len(),
        tar_months = months,
        "old tarball check complete"
    );
    Ok(report)
}
