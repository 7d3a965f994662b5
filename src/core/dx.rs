//! DNAnexus API client implementing [`Catalog`].
//!
//! Plain blocking JSON-over-POST calls. Retries are layered on top by
//! [`crate::core::catalog::RetryingCatalog`]; this client classifies failures
//! so the wrapper knows which ones are worth repeating.

use crate::core::catalog::{
    ArchivalState, ArchiveReceipt, Catalog, CatalogError, FileEntry, Resource, ResourceKind,
    ResourceRef,
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::time::Duration;

const PAGE_LIMIT: u64 = 1000;

pub struct DxCatalog {
    client: reqwest::blocking::Client,
    api_url: String,
    token: String,
    billed_to: Option<String>,
}

impl DxCatalog {
    pub fn new(api_url: &str, token: &str, billed_to: Option<String>) -> Result<Self, CatalogError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CatalogError::Other(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            billed_to,
        })
    }

    fn call(&self, route: &str, body: &Value) -> Result<Value, CatalogError> {
        let url = format!("{}/{}", self.api_url, route.trim_start_matches('/'));
        tracing::debug!(route, "dx api call");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .map_err(|e| CatalogError::Transient(format!("{}: {}", route, e)))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .map_err(|e| CatalogError::Transient(format!("{}: {}", route, e)))?;
        if !(200..300).contains(&status) {
            return Err(map_status(status, route, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| CatalogError::Other(format!("{}: malformed response: {}", route, e)))
    }

    /// Follow `next` cursors until the listing is exhausted.
    fn paginate(&self, route: &str, mut body: Value) -> Result<Vec<Value>, CatalogError> {
        let mut results = Vec::new();
        loop {
            let page = self.call(route, &body)?;
            if let Some(items) = page.get("results").and_then(Value::as_array) {
                results.extend(items.iter().cloned());
            }
            match page.get("next") {
                Some(next) if !next.is_null() => body["starting"] = next.clone(),
                _ => break,
            }
        }
        Ok(results)
    }
}

/// Map an HTTP failure onto the catalog error taxonomy.
pub fn map_status(status: u16, route: &str, body: &str) -> CatalogError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {}", status));
    let msg = format!("{}: {}", route, detail);
    match status {
        401 => CatalogError::Auth(msg),
        403 => CatalogError::PermissionDenied(msg),
        404 => CatalogError::NotFound(msg),
        400 | 422 => CatalogError::InvalidInput(msg),
        429 | 500..=599 => CatalogError::Transient(msg),
        _ => CatalogError::Other(msg),
    }
}

fn epoch_millis(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
}

fn tag_set(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// One `findProjects` result; `None` for names outside the 002/003 families.
pub fn parse_project(item: &Value) -> Option<Resource> {
    let id = item.get("id")?.as_str()?.to_string();
    let describe = item.get("describe")?;
    let name = describe.get("name")?.as_str()?.to_string();
    let kind = ResourceKind::from_project_name(&name)?;
    Some(Resource {
        project_id: id.clone(),
        id,
        kind,
        name,
        last_modified: epoch_millis(describe.get("modified")),
        tags: tag_set(describe.get("tags")),
        size: describe.get("dataUsage").and_then(Value::as_f64).map_or(0, |gb| {
            (gb * 1024.0 * 1024.0 * 1024.0) as u64
        }),
        created_by: describe
            .pointer("/createdBy/user")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_state(raw: Option<&str>) -> ArchivalState {
    match raw {
        Some("archival") => ArchivalState::Archival,
        Some("archived") => ArchivalState::Archived,
        Some("unarchiving") => ArchivalState::Unarchiving,
        _ => ArchivalState::Live,
    }
}

/// One `findDataObjects` result.
pub fn parse_file(item: &Value) -> Option<FileEntry> {
    let id = item.get("id")?.as_str()?.to_string();
    let project_id = item.get("project")?.as_str()?.to_string();
    let describe = item.get("describe")?;
    Some(FileEntry {
        id,
        project_id,
        name: describe.get("name")?.as_str()?.to_string(),
        folder: describe
            .get("folder")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string(),
        last_modified: epoch_millis(describe.get("modified")),
        tags: tag_set(describe.get("tags")),
        size: describe.get("size").and_then(Value::as_u64).unwrap_or(0),
        state: parse_state(describe.get("archivalState").and_then(Value::as_str)),
    })
}

fn tag_route(target: &ResourceRef, op: &str) -> Result<(String, Value), CatalogError> {
    match target {
        ResourceRef::Project(project) => Ok((format!("{}/{}", project, op), json!({}))),
        ResourceRef::File { project, file } => {
            Ok((format!("{}/{}", file, op), json!({ "project": project })))
        }
        ResourceRef::Folder { .. } => Err(CatalogError::InvalidInput(format!(
            "folders cannot carry tags: {}",
            target.to_id()
        ))),
    }
}

/// Route and body for archiving `target`.
pub fn archive_request(target: &ResourceRef) -> (String, Value) {
    match target {
        ResourceRef::Project(project) => (format!("{}/archive", project), json!({})),
        ResourceRef::Folder { project, path } => (
            format!("{}/archive", project),
            json!({ "folder": path, "recurse": true }),
        ),
        ResourceRef::File { project, file } => {
            (format!("{}/archive", project), json!({ "files": [file] }))
        }
    }
}

impl Catalog for DxCatalog {
    fn check_access(&self) -> Result<(), CatalogError> {
        self.call("system/whoami", &json!({})).map(|_| ())
    }

    fn list_projects(&self, prefix: &str) -> Result<Vec<Resource>, CatalogError> {
        let mut body = json!({
            "name": { "regexp": format!("^{}.*", regex::escape(prefix)) },
            "describe": { "fields": {
                "name": true, "tags": true, "modified": true,
                "createdBy": true, "dataUsage": true
            }},
            "limit": PAGE_LIMIT,
        });
        if let Some(org) = &self.billed_to {
            body["billTo"] = json!(org);
        }
        let results = self.paginate("system/findProjects", body)?;
        let projects: Vec<Resource> = results.iter().filter_map(parse_project).collect();
        tracing::debug!(prefix, found = projects.len(), "projects listed");
        Ok(projects)
    }

    fn list_tree(&self, project_id: &str) -> Result<Vec<FileEntry>, CatalogError> {
        let body = json!({
            "scope": { "project": project_id, "folder": "/", "recurse": true },
            "class": "file",
            "describe": { "fields": {
                "name": true, "folder": true, "modified": true,
                "tags": true, "archivalState": true, "size": true
            }},
            "limit": PAGE_LIMIT,
        });
        let results = self.paginate("system/findDataObjects", body)?;
        Ok(results.iter().filter_map(parse_file).collect())
    }

    fn set_tags(
        &self,
        resource_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), CatalogError> {
        let target =
            ResourceRef::parse(resource_id).map_err(|e| CatalogError::InvalidInput(e.to_string()))?;
        if !remove.is_empty() {
            let (route, mut body) = tag_route(&target, "removeTags")?;
            body["tags"] = json!(remove);
            self.call(&route, &body)?;
        }
        if !add.is_empty() {
            let (route, mut body) = tag_route(&target, "addTags")?;
            body["tags"] = json!(add);
            self.call(&route, &body)?;
        }
        Ok(())
    }

    fn archive(&self, resource_id: &str) -> Result<ArchiveReceipt, CatalogError> {
        let target =
            ResourceRef::parse(resource_id).map_err(|e| CatalogError::InvalidInput(e.to_string()))?;
        let (route, body) = archive_request(&target);
        let resp = self.call(&route, &body)?;
        Ok(ArchiveReceipt {
            count: resp.get("count").and_then(Value::as_u64).unwrap_or(0),
        })
    }
}
