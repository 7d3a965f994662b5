//! Notification builders. One per terminal state of a run.

use crate::core::catalog::{Resource, ResourceKind};
use crate::core::members::MemberDirectory;
use crate::core::notify::{Notification, NotificationKind, Section};
use crate::core::output::human_bytes;
use crate::core::store::RecordStatus;
use crate::plugins::archive::ExecutionReport;
use crate::plugins::discover::{DiscoveryReport, StagedResource};
use crate::plugins::tar::TarReport;
use chrono::NaiveDate;
use std::collections::BTreeMap;

const TAG_HINT: &str = "_Please tag `no-archive` or `never-archive`_";

/// Slack link to a resource in the platform UI.
pub fn resource_link(url_prefix: &str, resource: &Resource) -> String {
    let project = resource.project_id.trim_start_matches("project-");
    let prefix = url_prefix.trim_end_matches('/');
    if resource.kind.is_project() {
        format!("<{}/{}/data/|{}>", prefix, project, resource.name)
    } else {
        format!("<{}/{}/data{}|{}>", prefix, project, resource.name, resource.id)
    }
}

pub fn countdown(
    today: NaiveDate,
    next_gate: NaiveDate,
    days_left: i64,
    pending: usize,
) -> Notification {
    let plural = if days_left == 1 { "day" } else { "days" };
    let mut headline = format!(
        "automated-archiving: {} {} till archiving on {}",
        days_left, plural, next_gate
    );
    if pending > 0 {
        headline.push_str(&format!(" ({} staged)", pending));
    }
    Notification::new(NotificationKind::Countdown, today, headline)
}

pub fn failure(today: NaiveDate, error: &str) -> Notification {
    Notification::new(
        NotificationKind::Failure,
        today,
        format!("automated-archiving: run failed\n`{}`", error),
    )
}

fn tar_section(tar: Option<&TarReport>, tar_months: u32) -> Option<Section> {
    let tar = tar.filter(|t| !t.is_empty())?;
    let range = match (tar.earliest, tar.latest) {
        (Some(a), Some(b)) => format!(" (earliest {} -- latest {})", a, b),
        _ => String::new(),
    };
    Some(Section::new(
        format!(
            "automated-tar-notify: `tar.gz` not modified in the last {} months{}",
            tar_months, range
        ),
        tar.lines(),
    ))
}

fn staged_lines<'a>(
    items: impl Iterator<Item = &'a StagedResource>,
    url_prefix: &str,
) -> Vec<String> {
    items
        .map(|s| resource_link(url_prefix, &s.resource))
        .collect()
}

/// 003 projects grouped under the member who created them.
fn grouped_by_creator<'a>(
    items: impl Iterator<Item = &'a StagedResource>,
    members: &MemberDirectory,
    url_prefix: &str,
) -> Vec<String> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in items {
        let creator = item
            .resource
            .created_by
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        groups
            .entry(creator)
            .or_default()
            .push(resource_link(url_prefix, &item.resource));
    }
    let mut lines = Vec::new();
    for (creator, projects) in groups {
        lines.push(members.mention(&creator));
        lines.extend(projects);
    }
    lines
}

pub struct DiscoveryContext<'a> {
    pub today: NaiveDate,
    pub archive_date: NaiveDate,
    pub url_prefix: &'a str,
    pub members: &'a MemberDirectory,
    pub tar: Option<&'a TarReport>,
    pub tar_months: u32,
}

pub fn discovery(report: &DiscoveryReport, ctx: &DiscoveryContext<'_>) -> Notification {
    let staged = report.staged.len();
    let headline = if staged == 0 {
        "automated-archiving: nothing to archive this cycle".to_string()
    } else {
        let bytes: u64 = report.staged.iter().map(|s| s.resource.size).sum();
        format!(
            ":bangbang: {} resources ({}) to be archived on {}\n{}",
            staged,
            human_bytes(bytes),
            ctx.archive_date,
            TAG_HINT
        )
    };
    let mut n = Notification::new(NotificationKind::Discovery, ctx.today, headline)
        .with_section(Section::new(
            "*002 projects to be archived:*",
            staged_lines(report.staged_of(ResourceKind::Project002), ctx.url_prefix),
        ))
        .with_section(Section::new(
            "*003 projects to be archived:*",
            grouped_by_creator(
                report.staged_of(ResourceKind::Project003),
                ctx.members,
                ctx.url_prefix,
            ),
        ))
        .with_section(Section::new(
            "*Directories in staging to be archived:*",
            staged_lines(
                report.staged_of(ResourceKind::StagingDirectory),
                ctx.url_prefix,
            ),
        ))
        .with_section(Section::new(
            "*Precision folders to be archived:*",
            staged_lines(
                report.staged_of(ResourceKind::PrecisionFolder),
                ctx.url_prefix,
            ),
        ))
        .with_section(Section::new(
            ":warning: *Inactive and previously tagged `no-archive`, to be archived unless re-tagged:*",
            staged_lines(report.previously_exempt(), ctx.url_prefix),
        ))
        .with_section(Section::new(
            ":male-detective: *Tagged `no-archive`* _(for your information)_",
            report
                .no_archive
                .iter()
                .map(|r| resource_link(ctx.url_prefix, r))
                .collect(),
        ))
        .with_section(Section::new(
            ":female-detective: *Tagged `never-archive`* _(for your information)_",
            report
                .never_archive
                .iter()
                .map(|r| resource_link(ctx.url_prefix, r))
                .collect(),
        ))
        .with_section(Section::new(
            "*Errors during discovery:*",
            report
                .errors
                .iter()
                .map(|(id, e)| format!("{} | {}", id, e))
                .collect(),
        ));
    if let Some(section) = tar_section(ctx.tar, ctx.tar_months) {
        n = n.with_section(section);
    }
    n
}

pub fn execution(
    report: &ExecutionReport,
    today: NaiveDate,
    tar: Option<&TarReport>,
    tar_months: u32,
) -> Notification {
    let count = |s: RecordStatus| report.with_status(s).count();
    let headline = format!(
        ":closed_book: automated-archiving: {} archived, {} skipped, {} failed",
        count(RecordStatus::Archived),
        count(RecordStatus::Skipped),
        count(RecordStatus::Failed)
    );
    let lines_for = |status: RecordStatus| -> Vec<String> {
        report
            .with_status(status)
            .map(|e| {
                format!(
                    "{} | {} | {}",
                    e.record.resource_id,
                    e.record.name,
                    e.record.detail.clone().unwrap_or_default()
                )
            })
            .collect()
    };
    let mut n = Notification::new(NotificationKind::Execution, today, headline)
        .with_section(Section::new(
            "*Projects or directories archived:*",
            lines_for(RecordStatus::Archived),
        ))
        .with_section(Section::new(
            "*Skipped at execution:*",
            lines_for(RecordStatus::Skipped),
        ))
        .with_section(Section::new("*Failed:*", lines_for(RecordStatus::Failed)))
        .with_section(Section::new(
            "*Status tags:*",
            report
                .status_tags
                .iter()
                .map(|t| match &t.error {
                    None => format!("{} | {}", t.project_id, t.status.tag()),
                    Some(e) => format!("{} | {} | failed: {}", t.project_id, t.status.tag(), e),
                })
                .collect(),
        ));
    if let Some(section) = tar_section(tar, tar_months) {
        n = n.with_section(section);
    }
    n
}
