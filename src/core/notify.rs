//! Notification sink.
//!
//! Every run produces exactly one [`Notification`]. Delivery failures are
//! reported to the caller, which logs them; they never undo decisions that
//! were already persisted.

use crate::core::config::{Config, NotifyBackend, NotifyConfig};
use crate::core::error::ArchiveError;
use crate::core::output::chunk_lines;
use crate::core::retry::RetryPolicy;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// Slack truncates attachment text somewhere above this many characters.
pub const SLACK_TEXT_LIMIT: usize = 7995;

const SLACK_POST_URL: &str = "https://slack.com/api/chat.postMessage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Countdown,
    Discovery,
    Execution,
    Failure,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Countdown => "countdown",
            NotificationKind::Discovery => "discovery",
            NotificationKind::Execution => "execution",
            NotificationKind::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub lines: Vec<String>,
}

impl Section {
    pub fn new(title: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            title: title.into(),
            lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub date: NaiveDate,
    pub headline: String,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Notification {
    pub fn new(kind: NotificationKind, date: NaiveDate, headline: impl Into<String>) -> Self {
        Self {
            kind,
            date,
            headline: headline.into(),
            sections: Vec::new(),
        }
    }

    /// Append a section; empty sections are dropped.
    pub fn with_section(mut self, section: Section) -> Self {
        if !section.lines.is_empty() {
            self.sections.push(section);
        }
        self
    }

    pub fn section(&self, title_fragment: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.title.contains(title_fragment))
    }

    /// Plain-text rendering used by log output and tests.
    pub fn render(&self) -> String {
        let mut out = format!("[{}] {}", self.kind.as_str(), self.headline);
        for section in &self.sections {
            out.push_str("\n\n");
            out.push_str(&section.title);
            for line in &section.lines {
                out.push('\n');
                out.push_str(line);
            }
        }
        out
    }
}

pub trait Notifier {
    fn send(&self, notification: &Notification) -> Result<(), ArchiveError>;
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn send(&self, notification: &Notification) -> Result<(), ArchiveError> {
        (**self).send(notification)
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn send(&self, notification: &Notification) -> Result<(), ArchiveError> {
        (**self).send(notification)
    }
}

/// Writes notifications to the tracing log instead of a chat channel.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> Result<(), ArchiveError> {
        tracing::info!(
            kind = notification.kind.as_str(),
            date = %notification.date,
            sections = notification.sections.len(),
            "notification\n{}",
            notification.render()
        );
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: Mutex<bool>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail.
    pub fn fail_sends(&self, fail: bool) {
        if let Ok(mut flag) = self.fail.lock() {
            *flag = fail;
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<Notification> {
        self.sent().pop()
    }
}

impl Notifier for MemoryNotifier {
    fn send(&self, notification: &Notification) -> Result<(), ArchiveError> {
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(ArchiveError::NotifyError("delivery disabled".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| ArchiveError::NotifyError("notifier lock poisoned".to_string()))?
            .push(notification.clone());
        Ok(())
    }
}

#[derive(Debug)]
enum PostError {
    Transient(String),
    Rejected(String),
}

impl std::fmt::Display for PostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostError::Transient(m) => write!(f, "transient: {}", m),
            PostError::Rejected(m) => write!(f, "rejected: {}", m),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts to Slack's `chat.postMessage`.
pub struct SlackNotifier {
    client: reqwest::blocking::Client,
    token: String,
    channels: NotifyConfig,
    debug: bool,
    retry: RetryPolicy,
    url: String,
}

impl SlackNotifier {
    pub fn new(token: String, channels: NotifyConfig, debug: bool) -> Result<Self, ArchiveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ArchiveError::NotifyError(e.to_string()))?;
        Ok(Self {
            client,
            token,
            channels,
            debug,
            retry: RetryPolicy::with_retries(5),
            url: SLACK_POST_URL.to_string(),
        })
    }

    /// Alerts and countdowns go to the alerts channel, execution results to
    /// the logs channel; debug runs always land in the debug channel.
    pub fn channel_for(&self, kind: NotificationKind) -> &str {
        channel_for(&self.channels, self.debug, kind)
    }

    fn post(&self, payload: &serde_json::Value) -> Result<(), PostError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .map_err(|e| PostError::Transient(e.to_string()))?;
        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(PostError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(PostError::Rejected(format!("HTTP {}", status)));
        }
        let body: SlackResponse = resp
            .json()
            .map_err(|e| PostError::Rejected(format!("unreadable response: {}", e)))?;
        if body.ok {
            Ok(())
        } else {
            Err(PostError::Rejected(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

fn channel_for(channels: &NotifyConfig, debug: bool, kind: NotificationKind) -> &str {
    if debug {
        return &channels.debug_channel;
    }
    match kind {
        NotificationKind::Execution => &channels.logs_channel,
        _ => &channels.alerts_channel,
    }
}

/// Build the `chat.postMessage` bodies for one notification.
///
/// The headline is its own post; each section becomes one or more attachment
/// posts whose text stays under [`SLACK_TEXT_LIMIT`].
pub fn slack_payloads(notification: &Notification, channel: &str) -> Vec<serde_json::Value> {
    let mut payloads = vec![serde_json::json!({
        "channel": channel,
        "text": format!("{} {}", notification.date.format("%d/%m/%Y"), notification.headline),
    })];
    for section in &notification.sections {
        let chunks = chunk_lines(&section.lines, SLACK_TEXT_LIMIT - 1);
        for chunk in chunks {
            payloads.push(serde_json::json!({
                "channel": channel,
                "attachments": [{ "pretext": section.title, "text": chunk }],
            }));
        }
    }
    payloads
}

impl Notifier for SlackNotifier {
    fn send(&self, notification: &Notification) -> Result<(), ArchiveError> {
        let channel = self.channel_for(notification.kind);
        let payloads = slack_payloads(notification, channel);
        tracing::info!(
            kind = notification.kind.as_str(),
            channel,
            posts = payloads.len(),
            "posting notification"
        );
        for payload in &payloads {
            self.retry
                .run(
                    "slack_post",
                    || self.post(payload),
                    |e| matches!(e, PostError::Transient(_)),
                )
                .map_err(|e| {
                    ArchiveError::NotifyError(format!("slack post to {} failed: {}", channel, e))
                })?;
        }
        Ok(())
    }
}

/// Pick the notifier selected in configuration.
pub fn from_config(config: &Config) -> Result<Box<dyn Notifier>, ArchiveError> {
    match config.notify.backend {
        NotifyBackend::Log => Ok(Box::new(LogNotifier)),
        NotifyBackend::Slack => {
            let token = config.secrets.slack_token.clone().ok_or_else(|| {
                ArchiveError::ConfigError("slack token missing".to_string())
            })?;
            Ok(Box::new(SlackNotifier::new(
                token,
                config.notify.clone(),
                config.debug,
            )?))
        }
    }
}
