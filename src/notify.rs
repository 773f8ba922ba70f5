use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::Submission;

const DESCRIPTION_PREVIEW: usize = 400;

/// Best-effort announcement of a new submission. Never fails the request.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, record: &Submission);
}

/// Posts `{"text": ...}` to a Slack-compatible incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, record: &Submission) {
        let payload = json!({ "text": format_summary(record) });
        match self.client.post(&self.webhook_url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(id = %record.id, "Webhook notified");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!("Webhook rejected submission {}: {} {}", record.id, status, body);
            }
            Err(e) => warn!("Webhook error for submission {}: {}", record.id, e),
        }
    }
}

/// Used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, record: &Submission) {
        info!(
            id = %record.id,
            name = %record.name,
            url = %record.url,
            ip = %record.ip,
            "New submission (no webhook configured)"
        );
    }
}

pub fn format_summary(record: &Submission) -> String {
    format!(
        "New resource submission\n\
         • Name: {}\n\
         • Link: {}\n\
         • Description: {}\n\
         • Tags: {}\n\
         • Disciplines: {}\n\
         • Contact: {}\n\
         • Source page: {}\n\
         • IP: {}",
        record.name,
        record.url,
        truncate(&record.description, DESCRIPTION_PREVIEW),
        record.tags.join(", "),
        record.disciplines.join(", "),
        or_dash(&record.contact),
        or_dash(&record.page),
        record.ip,
    )
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push('…');
    out
}
