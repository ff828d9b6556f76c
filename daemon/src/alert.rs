//! Alert payloads and delivery sinks (webhook, desktop notification)

use crate::error::{GuardError, Result};
use crate::sampler::ProcessSample;
use async_trait::async_trait;
use notify_rust::Notification;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const EMBED_COLOR: u32 = 0xE67E22;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub total_pct: f64,
    pub top_rows: Vec<ProcessSample>,
}

/// One ranked row, e.g. ` 1. firefox  42.0%  PID 1234`.
pub fn format_process_line(index: usize, row: &ProcessSample) -> String {
    let pct = format!("{:.1}%", row.cpu_pct);
    let name: String = row.name.chars().take(32).collect();
    format!("{:>2}. {}  {:>6}  PID {}", index, name, pct, row.pid)
}

impl AlertPayload {
    pub fn title(&self) -> String {
        format!("High CPU detected: {:.1}%", self.total_pct)
    }

    pub fn body(&self) -> String {
        let lines: Vec<String> = self
            .top_rows
            .iter()
            .enumerate()
            .map(|(i, row)| format_process_line(i + 1, row))
            .collect();
        format!(
            "Top {} processes:\n{}\n\nUse top_cpu to see the top 10 and terminate <index> to end one.",
            self.top_rows.len(),
            lines.join("\n")
        )
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, payload: &AlertPayload) -> Result<()>;
}

/// Posts a chat-style embed to an HTTP webhook.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuardError::SinkUnavailable(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn embed(payload: &AlertPayload) -> serde_json::Value {
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        serde_json::json!({
            "embeds": [{
                "title": "Host CPU Alert",
                "description": format!("{}\n\n{}", payload.title(), payload.body()),
                "color": EMBED_COLOR,
                "footer": { "text": format!("Host Guardian • {}", stamp) },
            }]
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, payload: &AlertPayload) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&Self::embed(payload))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| GuardError::SinkUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Local desktop notification.
pub struct DesktopSink {
    appname: String,
}

impl DesktopSink {
    pub fn new() -> Self {
        Self {
            appname: "HostGuard".to_string(),
        }
    }
}

impl Default for DesktopSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSink for DesktopSink {
    async fn deliver(&self, payload: &AlertPayload) -> Result<()> {
        let summary = payload.title();
        let body = payload.body();
        let appname = self.appname.clone();
        tokio::task::spawn_blocking(move || {
            Notification::new()
                .summary(&summary)
                .body(&body)
                .appname(&appname)
                .show()
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| GuardError::SinkUnavailable(e.to_string()))?
        .map_err(GuardError::SinkUnavailable)
    }
}

/// Delivers to every inner sink; succeeds only if all of them did.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for FanoutSink {
    async fn deliver(&self, payload: &AlertPayload) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(payload).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GuardError::SinkUnavailable(failures.join("; ")))
        }
    }
}
