//! Notification Sink
//!
//! Best-effort notices after an allocation lands. Dispatch never blocks the
//! caller and a failed delivery is only logged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::NotificationConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationNotice {
    pub resource_name: String,
    pub project_name: String,
    pub resource_email: String,
    pub details: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notice: &AllocationNotice) -> Result<()>;
}

/// Writes the notice to the log. The default sink.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn send(&self, notice: &AllocationNotice) -> Result<()> {
        info!(
            "📬 Notify {} <{}>: allocated to {}. {}",
            notice.resource_name, notice.resource_email, notice.project_name, notice.details
        );
        Ok(())
    }
}

/// POSTs the notice as JSON (email/Slack relays accept this shape).
pub struct WebhookNotificationSink {
    client: Client,
    url: String,
}

impl WebhookNotificationSink {
    /// Every POST is bounded by `timeout` so a silent endpoint cannot pin
    /// the dispatch task.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building webhook client")?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn send(&self, notice: &AllocationNotice) -> Result<()> {
        self.client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .with_context(|| format!("posting notice to {}", self.url))?
            .error_for_status()
            .context("webhook rejected notice")?;
        Ok(())
    }
}

/// Fire-and-forget dispatcher around a sink.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Webhook sink when a URL is configured, log sink otherwise.
    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        Ok(match &config.webhook_url {
            Some(url) => Self::new(Arc::new(WebhookNotificationSink::new(
                url.as_str(),
                Duration::from_secs(config.webhook_timeout_secs),
            )?)),
            None => Self::new(Arc::new(LogNotificationSink)),
        })
    }

    /// Spawns delivery and returns immediately. The handle is only useful
    /// to tests; production callers drop it.
    pub fn dispatch(&self, notice: AllocationNotice) -> JoinHandle<()> {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.send(&notice).await {
                error!(
                    "Notification for {} -> {} failed: {:#}",
                    notice.resource_name, notice.project_name, e
                );
            }
        })
    }
}
