//! Application Configuration
//!
//! Loaded from a YAML or JSON file (by extension), then overridden from the
//! environment. A missing file means defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::domain::{MatchScore, StatusThresholds};

pub const ENV_CONFIG: &str = "TALENTFLOW_CONFIG";
pub const ENV_MODEL: &str = "TALENTFLOW_MODEL";
pub const ENV_PROVIDER_URL: &str = "TALENTFLOW_PROVIDER_URL";
pub const ENV_API_KEY: &str = "TALENTFLOW_API_KEY";
pub const ENV_DB: &str = "TALENTFLOW_DB";
pub const ENV_BIND: &str = "TALENTFLOW_BIND";
pub const ENV_WEBHOOK_URL: &str = "TALENTFLOW_WEBHOOK_URL";

/// Smallest tool-loop cap that still allows three tool calls plus the answer turn.
pub const MIN_TOOL_ITERATIONS: usize = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub oracle: OracleConfig,
    pub allocation: AllocationConfig,
    pub notifications: NotificationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    Memory,
    Sqlite { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite { path: PathBuf::from("talent_flow.db") }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint.
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// Extra attempts after the first failed oracle call.
    pub max_retries: u32,
    pub requests_per_minute: u32,
    pub max_tool_iterations: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            model: "llama3.2".to_string(),
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            temperature: 0.2,
            request_timeout_secs: 30,
            max_retries: 1,
            requests_per_minute: 30,
            max_tool_iterations: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AllocationConfig {
    pub thresholds: StatusThresholds,
    /// Used on the request-approval path instead of `thresholds` when set.
    pub approval_thresholds: Option<StatusThresholds>,
    /// Score given to allocations made through the chat assistant.
    pub chat_match: u8,
    /// How far back to look for an already-landed write before retrying.
    pub retry_window_secs: u64,
    pub auto_resolve_conflicts: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            thresholds: StatusThresholds::CANONICAL,
            approval_thresholds: None,
            chat_match: 80,
            retry_window_secs: 120,
            auto_resolve_conflicts: true,
        }
    }
}

impl AllocationConfig {
    pub fn approval(&self) -> StatusThresholds {
        self.approval_thresholds.unwrap_or(self.thresholds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    /// POST target for allocation notices. Log-only when unset.
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { webhook_url: None, webhook_timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8080".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    /// Daily-rolling log files go here when set.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "talent_flow=info".to_string(),
            directory: None,
        }
    }
}

impl AppConfig {
    /// Reads `path` if it exists. YAML unless the extension is `.json`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        };
        Ok(config)
    }

    /// File named by `TALENTFLOW_CONFIG` (default `talent_flow.yaml`), then
    /// environment overrides, then validation.
    pub async fn from_env() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG).unwrap_or_else(|_| "talent_flow.yaml".to_string());
        let mut config = Self::load(&path).await?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup(ENV_MODEL) {
            self.oracle.model = model;
        }
        if let Some(url) = lookup(ENV_PROVIDER_URL) {
            self.oracle.base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.oracle.api_key = Some(key);
        }
        if let Some(db) = lookup(ENV_DB) {
            self.store = if db == ":memory:" {
                StoreConfig::Memory
            } else {
                StoreConfig::Sqlite { path: PathBuf::from(db) }
            };
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = bind;
        }
        if let Some(url) = lookup(ENV_WEBHOOK_URL) {
            self.notifications.webhook_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.allocation.thresholds.validate()?;
        if let Some(approval) = &self.allocation.approval_thresholds {
            approval.validate()?;
        }
        MatchScore::new(self.allocation.chat_match)?;
        if self.oracle.max_tool_iterations < MIN_TOOL_ITERATIONS {
            bail!(
                "oracle.max_tool_iterations must be at least {} (got {})",
                MIN_TOOL_ITERATIONS,
                self.oracle.max_tool_iterations
            );
        }
        if self.oracle.request_timeout_secs == 0 {
            bail!("oracle.request_timeout_secs must be positive");
        }
        if self.notifications.webhook_timeout_secs == 0 {
            bail!("notifications.webhook_timeout_secs must be positive");
        }
        Ok(())
    }
}
