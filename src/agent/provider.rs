use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

use crate::config::{OracleConfig, ProviderKind};

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String>;
}

pub struct OllamaProvider {
    client: ollama_rs::Ollama,
}

impl OllamaProvider {
    pub fn new(client: ollama_rs::Ollama) -> Self {
        Self { client }
    }

    /// `base_url` like `http://localhost:11434`.
    pub fn from_url(base_url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(base_url).with_context(|| format!("invalid Ollama URL '{}'", base_url))?;
        let host = format!("{}://{}", url.scheme(), url.host_str().unwrap_or("localhost"));
        let port = url.port_or_known_default().unwrap_or(11434);
        Ok(Self::new(ollama_rs::Ollama::new(host, port)))
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage};

        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(ChatMessage::system(sys));
        }
        messages.push(ChatMessage::user(prompt));

        let res = self
            .client
            .send_chat_messages(ChatMessageRequest::new(model.to_string(), messages))
            .await
            .context("Ollama chat request failed")?;

        Ok(res.message.content)
    }
}

pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(json!({ "role": "system", "content": sys }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&body);

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await?.error_for_status()?;
        let json: serde_json::Value = res.json().await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .context("Failed to parse content from OpenAI response")?;

        Ok(content.to_string())
    }
}

/// Wraps a provider with a direct `governor` limiter so bursts of matching
/// requests queue instead of hammering the model endpoint.
pub struct RateLimitedProvider {
    inner: Arc<dyn LLMProvider>,
    limiter: DefaultDirectRateLimiter,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn LLMProvider>, requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            inner,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }
}

#[async_trait]
impl LLMProvider for RateLimitedProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        if self.limiter.check().is_err() {
            debug!("Oracle rate limit reached; waiting for capacity");
            self.limiter.until_ready().await;
        }
        self.inner.generate(model, prompt, system).await
    }
}

/// Builds the configured provider, rate limited.
pub fn build_provider(config: &OracleConfig) -> Result<Arc<dyn LLMProvider>> {
    let inner: Arc<dyn LLMProvider> = match config.provider {
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_url(&config.base_url)?),
        ProviderKind::OpenAi => Arc::new(
            OpenAICompatibleProvider::new(config.base_url.clone(), config.api_key.clone())
                .with_temperature(config.temperature),
        ),
    };
    Ok(Arc::new(RateLimitedProvider::new(inner, config.requests_per_minute)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMProvider for CountingProvider {
        async fn generate(&self, _model: &str, prompt: String, _system: Option<String>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("echo: {}", prompt))
        }
    }

    #[tokio::test]
    async fn test_rate_limited_provider_delegates() {
        let inner = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let provider = RateLimitedProvider::new(inner.clone(), 60);
        let out = provider.generate("m", "hi".into(), None).await.unwrap();
        assert_eq!(out, "echo: hi");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ollama_from_url() {
        assert!(OllamaProvider::from_url("http://localhost:11434").is_ok());
        assert!(OllamaProvider::from_url("not a url").is_err());
    }
}
