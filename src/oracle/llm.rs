use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::{ConflictBrief, ExtractSkillsRequest, MatchingOracle, ProjectMatchRequest, ResourceMatchRequest, Suggestion};
use crate::agent::{AgentConfig, AgentRole, LLMProvider, ReActAgent};
use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::tools::ToolRegistry;

/// `MatchingOracle` over an `LLMProvider`. Every model call runs under the
/// configured timeout; read-only calls get `max_retries` extra attempts.
pub struct LlmMatchingOracle {
    provider: Arc<dyn LLMProvider>,
    tools: Arc<ToolRegistry>,
    config: OracleConfig,
}

impl LlmMatchingOracle {
    pub fn new(provider: Arc<dyn LLMProvider>, tools: Arc<ToolRegistry>, config: OracleConfig) -> Self {
        Self { provider, tools, config }
    }

    fn agent(&self, role: AgentRole) -> ReActAgent {
        ReActAgent::new(self.provider.clone(), AgentConfig::new(role, &self.config), self.tools.clone())
    }

    async fn with_retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt <= self.config.max_retries => {
                    warn!("{} attempt {} failed, retrying: {}", label, attempt, e);
                }
                Err(e) => {
                    warn!("{} failed after {} attempt(s): {}", label, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl MatchingOracle for LlmMatchingOracle {
    async fn suggest_resources(&self, request: &ResourceMatchRequest) -> Result<Vec<Suggestion>, OracleError> {
        let agent = &self.agent(AgentRole::Matcher);
        let prompt = &request.render_prompt();
        let suggestions = self
            .with_retry("resource matching", move || async move {
                let raw = agent.complete(prompt.clone()).await?;
                request.parse_response(&raw)
            })
            .await?;
        info!("Oracle ranked {} resource(s)", suggestions.len());
        Ok(suggestions)
    }

    async fn suggest_projects(&self, request: &ProjectMatchRequest) -> Result<Vec<Suggestion>, OracleError> {
        let agent = &self.agent(AgentRole::Matcher);
        let prompt = &request.render_prompt();
        let suggestions = self
            .with_retry("project matching", move || async move {
                let raw = agent.complete(prompt.clone()).await?;
                request.parse_response(&raw)
            })
            .await?;
        info!("Oracle ranked {} project(s)", suggestions.len());
        Ok(suggestions)
    }

    async fn resolve_conflict(&self, brief: &ConflictBrief) -> Result<String, OracleError> {
        let agent = &self.agent(AgentRole::ConflictResolver);
        let prompt = &brief.render_prompt();
        self.with_retry("conflict resolution", move || async move {
            let response = agent.execute(prompt, None).await?;
            brief.parse_answer(&response.answer)
        })
        .await
    }

    async fn extract_skills(&self, request: &ExtractSkillsRequest) -> Result<Vec<String>, OracleError> {
        let agent = &self.agent(AgentRole::SkillExtractor);
        let prompt = &request.render_prompt();
        self.with_retry("skill extraction", move || async move {
            let raw = agent.complete(prompt.clone()).await?;
            request.parse_response(&raw)
        })
        .await
    }

    async fn chat(&self, message: &str) -> Result<String, OracleError> {
        let response = self.agent(AgentRole::Assistant).execute(message, None).await?;
        Ok(response.answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, Project, Resource, Seniority};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn generate(&self, _model: &str, _prompt: String, _system: Option<String>) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("model unavailable"))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl LLMProvider for SlowProvider {
        async fn generate(&self, _model: &str, _prompt: String, _system: Option<String>) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("{}".into())
        }
    }

    fn request() -> ResourceMatchRequest {
        let resource = Resource {
            id: "r1".into(),
            name: "Alice".into(),
            email: "alice@example.com".into(),
            role: "Frontend".into(),
            skills: ["React".to_string()].into_iter().collect(),
            availability: 40,
            seniority: Seniority::Senior,
            location: None,
            timezone: None,
        };
        let project = Project {
            id: "p1".into(),
            name: "Phoenix".into(),
            description: "Expense tracker".into(),
            required_skills: ["React".to_string()].into_iter().collect(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            deadline: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            priority: Priority::High,
        };
        ResourceMatchRequest::new(&project, &[resource], None)
    }

    fn oracle(provider: Arc<dyn LLMProvider>, config: OracleConfig) -> LlmMatchingOracle {
        LlmMatchingOracle::new(provider, Arc::new(ToolRegistry::new()), config)
    }

    const VALID: &str = r#"{"resourceAllocations": [{"resourceId": "r1", "resourceName": "Alice", "matchPercentage": 93, "reasoning": "React match, full availability"}]}"#;

    #[tokio::test]
    async fn test_invalid_response_is_retried_once() {
        let provider = ScriptedProvider::new(&["not json at all", VALID]);
        let oracle = oracle(provider.clone(), OracleConfig::default());
        let suggestions = oracle.suggest_resources(&request()).await.unwrap();
        assert_eq!(suggestions[0].match_score.value(), 93);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let provider = ScriptedProvider::new(&["nope", "still nope", VALID]);
        let oracle = oracle(provider.clone(), OracleConfig::default());
        let err = oracle.suggest_resources(&request()).await.unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_oracle_error() {
        let config = OracleConfig { request_timeout_secs: 1, max_retries: 0, ..OracleConfig::default() };
        let oracle = oracle(Arc::new(SlowProvider), config);
        let err = oracle.suggest_resources(&request()).await.unwrap_err();
        assert!(matches!(err, OracleError::Timeout(1)));
    }

    #[tokio::test]
    async fn test_chat_is_not_retried() {
        let provider = ScriptedProvider::new(&[]);
        let oracle = oracle(provider.clone(), OracleConfig::default());
        assert!(oracle.chat("allocate Alice to Phoenix").await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_extract_skills() {
        let provider = ScriptedProvider::new(&[r#"{"skills": ["React", "Firebase"]}"#]);
        let oracle = oracle(provider, OracleConfig::default());
        let skills = oracle
            .extract_skills(&ExtractSkillsRequest { project_description: "A React app on Firebase".into() })
            .await
            .unwrap();
        assert_eq!(skills, vec!["React".to_string(), "Firebase".to_string()]);
    }
}
