// ReAct Agent Implementation
//
// Bounded reasoning + acting loop: the model may call tools from a fixed
// registry any number of times before it produces a final answer, up to
// `max_iterations` model turns.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{extract_json_object, truncate, AgentConfig, AgentRole, LLMProvider};
use crate::error::OracleError;
use crate::tools::{ToolCall, ToolRegistry};

const OBSERVATION_LIMIT: usize = 4000;

const NEXT_TAGS: [&str; 8] = [
    "[REASONING]", "[THOUGHT]", "[ACTION]", "[ANSWER]", "[OBSERVATION]",
    "REASONING:", "ACTION:", "ANSWER:",
];

/// A single step in the ReAct loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReActStep {
    pub thought: String,
    pub actions: Vec<ToolCall>,
    pub observations: Vec<String>,
    pub answer: Option<String>,
}

impl ReActStep {
    pub fn thought(thought: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            actions: Vec::new(),
            observations: Vec::new(),
            answer: None,
        }
    }

    pub fn with_actions(mut self, actions: Vec<ToolCall>) -> Self {
        self.actions = actions;
        self
    }

    pub fn final_answer(thought: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            actions: Vec::new(),
            observations: Vec::new(),
            answer: Some(answer.into()),
        }
    }

    pub fn is_final(&self) -> bool {
        self.answer.is_some()
    }
}

/// Response from an agent execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub answer: String,
    /// All steps taken to reach the answer
    pub steps: Vec<ReActStep>,
    pub role: AgentRole,
}

impl AgentResponse {
    /// Tool calls in the order they were executed.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.steps.iter().flat_map(|s| s.actions.iter())
    }
}

/// ReAct Agent with reasoning and tool use capabilities
#[derive(Clone)]
pub struct ReActAgent {
    provider: Arc<dyn LLMProvider>,
    config: AgentConfig,
    tools: Arc<ToolRegistry>,
}

impl ReActAgent {
    pub fn new(provider: Arc<dyn LLMProvider>, config: AgentConfig, tools: Arc<ToolRegistry>) -> Self {
        Self { provider, config, tools }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Single model call under the configured timeout.
    pub async fn complete(&self, prompt: String) -> Result<String, OracleError> {
        let timeout = self.config.request_timeout;
        let call = self
            .provider
            .generate(&self.config.model, prompt, Some(self.config.system_prompt.clone()));
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(OracleError::Provider(e.to_string())),
            Err(_) => Err(OracleError::Timeout(timeout.as_secs())),
        }
    }

    /// Build the ReAct prompt
    async fn build_react_prompt(&self, query: &str, steps: &[ReActStep], context: Option<&str>) -> String {
        let mut prompt = String::new();

        if let Some(ctx) = context {
            prompt.push_str(&format!("## Context\n{}\n\n", ctx));
        }

        prompt.push_str("## Available Tools\n");
        prompt.push_str(&self.tools.generate_filtered_tools_prompt(&self.config.allowed_tools).await);
        prompt.push('\n');

        prompt.push_str(
            r###"## Response Format
If you need information or want to act, call ONE tool with the [ACTION] tag:
[REASONING]
Why this tool.
[ACTION]
{"name": "tool_name", "parameters": {"key": "value"}}

When you are done, reply with:
[ANSWER]
Your response to the user.

RULES:
1. Do NOT wrap JSON in code blocks after the [ACTION] tag.
2. NEVER output [OBSERVATION]. The system provides observations after your action.
3. Only use the tools listed above.

"###,
        );

        prompt.push_str(&format!("## User Query\n{}\n\n", query));

        if !steps.is_empty() {
            prompt.push_str("## Trace\n");
            for step in steps {
                if !step.thought.is_empty() {
                    prompt.push_str(&format!("[REASONING]\n{}\n", step.thought));
                }
                for action in &step.actions {
                    if let Ok(action_json) = serde_json::to_string(action) {
                        prompt.push_str(&format!("[ACTION]\n{}\n", action_json));
                    }
                }
                for obs in &step.observations {
                    prompt.push_str(&format!("[OBSERVATION]\n{}\n", obs));
                }
                prompt.push('\n');
            }
        }

        prompt.push_str("Continue:\n");
        prompt
    }

    /// Parse the model output into a step. Tool calls take precedence over
    /// an answer in the same turn.
    fn parse_response(&self, response: &str) -> ReActStep {
        debug!("Raw LLM response for parsing:\n{}", response);

        // A model that simulates its own observation is truncated there.
        let clean = match response.to_ascii_uppercase().find("[OBSERVATION]") {
            Some(idx) => {
                warn!("Hallucinated [OBSERVATION] detected. Truncating response.");
                &response[..idx]
            }
            None => response,
        };

        let thought = extract_tag(clean, "REASONING")
            .or_else(|| extract_tag(clean, "THOUGHT"))
            .unwrap_or_default();

        let mut tool_calls: Vec<ToolCall> = extract_all_tags(clean, "ACTION")
            .iter()
            .filter_map(|a| parse_json_tool_call(a))
            .collect();

        if tool_calls.is_empty() && extract_tag(clean, "ANSWER").is_none() {
            if let Some(call) = parse_json_tool_call(clean) {
                warn!("Found raw JSON tool call without [ACTION] tag.");
                tool_calls.push(call);
            }
        }

        if !tool_calls.is_empty() {
            return ReActStep::thought(thought).with_actions(tool_calls);
        }

        if let Some(answer) = extract_tag(clean, "ANSWER") {
            return ReActStep::final_answer(thought, answer);
        }

        // Tagless prose is accepted as the final answer.
        ReActStep::final_answer(thought, clean.trim())
    }

    /// Runs the loop. Tools execute sequentially in the order the model
    /// emitted them, and each observation is fed back before the next turn.
    pub async fn execute(&self, query: &str, context: Option<&str>) -> Result<AgentResponse, OracleError> {
        info!("{} agent starting: {}", self.config.role, truncate(query, 120));

        let mut steps: Vec<ReActStep> = Vec::new();

        for iteration in 0..self.config.max_iterations {
            debug!("ReAct iteration {}", iteration + 1);

            let prompt = self.build_react_prompt(query, &steps, context).await;
            let raw = self.complete(prompt).await?;
            let mut step = self.parse_response(&raw);

            if step.is_final() {
                let answer = step.answer.clone().unwrap_or_default();
                if answer.trim().is_empty() {
                    return Err(OracleError::InvalidResponse("model returned an empty answer".into()));
                }
                steps.push(step);
                info!("{} agent completed in {} iterations", self.config.role, iteration + 1);
                return Ok(AgentResponse { answer, steps, role: self.config.role });
            }

            for action in &step.actions {
                let obs = if !self.config.allowed_tools.contains(&action.name) {
                    warn!("Model requested tool '{}' outside its allowance", action.name);
                    format!("Error: tool '{}' is not available", action.name)
                } else {
                    match self.tools.execute(action).await {
                        Ok(output) => output.summary,
                        Err(e) => format!("Tool execution failed: {}", e),
                    }
                };
                debug!("Observation from {}: {}", action.name, truncate(&obs, 200));
                step.observations.push(truncate(&obs, OBSERVATION_LIMIT));
            }
            steps.push(step);
        }

        warn!("{} agent hit the iteration cap ({})", self.config.role, self.config.max_iterations);
        Err(OracleError::IterationLimit(self.config.max_iterations))
    }
}

fn tag_end(text_upper: &str, start: usize) -> usize {
    NEXT_TAGS
        .iter()
        .filter_map(|t| text_upper[start..].find(t).map(|i| start + i))
        .min()
        .unwrap_or(text_upper.len())
}

/// Content after `[TAG]` (or `TAG:`) up to the next known tag.
fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let text_upper = text.to_ascii_uppercase();
    let patterns = [format!("[{}]", tag), format!("**{}**", tag), format!("{}:", tag)];

    for pattern in patterns {
        if let Some(start_idx) = text_upper.find(&pattern) {
            let start = start_idx + pattern.len();
            let end = tag_end(&text_upper, start);
            let result = text[start..end].trim().trim_start_matches(':').trim().to_string();
            if !result.is_empty() {
                return Some(result);
            }
        }
    }
    None
}

fn extract_all_tags(text: &str, tag: &str) -> Vec<String> {
    let text_upper = text.to_ascii_uppercase();
    let patterns = [format!("[{}]", tag), format!("{}:", tag)];
    let mut results = Vec::new();

    for pattern in patterns {
        let mut pos = 0;
        while let Some(idx) = text_upper[pos..].find(&pattern) {
            let start = pos + idx + pattern.len();
            let end = tag_end(&text_upper, start);
            let result = text[start..end].trim().trim_start_matches(':').trim();
            if !result.is_empty() {
                results.push(result.to_string());
            }
            pos = end;
            if pos >= text.len() {
                break;
            }
        }
        if !results.is_empty() {
            break;
        }
    }
    results
}

fn parse_json_tool_call(text: &str) -> Option<ToolCall> {
    let json = extract_json_object(text)?;
    serde_json::from_str::<ToolCall>(json)
        .ok()
        .filter(|call| !call.name.is_empty())
}
