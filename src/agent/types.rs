use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::OracleConfig;
use crate::tools::{
    ALLOCATE_RESOURCE_TOOL, LIST_PROJECTS_TOOL, LIST_RESOURCES_TOOL, LIST_RESOURCE_PROFILES_TOOL,
};

/// The jobs the hosted model is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Scores candidates and returns structured JSON.
    Matcher,
    /// Proposes a remediation for a low-scoring allocation.
    ConflictResolver,
    /// Free-form assistant that can allocate through tools.
    Assistant,
    /// Pulls required skills out of a project description.
    SkillExtractor,
}

impl AgentRole {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            AgentRole::Matcher =>
                "You are an expert resource allocation manager. You score how well people fit projects \
                 based on skill overlap, weekly availability, project priority and deadline. \
                 You always answer with a single JSON object matching the requested schema and nothing else.",
            AgentRole::ConflictResolver =>
                "You are an expert conflict resolution manager. An allocation was flagged because the \
                 person's match score is low. Look up the available people with your tools and recommend \
                 a specific, better-suited person by name. If nobody is better suited, recommend training \
                 for the current person.",
            AgentRole::Assistant =>
                "You are a resource allocation expert. Use the available tools to look up projects and \
                 people, or to allocate a person to a project when asked. Summarize what you did for the user.",
            AgentRole::SkillExtractor =>
                "You are an expert in skill extraction. Given a project description, list the concrete \
                 skills needed to deliver it. Answer with a single JSON object matching the requested schema.",
        }
    }

    pub fn allowed_tools(&self) -> Vec<String> {
        match self {
            AgentRole::Matcher | AgentRole::SkillExtractor => vec![],
            AgentRole::ConflictResolver => vec![LIST_RESOURCE_PROFILES_TOOL.to_string()],
            AgentRole::Assistant => vec![
                ALLOCATE_RESOURCE_TOOL.to_string(),
                LIST_PROJECTS_TOOL.to_string(),
                LIST_RESOURCES_TOOL.to_string(),
                LIST_RESOURCE_PROFILES_TOOL.to_string(),
            ],
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Matcher => write!(f, "Matcher"),
            AgentRole::ConflictResolver => write!(f, "ConflictResolver"),
            AgentRole::Assistant => write!(f, "Assistant"),
            AgentRole::SkillExtractor => write!(f, "SkillExtractor"),
        }
    }
}

/// Configuration for an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub role: AgentRole,
    pub model: String,
    pub system_prompt: String,
    /// Which tools this agent can use
    pub allowed_tools: Vec<String>,
    /// Max model turns in the tool loop
    pub max_iterations: usize,
    /// Per model call
    pub request_timeout: Duration,
}

impl AgentConfig {
    pub fn new(role: AgentRole, oracle: &OracleConfig) -> Self {
        Self {
            role,
            model: oracle.model.clone(),
            system_prompt: role.system_prompt().to_string(),
            allowed_tools: role.allowed_tools(),
            max_iterations: oracle.max_tool_iterations,
            request_timeout: Duration::from_secs(oracle.request_timeout_secs),
        }
    }
}
