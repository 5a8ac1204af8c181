//! Tool System Module
//!
//! Structured tool calling with JSON schema definitions. The registry holds
//! the finite set of store operations the model may invoke mid-generation.
//! Results are never cached: every call re-reads the store.

mod allocate;
mod directory;

pub use allocate::AllocateResourceTool;
pub use directory::{ListProjectsTool, ListResourceProfilesTool, ListResourcesTool};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const ALLOCATE_RESOURCE_TOOL: &str = "allocate_resource";
pub const LIST_PROJECTS_TOOL: &str = "list_projects";
pub const LIST_RESOURCES_TOOL: &str = "list_resources";
pub const LIST_RESOURCE_PROFILES_TOOL: &str = "list_resource_profiles";

/// Output from a tool execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    /// Whether the tool execution was successful
    pub success: bool,
    /// The output data (can be string, JSON object, etc.)
    pub data: Value,
    /// Human-readable summary fed back to the model as the observation
    pub summary: String,
    /// Optional error message if success is false
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn success(data: impl Into<Value>, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            data: data.into(),
            summary: summary.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            data: Value::Null,
            summary: format!("Error: {}", error),
            error: Some(error),
        }
    }
}

/// A tool call request parsed from LLM output
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Trait for tools that can be executed by agents
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call the tool
    fn name(&self) -> String;

    /// What the tool does, shown to the model
    fn description(&self) -> String;

    /// JSON schema for the tool's parameters
    fn parameters(&self) -> Value;

    async fn execute(&self, params: Value) -> Result<ToolOutput>;
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool instance
    pub async fn register_instance<T: Tool + 'static>(&self, tool: T) {
        let mut tools = self.tools.write().await;
        tools.insert(tool.name(), Arc::new(tool));
    }

    /// All tool names, sorted
    pub async fn tool_names(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Generate a schema listing for specific tools
    pub async fn generate_filtered_tools_prompt(&self, allowed_names: &[String]) -> String {
        if allowed_names.is_empty() {
            return "No tools available for this task.\n".to_string();
        }

        let mut prompt = String::new();
        let tools = self.tools.read().await;
        let mut names: Vec<_> = allowed_names.iter().filter(|n| tools.contains_key(*n)).collect();
        names.sort();

        for name in names {
            let tool = &tools[name];
            prompt.push_str(&format!(
                "- {}: {} (params: {})\n",
                name,
                tool.description(),
                serde_json::to_string(&tool.parameters()).unwrap_or_default()
            ));
        }

        prompt
    }

    pub async fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Execute a tool call. An unknown tool is reported to the model as a
    /// failed output rather than an error.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        let tool = self.get_tool(&call.name).await;

        match tool {
            Some(tool) => {
                tracing::debug!("Executing tool {} with {}", call.name, call.parameters);
                tool.execute(call.parameters.clone()).await
            }
            None => Ok(ToolOutput::failure(format!("Unknown tool: {}", call.name))),
        }
    }
}
