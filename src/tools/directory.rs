//! Directory Tools
//!
//! Read-only views of the store for the model: project names, resource
//! names and roles, and full resource profiles for finding alternatives.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{Tool, ToolOutput, LIST_PROJECTS_TOOL, LIST_RESOURCES_TOOL, LIST_RESOURCE_PROFILES_TOOL};
use crate::store::DomainStore;

fn no_params() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub struct ListProjectsTool {
    store: Arc<dyn DomainStore>,
}

impl ListProjectsTool {
    pub fn new(store: Arc<dyn DomainStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListProjectsTool {
    fn name(&self) -> String {
        LIST_PROJECTS_TOOL.to_string()
    }

    fn description(&self) -> String {
        "Get a list of all projects (id and name).".to_string()
    }

    fn parameters(&self) -> Value {
        no_params()
    }

    async fn execute(&self, _params: Value) -> Result<ToolOutput> {
        let projects = self.store.list_projects().await?;
        let data: Vec<Value> = projects
            .iter()
            .map(|p| json!({ "id": p.id, "name": p.name }))
            .collect();
        let summary = format!("{} projects: {}", data.len(), serde_json::to_string(&data)?);
        Ok(ToolOutput::success(data, summary))
    }
}

pub struct ListResourcesTool {
    store: Arc<dyn DomainStore>,
}

impl ListResourcesTool {
    pub fn new(store: Arc<dyn DomainStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListResourcesTool {
    fn name(&self) -> String {
        LIST_RESOURCES_TOOL.to_string()
    }

    fn description(&self) -> String {
        "Get a list of all available resources (id, name and role).".to_string()
    }

    fn parameters(&self) -> Value {
        no_params()
    }

    async fn execute(&self, _params: Value) -> Result<ToolOutput> {
        let resources = self.store.list_resources().await?;
        let data: Vec<Value> = resources
            .iter()
            .map(|r| json!({ "id": r.id, "name": r.name, "role": r.role }))
            .collect();
        let summary = format!("{} resources: {}", data.len(), serde_json::to_string(&data)?);
        Ok(ToolOutput::success(data, summary))
    }
}

/// Full profiles, used by the conflict resolver to look for a better fit.
pub struct ListResourceProfilesTool {
    store: Arc<dyn DomainStore>,
}

impl ListResourceProfilesTool {
    pub fn new(store: Arc<dyn DomainStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListResourceProfilesTool {
    fn name(&self) -> String {
        LIST_RESOURCE_PROFILES_TOOL.to_string()
    }

    fn description(&self) -> String {
        "Get every resource with role, skills and weekly availability in hours, \
         to find an alternative for a project."
            .to_string()
    }

    fn parameters(&self) -> Value {
        no_params()
    }

    async fn execute(&self, _params: Value) -> Result<ToolOutput> {
        let resources = self.store.list_resources().await?;
        let data: Vec<Value> = resources
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "name": r.name,
                    "role": r.role,
                    "skills": r.skills,
                    "availability": r.availability,
                })
            })
            .collect();
        let summary = serde_json::to_string(&data)?;
        Ok(ToolOutput::success(data, summary))
    }
}
