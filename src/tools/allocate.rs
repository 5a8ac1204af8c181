//! Allocate Resource Tool
//!
//! Lets the chat assistant allocate a person to a project by name. The
//! allocation still goes through the allocation workflow, so status and
//! notifications follow the same rules as a manual commit.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{Tool, ToolOutput, ALLOCATE_RESOURCE_TOOL};
use crate::domain::{MatchScore, StatusThresholds};
use crate::store::DomainStore;
use crate::workflow::{AllocationWorkflow, CommitMode, CommitRequest, CommitTarget, Suggestion};

pub const CHAT_REASONING: &str = "Allocated by AI assistant via chat.";

pub struct AllocateResourceTool {
    store: Arc<dyn DomainStore>,
    workflow: Arc<AllocationWorkflow>,
    match_score: MatchScore,
    thresholds: StatusThresholds,
}

impl AllocateResourceTool {
    pub fn new(
        store: Arc<dyn DomainStore>,
        workflow: Arc<AllocationWorkflow>,
        match_score: MatchScore,
        thresholds: StatusThresholds,
    ) -> Self {
        Self { store, workflow, match_score, thresholds }
    }
}

#[async_trait]
impl Tool for AllocateResourceTool {
    fn name(&self) -> String {
        ALLOCATE_RESOURCE_TOOL.to_string()
    }

    fn description(&self) -> String {
        "Allocate a resource to a project. Names are matched case-insensitively.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resource_name": {
                    "type": "string",
                    "description": "The name of the resource to allocate"
                },
                "project_name": {
                    "type": "string",
                    "description": "The name of the project to allocate to"
                }
            },
            "required": ["resource_name", "project_name"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput> {
        let (Some(resource_name), Some(project_name)) =
            (params["resource_name"].as_str(), params["project_name"].as_str())
        else {
            return Ok(ToolOutput::failure(
                "Missing required parameters: resource_name and project_name",
            ));
        };

        let resources = self.store.list_resources().await?;
        let projects = self.store.list_projects().await?;
        let resource = match unique_by_name(&resources, resource_name, |r| (&r.name, &r.id)) {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutput::failure(format!("Resource {}", e))),
        };
        let project = match unique_by_name(&projects, project_name, |p| (&p.name, &p.id)) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutput::failure(format!("Project {}", e))),
        };

        let request = CommitRequest {
            target: CommitTarget::Project(project.id.clone()),
            suggestions: vec![Suggestion {
                candidate_id: resource.id.clone(),
                candidate_name: resource.name.clone(),
                match_score: self.match_score,
                reasoning: CHAT_REASONING.to_string(),
            }],
            mode: CommitMode::Auto,
            thresholds: Some(self.thresholds),
            idempotency_key: None,
        };

        match self.workflow.commit(request).await {
            Ok(report) => {
                info!("Chat assistant allocated {} to {}", resource.name, project.name);
                let ids: Vec<_> = report.created.iter().map(|a| a.id.clone()).collect();
                Ok(ToolOutput::success(
                    json!({ "allocation_ids": ids }),
                    format!("Successfully allocated {} to {}.", resource.name, project.name),
                ))
            }
            Err(e) => Ok(ToolOutput::failure(format!(
                "Allocation of {} to {} failed: {}",
                resource.name, project.name, e
            ))),
        }
    }
}

/// Case-insensitive name lookup that refuses to guess between namesakes.
fn unique_by_name<'a, T>(
    items: &'a [T],
    name: &str,
    key: impl Fn(&T) -> (&String, &String),
) -> std::result::Result<&'a T, String> {
    let wanted = name.trim();
    let hits: Vec<&T> = items.iter().filter(|i| key(i).0.eq_ignore_ascii_case(wanted)).collect();
    match hits.as_slice() {
        [only] => Ok(*only),
        [] => Err(format!("'{}' not found.", wanted)),
        many => {
            let ids: Vec<&str> = many.iter().map(|i| key(i).1.as_str()).collect();
            Err(format!("name '{}' is ambiguous; matching ids: {}", wanted, ids.join(", ")))
        }
    }
}
