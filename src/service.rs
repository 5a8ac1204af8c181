//! Allocation Service
//!
//! The one entry point the CLI and HTTP layers talk to. Every operation
//! re-reads what it needs from the store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::agent::LLMProvider;
use crate::config::{AllocationConfig, OracleConfig};
use crate::domain::{
    Allocation, AllocationStatus, MatchScore, Project, ProjectDraft, ProjectRequest, RequestStatus,
    Resource, ResourceDraft, ResourcePatch,
};
use crate::error::AllocationError;
use crate::notify::Notifier;
use crate::oracle::{
    ExtractSkillsRequest, LlmMatchingOracle, MatchingOracle, ProjectMatchRequest, ResourceMatchRequest,
    Suggestion,
};
use crate::store::{DomainStore, StoreEvent};
use crate::tools::{
    AllocateResourceTool, ListProjectsTool, ListResourceProfilesTool, ListResourcesTool, ToolRegistry,
};
use crate::workflow::{
    AllocationWorkflow, ApprovalOutcome, CommitReport, CommitRequest, ConflictRef, ConflictResolver,
    RequestWorkflow,
};

/// What to resolve: a stored allocation, or an explicit pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConflictTarget {
    Allocation {
        #[serde(rename = "allocationId")]
        allocation_id: String,
    },
    Pair(ConflictRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictAdvice {
    pub allocation_id: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    #[serde(flatten)]
    pub report: CommitReport,
    /// Advice for any new allocation that landed in `conflict`.
    pub conflict_advice: Vec<ConflictAdvice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResult {
    #[serde(flatten)]
    pub outcome: ApprovalOutcome,
    pub conflict_advice: Vec<ConflictAdvice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationFilter {
    pub project_id: Option<String>,
    pub resource_id: Option<String>,
}

pub struct AllocationService {
    store: Arc<dyn DomainStore>,
    oracle: Arc<dyn MatchingOracle>,
    allocations: Arc<AllocationWorkflow>,
    resolver: ConflictResolver,
    requests: RequestWorkflow,
    config: AllocationConfig,
}

impl AllocationService {
    /// Wires the LLM-backed oracle and registers the chat tools.
    pub async fn with_provider(
        store: Arc<dyn DomainStore>,
        provider: Arc<dyn LLMProvider>,
        oracle_config: &OracleConfig,
        config: AllocationConfig,
        notifier: Notifier,
    ) -> Result<Self, AllocationError> {
        let chat_match = MatchScore::new(config.chat_match)?;
        let allocations = Arc::new(AllocationWorkflow::new(store.clone(), notifier, config.retry_window_secs));

        let tools = Arc::new(ToolRegistry::new());
        tools
            .register_instance(AllocateResourceTool::new(
                store.clone(),
                allocations.clone(),
                chat_match,
                config.thresholds,
            ))
            .await;
        tools.register_instance(ListProjectsTool::new(store.clone())).await;
        tools.register_instance(ListResourcesTool::new(store.clone())).await;
        tools.register_instance(ListResourceProfilesTool::new(store.clone())).await;

        let oracle: Arc<dyn MatchingOracle> =
            Arc::new(LlmMatchingOracle::new(provider, tools, oracle_config.clone()));
        Ok(Self::assemble(store, oracle, allocations, config))
    }

    /// Uses a caller-supplied oracle as is.
    pub fn with_oracle(
        store: Arc<dyn DomainStore>,
        oracle: Arc<dyn MatchingOracle>,
        notifier: Notifier,
        config: AllocationConfig,
    ) -> Self {
        let allocations = Arc::new(AllocationWorkflow::new(store.clone(), notifier, config.retry_window_secs));
        Self::assemble(store, oracle, allocations, config)
    }

    fn assemble(
        store: Arc<dyn DomainStore>,
        oracle: Arc<dyn MatchingOracle>,
        allocations: Arc<AllocationWorkflow>,
        config: AllocationConfig,
    ) -> Self {
        Self {
            resolver: ConflictResolver::new(store.clone(), oracle.clone()),
            requests: RequestWorkflow::new(store.clone(), oracle.clone(), allocations.clone(), config.approval()),
            store,
            oracle,
            allocations,
            config,
        }
    }

    // Resources and projects

    pub async fn list_resources(&self) -> Result<Vec<Resource>, AllocationError> {
        Ok(self.store.list_resources().await?)
    }

    pub async fn get_resource(&self, id: &str) -> Result<Resource, AllocationError> {
        self.store
            .get_resource_by_id(id)
            .await?
            .ok_or_else(|| AllocationError::not_found("resource", id))
    }

    pub async fn find_resource_by_email(&self, email: &str) -> Result<Resource, AllocationError> {
        self.store
            .get_resource_by_email(email)
            .await?
            .ok_or_else(|| AllocationError::not_found("resource", email))
    }

    pub async fn register_resource(&self, draft: ResourceDraft) -> Result<Resource, AllocationError> {
        draft.validate()?;
        let resource = self.store.create_resource(draft).await?;
        info!("Registered resource {} <{}>", resource.name, resource.email);
        Ok(resource)
    }

    pub async fn update_resource(&self, id: &str, patch: ResourcePatch) -> Result<Resource, AllocationError> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AllocationError::Validation("resource name must not be empty".into()));
        }
        if patch.skills.as_ref().is_some_and(|s| s.iter().any(|k| k.trim().is_empty())) {
            return Err(AllocationError::Validation("skills must not contain blank entries".into()));
        }
        Ok(self.store.update_resource(id, patch).await?)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, AllocationError> {
        Ok(self.store.list_projects().await?)
    }

    pub async fn get_project(&self, id: &str) -> Result<Project, AllocationError> {
        self.store
            .get_project_by_id(id)
            .await?
            .ok_or_else(|| AllocationError::not_found("project", id))
    }

    pub async fn create_project(&self, draft: ProjectDraft) -> Result<Project, AllocationError> {
        draft.validate()?;
        let project = self.store.create_project(draft).await?;
        info!("Created project {}", project.name);
        Ok(project)
    }

    pub async fn extract_skills(&self, description: &str) -> Result<Vec<String>, AllocationError> {
        let request = ExtractSkillsRequest { project_description: description.to_string() };
        request.validate()?;
        Ok(self.oracle.extract_skills(&request).await?)
    }

    // Matching

    /// Ranks resources for a project. `pool` narrows the candidates to
    /// these ids; every resource is a candidate otherwise.
    pub async fn suggest_resources_for_project(
        &self,
        project_id: &str,
        pool: Option<&[String]>,
        priority_hint: Option<&str>,
    ) -> Result<Vec<Suggestion>, AllocationError> {
        let project = self.get_project(project_id).await?;
        let resources = restrict(self.store.list_resources().await?, pool, |r| &r.id, "resource")?;
        let request = ResourceMatchRequest::new(&project, &resources, priority_hint);
        request.validate()?;
        Ok(self.oracle.suggest_resources(&request).await?)
    }

    pub async fn suggest_projects_for_resource(
        &self,
        resource_id: &str,
        pool: Option<&[String]>,
    ) -> Result<Vec<Suggestion>, AllocationError> {
        let resource = self.get_resource(resource_id).await?;
        let projects = restrict(self.store.list_projects().await?, pool, |p| &p.id, "project")?;
        let request = ProjectMatchRequest::new(&resource, &projects);
        request.validate()?;
        Ok(self.oracle.suggest_projects(&request).await?)
    }

    // Allocations

    pub async fn commit_allocation(&self, mut request: CommitRequest) -> Result<CommitOutcome, AllocationError> {
        if request.thresholds.is_none() {
            request.thresholds = Some(self.config.thresholds);
        }
        let report = self.allocations.commit(request).await?;
        let conflict_advice = self.advise(&report.created).await;
        Ok(CommitOutcome { report, conflict_advice })
    }

    pub async fn list_allocations(&self, filter: &AllocationFilter) -> Result<Vec<Allocation>, AllocationError> {
        let all = self.store.list_allocations().await?;
        Ok(all
            .into_iter()
            .filter(|a| filter.project_id.as_ref().map_or(true, |p| &a.project_id == p))
            .filter(|a| filter.resource_id.as_ref().map_or(true, |r| &a.resource_id == r))
            .collect())
    }

    pub async fn deallocate(&self, allocation_id: &str) -> Result<(), AllocationError> {
        self.store.delete_allocation(allocation_id).await?;
        info!("Deallocated {}", allocation_id);
        Ok(())
    }

    pub async fn resolve_conflict(&self, target: &ConflictTarget) -> Result<String, AllocationError> {
        match target {
            ConflictTarget::Allocation { allocation_id } => self.resolver.resolve_allocation(allocation_id).await,
            ConflictTarget::Pair(pair) => self.resolver.resolve(pair).await,
        }
    }

    /// Implicit resolution for new conflicts. Advisory, so a failure is
    /// logged and the commit still stands.
    async fn advise(&self, created: &[Allocation]) -> Vec<ConflictAdvice> {
        if !self.config.auto_resolve_conflicts {
            return Vec::new();
        }
        let mut advice = Vec::new();
        for allocation in created.iter().filter(|a| a.status == AllocationStatus::Conflict) {
            match self.resolver.resolve_allocation(&allocation.id).await {
                Ok(suggestion) => advice.push(ConflictAdvice {
                    allocation_id: allocation.id.clone(),
                    suggestion,
                }),
                Err(e) => warn!("Could not resolve conflict for {}: {}", allocation.id, e),
            }
        }
        advice
    }

    // Requests

    pub async fn submit_request(&self, resource_id: &str, project_id: &str) -> Result<ProjectRequest, AllocationError> {
        self.requests.submit(resource_id, project_id).await
    }

    pub async fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<ProjectRequest>, AllocationError> {
        let all = self.store.list_project_requests().await?;
        Ok(all.into_iter().filter(|r| status.map_or(true, |s| r.status == s)).collect())
    }

    pub async fn approve_request(&self, request_id: &str) -> Result<ApprovalResult, AllocationError> {
        let outcome = self.requests.approve(request_id).await?;
        let conflict_advice = self.advise(std::slice::from_ref(&outcome.allocation)).await;
        Ok(ApprovalResult { outcome, conflict_advice })
    }

    pub async fn reject_request(&self, request_id: &str) -> Result<ProjectRequest, AllocationError> {
        self.requests.reject(request_id).await
    }

    // Assistant

    pub async fn chat(&self, message: &str) -> Result<String, AllocationError> {
        if message.trim().is_empty() {
            return Err(AllocationError::Validation("message is empty".into()));
        }
        Ok(self.oracle.chat(message).await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }
}

/// Keeps the items whose id is in `pool`; an id that matches nothing is
/// NotFound.
fn restrict<T>(
    items: Vec<T>,
    pool: Option<&[String]>,
    id: impl Fn(&T) -> &String,
    kind: &'static str,
) -> Result<Vec<T>, AllocationError> {
    let Some(pool) = pool else {
        return Ok(items);
    };
    if let Some(missing) = pool.iter().find(|p| !items.iter().any(|i| id(i) == *p)) {
        return Err(AllocationError::not_found(kind, missing.as_str()));
    }
    Ok(items.into_iter().filter(|i| pool.contains(id(i))).collect())
}
