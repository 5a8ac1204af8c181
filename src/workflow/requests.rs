//! Request Approval Workflow
//!
//! `pending -> approved | rejected`, once. Approval scores the pair, commits
//! the allocation, and only then flips the request, so a failure at any
//! step leaves the request pending and safe to approve again.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::{AllocationWorkflow, CommitMode, CommitRequest, CommitTarget};
use crate::domain::{
    Allocation, NewProjectRequest, ProjectRequest, RequestStatus, StatusThresholds,
};
use crate::error::{AllocationError, OracleError, StoreError};
use crate::oracle::{MatchingOracle, ProjectMatchRequest, Suggestion};
use crate::store::DomainStore;

pub const APPROVAL_REASONING_PREFIX: &str = "Approved by manager after user request. AI reason: ";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalOutcome {
    pub request: ProjectRequest,
    pub allocation: Allocation,
}

pub struct RequestWorkflow {
    store: Arc<dyn DomainStore>,
    oracle: Arc<dyn MatchingOracle>,
    allocations: Arc<AllocationWorkflow>,
    thresholds: StatusThresholds,
}

impl RequestWorkflow {
    pub fn new(
        store: Arc<dyn DomainStore>,
        oracle: Arc<dyn MatchingOracle>,
        allocations: Arc<AllocationWorkflow>,
        thresholds: StatusThresholds,
    ) -> Self {
        Self { store, oracle, allocations, thresholds }
    }

    /// A resource asks to join a project.
    pub async fn submit(&self, resource_id: &str, project_id: &str) -> Result<ProjectRequest, AllocationError> {
        if self.store.get_resource_by_id(resource_id).await?.is_none() {
            return Err(AllocationError::not_found("resource", resource_id));
        }
        if self.store.get_project_by_id(project_id).await?.is_none() {
            return Err(AllocationError::not_found("project", project_id));
        }

        let requests = self.store.list_project_requests().await?;
        if requests.iter().any(|r| {
            r.resource_id == resource_id && r.project_id == project_id && r.status == RequestStatus::Pending
        }) {
            return Err(AllocationError::Validation(
                "a pending request for this project already exists".into(),
            ));
        }
        let allocations = self.store.list_allocations().await?;
        if allocations.iter().any(|a| a.resource_id == resource_id && a.project_id == project_id) {
            return Err(AllocationError::Validation(
                "resource is already allocated to this project".into(),
            ));
        }

        let id = self
            .store
            .create_project_request(NewProjectRequest {
                project_id: project_id.to_string(),
                resource_id: resource_id.to_string(),
            })
            .await?;
        info!("Request {} submitted: {} -> {}", id, resource_id, project_id);
        self.store
            .get_project_request(&id)
            .await?
            .ok_or_else(|| AllocationError::not_found("request", id))
    }

    pub async fn approve(&self, request_id: &str) -> Result<ApprovalOutcome, AllocationError> {
        let request = self.pending(request_id).await?;

        let project = self
            .store
            .get_project_by_id(&request.project_id)
            .await?
            .ok_or_else(|| AllocationError::not_found("project", request.project_id.as_str()))?;
        let resource = self
            .store
            .get_resource_by_id(&request.resource_id)
            .await?
            .ok_or_else(|| AllocationError::not_found("resource", request.resource_id.as_str()))?;

        // The pairing is decided, but the score still drives the status.
        let ranked = self
            .oracle
            .suggest_projects(&ProjectMatchRequest::new(&resource, std::slice::from_ref(&project)))
            .await?;
        let scored = ranked
            .into_iter()
            .find(|s| s.candidate_id == project.id)
            .ok_or_else(|| OracleError::InvalidResponse("no score returned for the requested project".into()))?;

        let report = self
            .allocations
            .commit(CommitRequest {
                target: CommitTarget::Resource(resource.id.clone()),
                suggestions: vec![Suggestion {
                    reasoning: format!("{}{}", APPROVAL_REASONING_PREFIX, scored.reasoning),
                    ..scored
                }],
                mode: CommitMode::Auto,
                thresholds: Some(self.thresholds),
                idempotency_key: Some(format!("request:{}", request.id)),
            })
            .await?;

        let allocation = report
            .created
            .into_iter()
            .next()
            .ok_or_else(|| AllocationError::Persistence {
                message: "approval produced no allocation".into(),
                committed: Vec::new(),
            })?;

        match self
            .store
            .update_project_request_status(&request.id, RequestStatus::Approved)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict(msg)) => {
                warn!("Request {} changed state during approval: {}", request.id, msg);
                return Err(AllocationError::Validation(msg));
            }
            Err(e) => {
                return Err(AllocationError::Persistence {
                    message: format!("allocation stored but request status not updated: {}", e),
                    committed: vec![allocation.id.clone()],
                });
            }
        }

        info!(
            "Request {} approved: {} joins {} ({})",
            request.id, resource.name, project.name, allocation.status
        );
        let request = ProjectRequest { status: RequestStatus::Approved, ..request };
        Ok(ApprovalOutcome { request, allocation })
    }

    /// No oracle call and no allocation.
    pub async fn reject(&self, request_id: &str) -> Result<ProjectRequest, AllocationError> {
        let request = self.pending(request_id).await?;
        self.store
            .update_project_request_status(&request.id, RequestStatus::Rejected)
            .await?;
        info!("Request {} rejected", request.id);
        Ok(ProjectRequest { status: RequestStatus::Rejected, ..request })
    }

    async fn pending(&self, request_id: &str) -> Result<ProjectRequest, AllocationError> {
        let request = self
            .store
            .get_project_request(request_id)
            .await?
            .ok_or_else(|| AllocationError::not_found("request", request_id))?;
        if request.status.is_terminal() {
            return Err(AllocationError::Validation(format!(
                "request '{}' is already {}",
                request_id, request.status
            )));
        }
        Ok(request)
    }
}
