//! Conflict Resolver
//!
//! Advisory only: asks the oracle for a better-suited resource (or a
//! training recommendation) for a low-scoring allocation. Nothing here
//! writes to the store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::domain::AllocationStatus;
use crate::error::AllocationError;
use crate::oracle::{ConflictBrief, MatchingOracle};
use crate::store::DomainStore;

/// Identifiers plus the reasoning that flagged the pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRef {
    pub project_id: String,
    pub resource_id: String,
    pub reasoning: String,
}

pub struct ConflictResolver {
    store: Arc<dyn DomainStore>,
    oracle: Arc<dyn MatchingOracle>,
}

impl ConflictResolver {
    pub fn new(store: Arc<dyn DomainStore>, oracle: Arc<dyn MatchingOracle>) -> Self {
        Self { store, oracle }
    }

    /// Resolves a stored allocation. Only `conflict` allocations qualify.
    pub async fn resolve_allocation(&self, allocation_id: &str) -> Result<String, AllocationError> {
        let allocation = self
            .store
            .get_allocation(allocation_id)
            .await?
            .ok_or_else(|| AllocationError::not_found("allocation", allocation_id))?;

        if allocation.status != AllocationStatus::Conflict {
            return Err(AllocationError::Validation(format!(
                "allocation '{}' is {}, not a conflict",
                allocation_id, allocation.status
            )));
        }

        self.resolve(&ConflictRef {
            project_id: allocation.project_id,
            resource_id: allocation.resource_id,
            reasoning: allocation.reasoning,
        })
        .await
    }

    /// Re-reads both records by id; a missing one fails fast.
    pub async fn resolve(&self, conflict: &ConflictRef) -> Result<String, AllocationError> {
        let project = self
            .store
            .get_project_by_id(&conflict.project_id)
            .await?
            .ok_or_else(|| AllocationError::not_found("project", conflict.project_id.as_str()))?;
        let resource = self
            .store
            .get_resource_by_id(&conflict.resource_id)
            .await?
            .ok_or_else(|| AllocationError::not_found("resource", conflict.resource_id.as_str()))?;

        info!("Resolving conflict: {} on {}", resource.name, project.name);
        let brief = ConflictBrief { project, resource, reasoning: conflict.reasoning.clone() };
        let suggestion = self.oracle.resolve_conflict(&brief).await?;
        Ok(suggestion)
    }
}
