//! Allocation Workflow
//!
//! Turns a ranked suggestion list into committed allocations. Every check
//! (target exists, selection valid, candidates exist) runs before the first
//! write. Writes are independent: a failure part-way reports the ids that
//! already landed.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{Allocation, NewAllocation, Project, Resource, StatusThresholds};
use crate::error::{AllocationError, StoreError};
use crate::notify::{AllocationNotice, Notifier};
use crate::oracle::Suggestion;
use crate::store::DomainStore;

/// What the suggestions were ranked for. Candidates are resources for a
/// project target and projects for a resource target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CommitTarget {
    Project(String),
    Resource(String),
}

impl CommitTarget {
    fn kind(&self) -> &'static str {
        match self {
            CommitTarget::Project(_) => "project",
            CommitTarget::Resource(_) => "resource",
        }
    }

    fn id(&self) -> &str {
        match self {
            CommitTarget::Project(id) | CommitTarget::Resource(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "selections", rename_all = "snake_case")]
pub enum CommitMode {
    /// Highest score only; ties go to the earlier entry.
    Auto,
    /// Exactly these candidate ids.
    Manual(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    pub target: CommitTarget,
    pub suggestions: Vec<Suggestion>,
    pub mode: CommitMode,
    /// Canonical 90/60 when `None`.
    pub thresholds: Option<StatusThresholds>,
    /// Caller key; each candidate's allocation gets a key derived from it.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitReport {
    pub created: Vec<Allocation>,
    /// Selections that failed validation. Always empty on success, since
    /// any invalid selection fails the whole commit before writing.
    pub rejected: Vec<String>,
}

impl CommitReport {
    pub fn count(&self) -> usize {
        self.created.len()
    }
}

/// Candidate picked for writing, with both endpoints freshly read.
struct Pick<'a> {
    suggestion: &'a Suggestion,
    resource: Resource,
    project: Project,
}

pub struct AllocationWorkflow {
    store: Arc<dyn DomainStore>,
    notifier: Notifier,
    retry_window: Duration,
}

impl AllocationWorkflow {
    pub fn new(store: Arc<dyn DomainStore>, notifier: Notifier, retry_window_secs: u64) -> Self {
        Self {
            store,
            notifier,
            retry_window: Duration::seconds(retry_window_secs as i64),
        }
    }

    pub async fn commit(&self, request: CommitRequest) -> Result<CommitReport, AllocationError> {
        let thresholds = request.thresholds.unwrap_or_default();
        thresholds.validate()?;
        validate_suggestions(&request.suggestions)?;

        let selected = select(&request.suggestions, &request.mode)?;
        let picks = self.resolve(&request.target, selected).await?;

        let mut created: Vec<Allocation> = Vec::with_capacity(picks.len());
        for pick in picks {
            let key = request
                .idempotency_key
                .as_deref()
                .map(|k| derive_key(&request.target, &pick.suggestion.candidate_id, k));
            let data = NewAllocation::scored(
                pick.resource.id.clone(),
                pick.project.id.clone(),
                pick.suggestion.match_score,
                &thresholds,
                pick.suggestion.reasoning.clone(),
            )
            .with_idempotency_key(key);

            match self.persist(data).await {
                Ok((allocation, fresh)) => {
                    info!(
                        "Allocated {} to {} ({} {})",
                        pick.resource.name, pick.project.name, allocation.match_score, allocation.status
                    );
                    if fresh {
                        self.notify(&pick, &allocation);
                    }
                    created.push(allocation);
                }
                Err(e) => {
                    let committed: Vec<_> = created.iter().map(|a| a.id.clone()).collect();
                    warn!("Allocation batch aborted after {} write(s): {}", committed.len(), e);
                    return Err(AllocationError::Persistence { message: e.to_string(), committed });
                }
            }
        }

        Ok(CommitReport { created, rejected: Vec::new() })
    }

    /// Re-reads the target and every selected candidate.
    async fn resolve<'a>(
        &self,
        target: &CommitTarget,
        selected: Vec<&'a Suggestion>,
    ) -> Result<Vec<Pick<'a>>, AllocationError> {
        let mut picks = Vec::with_capacity(selected.len());
        match target {
            CommitTarget::Project(project_id) => {
                let project = self
                    .store
                    .get_project_by_id(project_id)
                    .await?
                    .ok_or_else(|| AllocationError::not_found("project", project_id.as_str()))?;
                for suggestion in selected {
                    let resource = self
                        .store
                        .get_resource_by_id(&suggestion.candidate_id)
                        .await?
                        .ok_or_else(|| AllocationError::not_found("resource", suggestion.candidate_id.as_str()))?;
                    picks.push(Pick { suggestion, resource, project: project.clone() });
                }
            }
            CommitTarget::Resource(resource_id) => {
                let resource = self
                    .store
                    .get_resource_by_id(resource_id)
                    .await?
                    .ok_or_else(|| AllocationError::not_found("resource", resource_id.as_str()))?;
                for suggestion in selected {
                    let project = self
                        .store
                        .get_project_by_id(&suggestion.candidate_id)
                        .await?
                        .ok_or_else(|| AllocationError::not_found("project", suggestion.candidate_id.as_str()))?;
                    picks.push(Pick { suggestion, resource: resource.clone(), project });
                }
            }
        }
        Ok(picks)
    }

    /// Writes one allocation. Returns the stored record and whether this
    /// call created it. A transient failure is retried once, and only after
    /// the store confirms nothing for the pair landed inside the window.
    async fn persist(&self, data: NewAllocation) -> Result<(Allocation, bool), StoreError> {
        match self.store.create_allocation(data.clone()).await {
            Ok(id) => self.read_back(&id, &data).await,
            Err(StoreError::Unavailable(msg)) => {
                warn!("Store unavailable while allocating ({}); checking before retry", msg);
                let since = data.created_at - self.retry_window;
                let existing = self
                    .store
                    .find_allocations(&data.resource_id, &data.project_id, since)
                    .await?;
                let landed = existing.into_iter().rev().find(|a| {
                    data.idempotency_key.is_none() || a.idempotency_key == data.idempotency_key
                });
                if let Some(allocation) = landed {
                    info!("Adopting allocation {} written before the failure", allocation.id);
                    return Ok((allocation, false));
                }
                let id = self.store.create_allocation(data.clone()).await?;
                self.read_back(&id, &data).await
            }
            Err(e) => Err(e),
        }
    }

    async fn read_back(&self, id: &str, data: &NewAllocation) -> Result<(Allocation, bool), StoreError> {
        let allocation = self
            .store
            .get_allocation(id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("allocation '{}' vanished after write", id)))?;
        // An idempotent hit returns an older record.
        let fresh = allocation.created_at == data.created_at;
        if !fresh {
            debug!("Idempotency key matched existing allocation {}", allocation.id);
        }
        Ok((allocation, fresh))
    }

    fn notify(&self, pick: &Pick<'_>, allocation: &Allocation) {
        let details = format!(
            "You have been allocated to {} with a {} match ({}). {}",
            pick.project.name, allocation.match_score, allocation.status, allocation.reasoning
        );
        self.notifier.dispatch(AllocationNotice {
            resource_name: pick.resource.name.clone(),
            project_name: pick.project.name.clone(),
            resource_email: pick.resource.email.clone(),
            details,
        });
    }
}

fn validate_suggestions(suggestions: &[Suggestion]) -> Result<(), AllocationError> {
    if suggestions.is_empty() {
        return Err(AllocationError::Validation("no suggestions to commit".into()));
    }
    let mut seen = HashSet::new();
    for s in suggestions {
        if !seen.insert(s.candidate_id.as_str()) {
            return Err(AllocationError::Validation(format!(
                "candidate '{}' is listed more than once",
                s.candidate_id
            )));
        }
        if s.reasoning.trim().is_empty() {
            return Err(AllocationError::Validation(format!(
                "suggestion for '{}' has no reasoning",
                s.candidate_id
            )));
        }
    }
    Ok(())
}

/// Suggestions to write, in selection order. Unknown manual ids reject the
/// whole selection.
fn select<'a>(suggestions: &'a [Suggestion], mode: &CommitMode) -> Result<Vec<&'a Suggestion>, AllocationError> {
    match mode {
        CommitMode::Auto => {
            let best = suggestions
                .iter()
                .reduce(|best, s| if s.match_score > best.match_score { s } else { best })
                .ok_or_else(|| AllocationError::Validation("no suggestions to commit".into()))?;
            Ok(vec![best])
        }
        CommitMode::Manual(ids) => {
            if ids.is_empty() {
                return Err(AllocationError::Validation("manual commit needs at least one selection".into()));
            }
            let rejected: Vec<String> = ids
                .iter()
                .filter(|id| !suggestions.iter().any(|s| &s.candidate_id == *id))
                .cloned()
                .collect();
            if !rejected.is_empty() {
                return Err(AllocationError::InvalidSelection { rejected });
            }
            let mut seen = HashSet::new();
            Ok(ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .filter_map(|id| suggestions.iter().find(|s| &s.candidate_id == id))
                .collect())
        }
    }
}

/// SHA-256 over `kind|target|candidate|caller key`.
fn derive_key(target: &CommitTarget, candidate_id: &str, caller_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}|{}", target.kind(), target.id(), candidate_id, caller_key));
    hex::encode(hasher.finalize())
}
