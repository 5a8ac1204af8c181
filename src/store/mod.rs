//! Domain Store Interface and Implementations
//!
//! The store is the only shared mutable state. Workflows never cache what
//! they read from it; every decision re-reads by id.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{
    Allocation, AllocationId, NewAllocation, NewProjectRequest, Project, ProjectDraft, ProjectId,
    ProjectRequest, RequestId, RequestStatus, Resource, ResourceDraft, ResourceId, ResourcePatch,
};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Change notification published after every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum StoreEvent {
    ResourceCreated { id: ResourceId },
    ResourceUpdated { id: ResourceId },
    ProjectCreated { id: ProjectId },
    AllocationCreated { id: AllocationId, resource_id: ResourceId, project_id: ProjectId },
    AllocationDeleted { id: AllocationId },
    RequestCreated { id: RequestId },
    RequestStatusChanged { id: RequestId, status: RequestStatus },
}

/// Fan-out for store change notifications.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<StoreEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn list_resources(&self) -> StoreResult<Vec<Resource>>;
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;
    async fn get_resource_by_id(&self, id: &str) -> StoreResult<Option<Resource>>;
    async fn get_project_by_id(&self, id: &str) -> StoreResult<Option<Project>>;
    async fn get_resource_by_email(&self, email: &str) -> StoreResult<Option<Resource>>;

    /// Fails with `Conflict` when the email is already registered.
    async fn create_resource(&self, draft: ResourceDraft) -> StoreResult<Resource>;
    async fn update_resource(&self, id: &str, patch: ResourcePatch) -> StoreResult<Resource>;
    async fn create_project(&self, draft: ProjectDraft) -> StoreResult<Project>;

    async fn list_allocations(&self) -> StoreResult<Vec<Allocation>>;
    async fn get_allocation(&self, id: &str) -> StoreResult<Option<Allocation>>;

    /// Allocations for the pair created at or after `since`.
    async fn find_allocations(
        &self,
        resource_id: &str,
        project_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Allocation>>;

    /// Returns the id of the stored allocation. When `idempotency_key` is
    /// set and already present, the existing id is returned and nothing is
    /// written.
    async fn create_allocation(&self, data: NewAllocation) -> StoreResult<AllocationId>;
    async fn delete_allocation(&self, id: &str) -> StoreResult<()>;

    async fn list_project_requests(&self) -> StoreResult<Vec<ProjectRequest>>;
    async fn get_project_request(&self, id: &str) -> StoreResult<Option<ProjectRequest>>;
    async fn create_project_request(&self, data: NewProjectRequest) -> StoreResult<RequestId>;

    /// Moves a pending request to `status`. Fails with `Conflict` if the
    /// request already left `pending`.
    async fn update_project_request_status(&self, id: &str, status: RequestStatus) -> StoreResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
