use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::{ChangeFeed, DomainStore, StoreEvent, StoreResult};
use crate::domain::{
    Allocation, AllocationId, NewAllocation, NewProjectRequest, Project, ProjectDraft,
    ProjectRequest, RequestId, RequestStatus, Resource, ResourceDraft, ResourcePatch,
};
use crate::error::StoreError;

#[derive(Default)]
struct Tables {
    resources: HashMap<String, Resource>,
    projects: HashMap<String, Project>,
    allocations: HashMap<String, Allocation>,
    requests: HashMap<String, ProjectRequest>,
}

/// Process-local store. Used by tests and the `memory` backend.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    feed: ChangeFeed,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            feed: ChangeFeed::new(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by<T: Clone, K: Ord>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut v: Vec<T> = items.collect();
    v.sort_by_key(|item| key(item));
    v
}

#[async_trait]
impl DomainStore for InMemoryStore {
    async fn list_resources(&self) -> StoreResult<Vec<Resource>> {
        let t = self.tables.read().await;
        Ok(sorted_by(t.resources.values().cloned(), |r| r.name.clone()))
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let t = self.tables.read().await;
        Ok(sorted_by(t.projects.values().cloned(), |p| p.name.clone()))
    }

    async fn get_resource_by_id(&self, id: &str) -> StoreResult<Option<Resource>> {
        Ok(self.tables.read().await.resources.get(id).cloned())
    }

    async fn get_project_by_id(&self, id: &str) -> StoreResult<Option<Project>> {
        Ok(self.tables.read().await.projects.get(id).cloned())
    }

    async fn get_resource_by_email(&self, email: &str) -> StoreResult<Option<Resource>> {
        let email = email.trim().to_lowercase();
        let t = self.tables.read().await;
        Ok(t.resources.values().find(|r| r.email == email).cloned())
    }

    async fn create_resource(&self, draft: ResourceDraft) -> StoreResult<Resource> {
        let resource = draft.into_resource(Uuid::new_v4().to_string());
        {
            let mut t = self.tables.write().await;
            if t.resources.values().any(|r| r.email == resource.email) {
                return Err(StoreError::Conflict(format!(
                    "email '{}' is already registered",
                    resource.email
                )));
            }
            t.resources.insert(resource.id.clone(), resource.clone());
        }
        self.feed.publish(StoreEvent::ResourceCreated { id: resource.id.clone() });
        Ok(resource)
    }

    async fn update_resource(&self, id: &str, patch: ResourcePatch) -> StoreResult<Resource> {
        let updated = {
            let mut t = self.tables.write().await;
            let resource = t.resources.get_mut(id).ok_or_else(|| StoreError::NotFound {
                kind: "resource",
                id: id.to_string(),
            })?;
            patch.apply(resource);
            resource.clone()
        };
        self.feed.publish(StoreEvent::ResourceUpdated { id: updated.id.clone() });
        Ok(updated)
    }

    async fn create_project(&self, draft: ProjectDraft) -> StoreResult<Project> {
        let project = draft.into_project(Uuid::new_v4().to_string());
        self.tables
            .write()
            .await
            .projects
            .insert(project.id.clone(), project.clone());
        self.feed.publish(StoreEvent::ProjectCreated { id: project.id.clone() });
        Ok(project)
    }

    async fn list_allocations(&self) -> StoreResult<Vec<Allocation>> {
        let t = self.tables.read().await;
        Ok(sorted_by(t.allocations.values().cloned(), |a| a.created_at))
    }

    async fn get_allocation(&self, id: &str) -> StoreResult<Option<Allocation>> {
        Ok(self.tables.read().await.allocations.get(id).cloned())
    }

    async fn find_allocations(
        &self,
        resource_id: &str,
        project_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Allocation>> {
        let t = self.tables.read().await;
        Ok(sorted_by(
            t.allocations
                .values()
                .filter(|a| a.resource_id == resource_id && a.project_id == project_id && a.created_at >= since)
                .cloned(),
            |a| a.created_at,
        ))
    }

    async fn create_allocation(&self, data: NewAllocation) -> StoreResult<AllocationId> {
        let allocation = {
            let mut t = self.tables.write().await;
            if let Some(key) = data.idempotency_key.as_deref() {
                if let Some(existing) = t
                    .allocations
                    .values()
                    .find(|a| a.idempotency_key.as_deref() == Some(key))
                {
                    return Ok(existing.id.clone());
                }
            }
            let allocation = data.into_allocation(Uuid::new_v4().to_string());
            t.allocations.insert(allocation.id.clone(), allocation.clone());
            allocation
        };
        self.feed.publish(StoreEvent::AllocationCreated {
            id: allocation.id.clone(),
            resource_id: allocation.resource_id,
            project_id: allocation.project_id,
        });
        Ok(allocation.id)
    }

    async fn delete_allocation(&self, id: &str) -> StoreResult<()> {
        let removed = self.tables.write().await.allocations.remove(id);
        if removed.is_none() {
            return Err(StoreError::NotFound { kind: "allocation", id: id.to_string() });
        }
        self.feed.publish(StoreEvent::AllocationDeleted { id: id.to_string() });
        Ok(())
    }

    async fn list_project_requests(&self) -> StoreResult<Vec<ProjectRequest>> {
        let t = self.tables.read().await;
        Ok(sorted_by(t.requests.values().cloned(), |r| r.requested_at))
    }

    async fn get_project_request(&self, id: &str) -> StoreResult<Option<ProjectRequest>> {
        Ok(self.tables.read().await.requests.get(id).cloned())
    }

    async fn create_project_request(&self, data: NewProjectRequest) -> StoreResult<RequestId> {
        let request = ProjectRequest {
            id: Uuid::new_v4().to_string(),
            project_id: data.project_id,
            resource_id: data.resource_id,
            status: RequestStatus::Pending,
            requested_at: Utc::now(),
        };
        let id = request.id.clone();
        self.tables.write().await.requests.insert(id.clone(), request);
        self.feed.publish(StoreEvent::RequestCreated { id: id.clone() });
        Ok(id)
    }

    async fn update_project_request_status(&self, id: &str, status: RequestStatus) -> StoreResult<()> {
        {
            let mut t = self.tables.write().await;
            let request = t.requests.get_mut(id).ok_or_else(|| StoreError::NotFound {
                kind: "request",
                id: id.to_string(),
            })?;
            if request.status.is_terminal() {
                return Err(StoreError::Conflict(format!(
                    "request '{}' is already {}",
                    id, request.status
                )));
            }
            request.status = status;
        }
        self.feed.publish(StoreEvent::RequestStatusChanged { id: id.to_string(), status });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MatchScore, Seniority, StatusThresholds};

    fn draft(email: &str) -> ResourceDraft {
        ResourceDraft {
            name: "Alice".into(),
            email: email.into(),
            role: "Frontend Developer".into(),
            skills: ["React".to_string()].into_iter().collect(),
            availability: 40,
            seniority: Seniority::Senior,
            location: None,
            timezone: None,
        }
    }

    fn new_alloc(key: Option<&str>) -> NewAllocation {
        NewAllocation::scored("r1", "p1", MatchScore::new(80).unwrap(), &StatusThresholds::default(), "ok")
            .with_idempotency_key(key.map(String::from))
    }

    #[tokio::test]
    async fn test_email_is_unique() {
        let store = InMemoryStore::new();
        store.create_resource(draft("alice@example.com")).await.unwrap();
        let err = store.create_resource(draft("ALICE@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get_resource_by_email("Alice@Example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_idempotency_key_dedupes() {
        let store = InMemoryStore::new();
        let a = store.create_allocation(new_alloc(Some("k1"))).await.unwrap();
        let b = store.create_allocation(new_alloc(Some("k1"))).await.unwrap();
        assert_eq!(a, b);
        store.create_allocation(new_alloc(None)).await.unwrap();
        assert_eq!(store.list_allocations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_request_transition_happens_once() {
        let store = InMemoryStore::new();
        let id = store
            .create_project_request(NewProjectRequest { project_id: "p1".into(), resource_id: "r1".into() })
            .await
            .unwrap();
        store.update_project_request_status(&id, RequestStatus::Rejected).await.unwrap();
        let err = store
            .update_project_request_status(&id, RequestStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let req = store.get_project_request(&id).await.unwrap().unwrap();
        assert_eq!(req.status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn test_writes_are_published() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe();
        let id = store.create_allocation(new_alloc(None)).await.unwrap();
        store.delete_allocation(&id).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), StoreEvent::AllocationCreated { .. }));
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::AllocationDeleted { id: id.clone() });
        assert!(matches!(
            store.delete_allocation(&id).await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
