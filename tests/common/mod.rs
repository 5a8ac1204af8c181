#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

use talent_flow::config::AllocationConfig;
use talent_flow::domain::{
    Allocation, AllocationId, MatchScore, NewAllocation, NewProjectRequest, Project, ProjectDraft,
    ProjectRequest, RequestId, RequestStatus, Resource, ResourceDraft, ResourcePatch,
};
use talent_flow::error::{OracleError, StoreError};
use talent_flow::notify::{AllocationNotice, NotificationSink, Notifier};
use talent_flow::oracle::{
    ConflictBrief, ExtractSkillsRequest, MatchingOracle, ProjectMatchRequest, ResourceMatchRequest, Suggestion,
};
use talent_flow::seed::{sample_projects, sample_resources};
use talent_flow::store::{InMemoryStore, StoreEvent};
use talent_flow::{AllocationService, DomainStore};

/// Scores candidates by name and records every call it sees.
pub struct ScriptedOracle {
    scores: HashMap<String, u8>,
    pub calls: AtomicUsize,
    pub fail_matching: AtomicBool,
    pub briefs: Mutex<Vec<ConflictBrief>>,
}

impl ScriptedOracle {
    pub fn new(scores: &[(&str, u8)]) -> Arc<Self> {
        Arc::new(Self {
            scores: scores.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
            calls: AtomicUsize::new(0),
            fail_matching: AtomicBool::new(false),
            briefs: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn rank<'a>(&self, candidates: impl Iterator<Item = (&'a str, &'a str)>) -> Result<Vec<Suggestion>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_matching.load(Ordering::SeqCst) {
            return Err(OracleError::Provider("model unavailable".into()));
        }
        let mut ranked: Vec<Suggestion> = candidates
            .filter_map(|(id, name)| {
                self.scores.get(name).map(|score| Suggestion {
                    candidate_id: id.to_string(),
                    candidate_name: name.to_string(),
                    match_score: MatchScore::new(*score).unwrap(),
                    reasoning: format!("{} scored {}", name, score),
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.match_score.cmp(&a.match_score));
        ranked.truncate(3);
        Ok(ranked)
    }
}

#[async_trait]
impl MatchingOracle for ScriptedOracle {
    async fn suggest_resources(&self, request: &ResourceMatchRequest) -> Result<Vec<Suggestion>, OracleError> {
        self.rank(request.resource_profiles.iter().map(|r| (r.id.as_str(), r.name.as_str())))
    }

    async fn suggest_projects(&self, request: &ProjectMatchRequest) -> Result<Vec<Suggestion>, OracleError> {
        self.rank(request.project_profiles.iter().map(|p| (p.id.as_str(), p.name.as_str())))
    }

    async fn resolve_conflict(&self, brief: &ConflictBrief) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.briefs.lock().await.push(brief.clone());
        Ok(format!("Provide {} with training for {}.", brief.resource.name, brief.project.name))
    }

    async fn extract_skills(&self, _request: &ExtractSkillsRequest) -> Result<Vec<String>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["Rust".to_string()])
    }

    async fn chat(&self, message: &str) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("echo: {}", message))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub notices: Mutex<Vec<AllocationNotice>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notice: &AllocationNotice) -> anyhow::Result<()> {
        self.notices.lock().await.push(notice.clone());
        Ok(())
    }
}

impl RecordingSink {
    /// Dispatch is fire-and-forget, so poll briefly.
    pub async fn wait_for(&self, count: usize) -> Vec<AllocationNotice> {
        for _ in 0..50 {
            {
                let notices = self.notices.lock().await;
                if notices.len() >= count {
                    return notices.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.notices.lock().await.clone()
    }
}

/// Delegates to an in-memory store, failing selected calls on demand.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    /// Fail the next allocation write with `Unavailable`.
    pub fail_next_write: AtomicBool,
    /// Whether that failed write still lands before the error is returned.
    pub write_lands: AtomicBool,
    /// Fail the next allocation write with a non-transient `Backend` error.
    pub reject_next_write: AtomicBool,
    pub fail_next_status_update: AtomicBool,
    pub writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            fail_next_write: AtomicBool::new(false),
            write_lands: AtomicBool::new(false),
            reject_next_write: AtomicBool::new(false),
            fail_next_status_update: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DomainStore for FlakyStore {
    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        self.inner.list_resources().await
    }
    async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        self.inner.list_projects().await
    }
    async fn get_resource_by_id(&self, id: &str) -> Result<Option<Resource>, StoreError> {
        self.inner.get_resource_by_id(id).await
    }
    async fn get_project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError> {
        self.inner.get_project_by_id(id).await
    }
    async fn get_resource_by_email(&self, email: &str) -> Result<Option<Resource>, StoreError> {
        self.inner.get_resource_by_email(email).await
    }
    async fn create_resource(&self, draft: ResourceDraft) -> Result<Resource, StoreError> {
        self.inner.create_resource(draft).await
    }
    async fn update_resource(&self, id: &str, patch: ResourcePatch) -> Result<Resource, StoreError> {
        self.inner.update_resource(id, patch).await
    }
    async fn create_project(&self, draft: ProjectDraft) -> Result<Project, StoreError> {
        self.inner.create_project(draft).await
    }
    async fn list_allocations(&self) -> Result<Vec<Allocation>, StoreError> {
        self.inner.list_allocations().await
    }
    async fn get_allocation(&self, id: &str) -> Result<Option<Allocation>, StoreError> {
        self.inner.get_allocation(id).await
    }
    async fn find_allocations(
        &self,
        resource_id: &str,
        project_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Allocation>, StoreError> {
        self.inner.find_allocations(resource_id, project_id, since).await
    }
    async fn create_allocation(&self, data: NewAllocation) -> Result<AllocationId, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.reject_next_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".into()));
        }
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            if self.write_lands.load(Ordering::SeqCst) {
                self.inner.create_allocation(data).await?;
            }
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.create_allocation(data).await
    }
    async fn delete_allocation(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_allocation(id).await
    }
    async fn list_project_requests(&self) -> Result<Vec<ProjectRequest>, StoreError> {
        self.inner.list_project_requests().await
    }
    async fn get_project_request(&self, id: &str) -> Result<Option<ProjectRequest>, StoreError> {
        self.inner.get_project_request(id).await
    }
    async fn create_project_request(&self, data: NewProjectRequest) -> Result<RequestId, StoreError> {
        self.inner.create_project_request(data).await
    }
    async fn update_project_request_status(&self, id: &str, status: RequestStatus) -> Result<(), StoreError> {
        if self.fail_next_status_update.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.update_project_request_status(id, status).await
    }
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

pub struct Fixture {
    pub service: AllocationService,
    pub store: Arc<dyn DomainStore>,
    pub oracle: Arc<ScriptedOracle>,
    pub sink: Arc<RecordingSink>,
}

impl Fixture {
    pub async fn resource(&self, name: &str) -> Resource {
        self.service
            .list_resources()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.name == name)
            .unwrap()
    }

    pub async fn project(&self, name: &str) -> Project {
        self.service
            .list_projects()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
    }
}

/// Sample team and projects behind a scripted oracle.
pub async fn fixture_with(store: Arc<dyn DomainStore>, scores: &[(&str, u8)], config: AllocationConfig) -> Fixture {
    for draft in sample_resources() {
        store.create_resource(draft).await.unwrap();
    }
    for draft in sample_projects().unwrap() {
        store.create_project(draft).await.unwrap();
    }
    let oracle = ScriptedOracle::new(scores);
    let sink = Arc::new(RecordingSink::default());
    let service = AllocationService::with_oracle(
        store.clone(),
        oracle.clone(),
        Notifier::new(sink.clone()),
        config,
    );
    Fixture { service, store, oracle, sink }
}

pub async fn fixture(scores: &[(&str, u8)]) -> Fixture {
    fixture_with(Arc::new(InMemoryStore::new()), scores, AllocationConfig::default()).await
}
