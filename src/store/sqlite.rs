//! SQLite-backed store.
//!
//! Each call opens its own connection on the blocking pool, so no
//! connection is shared across tasks.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tokio::task;
use uuid::Uuid;

use super::{ChangeFeed, DomainStore, StoreEvent, StoreResult};
use crate::domain::{
    Allocation, AllocationId, AllocationStatus, MatchScore, NewAllocation, NewProjectRequest,
    Priority, Project, ProjectDraft, ProjectRequest, RequestId, RequestStatus, Resource,
    ResourceDraft, ResourcePatch, Seniority,
};
use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL,
    skills TEXT NOT NULL,
    availability INTEGER NOT NULL,
    seniority TEXT NOT NULL,
    location TEXT,
    timezone TEXT
);
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    required_skills TEXT NOT NULL,
    start_date TEXT NOT NULL,
    deadline TEXT NOT NULL,
    priority TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS allocations (
    id TEXT PRIMARY KEY,
    resource_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    match_score INTEGER NOT NULL,
    status TEXT NOT NULL,
    reasoning TEXT NOT NULL,
    created_at TEXT NOT NULL,
    idempotency_key TEXT UNIQUE
);
CREATE INDEX IF NOT EXISTS idx_allocations_pair ON allocations(resource_id, project_id);
CREATE TABLE IF NOT EXISTS project_requests (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    status TEXT NOT NULL,
    requested_at TEXT NOT NULL
);
"#;

#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let path_clone = path.clone();

        task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StoreError>(())
        })
        .await??;

        Ok(Self { db_path: path, feed: ChangeFeed::new() })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            f(&mut conn)
        })
        .await?
    }
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(format!("corrupt {}: {}", what, detail).into())
}

fn parse_json_set(raw: String) -> rusqlite::Result<BTreeSet<String>> {
    serde_json::from_str(&raw).map_err(|e| corrupt("skill set", e))
}

fn parse_label<T: serde::de::DeserializeOwned>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|e| corrupt("label", e))
}

fn label<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

/// Fixed-width so text comparison in SQL orders correctly.
fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", e))
}

fn parse_date(raw: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| corrupt("date", e))
}

const RESOURCE_COLUMNS: &str =
    "id, name, email, role, skills, availability, seniority, location, timezone";

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    let seniority: String = row.get(6)?;
    Ok(Resource {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        skills: parse_json_set(row.get(4)?)?,
        availability: row.get(5)?,
        seniority: parse_label::<Seniority>(&seniority)?,
        location: row.get(7)?,
        timezone: row.get(8)?,
    })
}

const PROJECT_COLUMNS: &str = "id, name, description, required_skills, start_date, deadline, priority";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let priority: String = row.get(6)?;
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        required_skills: parse_json_set(row.get(3)?)?,
        start_date: parse_date(row.get(4)?)?,
        deadline: parse_date(row.get(5)?)?,
        priority: parse_label::<Priority>(&priority)?,
    })
}

const ALLOCATION_COLUMNS: &str =
    "id, resource_id, project_id, match_score, status, reasoning, created_at, idempotency_key";

fn allocation_from_row(row: &Row<'_>) -> rusqlite::Result<Allocation> {
    let score: u8 = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(Allocation {
        id: row.get(0)?,
        resource_id: row.get(1)?,
        project_id: row.get(2)?,
        match_score: MatchScore::new(score).map_err(|e| corrupt("match score", e))?,
        status: status
            .parse::<AllocationStatus>()
            .map_err(|e| corrupt("allocation status", e))?,
        reasoning: row.get(5)?,
        created_at: parse_time(row.get(6)?)?,
        idempotency_key: row.get(7)?,
    })
}

const REQUEST_COLUMNS: &str = "id, project_id, resource_id, status, requested_at";

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRequest> {
    let status: String = row.get(3)?;
    Ok(ProjectRequest {
        id: row.get(0)?,
        project_id: row.get(1)?,
        resource_id: row.get(2)?,
        status: status
            .parse::<RequestStatus>()
            .map_err(|e| corrupt("request status", e))?,
        requested_at: parse_time(row.get(4)?)?,
    })
}

fn insert_resource(conn: &Connection, r: &Resource) -> StoreResult<()> {
    let skills = serde_json::to_string(&r.skills).map_err(|e| StoreError::Backend(e.to_string()))?;
    conn.execute(
        "INSERT INTO resources (id, name, email, role, skills, availability, seniority, location, timezone)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &r.id,
            &r.name,
            &r.email,
            &r.role,
            &skills,
            r.availability,
            label(&r.seniority),
            &r.location,
            &r.timezone
        ],
    )?;
    Ok(())
}

#[async_trait]
impl DomainStore for SqliteStore {
    async fn list_resources(&self) -> StoreResult<Vec<Resource>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM resources ORDER BY name ASC", RESOURCE_COLUMNS))?;
            let rows = stmt.query_map([], resource_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM projects ORDER BY name ASC", PROJECT_COLUMNS))?;
            let rows = stmt.query_map([], project_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_resource_by_id(&self, id: &str) -> StoreResult<Option<Resource>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM resources WHERE id = ?1", RESOURCE_COLUMNS),
                    params![&id],
                    resource_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn get_project_by_id(&self, id: &str) -> StoreResult<Option<Project>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                    params![&id],
                    project_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn get_resource_by_email(&self, email: &str) -> StoreResult<Option<Resource>> {
        let email = email.trim().to_lowercase();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM resources WHERE email = ?1", RESOURCE_COLUMNS),
                    params![&email],
                    resource_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn create_resource(&self, draft: ResourceDraft) -> StoreResult<Resource> {
        let resource = draft.into_resource(Uuid::new_v4().to_string());
        let row = resource.clone();
        self.with_conn(move |conn| {
            insert_resource(conn, &row).map_err(|e| match e {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("email '{}' is already registered", row.email))
                }
                other => other,
            })
        })
        .await?;
        self.feed.publish(StoreEvent::ResourceCreated { id: resource.id.clone() });
        Ok(resource)
    }

    async fn update_resource(&self, id: &str, patch: ResourcePatch) -> StoreResult<Resource> {
        let id = id.to_string();
        let updated = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let mut resource = tx
                    .query_row(
                        &format!("SELECT {} FROM resources WHERE id = ?1", RESOURCE_COLUMNS),
                        params![&id],
                        resource_from_row,
                    )
                    .optional()?
                    .ok_or_else(|| StoreError::NotFound { kind: "resource", id: id.clone() })?;
                patch.apply(&mut resource);
                let skills = serde_json::to_string(&resource.skills)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                tx.execute(
                    "UPDATE resources SET name = ?1, role = ?2, skills = ?3, availability = ?4,
                     seniority = ?5, location = ?6, timezone = ?7 WHERE id = ?8",
                    params![
                        &resource.name,
                        &resource.role,
                        &skills,
                        resource.availability,
                        label(&resource.seniority),
                        &resource.location,
                        &resource.timezone,
                        &resource.id
                    ],
                )?;
                tx.commit()?;
                Ok(resource)
            })
            .await?;
        self.feed.publish(StoreEvent::ResourceUpdated { id: updated.id.clone() });
        Ok(updated)
    }

    async fn create_project(&self, draft: ProjectDraft) -> StoreResult<Project> {
        let project = draft.into_project(Uuid::new_v4().to_string());
        let row = project.clone();
        self.with_conn(move |conn| {
            let skills = serde_json::to_string(&row.required_skills)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            conn.execute(
                "INSERT INTO projects (id, name, description, required_skills, start_date, deadline, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    &row.id,
                    &row.name,
                    &row.description,
                    &skills,
                    row.start_date.format("%Y-%m-%d").to_string(),
                    row.deadline.format("%Y-%m-%d").to_string(),
                    label(&row.priority)
                ],
            )?;
            Ok(())
        })
        .await?;
        self.feed.publish(StoreEvent::ProjectCreated { id: project.id.clone() });
        Ok(project)
    }

    async fn list_allocations(&self) -> StoreResult<Vec<Allocation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM allocations ORDER BY created_at ASC",
                ALLOCATION_COLUMNS
            ))?;
            let rows = stmt.query_map([], allocation_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_allocation(&self, id: &str) -> StoreResult<Option<Allocation>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM allocations WHERE id = ?1", ALLOCATION_COLUMNS),
                    params![&id],
                    allocation_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn find_allocations(
        &self,
        resource_id: &str,
        project_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Allocation>> {
        let resource_id = resource_id.to_string();
        let project_id = project_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM allocations
                 WHERE resource_id = ?1 AND project_id = ?2 AND created_at >= ?3
                 ORDER BY created_at ASC",
                ALLOCATION_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![&resource_id, &project_id, format_time(&since)],
                allocation_from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn create_allocation(&self, data: NewAllocation) -> StoreResult<AllocationId> {
        let (id, created) = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                if let Some(key) = data.idempotency_key.as_deref() {
                    let existing: Option<String> = tx
                        .query_row(
                            "SELECT id FROM allocations WHERE idempotency_key = ?1",
                            params![key],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if let Some(existing) = existing {
                        return Ok((existing, None));
                    }
                }
                let allocation = data.into_allocation(Uuid::new_v4().to_string());
                tx.execute(
                    "INSERT INTO allocations (id, resource_id, project_id, match_score, status, reasoning, created_at, idempotency_key)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        &allocation.id,
                        &allocation.resource_id,
                        &allocation.project_id,
                        allocation.match_score.value(),
                        allocation.status.as_str(),
                        &allocation.reasoning,
                        format_time(&allocation.created_at),
                        &allocation.idempotency_key
                    ],
                )?;
                tx.commit()?;
                Ok((allocation.id.clone(), Some(allocation)))
            })
            .await?;

        if let Some(allocation) = created {
            self.feed.publish(StoreEvent::AllocationCreated {
                id: allocation.id,
                resource_id: allocation.resource_id,
                project_id: allocation.project_id,
            });
        }
        Ok(id)
    }

    async fn delete_allocation(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        let deleted_id = id.clone();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM allocations WHERE id = ?1", params![&id])?;
            if n == 0 {
                return Err(StoreError::NotFound { kind: "allocation", id });
            }
            Ok(())
        })
        .await?;
        self.feed.publish(StoreEvent::AllocationDeleted { id: deleted_id });
        Ok(())
    }

    async fn list_project_requests(&self) -> StoreResult<Vec<ProjectRequest>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM project_requests ORDER BY requested_at ASC",
                REQUEST_COLUMNS
            ))?;
            let rows = stmt.query_map([], request_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_project_request(&self, id: &str) -> StoreResult<Option<ProjectRequest>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM project_requests WHERE id = ?1", REQUEST_COLUMNS),
                    params![&id],
                    request_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn create_project_request(&self, data: NewProjectRequest) -> StoreResult<RequestId> {
        let id = Uuid::new_v4().to_string();
        let row_id = id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO project_requests (id, project_id, resource_id, status, requested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &row_id,
                    &data.project_id,
                    &data.resource_id,
                    RequestStatus::Pending.as_str(),
                    format_time(&Utc::now())
                ],
            )?;
            Ok(())
        })
        .await?;
        self.feed.publish(StoreEvent::RequestCreated { id: id.clone() });
        Ok(id)
    }

    async fn update_project_request_status(&self, id: &str, status: RequestStatus) -> StoreResult<()> {
        let id = id.to_string();
        let event_id = id.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM project_requests WHERE id = ?1",
                    params![&id],
                    |row| row.get(0),
                )
                .optional()?;
            match current.as_deref() {
                None => return Err(StoreError::NotFound { kind: "request", id }),
                Some("pending") => {}
                Some(other) => {
                    return Err(StoreError::Conflict(format!("request '{}' is already {}", id, other)))
                }
            }
            tx.execute(
                "UPDATE project_requests SET status = ?1 WHERE id = ?2 AND status = 'pending'",
                params![status.as_str(), &id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        self.feed.publish(StoreEvent::RequestStatusChanged { id: event_id, status });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.feed.subscribe()
    }
}
