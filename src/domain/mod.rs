//! Domain Model
//!
//! Resources (people), projects, the allocations joining them and the
//! join requests a resource raises against a project.

mod status;

pub use status::{derive_status, AllocationStatus, MatchScore, StatusThresholds};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::AllocationError;

pub type ResourceId = String;
pub type ProjectId = String;
pub type AllocationId = String;
pub type RequestId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seniority {
    Intern,
    Junior,
    #[serde(rename = "Mid-level")]
    MidLevel,
    Senior,
    Lead,
}

impl std::fmt::Display for Seniority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Seniority::Intern => write!(f, "Intern"),
            Seniority::Junior => write!(f, "Junior"),
            Seniority::MidLevel => write!(f, "Mid-level"),
            Seniority::Senior => write!(f, "Senior"),
            Seniority::Lead => write!(f, "Lead"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "High"),
            Priority::Medium => write!(f, "Medium"),
            Priority::Low => write!(f, "Low"),
        }
    }
}

/// A person available for project work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    /// Unique; binds the resource to a user account.
    pub email: String,
    pub role: String,
    pub skills: BTreeSet<String>,
    /// Hours per week.
    pub availability: u32,
    pub seniority: Seniority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl Resource {
    pub fn skills_joined(&self) -> String {
        self.skills.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Input for registering a resource; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDraft {
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    pub availability: u32,
    pub seniority: Seniority,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl ResourceDraft {
    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.name.trim().is_empty() {
            return Err(AllocationError::Validation("resource name must not be empty".into()));
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AllocationError::Validation(format!(
                "'{}' is not a usable email address",
                self.email
            )));
        }
        if self.skills.iter().any(|s| s.trim().is_empty()) {
            return Err(AllocationError::Validation("skills must not contain blank entries".into()));
        }
        Ok(())
    }

    pub fn into_resource(self, id: ResourceId) -> Resource {
        Resource {
            id,
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            role: self.role,
            skills: self.skills,
            availability: self.availability,
            seniority: self.seniority,
            location: self.location,
            timezone: self.timezone,
        }
    }
}

/// Partial profile edit. Email is immutable once registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub role: Option<String>,
    pub skills: Option<BTreeSet<String>>,
    pub availability: Option<u32>,
    pub seniority: Option<Seniority>,
    pub location: Option<String>,
    pub timezone: Option<String>,
}

impl ResourcePatch {
    pub fn apply(self, resource: &mut Resource) {
        if let Some(name) = self.name {
            resource.name = name;
        }
        if let Some(role) = self.role {
            resource.role = role;
        }
        if let Some(skills) = self.skills {
            resource.skills = skills;
        }
        if let Some(availability) = self.availability {
            resource.availability = availability;
        }
        if let Some(seniority) = self.seniority {
            resource.seniority = seniority;
        }
        if self.location.is_some() {
            resource.location = self.location;
        }
        if self.timezone.is_some() {
            resource.timezone = self.timezone;
        }
    }
}

/// A unit of work with required skills, a deadline, and a priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub required_skills: BTreeSet<String>,
    pub start_date: NaiveDate,
    pub deadline: NaiveDate,
    pub priority: Priority,
}

impl Project {
    pub fn required_skills_joined(&self) -> String {
        self.required_skills.iter().cloned().collect::<Vec<_>>().join(", ")
    }

    /// `name: description. Required skills: a, b`
    pub fn matching_description(&self) -> String {
        format!(
            "{}: {}. Required skills: {}",
            self.name,
            self.description,
            self.required_skills_joined()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    pub start_date: NaiveDate,
    pub deadline: NaiveDate,
    pub priority: Priority,
}

impl ProjectDraft {
    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.name.trim().is_empty() {
            return Err(AllocationError::Validation("project name must not be empty".into()));
        }
        if self.start_date > self.deadline {
            return Err(AllocationError::Validation(format!(
                "start date {} is after deadline {}",
                self.start_date, self.deadline
            )));
        }
        if self.required_skills.iter().any(|s| s.trim().is_empty()) {
            return Err(AllocationError::Validation(
                "required skills must not contain blank entries".into(),
            ));
        }
        Ok(())
    }

    pub fn into_project(self, id: ProjectId) -> Project {
        Project {
            id,
            name: self.name.trim().to_string(),
            description: self.description,
            required_skills: self.required_skills,
            start_date: self.start_date,
            deadline: self.deadline,
            priority: self.priority,
        }
    }
}

/// A committed assignment of a resource to a project. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub id: AllocationId,
    pub resource_id: ResourceId,
    pub project_id: ProjectId,
    #[serde(rename = "match")]
    pub match_score: MatchScore,
    pub status: AllocationStatus,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Allocation data handed to the store. Only the workflow builds these, so
/// `status` always agrees with `match_score`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAllocation {
    pub resource_id: ResourceId,
    pub project_id: ProjectId,
    pub match_score: MatchScore,
    pub status: AllocationStatus,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

impl NewAllocation {
    pub(crate) fn scored(
        resource_id: impl Into<ResourceId>,
        project_id: impl Into<ProjectId>,
        match_score: MatchScore,
        thresholds: &StatusThresholds,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            project_id: project_id.into(),
            match_score,
            status: thresholds.classify(match_score),
            reasoning: reasoning.into(),
            created_at: Utc::now(),
            idempotency_key: None,
        }
    }

    pub(crate) fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn into_allocation(self, id: AllocationId) -> Allocation {
        Allocation {
            id,
            resource_id: self.resource_id,
            project_id: self.project_id,
            match_score: self.match_score,
            status: self.status,
            reasoning: self.reasoning,
            created_at: self.created_at,
            idempotency_key: self.idempotency_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("unknown request status '{}'", other)),
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource-initiated proposal to join a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRequest {
    pub id: RequestId,
    pub project_id: ProjectId,
    pub resource_id: ResourceId,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProjectRequest {
    pub project_id: ProjectId,
    pub resource_id: ResourceId,
}
