//! Typed oracle contracts
//!
//! One request and one response type per call shape. Requests are checked
//! before they leave the process; responses are parsed and checked before
//! anything downstream sees them. A response that fails a check is an
//! `OracleError::InvalidResponse`, never patched up.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::agent::extract_json_object;
use crate::domain::{MatchScore, Project, Resource};
use crate::error::{AllocationError, OracleError};

/// Upper bound on ranked entries per response.
pub const MAX_SUGGESTIONS: usize = 3;

pub const DEFAULT_PRIORITY_FACTORS: &str =
    "Skill overlap with the required skills first, then weekly availability, then project priority and deadline.";

/// A ranked candidate, already validated. `candidate_id` is a resource id
/// when matching for a project and a project id when matching for a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub candidate_id: String,
    pub candidate_name: String,
    #[serde(rename = "matchPercentage")]
    pub match_score: MatchScore,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProfile {
    pub id: String,
    pub name: String,
    pub skills: Vec<String>,
    /// Hours per week
    pub availability: u32,
}

impl From<&Resource> for ResourceProfile {
    fn from(r: &Resource) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            skills: r.skills.iter().cloned().collect(),
            availability: r.availability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectProfile {
    pub id: String,
    pub name: String,
    pub required_skills: Vec<String>,
    /// `YYYY-MM-DD`
    pub deadline: String,
    pub priority: String,
}

impl From<&Project> for ProjectProfile {
    fn from(p: &Project) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            required_skills: p.required_skills.iter().cloned().collect(),
            deadline: p.deadline.format("%Y-%m-%d").to_string(),
            priority: p.priority.to_string(),
        }
    }
}

/// Project -> Resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMatchRequest {
    /// `name: description. Required skills: a, b`
    pub project_description: String,
    pub resource_profiles: Vec<ResourceProfile>,
    pub priority_factors: String,
}

impl ResourceMatchRequest {
    pub fn new(project: &Project, pool: &[Resource], priority_hint: Option<&str>) -> Self {
        Self {
            project_description: project.matching_description(),
            resource_profiles: pool.iter().map(ResourceProfile::from).collect(),
            priority_factors: priority_hint
                .filter(|h| !h.trim().is_empty())
                .unwrap_or(DEFAULT_PRIORITY_FACTORS)
                .to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.project_description.trim().is_empty() {
            return Err(AllocationError::Validation("project description is empty".into()));
        }
        if self.resource_profiles.is_empty() {
            return Err(AllocationError::Validation("resource pool is empty".into()));
        }
        Ok(())
    }

    pub fn render_prompt(&self) -> String {
        let mut prompt = format!("Project Description:\n{}\n\nAvailable Resource Profiles:\n", self.project_description);
        for r in &self.resource_profiles {
            prompt.push_str(&format!(
                "- Name: {} (ID: {})\n  Skills: {}\n  Availability: {} hours/week\n",
                r.name,
                r.id,
                r.skills.join(", "),
                r.availability
            ));
        }
        prompt.push_str(&format!("\nPriority Factors for Matching: {}\n\n", self.priority_factors));
        prompt.push_str(&format!(
            "Identify the top {} best-suited resources for the project, best first. For each, give the \
             resource's ID and name, an integer match percentage from 0 to 100, and a concise reasoning \
             covering skill overlap and availability.\n\n",
            MAX_SUGGESTIONS
        ));
        prompt.push_str(&schema_instruction::<ResourceMatchResponse>());
        prompt
    }

    fn pool_ids(&self) -> HashSet<&str> {
        self.resource_profiles.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn parse_response(&self, raw: &str) -> Result<Vec<Suggestion>, OracleError> {
        let response: ResourceMatchResponse = parse_json(raw)?;
        validate_ranking(response.resource_allocations, &self.pool_ids())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMatchEntry {
    pub resource_id: String,
    pub resource_name: String,
    /// Integer from 0 to 100
    pub match_percentage: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMatchResponse {
    /// At most three entries, best first
    pub resource_allocations: Vec<ResourceMatchEntry>,
}

/// Resource -> Projects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMatchRequest {
    pub resource_profile: ResourceProfile,
    pub project_profiles: Vec<ProjectProfile>,
}

impl ProjectMatchRequest {
    pub fn new(resource: &Resource, pool: &[Project]) -> Self {
        Self {
            resource_profile: ResourceProfile::from(resource),
            project_profiles: pool.iter().map(ProjectProfile::from).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.project_profiles.is_empty() {
            return Err(AllocationError::Validation("project pool is empty".into()));
        }
        Ok(())
    }

    pub fn render_prompt(&self) -> String {
        let r = &self.resource_profile;
        let mut prompt = format!(
            "Resource Profile:\n- Name: {} (ID: {})\n  Skills: {}\n  Availability: {} hours/week\n\nAvailable Projects:\n",
            r.name,
            r.id,
            r.skills.join(", "),
            r.availability
        );
        for p in &self.project_profiles {
            prompt.push_str(&format!(
                "- Name: {} (ID: {})\n  Required Skills: {}\n  Deadline: {}\n  Priority: {}\n",
                p.name,
                p.id,
                p.required_skills.join(", "),
                p.deadline,
                p.priority
            ));
        }
        prompt.push_str(&format!(
            "\nIdentify the top {} projects this resource is best suited for, best first. For each, give the \
             project's ID and name, an integer match percentage from 0 to 100, and a concise reasoning \
             covering skill overlap and how availability fits the deadline.\n\n",
            MAX_SUGGESTIONS
        ));
        prompt.push_str(&schema_instruction::<ProjectMatchResponse>());
        prompt
    }

    pub fn parse_response(&self, raw: &str) -> Result<Vec<Suggestion>, OracleError> {
        let response: ProjectMatchResponse = parse_json(raw)?;
        let ids: HashSet<&str> = self.project_profiles.iter().map(|p| p.id.as_str()).collect();
        validate_ranking(response.project_allocations, &ids)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMatchEntry {
    pub project_id: String,
    pub project_name: String,
    /// Integer from 0 to 100
    pub match_percentage: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMatchResponse {
    /// At most three entries, best first
    pub project_allocations: Vec<ProjectMatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractSkillsRequest {
    pub project_description: String,
}

impl ExtractSkillsRequest {
    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.project_description.trim().is_empty() {
            return Err(AllocationError::Validation("project description is empty".into()));
        }
        Ok(())
    }

    pub fn render_prompt(&self) -> String {
        format!(
            "Extract the skills required to complete this project.\n\nProject Description: {}\n\n{}",
            self.project_description,
            schema_instruction::<ExtractSkillsResponse>()
        )
    }

    /// Skills trimmed and de-duplicated in first-seen order.
    pub fn parse_response(&self, raw: &str) -> Result<Vec<String>, OracleError> {
        let response: ExtractSkillsResponse = parse_json(raw)?;
        let mut seen = HashSet::new();
        let mut skills = Vec::new();
        for skill in response.skills {
            let skill = skill.trim().to_string();
            if skill.is_empty() {
                return Err(OracleError::InvalidResponse("blank skill in extraction result".into()));
            }
            if seen.insert(skill.to_lowercase()) {
                skills.push(skill);
            }
        }
        Ok(skills)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractSkillsResponse {
    pub skills: Vec<String>,
}

/// Everything the resolver hands the model. Built from freshly read records.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictBrief {
    pub project: Project,
    pub resource: Resource,
    pub reasoning: String,
}

impl ConflictBrief {
    pub fn render_prompt(&self) -> String {
        format!(
            "An allocation was flagged as a conflict with the following reasoning: \"{}\".\n\n\
             The project is: {}\n\
             The resource is: {} (Skills: {})\n\
             The project requires these skills: {}\n\n\
             Use the {} tool to see all available resources and find a better-suited resource for \
             the project based on skill match and availability. Your suggestion should be specific, like \
             \"Reassign this project to <name> who has a better skill set.\" If no better resource \
             is found, suggest providing training to the current one.\n\n\
             Give the final suggestion after [ANSWER], either as plain text or as {}",
            self.reasoning,
            self.project.name,
            self.resource.name,
            self.resource.skills_joined(),
            self.project.required_skills_joined(),
            crate::tools::LIST_RESOURCE_PROFILES_TOOL,
            r#"{"suggestion": "..."}"#
        )
    }

    /// Accepts `{"suggestion": ".."}` or plain prose.
    pub fn parse_answer(&self, answer: &str) -> Result<String, OracleError> {
        let suggestion = match extract_json_object(answer)
            .and_then(|json| serde_json::from_str::<ConflictResolutionResponse>(json).ok())
        {
            Some(parsed) => parsed.suggestion,
            None => answer.to_string(),
        };
        let suggestion = suggestion.trim().to_string();
        if suggestion.is_empty() {
            return Err(OracleError::InvalidResponse("empty conflict suggestion".into()));
        }
        Ok(suggestion)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConflictResolutionResponse {
    pub suggestion: String,
}

fn schema_instruction<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    format!(
        "Respond with a single JSON object that validates against this JSON schema and nothing else:\n{}\n",
        serde_json::to_string(&schema).unwrap_or_default()
    )
}

fn parse_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, OracleError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| OracleError::InvalidResponse("no JSON object in model output".into()))?;
    serde_json::from_str(json).map_err(|e| OracleError::InvalidResponse(format!("schema mismatch: {}", e)))
}

trait RankedEntry {
    fn candidate_id(&self) -> &str;
    fn candidate_name(&self) -> &str;
    fn match_percentage(&self) -> f64;
    fn reasoning(&self) -> &str;
}

impl RankedEntry for ResourceMatchEntry {
    fn candidate_id(&self) -> &str {
        &self.resource_id
    }
    fn candidate_name(&self) -> &str {
        &self.resource_name
    }
    fn match_percentage(&self) -> f64 {
        self.match_percentage
    }
    fn reasoning(&self) -> &str {
        &self.reasoning
    }
}

impl RankedEntry for ProjectMatchEntry {
    fn candidate_id(&self) -> &str {
        &self.project_id
    }
    fn candidate_name(&self) -> &str {
        &self.project_name
    }
    fn match_percentage(&self) -> f64 {
        self.match_percentage
    }
    fn reasoning(&self) -> &str {
        &self.reasoning
    }
}

fn validate_ranking<E: RankedEntry>(entries: Vec<E>, pool: &HashSet<&str>) -> Result<Vec<Suggestion>, OracleError> {
    let invalid = |msg: String| -> Result<Vec<Suggestion>, OracleError> { Err(OracleError::InvalidResponse(msg)) };

    if entries.len() > MAX_SUGGESTIONS {
        return invalid(format!("{} entries returned, at most {} allowed", entries.len(), MAX_SUGGESTIONS));
    }

    let mut seen = HashSet::new();
    let mut suggestions = Vec::with_capacity(entries.len());

    for entry in &entries {
        let id = entry.candidate_id();
        if !pool.contains(id) {
            return invalid(format!("candidate '{}' is not in the supplied pool", id));
        }
        if !seen.insert(id) {
            return invalid(format!("candidate '{}' appears more than once", id));
        }
        let pct = entry.match_percentage();
        if !pct.is_finite() || pct.fract() != 0.0 || !(0.0..=100.0).contains(&pct) {
            return invalid(format!("matchPercentage {} for '{}' is not an integer in 0..=100", pct, id));
        }
        if entry.reasoning().trim().is_empty() {
            return invalid(format!("empty reasoning for '{}'", id));
        }
        let score = MatchScore::new(pct as u8).map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
        if let Some(prev) = suggestions.last().map(|s: &Suggestion| s.match_score) {
            if score > prev {
                return invalid("entries are not ordered by descending matchPercentage".into());
            }
        }
        suggestions.push(Suggestion {
            candidate_id: id.to_string(),
            candidate_name: entry.candidate_name().trim().to_string(),
            match_score: score,
            reasoning: entry.reasoning().trim().to_string(),
        });
    }

    Ok(suggestions)
}
