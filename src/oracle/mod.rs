//! Matching Oracle
//!
//! The language-model-backed scoring service. Callers only ever see
//! validated, typed results or an `OracleError`.

pub mod contract;
mod llm;

pub use contract::{
    ConflictBrief, ExtractSkillsRequest, ProjectMatchRequest, ProjectProfile, ResourceMatchRequest,
    ResourceProfile, Suggestion, MAX_SUGGESTIONS,
};
pub use llm::LlmMatchingOracle;

use async_trait::async_trait;

use crate::error::OracleError;

#[async_trait]
pub trait MatchingOracle: Send + Sync {
    /// Project -> Resources, best first, at most three.
    async fn suggest_resources(&self, request: &ResourceMatchRequest) -> Result<Vec<Suggestion>, OracleError>;

    /// Resource -> Projects, best first, at most three.
    async fn suggest_projects(&self, request: &ProjectMatchRequest) -> Result<Vec<Suggestion>, OracleError>;

    /// Advisory text naming a better-suited resource or recommending training.
    /// May read the store through tools; never writes.
    async fn resolve_conflict(&self, brief: &ConflictBrief) -> Result<String, OracleError>;

    async fn extract_skills(&self, request: &ExtractSkillsRequest) -> Result<Vec<String>, OracleError>;

    /// Free-form assistant turn. The model may allocate through tools, so
    /// this call is not retried.
    async fn chat(&self, message: &str) -> Result<String, OracleError>;
}
