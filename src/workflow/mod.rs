//! Workflows
//!
//! Stateless between calls; all shared state lives in the store.

mod allocation;
mod conflict;
mod requests;

pub use crate::oracle::Suggestion;
pub use allocation::{AllocationWorkflow, CommitMode, CommitReport, CommitRequest, CommitTarget};
pub use conflict::{ConflictRef, ConflictResolver};
pub use requests::{ApprovalOutcome, RequestWorkflow, APPROVAL_REASONING_PREFIX};
