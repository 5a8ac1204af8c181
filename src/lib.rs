//! Talent Flow
//!
//! Resource-allocation matching and conflict resolution backed by a
//! language model:
//! - Typed, validated oracle contracts for ranking people against projects
//! - Allocation workflow with derived status and idempotent writes
//! - Advisory conflict resolution through a bounded tool-calling loop
//! - Join-request approval that commits before it flips state

pub mod agent;
pub mod config;
pub mod domain;
pub mod error;
pub mod notify;
pub mod oracle;
pub mod seed;
pub mod server;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod tools;
pub mod workflow;

// Re-exports for convenience
pub use config::AppConfig;
pub use error::{AllocationError, OracleError, StoreError};
pub use service::AllocationService;
pub use store::DomainStore;
