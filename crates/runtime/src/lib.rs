//! Orchestration layer: the secure execution pipeline and the services
//! it is assembled from, wired over the repository traits in
//! `rulegate-db`.

pub mod audit_log;
pub mod engine_client;
pub mod executor;
pub mod nonce_guard;
pub mod versioning;

pub use audit_log::{AuditLog, BatchResult};
pub use engine_client::{
    EngineError, EngineEvaluation, EngineVerdict, HttpRuleEngineClient, RuleEngineClient,
};
pub use executor::{RequestContext, SecureExecutor};
pub use nonce_guard::{ClaimRejection, NonceGuard};
pub use versioning::{ResolvedVersion, VersionService, VersioningError};
