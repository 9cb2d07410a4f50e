pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod integrity;
pub mod router;
pub mod simple_rules;

pub use audit::{AuditQuery, AuditStats, EventKind, SecurityEvent, Severity};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::approval::{ApprovalDecision, ApprovalId, PolicyApproval};
pub use domain::nonce::{nonce_is_well_formed, UsedNonce, NONCE_TTL_SECS};
pub use domain::request::{ExecutionRequest, ExecutionResponse};
pub use domain::version::{PolicyId, PolicyVersion, VersionStatus};
pub use errors::{DomainError, ErrorCode};
pub use integrity::{
    chain_hash, hash_content, sign, signing_payload, timestamp_valid, verify, ContentHash,
    IntegrityError, Signature, TIMESTAMP_WINDOW_MS,
};
pub use router::{classify, detect_locale, EngineKind, Locale};
pub use simple_rules::{evaluate, parse_rules, RuleAction, RuleOp, RuleOutcome, RuleSet};
