use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::version::PolicyId;

/// Closed set of security-relevant event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SignatureInvalid,
    TimestampExpired,
    NonceInvalid,
    NonceReused,
    HashMismatch,
    PolicyNotFound,
    NoApprovedVersion,
    VersionNotExecutable,
    PolicyExecuted,
    DeprecatedVersionExecuted,
    LenientVerdict,
    VersionCreated,
    VersionSubmitted,
    ApprovalDecision,
    SelfApprovalAttempt,
    DefaultChanged,
    VersionDeprecated,
    VersionArchived,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignatureInvalid => "signature_invalid",
            Self::TimestampExpired => "timestamp_expired",
            Self::NonceInvalid => "nonce_invalid",
            Self::NonceReused => "nonce_reused",
            Self::HashMismatch => "hash_mismatch",
            Self::PolicyNotFound => "policy_not_found",
            Self::NoApprovedVersion => "no_approved_version",
            Self::VersionNotExecutable => "version_not_executable",
            Self::PolicyExecuted => "policy_executed",
            Self::DeprecatedVersionExecuted => "deprecated_version_executed",
            Self::LenientVerdict => "lenient_verdict",
            Self::VersionCreated => "version_created",
            Self::VersionSubmitted => "version_submitted",
            Self::ApprovalDecision => "approval_decision",
            Self::SelfApprovalAttempt => "self_approval_attempt",
            Self::DefaultChanged => "default_changed",
            Self::VersionDeprecated => "version_deprecated",
            Self::VersionArchived => "version_archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "signature_invalid" => Some(Self::SignatureInvalid),
            "timestamp_expired" => Some(Self::TimestampExpired),
            "nonce_invalid" => Some(Self::NonceInvalid),
            "nonce_reused" => Some(Self::NonceReused),
            "hash_mismatch" => Some(Self::HashMismatch),
            "policy_not_found" => Some(Self::PolicyNotFound),
            "no_approved_version" => Some(Self::NoApprovedVersion),
            "version_not_executable" => Some(Self::VersionNotExecutable),
            "policy_executed" => Some(Self::PolicyExecuted),
            "deprecated_version_executed" => Some(Self::DeprecatedVersionExecuted),
            "lenient_verdict" => Some(Self::LenientVerdict),
            "version_created" => Some(Self::VersionCreated),
            "version_submitted" => Some(Self::VersionSubmitted),
            "approval_decision" => Some(Self::ApprovalDecision),
            "self_approval_attempt" => Some(Self::SelfApprovalAttempt),
            "default_changed" => Some(Self::DefaultChanged),
            "version_deprecated" => Some(Self::VersionDeprecated),
            "version_archived" => Some(Self::VersionArchived),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// An append-only audit record. Writes must never become a failure mode
/// for the operation that produced them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: String,
    pub kind: EventKind,
    pub severity: Severity,
    pub policy_id: Option<PolicyId>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub details: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(kind: EventKind, severity: Severity) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind,
            severity,
            policy_id: None,
            user_id: None,
            ip_address: None,
            user_agent: None,
            request_id: None,
            details: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_policy(mut self, policy_id: PolicyId) -> Self {
        self.policy_id = Some(policy_id);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_request(
        mut self,
        request_id: Option<String>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.request_id = request_id;
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Filters for audit queries. All fields are conjunctive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuditQuery {
    pub kind: Option<EventKind>,
    pub severity: Option<Severity>,
    pub policy_id: Option<PolicyId>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl AuditQuery {
    pub fn effective_limit(&self) -> u32 {
        if self.limit == 0 {
            50
        } else {
            self.limit.min(500)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AuditStats {
    pub total: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<String, u64>,
    /// Share of ERROR and CRITICAL events over the window, 0.0 when empty.
    pub error_rate: f64,
}
