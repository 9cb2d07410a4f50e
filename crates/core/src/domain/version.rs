use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::integrity::ContentHash;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub String);

/// Lifecycle status of a policy version.
///
/// DRAFT is the only mutable status; APPROVED and DEPRECATED are the only
/// executable ones; ARCHIVED is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Deprecated,
    Archived,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Deprecated => "DEPRECATED",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DRAFT" => Some(Self::Draft),
            "PENDING_APPROVAL" => Some(Self::PendingApproval),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "DEPRECATED" => Some(Self::Deprecated),
            "ARCHIVED" => Some(Self::Archived),
            _ => None,
        }
    }

    /// APPROVED and DEPRECATED versions may execute; everything else may not.
    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Approved | Self::Deprecated)
    }
}

/// A specific, immutable snapshot of rule source text belonging to a policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub policy_id: PolicyId,
    pub version: u32,
    pub source: String,
    pub content_hash: ContentHash,
    pub prev_hash: Option<ContentHash>,
    pub status: VersionStatus,
    pub is_default: bool,
    pub created_by: String,
    pub release_note: Option<String>,
    pub deprecated_by: Option<String>,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub archived_by: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PolicyVersion {
    pub fn can_transition_to(&self, next: VersionStatus) -> bool {
        matches!(
            (self.status, next),
            (VersionStatus::Draft, VersionStatus::PendingApproval)
                | (VersionStatus::Rejected, VersionStatus::PendingApproval)
                | (VersionStatus::PendingApproval, VersionStatus::Approved)
                | (VersionStatus::PendingApproval, VersionStatus::Rejected)
                | (VersionStatus::PendingApproval, VersionStatus::Draft)
                | (VersionStatus::Approved, VersionStatus::Deprecated)
                | (VersionStatus::Approved, VersionStatus::Archived)
                | (VersionStatus::Deprecated, VersionStatus::Archived)
        )
    }

    pub fn transition_to(&mut self, next: VersionStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            return Ok(());
        }

        Err(DomainError::InvalidVersionTransition { from: self.status, to: next })
    }
}
