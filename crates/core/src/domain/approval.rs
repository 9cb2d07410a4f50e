use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::version::PolicyId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    RequestedChanges,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::RequestedChanges => "REQUESTED_CHANGES",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "REQUESTED_CHANGES" => Some(Self::RequestedChanges),
            _ => None,
        }
    }
}

/// An immutable approval decision record. Created exactly once per
/// decision; never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyApproval {
    pub id: ApprovalId,
    pub policy_id: PolicyId,
    pub version: u32,
    pub approver_id: String,
    pub decision: ApprovalDecision,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl PolicyApproval {
    pub fn new(
        policy_id: PolicyId,
        version: u32,
        approver_id: impl Into<String>,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> Self {
        Self {
            id: ApprovalId(Uuid::new_v4().to_string()),
            policy_id,
            version,
            approver_id: approver_id.into(),
            decision,
            comment,
            decided_at: Utc::now(),
        }
    }
}
