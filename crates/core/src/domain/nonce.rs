use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::version::PolicyId;

/// Reference single-use window: a claimed nonce blocks replays for ten
/// minutes, after which the sweep may reclaim the row.
pub const NONCE_TTL_SECS: i64 = 600;

/// A single-use replay guard record. The storage layer's uniqueness
/// constraint on `nonce` is the sole correctness mechanism.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedNonce {
    pub nonce: String,
    pub policy_id: Option<PolicyId>,
    pub user_id: Option<String>,
    pub used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UsedNonce {
    pub fn claim_now(
        nonce: impl Into<String>,
        policy_id: Option<PolicyId>,
        user_id: Option<String>,
        ttl_secs: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            nonce: nonce.into(),
            policy_id,
            user_id,
            used_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }
}

/// A nonce must be a hyphenated UUIDv4. Anything else is rejected before
/// any storage round-trip.
pub fn nonce_is_well_formed(raw: &str) -> bool {
    if raw.len() != 36 {
        return false;
    }
    match Uuid::parse_str(raw) {
        Ok(uuid) => uuid.get_version_num() == 4,
        Err(_) => false,
    }
}
