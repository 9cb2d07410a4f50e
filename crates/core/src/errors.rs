use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::version::VersionStatus;

/// Enumerated error codes exposed on the execution wire. Security
/// rejections never expose more internal state than one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SignatureInvalid,
    NonceReused,
    NonceInvalid,
    TimestampExpired,
    HashMismatch,
    PolicyNotFound,
    NoApprovedVersion,
    VersionNotExecutable,
    ExecutionFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::NonceReused => "NONCE_REUSED",
            Self::NonceInvalid => "NONCE_INVALID",
            Self::TimestampExpired => "TIMESTAMP_EXPIRED",
            Self::HashMismatch => "HASH_MISMATCH",
            Self::PolicyNotFound => "POLICY_NOT_FOUND",
            Self::NoApprovedVersion => "NO_APPROVED_VERSION",
            Self::VersionNotExecutable => "VERSION_NOT_EXECUTABLE",
            Self::ExecutionFailed => "EXECUTION_FAILED",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid version transition from {from:?} to {to:?}")]
    InvalidVersionTransition { from: VersionStatus, to: VersionStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;

    #[test]
    fn error_codes_serialize_as_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::NonceReused).expect("serialize");
        assert_eq!(json, "\"NONCE_REUSED\"");
        assert_eq!(ErrorCode::NonceReused.as_str(), "NONCE_REUSED");
    }
}
