use serde::{Deserialize, Serialize};

use crate::errors::ErrorCode;

/// A signed execution request as submitted by a caller.
///
/// The `hash` is the caller's claim about which content it expects to run;
/// the executor verifies that claim against the resolved version's stored
/// hash and never executes caller-supplied source text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub policy_id: String,
    pub hash: String,
    pub input: serde_json::Value,
    /// Epoch milliseconds at signing time.
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deprecated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
}

impl ExecutionResponse {
    pub fn rejected(error_code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            error_code: Some(error_code),
            execution_time_ms: None,
            version: None,
            source_hash: None,
            is_deprecated: None,
            expected_version: None,
            expected_hash: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::errors::ErrorCode;

    use super::{ExecutionRequest, ExecutionResponse};

    #[test]
    fn request_uses_camel_case_wire_fields() {
        let raw = json!({
            "policyId": "pol-1",
            "hash": "sha256:00",
            "input": {"age": 15},
            "timestamp": 1_700_000_000_000_i64,
            "nonce": "4f9c0fb1-94f8-4f4b-9a3e-1c2d3e4f5a6b",
            "signature": "hmac-sha256:00",
            "version": 2,
        });
        let request: ExecutionRequest = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(request.policy_id, "pol-1");
        assert_eq!(request.version, Some(2));
    }

    #[test]
    fn rejected_response_omits_empty_fields() {
        let response = ExecutionResponse::rejected(ErrorCode::NonceReused, "nonce already used");
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["errorCode"], json!("NONCE_REUSED"));
        assert!(value.get("result").is_none());
        assert!(value.get("expectedHash").is_none());
    }
}
