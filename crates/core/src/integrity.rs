//! Integrity primitives: content hashing, hash chaining, request
//! signatures, and timestamp-window checks.
//!
//! Every digest is format-tagged (`sha256:<hex>`, `hmac-sha256:<hex>`) so
//! that malformed values are rejected by the parsers here before any
//! semantic comparison runs.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const HASH_PREFIX: &str = "sha256:";
const SIGNATURE_PREFIX: &str = "hmac-sha256:";

/// Reference timestamp acceptance window: five minutes either side.
pub const TIMESTAMP_WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("malformed content hash: expected `sha256:<64 hex chars>`")]
    MalformedHash,
    #[error("malformed signature: expected `hmac-sha256:<64 hex chars>`")]
    MalformedSignature,
}

/// A format-tagged SHA-256 content digest (`sha256:<hex>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(raw: &str) -> Result<Self, IntegrityError> {
        let hex = raw.strip_prefix(HASH_PREFIX).ok_or(IntegrityError::MalformedHash)?;
        if !is_lower_hex(hex, 64) {
            return Err(IntegrityError::MalformedHash);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A format-tagged HMAC-SHA256 request signature (`hmac-sha256:<hex>`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn parse(raw: &str) -> Result<Self, IntegrityError> {
        let hex = raw.strip_prefix(SIGNATURE_PREFIX).ok_or(IntegrityError::MalformedSignature)?;
        if !is_lower_hex(hex, 64) {
            return Err(IntegrityError::MalformedSignature);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest_bytes(&self) -> Vec<u8> {
        // parse() guarantees well-formed hex past the prefix.
        decode_hex(&self.0[SIGNATURE_PREFIX.len()..]).unwrap_or_default()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of the source text alone.
pub fn hash_content(source: &str) -> ContentHash {
    ContentHash(format!("{HASH_PREFIX}{}", sha256_hex(source.as_bytes())))
}

/// Chained digest: the source bytes immediately followed by the previous
/// version's full tagged hash string. For the first version (no
/// predecessor) this degenerates to [`hash_content`].
pub fn chain_hash(source: &str, prev: Option<&ContentHash>) -> ContentHash {
    match prev {
        Some(prev) => {
            let mut hasher = Sha256::new();
            hasher.update(source.as_bytes());
            hasher.update(prev.as_str().as_bytes());
            ContentHash(format!("{HASH_PREFIX}{}", encode_hex(hasher.finalize().as_slice())))
        }
        None => hash_content(source),
    }
}

/// The canonical payload covered by a request signature.
///
/// Fields are newline-joined in a fixed order; `input` is compact JSON.
/// serde_json serializes object keys in sorted order, so re-serializing a
/// parsed value reproduces the exact bytes the caller signed.
pub fn signing_payload(
    policy_id: &str,
    hash: &str,
    input: &serde_json::Value,
    timestamp_ms: i64,
    nonce: &str,
    version: Option<u32>,
) -> String {
    let input_json = serde_json::to_string(input).unwrap_or_else(|_| "null".to_string());
    match version {
        Some(version) => {
            format!("{policy_id}\n{hash}\n{input_json}\n{timestamp_ms}\n{nonce}\n{version}")
        }
        None => format!("{policy_id}\n{hash}\n{input_json}\n{timestamp_ms}\n{nonce}"),
    }
}

/// Sign a canonical payload with the shared secret.
pub fn sign(payload: &str, secret: &[u8]) -> Signature {
    Signature(format!("{SIGNATURE_PREFIX}{}", hmac_hex(secret, payload.as_bytes())))
}

/// Verify a claimed signature over a canonical payload.
///
/// The comparison runs in constant time over the decoded digest bytes so
/// that mismatch position never leaks through timing.
pub fn verify(payload: &str, claimed: &Signature, secret: &[u8]) -> bool {
    let expected = sign(payload, secret);
    let expected_bytes = expected.digest_bytes();
    let claimed_bytes = claimed.digest_bytes();
    if expected_bytes.len() != claimed_bytes.len() {
        return false;
    }
    expected_bytes.ct_eq(&claimed_bytes).into()
}

/// `|now - ts| <= window`, all in epoch milliseconds.
///
/// The wire format admits any `i64` timestamp, so the distance is
/// computed with checked arithmetic; a difference too large to
/// represent is always outside the window.
pub fn timestamp_valid(timestamp_ms: i64, now_ms: i64, window_ms: i64) -> bool {
    now_ms
        .checked_sub(timestamp_ms)
        .is_some_and(|delta| delta.unsigned_abs() <= window_ms.unsigned_abs())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length; unreachable in practice.
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    encode_hex(Sha256::digest(payload).as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&hex[index..index + 2], 16).ok())
        .collect()
}

fn is_lower_hex(value: &str, expected_len: usize) -> bool {
    value.len() == expected_len
        && value.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        chain_hash, hash_content, sign, signing_payload, timestamp_valid, verify, ContentHash,
        IntegrityError, Signature, TIMESTAMP_WINDOW_MS,
    };

    #[test]
    fn hash_content_is_deterministic_and_tagged() {
        let a = hash_content("if age < 18 then deny Underage");
        let b = hash_content("if age < 18 then deny Underage");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("sha256:"));
        assert_eq!(a.as_str().len(), "sha256:".len() + 64);
    }

    #[test]
    fn chain_hash_differs_for_different_sources_under_same_prev() {
        let prev = hash_content("v1 source");
        let a = chain_hash("left", Some(&prev));
        let b = chain_hash("right", Some(&prev));
        assert_ne!(a, b);
    }

    #[test]
    fn chain_hash_without_predecessor_equals_content_hash() {
        assert_eq!(chain_hash("first version", None), hash_content("first version"));
    }

    #[test]
    fn tampering_with_history_invalidates_every_later_hash() {
        let sources = ["v1", "v2", "v3"];
        let mut prev: Option<ContentHash> = None;
        let mut chain = Vec::new();
        for source in sources {
            let hash = chain_hash(source, prev.as_ref());
            chain.push(hash.clone());
            prev = Some(hash);
        }

        // Recompute forward from a tampered v1.
        let tampered_v1 = chain_hash("v1-tampered", None);
        let tampered_v2 = chain_hash("v2", Some(&tampered_v1));
        let tampered_v3 = chain_hash("v3", Some(&tampered_v2));
        assert_ne!(tampered_v2, chain[1]);
        assert_ne!(tampered_v3, chain[2]);
    }

    #[test]
    fn content_hash_parse_rejects_malformed_values() {
        assert_eq!(ContentHash::parse("deadbeef"), Err(IntegrityError::MalformedHash));
        assert_eq!(ContentHash::parse("sha256:xyz"), Err(IntegrityError::MalformedHash));
        assert_eq!(
            ContentHash::parse(&format!("sha256:{}", "A".repeat(64))),
            Err(IntegrityError::MalformedHash),
        );
        assert!(ContentHash::parse(&format!("sha256:{}", "a".repeat(64))).is_ok());
    }

    #[test]
    fn signature_roundtrip_verifies() {
        let payload = signing_payload(
            "pol-1",
            "sha256:abc",
            &json!({"age": 21}),
            1_700_000_000_000,
            "4f9c0fb1-94f8-4f4b-9a3e-1c2d3e4f5a6b",
            Some(1),
        );
        let signature = sign(&payload, b"shared-secret");
        assert!(verify(&payload, &signature, b"shared-secret"));
        assert!(!verify(&payload, &signature, b"other-secret"));
    }

    #[test]
    fn verify_rejects_signature_over_different_payload() {
        let signature = sign("payload-a", b"secret");
        assert!(!verify("payload-b", &signature, b"secret"));
    }

    #[test]
    fn signing_payload_orders_input_keys_canonically() {
        let left = signing_payload("p", "h", &json!({"b": 1, "a": 2}), 0, "n", None);
        let right = signing_payload("p", "h", &json!({"a": 2, "b": 1}), 0, "n", None);
        assert_eq!(left, right);
    }

    #[test]
    fn signature_parse_rejects_malformed_values() {
        assert_eq!(Signature::parse("sha256:abc"), Err(IntegrityError::MalformedSignature));
        assert!(Signature::parse(&format!("hmac-sha256:{}", "0".repeat(64))).is_ok());
    }

    #[test]
    fn timestamp_window_accepts_inside_and_rejects_outside() {
        let now = 1_700_000_000_000;
        assert!(timestamp_valid(now - TIMESTAMP_WINDOW_MS, now, TIMESTAMP_WINDOW_MS));
        assert!(timestamp_valid(now + TIMESTAMP_WINDOW_MS, now, TIMESTAMP_WINDOW_MS));
        // Six minutes old.
        assert!(!timestamp_valid(now - 6 * 60 * 1000, now, TIMESTAMP_WINDOW_MS));
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_overflow() {
        let now = 1_700_000_000_000;
        assert!(!timestamp_valid(i64::MIN, now, TIMESTAMP_WINDOW_MS));
        assert!(!timestamp_valid(i64::MAX, now, TIMESTAMP_WINDOW_MS));
        assert!(!timestamp_valid(now, i64::MIN, TIMESTAMP_WINDOW_MS));
        assert!(!timestamp_valid(i64::MIN, i64::MAX, TIMESTAMP_WINDOW_MS));
        assert!(timestamp_valid(i64::MAX, i64::MAX, TIMESTAMP_WINDOW_MS));
    }
}
