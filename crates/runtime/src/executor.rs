use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{info, warn};

use rulegate_core::audit::{EventKind, SecurityEvent, Severity};
use rulegate_core::domain::request::{ExecutionRequest, ExecutionResponse};
use rulegate_core::domain::version::PolicyId;
use rulegate_core::errors::ErrorCode;
use rulegate_core::integrity::{signing_payload, timestamp_valid, ContentHash, Signature};
use rulegate_core::router::{classify, detect_locale, EngineKind};
use rulegate_core::simple_rules::{evaluate, parse_rules};

use crate::audit_log::AuditLog;
use crate::engine_client::{EngineError, RuleEngineClient};
use crate::nonce_guard::{ClaimRejection, NonceGuard};
use crate::versioning::{ResolvedVersion, VersionService, VersioningError};

/// Transport-level context attached to audit events.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

/// End-to-end secure execution pipeline. Each verification stage fails
/// closed and short-circuits with its own audit event; the executor
/// only ever runs source text stored against the resolved version,
/// never text supplied by the caller.
pub struct SecureExecutor {
    versions: VersionService,
    nonce_guard: NonceGuard,
    engine: Arc<dyn RuleEngineClient>,
    audit: AuditLog,
    signing_secret: SecretString,
    timestamp_window_ms: i64,
}

impl SecureExecutor {
    pub fn new(
        versions: VersionService,
        nonce_guard: NonceGuard,
        engine: Arc<dyn RuleEngineClient>,
        audit: AuditLog,
        signing_secret: SecretString,
        timestamp_window_ms: i64,
    ) -> Self {
        Self { versions, nonce_guard, engine, audit, signing_secret, timestamp_window_ms }
    }

    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        ctx: &RequestContext,
    ) -> ExecutionResponse {
        let started = Instant::now();
        let policy_id = PolicyId(request.policy_id.clone());

        // Format validation runs before any semantic check.
        let claimed_signature = match Signature::parse(&request.signature) {
            Ok(signature) => signature,
            Err(_) => {
                self.record_rejection(
                    EventKind::SignatureInvalid,
                    Severity::Warning,
                    &policy_id,
                    ctx,
                    json!({"reason": "malformed signature"}),
                )
                .await;
                return ExecutionResponse::rejected(
                    ErrorCode::SignatureInvalid,
                    "signature is malformed",
                );
            }
        };
        let claimed_hash = match ContentHash::parse(&request.hash) {
            Ok(hash) => hash,
            Err(_) => {
                self.record_rejection(
                    EventKind::HashMismatch,
                    Severity::Warning,
                    &policy_id,
                    ctx,
                    json!({"reason": "malformed hash"}),
                )
                .await;
                return ExecutionResponse::rejected(ErrorCode::HashMismatch, "hash is malformed");
            }
        };

        let payload = signing_payload(
            &request.policy_id,
            &request.hash,
            &request.input,
            request.timestamp,
            &request.nonce,
            request.version,
        );
        if !rulegate_core::integrity::verify(
            &payload,
            &claimed_signature,
            self.signing_secret.expose_secret().as_bytes(),
        ) {
            self.record_rejection(
                EventKind::SignatureInvalid,
                Severity::Warning,
                &policy_id,
                ctx,
                json!({"reason": "signature verification failed"}),
            )
            .await;
            return ExecutionResponse::rejected(
                ErrorCode::SignatureInvalid,
                "signature verification failed",
            );
        }

        let now_ms = Utc::now().timestamp_millis();
        if !timestamp_valid(request.timestamp, now_ms, self.timestamp_window_ms) {
            self.record_rejection(
                EventKind::TimestampExpired,
                Severity::Warning,
                &policy_id,
                ctx,
                json!({"timestamp": request.timestamp, "windowMs": self.timestamp_window_ms}),
            )
            .await;
            return ExecutionResponse::rejected(
                ErrorCode::TimestampExpired,
                "request timestamp is outside the accepted window",
            );
        }

        match self
            .nonce_guard
            .claim(&request.nonce, Some(policy_id.clone()), ctx.user_id.clone())
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(ClaimRejection::Malformed)) => {
                self.record_rejection(
                    EventKind::NonceInvalid,
                    Severity::Warning,
                    &policy_id,
                    ctx,
                    json!({"nonce": request.nonce}),
                )
                .await;
                return ExecutionResponse::rejected(
                    ErrorCode::NonceInvalid,
                    "nonce is not a well-formed UUIDv4",
                );
            }
            Ok(Err(ClaimRejection::AlreadyUsed)) => {
                self.record_rejection(
                    EventKind::NonceReused,
                    Severity::Warning,
                    &policy_id,
                    ctx,
                    json!({"nonce": request.nonce}),
                )
                .await;
                return ExecutionResponse::rejected(
                    ErrorCode::NonceReused,
                    "nonce has already been used",
                );
            }
            Err(error) => {
                warn!(%error, "nonce claim failed at the storage layer");
                return ExecutionResponse::rejected(
                    ErrorCode::ExecutionFailed,
                    "replay protection is unavailable",
                );
            }
        }

        let resolved = match self.versions.resolve_executable(&policy_id, request.version).await {
            Ok(resolved) => resolved,
            Err(error) => return self.reject_resolution(error, &policy_id, ctx).await,
        };

        // Zero-trust hash check: the caller's claim is compared against
        // the stored hash of the version we actually resolved.
        if claimed_hash != resolved.version.content_hash {
            self.record_rejection(
                EventKind::HashMismatch,
                Severity::Error,
                &policy_id,
                ctx,
                json!({
                    "claimed": claimed_hash.as_str(),
                    "expected": resolved.version.content_hash.as_str(),
                    "version": resolved.version.version,
                }),
            )
            .await;
            let mut response = ExecutionResponse::rejected(
                ErrorCode::HashMismatch,
                "claimed hash does not match the resolved version",
            );
            response.expected_version = Some(resolved.version.version);
            response.expected_hash = Some(resolved.version.content_hash.as_str().to_string());
            return response;
        }

        if resolved.is_deprecated {
            self.record_rejection(
                EventKind::DeprecatedVersionExecuted,
                Severity::Warning,
                &policy_id,
                ctx,
                json!({"version": resolved.version.version}),
            )
            .await;
        }

        self.dispatch(&resolved, request, ctx, &policy_id, started).await
    }

    async fn dispatch(
        &self,
        resolved: &ResolvedVersion,
        request: &ExecutionRequest,
        ctx: &RequestContext,
        policy_id: &PolicyId,
        started: Instant,
    ) -> ExecutionResponse {
        let source = &resolved.version.source;
        let engine_kind = classify(source);

        let (outcome, lenient) = match engine_kind {
            EngineKind::Simple => {
                let set = parse_rules(source);
                if set.is_unusable() {
                    // Unparseable non-empty source fails closed; this is
                    // a completed (and audited) execution rather than a
                    // security rejection.
                    let detail = set
                        .unparsed
                        .first()
                        .map(|u| format!("line {}: {}", u.line, u.error))
                        .unwrap_or_default();
                    return self
                        .completed_failure(
                            resolved,
                            ctx,
                            policy_id,
                            started,
                            format!("no rule in source could be parsed ({detail})"),
                        )
                        .await;
                }
                let outcome = evaluate(&set, &request.input);
                let allowed = outcome.allowed;
                let result = json!({
                    "allowed": allowed,
                    "matched": outcome.matched,
                    "denialReasons": outcome.denial_reasons,
                    "evaluated": outcome.evaluated,
                });
                (Ok((result, allowed)), false)
            }
            EngineKind::Structured => {
                let locale = detect_locale(source);
                match self.engine.evaluate(source, &request.input, locale).await {
                    Ok(evaluation) => {
                        let approved = evaluation.verdict.approved();
                        let lenient = evaluation.verdict.is_lenient();
                        let result = json!({
                            "allowed": approved,
                            "verdict": evaluation.verdict,
                            "engineResult": evaluation.raw,
                            "engineTimeMs": evaluation.execution_time_ms,
                        });
                        (Ok((result, approved)), lenient)
                    }
                    Err(EngineError::Timeout(duration)) => (
                        Err(format!("engine call timed out after {}ms", duration.as_millis())),
                        false,
                    ),
                    Err(error) => (Err(error.to_string()), false),
                }
            }
        };

        match outcome {
            Ok((result, allowed)) => {
                if lenient {
                    self.record_rejection(
                        EventKind::LenientVerdict,
                        Severity::Warning,
                        policy_id,
                        ctx,
                        json!({"version": resolved.version.version}),
                    )
                    .await;
                }

                let execution_time_ms = started.elapsed().as_millis() as u64;
                info!(
                    policy_id = %policy_id.0,
                    version = resolved.version.version,
                    allowed,
                    execution_time_ms,
                    "policy executed"
                );
                self.audit
                    .record(
                        SecurityEvent::new(EventKind::PolicyExecuted, Severity::Info)
                            .with_policy(policy_id.clone())
                            .with_request(
                                ctx.request_id.clone(),
                                ctx.ip_address.clone(),
                                ctx.user_agent.clone(),
                            )
                            .with_details(json!({
                                "version": resolved.version.version,
                                "allowed": allowed,
                                "engine": engine_kind,
                                "deprecated": resolved.is_deprecated,
                                "lenientVerdict": lenient,
                                "executionTimeMs": execution_time_ms,
                            })),
                    )
                    .await;

                ExecutionResponse {
                    success: true,
                    result: Some(result),
                    error: None,
                    error_code: None,
                    execution_time_ms: Some(execution_time_ms),
                    version: Some(resolved.version.version),
                    source_hash: Some(resolved.version.content_hash.as_str().to_string()),
                    is_deprecated: resolved.is_deprecated.then_some(true),
                    expected_version: None,
                    expected_hash: None,
                }
            }
            Err(error) => self.completed_failure(resolved, ctx, policy_id, started, error).await,
        }
    }

    /// Engine-level failure: a completed, audited execution, distinct
    /// from a security rejection.
    async fn completed_failure(
        &self,
        resolved: &ResolvedVersion,
        ctx: &RequestContext,
        policy_id: &PolicyId,
        started: Instant,
        error: String,
    ) -> ExecutionResponse {
        let execution_time_ms = started.elapsed().as_millis() as u64;
        self.audit
            .record(
                SecurityEvent::new(EventKind::PolicyExecuted, Severity::Error)
                    .with_policy(policy_id.clone())
                    .with_request(
                        ctx.request_id.clone(),
                        ctx.ip_address.clone(),
                        ctx.user_agent.clone(),
                    )
                    .with_details(json!({
                        "version": resolved.version.version,
                        "error": error,
                        "executionTimeMs": execution_time_ms,
                    })),
            )
            .await;

        let mut response = ExecutionResponse::rejected(ErrorCode::ExecutionFailed, error);
        response.execution_time_ms = Some(execution_time_ms);
        response.version = Some(resolved.version.version);
        response
    }

    async fn reject_resolution(
        &self,
        error: VersioningError,
        policy_id: &PolicyId,
        ctx: &RequestContext,
    ) -> ExecutionResponse {
        let (kind, code) = match &error {
            VersioningError::VersionNotFound(_, _) => {
                (EventKind::PolicyNotFound, ErrorCode::PolicyNotFound)
            }
            VersioningError::NoApprovedVersion(_) => {
                (EventKind::NoApprovedVersion, ErrorCode::NoApprovedVersion)
            }
            VersioningError::NotExecutable { .. } => {
                (EventKind::VersionNotExecutable, ErrorCode::VersionNotExecutable)
            }
            _ => {
                warn!(%error, "version resolution failed");
                return ExecutionResponse::rejected(
                    ErrorCode::ExecutionFailed,
                    "version resolution failed",
                );
            }
        };

        self.record_rejection(
            kind,
            Severity::Warning,
            policy_id,
            ctx,
            json!({"error": error.to_string()}),
        )
        .await;
        ExecutionResponse::rejected(code, error.to_string())
    }

    async fn record_rejection(
        &self,
        kind: EventKind,
        severity: Severity,
        policy_id: &PolicyId,
        ctx: &RequestContext,
        details: serde_json::Value,
    ) {
        let mut event = SecurityEvent::new(kind, severity)
            .with_policy(policy_id.clone())
            .with_request(ctx.request_id.clone(), ctx.ip_address.clone(), ctx.user_agent.clone())
            .with_details(details);
        if let Some(user_id) = &ctx.user_id {
            event = event.with_user(user_id.clone());
        }
        self.audit.record(event).await;
    }
}
