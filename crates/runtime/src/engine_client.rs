use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use rulegate_core::router::Locale;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine request failed: {0}")]
    Http(String),
    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine reported an error: {0}")]
    Engine(String),
    #[error("could not decode engine response: {0}")]
    Decode(String),
}

/// Interpreted engine verdict. Anything the verdict parser cannot
/// positively classify is `Unknown` and denies.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineVerdict {
    /// Structured `{approved: bool, reason?}` result.
    Explicit { approved: bool, reason: Option<String> },
    /// Free-text result matched by keyword. Only produced when lenient
    /// verdicts are enabled, for older engine deployments.
    FreeText { approved: bool, matched_keyword: String },
    Unknown,
}

impl EngineVerdict {
    pub fn approved(&self) -> bool {
        match self {
            Self::Explicit { approved, .. } | Self::FreeText { approved, .. } => *approved,
            Self::Unknown => false,
        }
    }

    pub fn is_lenient(&self) -> bool {
        matches!(self, Self::FreeText { .. })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineEvaluation {
    pub verdict: EngineVerdict,
    pub raw: Value,
    pub execution_time_ms: u64,
}

#[async_trait]
pub trait RuleEngineClient: Send + Sync {
    async fn evaluate(
        &self,
        source: &str,
        input: &Value,
        locale: Locale,
    ) -> Result<EngineEvaluation, EngineError>;
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    source: &'a str,
    input: &'a Value,
    locale: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    result: Option<Value>,
    error: Option<String>,
    #[serde(default)]
    execution_time_ms: u64,
}

/// Remote structured-language engine over HTTP.
pub struct HttpRuleEngineClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    lenient_verdicts: bool,
}

impl HttpRuleEngineClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        lenient_verdicts: bool,
    ) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            lenient_verdicts,
        })
    }
}

#[async_trait]
impl RuleEngineClient for HttpRuleEngineClient {
    async fn evaluate(
        &self,
        source: &str,
        input: &Value,
        locale: Locale,
    ) -> Result<EngineEvaluation, EngineError> {
        let url = format!("{}/evaluate", self.base_url);
        debug!(%url, locale = locale.as_str(), "dispatching to remote rule engine");

        let request = self
            .http
            .post(&url)
            .json(&EvaluateRequest { source, input, locale: locale.as_str() });

        // The outer timeout also covers connection setup; a lapsed
        // deadline is a distinct outcome from an engine-reported error.
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(self.timeout)
                } else {
                    EngineError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Http(format!("engine returned {status}: {body}")));
        }

        let body: EvaluateResponse =
            response.json().await.map_err(|e| EngineError::Decode(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(EngineError::Engine(error));
        }

        let raw = body.result.unwrap_or(Value::Null);
        Ok(EngineEvaluation {
            verdict: parse_verdict(&raw, self.lenient_verdicts),
            raw,
            execution_time_ms: body.execution_time_ms,
        })
    }
}

const APPROVE_KEYWORDS: &[&str] = &["approved", "allowed", "permitted", "granted", "pass"];
const DENY_KEYWORDS: &[&str] = &["denied", "rejected", "blocked", "forbidden", "fail"];

/// Fail-closed verdict interpretation. A structured `approved` boolean
/// is authoritative; free-text keyword matching applies only when
/// lenient verdicts are enabled; everything else denies.
pub fn parse_verdict(raw: &Value, lenient: bool) -> EngineVerdict {
    if let Some(approved) = raw.get("approved").and_then(Value::as_bool) {
        let reason = raw.get("reason").and_then(Value::as_str).map(str::to_string);
        return EngineVerdict::Explicit { approved, reason };
    }

    if lenient {
        if let Some(text) = raw.as_str() {
            let lower = text.to_lowercase();
            // Deny keywords take precedence over approve keywords.
            for keyword in DENY_KEYWORDS {
                if lower.contains(keyword) {
                    return EngineVerdict::FreeText {
                        approved: false,
                        matched_keyword: keyword.to_string(),
                    };
                }
            }
            for keyword in APPROVE_KEYWORDS {
                if lower.contains(keyword) {
                    return EngineVerdict::FreeText {
                        approved: true,
                        matched_keyword: keyword.to_string(),
                    };
                }
            }
        }
    }

    EngineVerdict::Unknown
}
