use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::wire::VerifyResponse;

/// `risk_score` at or above this flags automation.
pub const BOT_RISK_THRESHOLD: f64 = 0.80;
pub const FRAUD_THRESHOLD: f64 = 0.80;
/// Similarity in `[0, 0.70)` suggests the account is driven by someone else. Negative means not computed.
pub const TAKEOVER_SIMILARITY_THRESHOLD: f64 = 0.70;

/// Normalized reading of one provider response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub passed: bool,
    pub risk_score: Option<f64>,
    pub fraud_score: Option<f64>,
    pub similarity: Option<f64>,
    pub similarity_indicators: Vec<String>,
    pub error_codes: Vec<String>,
    pub event_key: Option<String>,
}

impl Decision {
    pub fn bot_detected(&self) -> bool { self.risk_score.is_some_and(|r| r >= BOT_RISK_THRESHOLD) }
    pub fn fraud_detected(&self) -> bool { self.fraud_score.is_some_and(|f| f >= FRAUD_THRESHOLD) }
    pub fn account_takeover_suspected(&self) -> bool {
        self.similarity.is_some_and(|s| (0.0..TAKEOVER_SIMILARITY_THRESHOLD).contains(&s))
    }
    /// No flag raised. Independent of `passed`.
    pub fn approved(&self) -> bool { !self.bot_detected() && !self.fraud_detected() && !self.account_takeover_suspected() }

    /// One-line summary for logs, e.g. `siteverify=PASS | risk=0.12 | similarity=0.90`.
    pub fn explain(&self) -> String {
        let mut parts = vec![if self.passed { "siteverify=PASS".to_string() } else { "siteverify=FAIL".to_string() }];
        if let Some(r) = self.risk_score.filter(|r| *r >= 0.0) { parts.push(format!("risk={:.2}", r)); }
        if let Some(f) = self.fraud_score { parts.push(format!("fraud={:.2}", f)); }
        if let Some(s) = self.similarity.filter(|s| *s >= 0.0) { parts.push(format!("similarity={:.2}", s)); }
        if let Some(k) = self.event_key.as_deref().filter(|k| !k.trim().is_empty()) { parts.push(format!("ekey={}", k)); }
        if !self.similarity_indicators.is_empty() { parts.push(format!("indicators=[{}]", self.similarity_indicators.join(","))); }
        if !self.error_codes.is_empty() { parts.push(format!("errors=[{}]", self.error_codes.join(","))); }
        parts.join(" | ")
    }
}

/// Total mapping from a verify document to a `Decision`; `passed` is exactly `success`.
pub fn analyze(raw: &VerifyResponse) -> Decision {
    Decision {
        passed: raw.success,
        risk_score: raw.score,
        fraud_score: raw.fraud_predictions.as_ref().and_then(|f| f.fraud_score),
        similarity: raw.similarity,
        similarity_indicators: raw.similarity_indicators.clone().unwrap_or_default(),
        error_codes: raw.error_codes.clone().unwrap_or_default(),
        event_key: extract_correlation_key(raw.risk_insights.as_ref()),
    }
}

/// `risk_insights.session_details.ekey` when every step has the expected shape.
pub fn extract_correlation_key(insights: Option<&Value>) -> Option<String> {
    insights?
        .as_object()?
        .get("session_details")?
        .as_object()?
        .get("ekey")?
        .as_str()
        .map(str::to_string)
}

/// Client-facing projection of a `Decision`. The raw provider document never leaves the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub success: bool,
    pub approved: bool,
    pub bot_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    pub fraud_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_score: Option<f64>,
    pub account_takeover_suspected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    pub similarity_indicators: Vec<String>,
    pub error_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_key: Option<String>,
}

impl From<&Decision> for RiskSummary {
    fn from(d: &Decision) -> Self {
        Self {
            success: d.passed,
            approved: d.approved(),
            bot_detected: d.bot_detected(),
            risk_score: d.risk_score,
            fraud_detected: d.fraud_detected(),
            fraud_score: d.fraud_score,
            account_takeover_suspected: d.account_takeover_suspected(),
            similarity: d.similarity,
            similarity_indicators: d.similarity_indicators.clone(),
            error_codes: d.error_codes.clone(),
            event_key: d.event_key.clone(),
        }
    }
}

#[cfg(test)]
#[path = "decision_tests.rs"]
mod tests;
