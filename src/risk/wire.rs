//! Request and response shapes exchanged with the risk provider.
//!
//! Outbound: a form-encoded POST whose optional `event_data` field is a JSON document with every
//! absent field omitted. Inbound: the siteverify JSON document, kept partially typed; the free-form
//! `risk_insights` branch stays a plain `serde_json::Value`.

use serde::{Deserialize, Serialize};

use super::behavior::BehaviorType;

/// One evaluation call: the proof token, the identity hints known so far and the behavior label.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluateRequest {
    pub token: String,
    pub behavior: BehaviorType,
    pub behavior_success: Option<bool>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub user_email: Option<String>,
    pub event_data: Option<EventData>,
    /// Second, identity-bound check of a token that was already evaluated once.
    pub post_verify: bool,
}

fn non_blank(v: Option<&str>) -> Option<String> {
    v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl EvaluateRequest {
    pub fn new(token: impl Into<String>, behavior: BehaviorType) -> Self {
        Self {
            token: token.into(),
            behavior,
            behavior_success: None,
            user_id: None,
            session_id: None,
            user_email: None,
            event_data: None,
            post_verify: false,
        }
    }

    pub fn session(mut self, sid: Option<&str>) -> Self { self.session_id = non_blank(sid); self }
    pub fn user(mut self, user_id: Option<&str>) -> Self { self.user_id = non_blank(user_id); self }
    pub fn email(mut self, email: Option<&str>) -> Self { self.user_email = non_blank(email); self }
    pub fn success(mut self, ok: bool) -> Self { self.behavior_success = Some(ok); self }
    pub fn event_data(mut self, data: EventData) -> Self { self.event_data = Some(data); self }
    pub fn post_verify(mut self) -> Self { self.post_verify = true; self }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Filled with the request's behavior label when left empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub behavior_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_data: Option<TransactionData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_person: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_bin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_last_four: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<TransactionUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<TransactionItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_result: Option<GatewayResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_created_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_verified: Option<bool>,
}

impl TransactionUser {
    /// Account id plus email and the domain part after the last `@`.
    pub fn for_account(account_id: &str, email: Option<&str>) -> Self {
        let email = non_blank(email).map(|e| e.to_lowercase());
        let email_domain = email.as_deref().and_then(|e| e.rsplit_once('@')).map(|(_, d)| d.to_string()).filter(|d| !d.is_empty());
        Self { account_id: Some(account_id.to_string()), email, email_domain, ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_response_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avs_response_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvv_response_code: Option<String>,
    #[serde(rename = "3dsecure_passed", default, skip_serializing_if = "Option::is_none")]
    pub three_d_secure_passed: Option<bool>,
}

/// Siteverify document. Every field but `success` may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "error-codes", default, skip_serializing_if = "Option::is_none")]
    pub error_codes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_reason: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud_predictions: Option<FraudPredictions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(rename = "similarity-indicators", default, skip_serializing_if = "Option::is_none")]
    pub similarity_indicators: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_insights: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FraudPredictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud_score_reason: Option<Vec<String>>,
}

/// Parsed document plus the transport facts it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub body: VerifyResponse,
    pub raw: String,
    pub http_status: u16,
}
