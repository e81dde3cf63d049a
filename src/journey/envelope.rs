use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::risk::{Address, Decision, RiskSummary, TransactionItem};

pub const SID_COOKIE: &str = "sid";
pub const ACCESS_COOKIE: &str = "access";
/// Correlation cookie lifetime: one week.
pub const SID_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 7;
/// Access cookie lifetime, independent of the token's own expiry.
pub const ACCESS_MAX_AGE_SECS: i64 = 3600;

pub const MSG_CREDENTIALS_REQUIRED: &str = "Email, password and hcaptchaToken are required.";
pub const MSG_INVALID_CREDENTIALS: &str = "Invalid username or password.";
pub const MSG_USER_EXISTS: &str = "User already exists.";
pub const MSG_UNAUTHORIZED: &str = "Unauthorized";
pub const MSG_RISK_FAILED: &str = "Risk verification failed.";
pub const MSG_INVALID_CURRENT_PASSWORD: &str = "Invalid current password.";
pub const MSG_RESET_FIELDS_REQUIRED: &str = "Current password, new password and hcaptchaToken are required.";
pub const MSG_ITEM_REQUIRED: &str = "itemId is required.";
pub const MSG_TOKEN_REQUIRED: &str = "hcaptchaToken is required.";
pub const MSG_INVALID_BODY: &str = "Invalid request body.";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignupRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
    pub hcaptcha_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub hcaptcha_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionEndRequest {
    pub hcaptcha_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CartAddRequest {
    pub item_id: Option<String>,
    pub quantity: Option<i64>,
    pub unit_price: Option<f64>,
    pub hcaptcha_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordResetRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
    pub hcaptcha_token: Option<String>,
}

/// Addresses and items keep the provider's snake_case field names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckoutRequest {
    pub hcaptcha_token: Option<String>,
    pub value: Option<f64>,
    pub currency_code: Option<String>,
    /// Accepted but not forwarded: the transaction is always reported as `credit_card`.
    pub payment_method: Option<String>,
    pub payment_network: Option<String>,
    pub card_bin: Option<String>,
    pub card_last_four: Option<String>,
    pub shipping_value: Option<f64>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub items: Option<Vec<TransactionItem>>,
}

/// Uniform envelope returned by every action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

impl ActionResponse {
    pub fn success() -> Self { Self { ok: true, ..Default::default() } }
    pub fn failure(message: impl Into<String>) -> Self { Self { ok: false, message: Some(message.into()), ..Default::default() } }
    pub fn with_risk(mut self, d: &Decision) -> Self { self.risk = Some(RiskSummary::from(d)); self }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieDirective {
    Set { name: String, value: String, max_age: i64 },
    Clear { name: String },
}

impl CookieDirective {
    pub fn set(name: &str, value: impl Into<String>, max_age: i64) -> Self {
        CookieDirective::Set { name: name.to_string(), value: value.into(), max_age }
    }
    pub fn clear(name: &str) -> Self { CookieDirective::Clear { name: name.to_string() } }
    pub fn name(&self) -> &str {
        match self {
            CookieDirective::Set { name, .. } | CookieDirective::Clear { name } => name,
        }
    }
}

/// What an action produced: HTTP-ish status, the envelope and the cookie changes to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub status: u16,
    pub response: ActionResponse,
    pub cookies: Vec<CookieDirective>,
}

impl ActionOutcome {
    pub fn ok(response: ActionResponse) -> Self { Self { status: 200, response, cookies: Vec::new() } }

    /// The provider answered coherently and said no.
    pub fn risk_failed(d: &Decision) -> Self {
        let mut outcome = Self::from(AppError::risk_decision("risk_verification_failed", MSG_RISK_FAILED));
        outcome.response = outcome.response.with_risk(d);
        outcome
    }

    pub fn with_cookie(mut self, c: CookieDirective) -> Self { self.cookies.push(c); self }

    pub fn is_ok(&self) -> bool { self.response.ok }

    pub fn cookie(&self, name: &str) -> Option<&CookieDirective> { self.cookies.iter().find(|c| c.name() == name) }
}

impl From<AppError> for ActionOutcome {
    fn from(err: AppError) -> Self {
        Self { status: err.http_status(), response: ActionResponse::failure(err.message()), cookies: Vec::new() }
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
