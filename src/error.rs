//! Unified application error model and mapping helpers.
//! Every layer below the orchestrator converts its own failures into `AppError` so the
//! HTTP envelope and the status code are decided in one place.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::{debug, warn};

use crate::risk::EvaluateError;
use crate::storage::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Missing or malformed required input; rejected before any collaborator call.
    Validation { code: String, message: String },
    /// Absent or invalid identity token. Never carries the reason the token failed.
    Auth { code: String, message: String },
    NotFound { code: String, message: String },
    /// Duplicate email at signup or a stale concurrency tag on update.
    Conflict { code: String, message: String },
    /// Provider unreachable or answered with something that is not a verify document.
    ExternalProvider { code: String, message: String },
    /// Provider answered coherently but the decision did not pass.
    RiskDecision { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Validation { code, .. }
            | AppError::Auth { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::ExternalProvider { code, .. }
            | AppError::RiskDecision { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message, .. }
            | AppError::Auth { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::ExternalProvider { message, .. }
            | AppError::RiskDecision { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn provider<S: Into<String>>(code: S, msg: S) -> Self { AppError::ExternalProvider { code: code.into(), message: msg.into() } }
    pub fn risk_decision<S: Into<String>>(code: S, msg: S) -> Self { AppError::RiskDecision { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::Auth { .. } => 401,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::ExternalProvider { .. } => 502,
            AppError::RiskDecision { .. } => 403,
            AppError::Internal { .. } => 500,
        }
    }

    /// True for failures where the provider never produced a usable decision.
    pub fn is_provider_failure(&self) -> bool { matches!(self, AppError::ExternalProvider { .. }) }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        warn!(target: "error", "internal failure: {:#}", err);
        AppError::internal("internal_error", "Internal error.")
    }
}

/// Store failures reach clients as generic messages; the detail only goes to the log.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        debug!(target: "error", "store failure: {}", err);
        match &err {
            StoreError::NotFound { .. } => AppError::not_found("not_found", "Not found."),
            StoreError::AlreadyExists { .. } => AppError::conflict("already_exists", "Already exists."),
            StoreError::Conflict { .. } => AppError::conflict("concurrency_conflict", "Concurrent update, please retry."),
            StoreError::InvalidArgument(msg) => AppError::validation("invalid_argument".to_string(), msg.clone()),
            StoreError::TableNotFound(_) | StoreError::Serialization(_) | StoreError::Io(_) => {
                warn!(target: "error", "storage failure: {}", err);
                AppError::internal("store_error", "Internal error.")
            }
        }
    }
}

impl From<EvaluateError> for AppError {
    fn from(err: EvaluateError) -> Self {
        debug!(target: "error", "risk evaluation failure: {}", err);
        match &err {
            EvaluateError::MissingToken => AppError::validation("missing_proof_token", "hcaptchaToken is required."),
            EvaluateError::Encoding(_) => AppError::internal("risk_request_encoding", "Internal error."),
            EvaluateError::Transport(_) => AppError::provider("provider_unreachable", "Risk provider unavailable."),
            EvaluateError::Malformed { .. } => AppError::provider("provider_malformed", "Risk provider unavailable."),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
