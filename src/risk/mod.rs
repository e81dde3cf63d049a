//!
//! journeyguard risk module
//! ------------------------
//! Talks to the behavioral risk provider and turns its answer into a typed `Decision`.
//!
//! - `behavior`: closed vocabulary of behavior labels with an exhaustive wire mapping.
//! - `wire`: outbound request / `event_data` payload and the inbound verify document.
//! - `client`: `RiskEvaluator` seam and the reqwest-backed `HttpRiskClient`.
//! - `decision`: the pure analyzer, score thresholds and the client-facing `RiskSummary`.

mod behavior;
mod client;
mod decision;
mod wire;

pub use behavior::BehaviorType;
pub use client::{parse_response, EvaluateError, HttpRiskClient, RiskEvaluator};
pub use decision::{
    analyze, extract_correlation_key, Decision, RiskSummary, BOT_RISK_THRESHOLD, FRAUD_THRESHOLD,
    TAKEOVER_SIMILARITY_THRESHOLD,
};
pub use wire::{
    Address, EvaluateRequest, EventData, FraudPredictions, GatewayResult, RawResponse, TransactionData, TransactionItem,
    TransactionUser, VerifyResponse,
};
