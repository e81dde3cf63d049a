//!
//! journeyguard journey module
//! ---------------------------
//! The behavior orchestrator: one async method per user action, each composing the identity
//! store, the credential vault, the token issuer and the risk evaluator. Actions are transport
//! agnostic; they take a `RequestContext` plus a JSON request and return an `ActionOutcome`
//! (status, envelope, cookie directives) that the HTTP layer renders.
//!
//! Gating summary:
//! - session start: no evaluation.
//! - signup: PRE before any write, POST after the user exists (no rollback on POST failure).
//! - login: credentials checked locally first, then one evaluation before the token is issued.
//! - cart add / checkout: authenticated, one evaluation carrying a transaction payload.
//! - password reset: authenticated, current password checked, evaluation before the update.
//! - session end: best-effort evaluation that never blocks the logout.

mod envelope;
mod orchestrator;

pub use envelope::*;
pub use orchestrator::{BehaviorOrchestrator, MAX_CHECKOUT_ITEMS};
