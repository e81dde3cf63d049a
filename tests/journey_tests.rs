//! Orchestrator integration tests: every action driven end to end against the in-memory table
//! engine, a light Argon2 vault and a scripted risk evaluator that records each request.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use journeyguard::identity::{HmacTokenIssuer, RequestContext, TokenIssuer, TokenSettings};
use journeyguard::journey::*;
use journeyguard::risk::{BehaviorType, EvaluateError, EvaluateRequest, RawResponse, RiskEvaluator, TransactionItem};
use journeyguard::security::{Argon2Vault, CredentialVault};
use journeyguard::storage::{IdentityStore, MemoryTables};

/// Answers from a queue (defaulting to `success: true`) and keeps every request it saw.
#[derive(Default)]
struct ScriptedEvaluator {
    script: Mutex<VecDeque<Result<RawResponse, EvaluateError>>>,
    seen: Mutex<Vec<(EvaluateRequest, Option<String>)>>,
}

impl ScriptedEvaluator {
    fn push(&self, r: Result<RawResponse, EvaluateError>) { self.script.lock().push_back(r); }
    fn calls(&self) -> Vec<EvaluateRequest> { self.seen.lock().iter().map(|(r, _)| r.clone()).collect() }
    fn count(&self) -> usize { self.seen.lock().len() }
}

#[async_trait]
impl RiskEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, req: &EvaluateRequest, remote_ip: Option<&str>) -> Result<RawResponse, EvaluateError> {
        if req.token.trim().is_empty() { return Err(EvaluateError::MissingToken); }
        self.seen.lock().push((req.clone(), remote_ip.map(str::to_string)));
        self.script.lock().pop_front().unwrap_or_else(pass)
    }
}

fn reply(v: Value) -> Result<RawResponse, EvaluateError> {
    Ok(RawResponse { body: serde_json::from_value(v.clone()).unwrap(), raw: v.to_string(), http_status: 200 })
}
fn pass() -> Result<RawResponse, EvaluateError> { reply(json!({"success": true, "score": 0.1})) }
fn reject() -> Result<RawResponse, EvaluateError> { reply(json!({"success": false, "error-codes": ["invalid-input-response"], "score": 0.95})) }

struct Harness {
    journey: BehaviorOrchestrator,
    store: Arc<IdentityStore>,
    risk: Arc<ScriptedEvaluator>,
    tokens: Arc<HmacTokenIssuer>,
    vault: Arc<Argon2Vault>,
}

fn harness() -> Harness {
    let store = Arc::new(IdentityStore::new(Arc::new(MemoryTables::new())));
    store.ensure_schema().unwrap();
    let risk = Arc::new(ScriptedEvaluator::default());
    let tokens = Arc::new(HmacTokenIssuer::new(TokenSettings {
        secret: "test-secret".into(),
        issuer: "journeyguard".into(),
        audience: "journeyguard".into(),
        validity: chrono::Duration::minutes(60),
    }));
    let vault = Arc::new(Argon2Vault::with_cost(1024, 1, 1).unwrap());
    let journey = BehaviorOrchestrator::new(store.clone(), vault.clone(), tokens.clone(), risk.clone());
    Harness { journey, store, risk, tokens, vault }
}

fn cookie_value(o: &ActionOutcome, name: &str) -> Option<String> {
    match o.cookie(name) {
        Some(CookieDirective::Set { value, .. }) => Some(value.clone()),
        _ => None,
    }
}

fn signup_req(email: &str, password: &str) -> SignupRequest {
    SignupRequest { email: Some(email.into()), password: Some(password.into()), full_name: Some("Ada Lovelace".into()), hcaptcha_token: Some("tok1".into()) }
}

/// Start a session and sign up; returns the context carrying sid + access token.
async fn signed_up(h: &Harness, email: &str, password: &str) -> RequestContext {
    let start = h.journey.start_session(&RequestContext::anonymous()).await;
    let sid = cookie_value(&start, SID_COOKIE).unwrap();
    let ctx = RequestContext::anonymous().with_sid(sid).with_remote_ip("203.0.113.9");
    let out = h.journey.signup(&ctx, signup_req(email, password)).await;
    assert!(out.is_ok(), "signup failed: {:?}", out.response.message);
    ctx.with_access_token(cookie_value(&out, ACCESS_COOKIE).unwrap())
}

#[tokio::test]
async fn session_start_issues_sid_and_reuses_existing() {
    let h = harness();
    let out = h.journey.start_session(&RequestContext::anonymous()).await;
    assert_eq!(out.status, 200);
    let sid = cookie_value(&out, SID_COOKIE).unwrap();
    assert!(matches!(out.cookie(SID_COOKIE), Some(CookieDirective::Set { max_age, .. }) if *max_age == SID_MAX_AGE_SECS));
    assert!(h.store.find_session(&sid).unwrap().is_some());

    let again = h.journey.start_session(&RequestContext::anonymous().with_sid(sid.clone())).await;
    assert_eq!(cookie_value(&again, SID_COOKIE).as_deref(), Some(sid.as_str()));
    assert_eq!(h.risk.count(), 0);
}

#[tokio::test]
async fn signup_runs_pre_then_post_and_binds_session() {
    let h = harness();
    let start = h.journey.start_session(&RequestContext::anonymous()).await;
    let sid = cookie_value(&start, SID_COOKIE).unwrap();
    let ctx = RequestContext::anonymous().with_sid(sid.clone()).with_remote_ip("203.0.113.9");

    let out = h.journey.signup(&ctx, signup_req("A@Example.com", "p1")).await;
    assert_eq!(out.status, 200);
    assert!(out.response.ok);
    let user_id = out.response.user_id.clone().unwrap();
    assert!(user_id.starts_with("ADALOVELACE_"));
    assert_eq!(out.response.email.as_deref(), Some("a@example.com"));
    assert!(out.response.risk.as_ref().unwrap().success);
    let access = cookie_value(&out, ACCESS_COOKIE).unwrap();
    assert_eq!(h.tokens.validate(&access).unwrap().user_id, user_id);

    let found = h.store.find_user_by_email("a@example.com").unwrap().unwrap();
    assert_eq!(found.id, user_id);
    assert!(h.vault.verify("p1", &found.password_hash));

    let calls = h.risk.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].behavior, BehaviorType::Signup);
    assert!(!calls[0].post_verify);
    assert_eq!(calls[0].user_id, None);
    assert_eq!(calls[0].user_email.as_deref(), Some("a@example.com"));
    assert_eq!(calls[0].session_id.as_deref(), Some(sid.as_str()));
    assert!(calls[1].post_verify);
    assert_eq!(calls[1].user_id.as_deref(), Some(user_id.as_str()));
    assert_eq!(calls[1].token, "tok1");
    assert_eq!(h.risk.seen.lock()[0].1.as_deref(), Some("203.0.113.9"));

    assert_eq!(h.store.find_session(&sid).unwrap().unwrap().user_id.as_deref(), Some(user_id.as_str()));
    let mut events: Vec<String> = h.store.session_events(&sid).unwrap().into_iter().map(|e| e.event_type).collect();
    events.sort();
    assert_eq!(events, vec!["session_start", "signup"]);
}

#[tokio::test]
async fn signup_requires_all_fields_before_any_call() {
    let h = harness();
    let mut req = signup_req("a@example.com", "p1");
    req.hcaptcha_token = Some("   ".into());
    let out = h.journey.signup(&RequestContext::anonymous(), req).await;
    assert_eq!(out.status, 400);
    assert_eq!(out.response.message.as_deref(), Some(MSG_CREDENTIALS_REQUIRED));
    assert_eq!(h.risk.count(), 0);
}

#[tokio::test]
async fn signup_pre_failure_writes_nothing() {
    let h = harness();
    h.risk.push(reject());
    let out = h.journey.signup(&RequestContext::anonymous(), signup_req("b@example.com", "p1")).await;
    assert_eq!(out.status, 403);
    assert_eq!(out.response.message.as_deref(), Some(MSG_RISK_FAILED));
    let risk = out.response.risk.unwrap();
    assert!(!risk.success);
    assert!(risk.bot_detected);
    assert_eq!(risk.error_codes, vec!["invalid-input-response".to_string()]);
    assert!(out.cookies.is_empty());
    assert_eq!(h.risk.count(), 1);
    assert!(h.store.find_user_by_email("b@example.com").unwrap().is_none());
}

#[tokio::test]
async fn duplicate_signup_stops_after_pre_check() {
    let h = harness();
    signed_up(&h, "dup@example.com", "p1").await;
    assert_eq!(h.risk.count(), 2);
    let out = h.journey.signup(&RequestContext::anonymous(), signup_req("DUP@example.com", "p2")).await;
    assert_eq!(out.status, 409);
    assert_eq!(out.response.message.as_deref(), Some(MSG_USER_EXISTS));
    // PRE ran, POST did not.
    assert_eq!(h.risk.count(), 3);
}

#[tokio::test]
async fn signup_post_failure_keeps_the_user_but_issues_no_token() {
    let h = harness();
    let start = h.journey.start_session(&RequestContext::anonymous()).await;
    let sid = cookie_value(&start, SID_COOKIE).unwrap();
    let ctx = RequestContext::anonymous().with_sid(sid.clone());
    h.risk.push(pass());
    h.risk.push(reject());
    let out = h.journey.signup(&ctx, signup_req("c@example.com", "p1")).await;
    assert_eq!(out.status, 403);
    assert!(!out.response.ok);
    assert!(out.cookie(ACCESS_COOKIE).is_none());
    let user = h.store.find_user_by_email("c@example.com").unwrap().unwrap();
    assert!(h.store.find_session(&sid).unwrap().unwrap().user_id.is_none());
    let mut events: Vec<String> = h.store.user_events(&user.id).unwrap().into_iter().map(|e| e.event_type).collect();
    events.sort();
    assert_eq!(events, vec!["signup", "signup_post_verify_failed"]);
}

#[tokio::test]
async fn login_with_wrong_password_never_calls_provider() {
    let h = harness();
    signed_up(&h, "a@example.com", "p1").await;
    let before = h.risk.count();
    let req = LoginRequest { email: Some("a@example.com".into()), password: Some("wrong".into()), hcaptcha_token: Some("tok".into()) };
    let out = h.journey.login(&RequestContext::anonymous(), req).await;
    assert!(!out.response.ok);
    assert_eq!(out.status, 401);
    assert_eq!(out.response.message.as_deref(), Some(MSG_INVALID_CREDENTIALS));
    assert_eq!(h.risk.count(), before);

    let unknown = LoginRequest { email: Some("ghost@example.com".into()), password: Some("p1".into()), hcaptcha_token: Some("tok".into()) };
    let out = h.journey.login(&RequestContext::anonymous(), unknown).await;
    assert_eq!(out.response.message.as_deref(), Some(MSG_INVALID_CREDENTIALS));
    assert_eq!(h.risk.count(), before);
}

#[tokio::test]
async fn login_success_issues_token_and_binds_session() {
    let h = harness();
    signed_up(&h, "a@example.com", "p1").await;
    let start = h.journey.start_session(&RequestContext::anonymous()).await;
    let sid = cookie_value(&start, SID_COOKIE).unwrap();
    let ctx = RequestContext::anonymous().with_sid(sid.clone());
    let req = LoginRequest { email: Some(" A@EXAMPLE.COM ".into()), password: Some("p1".into()), hcaptcha_token: Some("tok".into()) };
    let out = h.journey.login(&ctx, req).await;
    assert!(out.is_ok());
    let user_id = out.response.user_id.clone().unwrap();
    assert_eq!(out.response.full_name.as_deref(), Some("Ada Lovelace"));
    assert!(matches!(out.cookie(ACCESS_COOKIE), Some(CookieDirective::Set { max_age, .. }) if *max_age == ACCESS_MAX_AGE_SECS));
    let last = h.risk.calls().pop().unwrap();
    assert_eq!(last.behavior, BehaviorType::Login);
    assert_eq!(last.behavior_success, Some(true));
    assert_eq!(last.user_id.as_deref(), Some(user_id.as_str()));
    assert_eq!(h.store.find_session(&sid).unwrap().unwrap().user_id.as_deref(), Some(user_id.as_str()));
}

#[tokio::test]
async fn login_blocked_by_decision_or_unreadable_provider() {
    let h = harness();
    signed_up(&h, "a@example.com", "p1").await;
    let req = || LoginRequest { email: Some("a@example.com".into()), password: Some("p1".into()), hcaptcha_token: Some("tok".into()) };

    h.risk.push(reject());
    let out = h.journey.login(&RequestContext::anonymous(), req()).await;
    assert_eq!(out.status, 403);
    assert!(out.cookies.is_empty());

    h.risk.push(Err(EvaluateError::Malformed { status: 500, detail: "eof".into() }));
    let out = h.journey.login(&RequestContext::anonymous(), req()).await;
    assert_eq!(out.status, 502);
    assert_eq!(out.response.message.as_deref(), Some("Risk provider unavailable."));
    assert!(out.response.risk.is_none());
    assert!(out.cookies.is_empty());
}

#[tokio::test]
async fn logout_ends_session_even_when_evaluation_fails() {
    let h = harness();
    let ctx = signed_up(&h, "a@example.com", "p1").await;
    let sid = ctx.sid.clone().unwrap();

    h.risk.push(reject());
    let out = h.journey.end_session(&ctx, SessionEndRequest { hcaptcha_token: Some("tok".into()) }).await;
    assert_eq!(out.status, 200);
    assert!(out.response.ok);
    assert_eq!(out.cookie(SID_COOKIE), Some(&CookieDirective::clear(SID_COOKIE)));
    assert_eq!(out.cookie(ACCESS_COOKIE), Some(&CookieDirective::clear(ACCESS_COOKIE)));
    assert!(h.store.find_session(&sid).unwrap().unwrap().is_ended());
    let last = h.risk.calls().pop().unwrap();
    assert_eq!(last.behavior, BehaviorType::UserLogout);
    assert_eq!(last.behavior_success, Some(true));
    assert!(last.user_id.is_some());

    // Unreachable provider is just as harmless.
    h.journey.start_session(&ctx).await;
    h.risk.push(Err(EvaluateError::Transport("connection refused".into())));
    let out = h.journey.end_session(&ctx, SessionEndRequest { hcaptcha_token: Some("tok".into()) }).await;
    assert!(out.response.ok);
    assert!(h.store.find_session(&sid).unwrap().unwrap().is_ended());
}

#[tokio::test]
async fn logout_without_token_skips_evaluation() {
    let h = harness();
    let out = h.journey.end_session(&RequestContext::anonymous().with_sid("unknown-sid"), SessionEndRequest::default()).await;
    assert!(out.response.ok);
    assert_eq!(out.cookies.len(), 2);
    assert_eq!(h.risk.count(), 0);
}

#[tokio::test]
async fn cart_add_requires_identity_before_evaluation() {
    let h = harness();
    let req = CartAddRequest { item_id: Some("sku-1".into()), quantity: Some(1), unit_price: Some(5.0), hcaptcha_token: Some("tok".into()) };
    let out = h.journey.add_to_cart(&RequestContext::anonymous(), req.clone()).await;
    assert_eq!(out.status, 401);
    assert_eq!(out.response.message.as_deref(), Some(MSG_UNAUTHORIZED));
    let forged = RequestContext::anonymous().with_access_token("a.b.c");
    assert_eq!(h.journey.add_to_cart(&forged, req).await.status, 401);
    assert_eq!(h.risk.count(), 0);
}

#[tokio::test]
async fn cart_add_normalizes_and_sends_commerce_payload() {
    let h = harness();
    let ctx = signed_up(&h, "shopper@example.com", "p1").await;
    let sid = ctx.sid.clone().unwrap();

    let missing = CartAddRequest { item_id: Some(" ".into()), hcaptcha_token: Some("tok".into()), ..Default::default() };
    let out = h.journey.add_to_cart(&ctx, missing).await;
    assert_eq!(out.status, 400);
    assert_eq!(out.response.message.as_deref(), Some(MSG_ITEM_REQUIRED));

    let req = CartAddRequest { item_id: Some("sku-9".into()), quantity: Some(0), unit_price: Some(2.5), hcaptcha_token: Some("tok".into()) };
    let out = h.journey.add_to_cart(&ctx, req).await;
    assert!(out.is_ok());
    assert_eq!(out.response.item_id.as_deref(), Some("sku-9"));
    assert_eq!(out.response.quantity, Some(1));

    let call = h.risk.calls().pop().unwrap();
    assert_eq!(call.behavior, BehaviorType::AddToCart);
    let data = call.event_data.unwrap();
    assert_eq!(data.behavior_type, "add_to_cart");
    let tx = data.transaction_data.unwrap();
    assert_eq!(tx.value, Some(2.5));
    let user_id = call.user_id.unwrap();
    let txn = tx.transaction_id.unwrap();
    let prefix = format!("{}:{}:sku-9:", sid, user_id);
    assert!(txn.starts_with(&prefix), "{}", txn);
    assert_eq!(txn[prefix.len()..].len(), 17);
    let user = tx.user.unwrap();
    assert_eq!(user.email_domain.as_deref(), Some("example.com"));
    assert_eq!(user.account_id.as_deref(), Some(user_id.as_str()));
    let items = tx.items.unwrap();
    assert_eq!(items[0].quantity, Some(1));
    assert_eq!(items[0].value, Some(2.5));
}

#[tokio::test]
async fn password_reset_blocked_by_decision_keeps_old_digest() {
    let h = harness();
    let ctx = signed_up(&h, "r@example.com", "old-pass").await;
    let req = || PasswordResetRequest { current_password: Some("old-pass".into()), new_password: Some("new-pass".into()), hcaptcha_token: Some("tok".into()) };

    h.risk.push(reject());
    let out = h.journey.reset_password(&ctx, req()).await;
    assert_eq!(out.status, 403);
    let user = h.store.find_user_by_email("r@example.com").unwrap().unwrap();
    assert!(h.vault.verify("old-pass", &user.password_hash));
    assert!(user.updated_at.is_none());

    let out = h.journey.reset_password(&ctx, req()).await;
    assert!(out.is_ok());
    let user = h.store.find_user_by_email("r@example.com").unwrap().unwrap();
    assert!(h.vault.verify("new-pass", &user.password_hash));
    assert!(!h.vault.verify("old-pass", &user.password_hash));
    assert!(user.updated_at.is_some());
}

#[tokio::test]
async fn password_reset_checks_current_password_locally() {
    let h = harness();
    let ctx = signed_up(&h, "r2@example.com", "old-pass").await;
    let before = h.risk.count();
    let req = PasswordResetRequest { current_password: Some("nope".into()), new_password: Some("x".into()), hcaptcha_token: Some("tok".into()) };
    let out = h.journey.reset_password(&ctx, req).await;
    assert_eq!(out.response.message.as_deref(), Some(MSG_INVALID_CURRENT_PASSWORD));
    assert_eq!(h.risk.count(), before);

    let out = h.journey.reset_password(&ctx, PasswordResetRequest::default()).await;
    assert_eq!(out.response.message.as_deref(), Some(MSG_RESET_FIELDS_REQUIRED));
    assert_eq!(h.journey.reset_password(&RequestContext::anonymous(), PasswordResetRequest::default()).await.status, 401);
}

#[tokio::test]
async fn checkout_caps_items_and_normalizes_payload() {
    let h = harness();
    let ctx = signed_up(&h, "buyer@shop.test", "p1").await;
    let items: Vec<TransactionItem> = (0..150)
        .map(|i| TransactionItem { name: Some(format!("sku-{}", i)), value: Some(1.0), quantity: Some(1), ..Default::default() })
        .collect();
    let req = CheckoutRequest {
        hcaptcha_token: Some("tok".into()),
        value: Some(150.0),
        currency_code: Some(" usd ".into()),
        payment_method: Some("paypal".into()),
        payment_network: Some("visa".into()),
        items: Some(items),
        ..Default::default()
    };
    let out = h.journey.checkout(&ctx, req).await;
    assert!(out.is_ok());
    assert!(out.response.risk.is_some());

    let call = h.risk.calls().pop().unwrap();
    assert_eq!(call.behavior, BehaviorType::Purchase);
    let tx = call.event_data.unwrap().transaction_data.unwrap();
    assert_eq!(tx.items.as_ref().unwrap().len(), MAX_CHECKOUT_ITEMS);
    assert_eq!(tx.currency_code.as_deref(), Some("USD"));
    assert_eq!(tx.payment_method.as_deref(), Some("credit_card"));
    assert_eq!(tx.payment_network.as_deref(), Some("visa"));
    let txn = tx.transaction_id.unwrap();
    assert!(txn.starts_with("TX_"));
    assert_eq!(txn.len(), 15);
    assert!(txn[3..].chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    assert_eq!(tx.user.unwrap().email_domain.as_deref(), Some("shop.test"));
}

#[tokio::test]
async fn checkout_rejections() {
    let h = harness();
    assert_eq!(h.journey.checkout(&RequestContext::anonymous(), CheckoutRequest::default()).await.status, 401);
    let ctx = signed_up(&h, "buyer2@shop.test", "p1").await;
    let before = h.risk.count();
    let out = h.journey.checkout(&ctx, CheckoutRequest::default()).await;
    assert_eq!(out.status, 400);
    assert_eq!(out.response.message.as_deref(), Some(MSG_TOKEN_REQUIRED));
    assert_eq!(h.risk.count(), before);

    h.risk.push(reject());
    let out = h.journey.checkout(&ctx, CheckoutRequest { hcaptcha_token: Some("tok".into()), ..Default::default() }).await;
    assert_eq!(out.status, 403);
}

/// Changes the user's password from another "request" while the reset is being evaluated.
struct InterleavingEvaluator {
    store: Arc<IdentityStore>,
    vault: Arc<Argon2Vault>,
}

#[async_trait]
impl RiskEvaluator for InterleavingEvaluator {
    async fn evaluate(&self, req: &EvaluateRequest, _remote_ip: Option<&str>) -> Result<RawResponse, EvaluateError> {
        if req.behavior == BehaviorType::PasswordReset {
            let user_id = req.user_id.clone().unwrap();
            let digest = self.vault.hash("concurrent-pass").unwrap();
            self.store.update_user_password(&user_id, &digest, None).unwrap();
        }
        pass()
    }
}

#[tokio::test]
async fn password_reset_loses_to_a_change_made_during_evaluation() {
    let h = harness();
    let ctx = signed_up(&h, "race@example.com", "old-pass").await;
    let journey = BehaviorOrchestrator::new(
        h.store.clone(),
        h.vault.clone(),
        h.tokens.clone(),
        Arc::new(InterleavingEvaluator { store: h.store.clone(), vault: h.vault.clone() }),
    );
    let req = PasswordResetRequest { current_password: Some("old-pass".into()), new_password: Some("mine".into()), hcaptcha_token: Some("tok".into()) };
    let out = journey.reset_password(&ctx, req).await;
    assert_eq!(out.status, 409);
    assert!(!out.response.ok);
    let user = h.store.find_user_by_email("race@example.com").unwrap().unwrap();
    assert!(h.vault.verify("concurrent-pass", &user.password_hash));
    assert!(!h.vault.verify("mine", &user.password_hash));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_session_starts_on_one_sid_all_succeed() {
    let h = Arc::new(harness());
    let tasks: Vec<_> = (0..200)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.journey.start_session(&RequestContext::anonymous().with_sid("same")).await })
        })
        .collect();
    for t in tasks {
        let out = t.await.unwrap();
        assert_eq!(out.status, 200, "{:?}", out.response.message);
        assert_eq!(cookie_value(&out, SID_COOKIE).as_deref(), Some("same"));
    }
    assert!(!h.store.find_session("same").unwrap().unwrap().is_ended());
}
