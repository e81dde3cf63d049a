use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::envelope::*;
use crate::error::{AppError, AppResult};
use crate::identity::{Principal, RequestContext, TokenIssuer};
use crate::risk::{analyze, BehaviorType, Decision, EvaluateRequest, EventData, RiskEvaluator, TransactionData, TransactionItem, TransactionUser};
use crate::security::CredentialVault;
use crate::storage::{normalize_email, IdentityStore, StoreError, User};

/// Upper bound on checkout items forwarded to the provider.
pub const MAX_CHECKOUT_ITEMS: usize = 100;

fn required(v: &Option<String>) -> Option<&str> { v.as_deref().filter(|s| !s.trim().is_empty()) }

/// Runs every user action as `validate -> identity -> evaluate -> side effect -> respond`,
/// with the evaluation placed where the action's side effect can still be stopped.
pub struct BehaviorOrchestrator {
    store: Arc<IdentityStore>,
    vault: Arc<dyn CredentialVault>,
    tokens: Arc<dyn TokenIssuer>,
    risk: Arc<dyn RiskEvaluator>,
}

impl BehaviorOrchestrator {
    pub fn new(store: Arc<IdentityStore>, vault: Arc<dyn CredentialVault>, tokens: Arc<dyn TokenIssuer>, risk: Arc<dyn RiskEvaluator>) -> Self {
        Self { store, vault, tokens, risk }
    }

    pub fn store(&self) -> &IdentityStore { &self.store }

    // ---- helpers ----

    fn principal(&self, ctx: &RequestContext) -> Option<Principal> {
        ctx.access_token.as_deref().and_then(|t| self.tokens.validate(t))
    }

    fn require_principal(&self, ctx: &RequestContext) -> AppResult<Principal> {
        self.principal(ctx).ok_or_else(|| AppError::auth("unauthorized", MSG_UNAUTHORIZED))
    }

    async fn evaluate(&self, ctx: &RequestContext, req: EvaluateRequest) -> AppResult<Decision> {
        let raw = self.risk.evaluate(&req, ctx.remote_ip.as_deref()).await?;
        let d = analyze(&raw.body);
        info!(target: "journey", behavior = %req.behavior, post_verify = req.post_verify, http_status = raw.http_status, "{}", d.explain());
        Ok(d)
    }

    async fn hash_password(&self, password: &str) -> AppResult<String> {
        let vault = self.vault.clone();
        let password = password.to_string();
        let digest = tokio::task::spawn_blocking(move || vault.hash(&password)).await.map_err(anyhow::Error::from)??;
        Ok(digest)
    }

    async fn verify_password(&self, password: &str, digest: &str) -> bool {
        let vault = self.vault.clone();
        let (password, digest) = (password.to_string(), digest.to_string());
        tokio::task::spawn_blocking(move || vault.verify(&password, &digest)).await.unwrap_or(false)
    }

    /// Journey log writes never fail an action.
    fn record(&self, sid: Option<&str>, user_id: Option<&str>, event: &str, payload: Value) {
        if let Err(e) = self.store.append_event(sid, user_id, event, &payload) {
            warn!(target: "journey", event, "journey event not recorded: {}", e);
        }
    }

    /// Correlate the session with the user after a successful login or signup. Best-effort.
    fn bind(&self, sid: Option<&str>, user_id: &str) {
        let Some(sid) = sid else { return; };
        if let Err(e) = self.store.bind_session(sid, user_id) {
            warn!(target: "journey", "session not bound to user {}: {}", user_id, e);
        }
    }

    fn signed_in(&self, user: &User, d: &Decision) -> AppResult<ActionOutcome> {
        let token = self.tokens.issue(&user.id, &user.email)?;
        let mut resp = ActionResponse::success().with_risk(d);
        resp.user_id = Some(user.id.clone());
        resp.email = Some(user.email.clone());
        resp.full_name = Some(user.full_name.clone());
        Ok(ActionOutcome::ok(resp).with_cookie(CookieDirective::set(ACCESS_COOKIE, token, ACCESS_MAX_AGE_SECS)))
    }

    /// Email for a signed-in user: the stored one when the row is readable, else the token's.
    fn account_email(&self, p: &Principal) -> AppResult<Option<String>> {
        let stored = self.store.find_user_by_id(&p.user_id)?.map(|u| u.email);
        Ok(stored.or_else(|| Some(p.email.clone()).filter(|e| !e.is_empty())))
    }

    fn finish(action: &str, r: AppResult<ActionOutcome>) -> ActionOutcome {
        match r {
            Ok(o) => o,
            Err(e) => {
                if e.http_status() >= 500 {
                    warn!(target: "journey", action, code = e.code_str(), "action failed");
                } else {
                    debug!(target: "journey", action, code = e.code_str(), "action rejected");
                }
                ActionOutcome::from(e)
            }
        }
    }

    // ---- actions ----

    /// Create or refresh the correlation session and hand the sid back as a cookie.
    pub async fn start_session(&self, ctx: &RequestContext) -> ActionOutcome {
        let r = (|| -> AppResult<ActionOutcome> {
            let sid = ctx.sid.clone().unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
            let session = self.store.touch_session(&sid)?;
            self.record(Some(&sid), session.user_id.as_deref(), "session_start", json!({}));
            Ok(ActionOutcome::ok(ActionResponse::success()).with_cookie(CookieDirective::set(SID_COOKIE, sid, SID_MAX_AGE_SECS)))
        })();
        Self::finish("session_start", r)
    }

    /// Logout. The evaluation is optional and its outcome is ignored; the session always ends and
    /// both cookies are cleared.
    pub async fn end_session(&self, ctx: &RequestContext, req: SessionEndRequest) -> ActionOutcome {
        let sid = ctx.sid.as_deref();
        let principal = self.principal(ctx);
        let user_id = principal.as_ref().map(|p| p.user_id.as_str());
        if let Some(token) = required(&req.hcaptcha_token) {
            let eval = EvaluateRequest::new(token, BehaviorType::UserLogout)
                .success(true)
                .session(sid)
                .user(user_id)
                .email(principal.as_ref().map(|p| p.email.as_str()));
            match self.evaluate(ctx, eval).await {
                Err(e) if e.is_provider_failure() => warn!(target: "journey", code = e.code_str(), "risk provider unavailable at logout, ending session anyway"),
                Err(e) => info!(target: "journey", code = e.code_str(), "logout evaluation failed, ending session anyway"),
                Ok(d) if !d.passed => info!(target: "journey", "logout evaluation did not pass, ending session anyway"),
                Ok(_) => {}
            }
        }
        if let Some(sid) = sid {
            if let Err(e) = self.store.end_session(sid) {
                warn!(target: "journey", "session end not persisted: {}", e);
            }
        }
        self.record(sid, user_id, "session_end", json!({}));
        ActionOutcome::ok(ActionResponse::success())
            .with_cookie(CookieDirective::clear(SID_COOKIE))
            .with_cookie(CookieDirective::clear(ACCESS_COOKIE))
    }

    pub async fn signup(&self, ctx: &RequestContext, req: SignupRequest) -> ActionOutcome {
        let r = self.signup_inner(ctx, req).await;
        Self::finish("signup", r)
    }

    async fn signup_inner(&self, ctx: &RequestContext, req: SignupRequest) -> AppResult<ActionOutcome> {
        let (Some(email), Some(password), Some(token)) = (required(&req.email), required(&req.password), required(&req.hcaptcha_token)) else {
            return Err(AppError::validation("missing_fields", MSG_CREDENTIALS_REQUIRED));
        };
        let email = normalize_email(email);
        let sid = ctx.sid.as_deref();

        // PRE: nothing written yet, no identity to attach.
        let pre = self.evaluate(ctx, EvaluateRequest::new(token, BehaviorType::Signup).session(sid).email(Some(&email))).await?;
        if !pre.passed { return Ok(ActionOutcome::risk_failed(&pre)); }

        if self.store.find_user_by_email(&email)?.is_some() {
            return Err(AppError::conflict("user_exists", MSG_USER_EXISTS));
        }
        let digest = self.hash_password(password).await?;
        let full_name = req.full_name.as_deref().unwrap_or("").trim().to_string();
        let user = self.store.create_user(&email, &full_name, &digest).map_err(|e| match e {
            StoreError::AlreadyExists { .. } => AppError::conflict("user_exists", MSG_USER_EXISTS),
            other => other.into(),
        })?;
        self.record(sid, Some(&user.id), "signup", json!({ "pre_passed": true }));

        // POST: same token, now bound to the new identity. The user row stays even if this fails.
        let post_req = EvaluateRequest::new(token, BehaviorType::Signup).session(sid).user(Some(&user.id)).email(Some(&email)).post_verify();
        let post = match self.evaluate(ctx, post_req).await {
            Ok(d) => d,
            Err(e) => {
                self.record(sid, Some(&user.id), "signup_post_verify_failed", json!({ "reason": e.code_str() }));
                return Err(e);
            }
        };
        if !post.passed {
            self.record(sid, Some(&user.id), "signup_post_verify_failed", json!({ "error_codes": post.error_codes }));
            return Ok(ActionOutcome::risk_failed(&post));
        }

        let outcome = self.signed_in(&user, &post)?;
        self.bind(sid, &user.id);
        info!(target: "journey", user_id = %user.id, "signup completed");
        Ok(outcome)
    }

    pub async fn login(&self, ctx: &RequestContext, req: LoginRequest) -> ActionOutcome {
        let r = self.login_inner(ctx, req).await;
        Self::finish("login", r)
    }

    async fn login_inner(&self, ctx: &RequestContext, req: LoginRequest) -> AppResult<ActionOutcome> {
        let (Some(email), Some(password), Some(token)) = (required(&req.email), required(&req.password), required(&req.hcaptcha_token)) else {
            return Err(AppError::validation("missing_fields", MSG_CREDENTIALS_REQUIRED));
        };
        let email = normalize_email(email);
        let sid = ctx.sid.as_deref();
        let invalid = || AppError::auth("invalid_credentials", MSG_INVALID_CREDENTIALS);

        // Local check first: bad credentials never cost a provider call.
        let Some(user) = self.store.find_user_by_email(&email)? else { return Err(invalid()); };
        if !self.verify_password(password, &user.password_hash).await { return Err(invalid()); }

        let eval = EvaluateRequest::new(token, BehaviorType::Login).session(sid).user(Some(&user.id)).email(Some(&email)).success(true);
        let d = self.evaluate(ctx, eval).await?;
        if !d.passed { return Ok(ActionOutcome::risk_failed(&d)); }

        let outcome = self.signed_in(&user, &d)?;
        self.bind(sid, &user.id);
        self.record(sid, Some(&user.id), "login", json!({}));
        info!(target: "journey", user_id = %user.id, "login completed");
        Ok(outcome)
    }

    pub async fn add_to_cart(&self, ctx: &RequestContext, req: CartAddRequest) -> ActionOutcome {
        let r = self.add_to_cart_inner(ctx, req).await;
        Self::finish("add_to_cart", r)
    }

    async fn add_to_cart_inner(&self, ctx: &RequestContext, req: CartAddRequest) -> AppResult<ActionOutcome> {
        let p = self.require_principal(ctx)?;
        let Some(token) = required(&req.hcaptcha_token) else { return Err(AppError::validation("missing_token", MSG_TOKEN_REQUIRED)); };
        let Some(item_id) = required(&req.item_id).map(str::trim) else { return Err(AppError::validation("missing_item", MSG_ITEM_REQUIRED)); };
        let quantity = req.quantity.filter(|q| *q > 0).unwrap_or(1);
        let unit_price = req.unit_price.unwrap_or(0.0);
        let sid = ctx.sid.as_deref();
        let email = self.account_email(&p)?;

        let txn_id = format!("{}:{}:{}:{}", sid.unwrap_or("nosid"), p.user_id, item_id, Utc::now().format("%Y%m%d%H%M%S%3f"));
        let data = EventData {
            behavior_type: BehaviorType::AddToCart.as_wire().to_string(),
            transaction_data: Some(TransactionData {
                transaction_id: Some(txn_id.clone()),
                value: Some(unit_price * quantity as f64),
                items: Some(vec![TransactionItem { name: Some(item_id.to_string()), quantity: Some(quantity), value: Some(unit_price), ..Default::default() }]),
                user: Some(TransactionUser::for_account(&p.user_id, email.as_deref())),
                ..Default::default()
            }),
        };
        let eval = EvaluateRequest::new(token, BehaviorType::AddToCart).session(sid).user(Some(&p.user_id)).email(email.as_deref()).event_data(data);
        let d = self.evaluate(ctx, eval).await?;
        if !d.passed { return Ok(ActionOutcome::risk_failed(&d)); }

        self.record(sid, Some(&p.user_id), "add_to_cart", json!({ "transaction_id": txn_id, "item_id": item_id, "quantity": quantity }));
        let mut resp = ActionResponse::success().with_risk(&d);
        resp.item_id = Some(item_id.to_string());
        resp.quantity = Some(quantity);
        Ok(ActionOutcome::ok(resp))
    }

    pub async fn reset_password(&self, ctx: &RequestContext, req: PasswordResetRequest) -> ActionOutcome {
        let r = self.reset_password_inner(ctx, req).await;
        Self::finish("password_reset", r)
    }

    async fn reset_password_inner(&self, ctx: &RequestContext, req: PasswordResetRequest) -> AppResult<ActionOutcome> {
        let p = self.require_principal(ctx)?;
        let (Some(current), Some(new_password), Some(token)) = (required(&req.current_password), required(&req.new_password), required(&req.hcaptcha_token)) else {
            return Err(AppError::validation("missing_fields", MSG_RESET_FIELDS_REQUIRED));
        };
        // A valid token for a user the store does not know is treated like no token.
        let Some(user) = self.store.find_user_by_id(&p.user_id)? else { return Err(AppError::auth("unauthorized", MSG_UNAUTHORIZED)); };
        if !self.verify_password(current, &user.password_hash).await {
            return Err(AppError::validation("invalid_current_password", MSG_INVALID_CURRENT_PASSWORD));
        }
        let sid = ctx.sid.as_deref();
        let eval = EvaluateRequest::new(token, BehaviorType::PasswordReset).session(sid).user(Some(&user.id)).email(Some(&user.email));
        let d = self.evaluate(ctx, eval).await?;
        if !d.passed { return Ok(ActionOutcome::risk_failed(&d)); }

        let digest = self.hash_password(new_password).await?;
        // Compare-and-set against the row the current password was checked on.
        if let Err(e) = self.store.update_user_password(&user.id, &digest, user.etag.as_ref()) {
            if matches!(e, StoreError::Conflict { .. }) {
                warn!(target: "journey", user_id = %user.id, "password changed concurrently, reset not applied");
            }
            return Err(e.into());
        }
        self.record(sid, Some(&user.id), "password_reset", json!({}));
        info!(target: "journey", user_id = %user.id, "password changed");
        Ok(ActionOutcome::ok(ActionResponse::success().with_risk(&d)))
    }

    pub async fn checkout(&self, ctx: &RequestContext, req: CheckoutRequest) -> ActionOutcome {
        let r = self.checkout_inner(ctx, req).await;
        Self::finish("checkout", r)
    }

    async fn checkout_inner(&self, ctx: &RequestContext, req: CheckoutRequest) -> AppResult<ActionOutcome> {
        let p = self.require_principal(ctx)?;
        let Some(token) = required(&req.hcaptcha_token) else { return Err(AppError::validation("missing_token", MSG_TOKEN_REQUIRED)); };
        let sid = ctx.sid.as_deref();
        let email = self.account_email(&p)?;

        let hex = uuid::Uuid::new_v4().simple().to_string();
        let txn_id = format!("TX_{}", hex[..12].to_uppercase());
        let items = req.items.map(|mut v| { v.truncate(MAX_CHECKOUT_ITEMS); v });
        let item_count = items.as_ref().map(|v| v.len()).unwrap_or(0);
        let currency = req.currency_code.as_deref().map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty());
        let data = EventData {
            behavior_type: BehaviorType::Purchase.as_wire().to_string(),
            transaction_data: Some(TransactionData {
                transaction_id: Some(txn_id.clone()),
                payment_method: Some("credit_card".to_string()),
                payment_network: req.payment_network,
                card_bin: req.card_bin,
                card_last_four: req.card_last_four,
                currency_code: currency.clone(),
                value: req.value,
                shipping_value: req.shipping_value,
                shipping_address: req.shipping_address,
                billing_address: req.billing_address,
                user: Some(TransactionUser::for_account(&p.user_id, email.as_deref())),
                items,
                ..Default::default()
            }),
        };
        let eval = EvaluateRequest::new(token, BehaviorType::Purchase).session(sid).user(Some(&p.user_id)).email(email.as_deref()).event_data(data);
        let d = self.evaluate(ctx, eval).await?;
        if !d.passed { return Ok(ActionOutcome::risk_failed(&d)); }

        self.record(sid, Some(&p.user_id), "purchase", json!({ "transaction_id": txn_id, "value": req.value, "currency_code": currency, "item_count": item_count }));
        Ok(ActionOutcome::ok(ActionResponse::success().with_risk(&d)))
    }
}
