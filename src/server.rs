//!
//! journeyguard HTTP server
//! ------------------------
//! Thin Axum adapter over the behavior orchestrator. Each route reads the `sid` / `access`
//! cookies and the best-effort client IP into a `RequestContext`, parses the JSON body, runs
//! one orchestrator action and renders the resulting `ActionOutcome` (status, JSON envelope,
//! `Set-Cookie` headers).
//!
//! Responsibilities:
//! - Wiring collaborators from `AppConfig` (table engine, vault, token issuer, risk client).
//! - Cookie parsing (percent-decoded) and encoding (`Path=/; Max-Age; SameSite=Lax; HttpOnly`).
//! - Client IP extraction from proxy headers.
//! - Malformed bodies become a 400 envelope instead of an Axum rejection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{extract::State, routing::{get, post}, Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::identity::{HmacTokenIssuer, RequestContext, TokenSettings};
use crate::journey::{ActionOutcome, ActionResponse, BehaviorOrchestrator, CookieDirective, ACCESS_COOKIE, MSG_INVALID_BODY, SID_COOKIE};
use crate::risk::HttpRiskClient;
use crate::security::Argon2Vault;
use crate::storage::{IdentityStore, MemoryTables};

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub journey: Arc<BehaviorOrchestrator>,
    /// Adds `Secure` to every cookie; turn off for plain-HTTP local development.
    pub secure_cookies: bool,
    /// Fall back to 127.0.0.1 when no proxy header names the client.
    pub running_local: bool,
}

/// Build the collaborators described by `cfg` and provision the tables.
pub fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let engine = match &cfg.data_dir {
        Some(dir) => MemoryTables::open(dir, cfg.snapshot_interval_ms)
            .with_context(|| format!("While opening table snapshot folder: {}", dir.display()))?,
        None => MemoryTables::new(),
    };
    let store = IdentityStore::new(Arc::new(engine));
    store.ensure_schema().context("While provisioning tables")?;
    let tokens = HmacTokenIssuer::new(TokenSettings {
        secret: cfg.jwt_secret.clone(),
        issuer: cfg.jwt_issuer.clone(),
        audience: cfg.jwt_audience.clone(),
        validity: chrono::Duration::minutes(cfg.jwt_minutes),
    });
    let journey = BehaviorOrchestrator::new(
        Arc::new(store),
        Arc::new(Argon2Vault::new()),
        Arc::new(tokens),
        Arc::new(HttpRiskClient::from_config(cfg)),
    );
    Ok(AppState { journey: Arc::new(journey), secure_cookies: cfg.use_secure_cookies, running_local: cfg.running_local })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"ok": true})) }))
        .route("/session/start", post(session_start))
        .route("/session/end", post(session_end))
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/cart/add", post(cart_add))
        .route("/password/reset", post(password_reset))
        .route("/checkout", post(checkout))
        .with_state(state)
}

/// Start the HTTP server on `cfg.http_port` and serve until the process exits.
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    info!(target: "startup", port = cfg.http_port, data_dir = ?cfg.data_dir, risk_url = %cfg.risk_url, secure_cookies = cfg.use_secure_cookies, "starting journeyguard");
    let state = build_state(&cfg)?;
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    info!(target: "startup", "listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("While binding {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ---- cookies and client address ----

/// Value of cookie `name` from the `Cookie` header, percent-decoded.
pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all("cookie").iter() {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            let Some((k, v)) = part.trim().split_once('=') else { continue; };
            if k == name {
                return urlencoding::decode(v).map(|d| d.into_owned()).ok().or_else(|| Some(v.to_string()));
            }
        }
    }
    None
}

pub fn set_cookie_value(name: &str, value: &str, max_age: i64, secure: bool) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; SameSite=Lax{}; HttpOnly",
        name,
        urlencoding::encode(value),
        max_age,
        if secure { "; Secure" } else { "" }
    )
}

pub fn clear_cookie_value(name: &str, secure: bool) -> String {
    format!(
        "{}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Path=/; HttpOnly; SameSite=Lax{}",
        name,
        if secure { "; Secure" } else { "" }
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|s| !s.is_empty())
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then `X-Azure-ClientIP`; loopback when running locally.
pub fn client_ip(headers: &HeaderMap, running_local: bool) -> Option<String> {
    if let Some(first) = header_str(headers, "x-forwarded-for").and_then(|v| v.split(',').next()).map(str::trim).filter(|s| !s.is_empty()) {
        return Some(first.to_string());
    }
    if let Some(ip) = header_str(headers, "x-real-ip").or_else(|| header_str(headers, "x-azure-clientip")) {
        return Some(ip.to_string());
    }
    if running_local { Some("127.0.0.1".to_string()) } else { None }
}

fn request_context(state: &AppState, headers: &HeaderMap) -> RequestContext {
    RequestContext::new(parse_cookie(headers, SID_COOKIE), parse_cookie(headers, ACCESS_COOKIE), client_ip(headers, state.running_local))
}

/// Empty body reads as the request's defaults; anything else must be valid JSON.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ActionOutcome> {
    if body.iter().all(|b| b.is_ascii_whitespace()) { return Ok(T::default()); }
    serde_json::from_slice::<T>(body).map_err(|e| {
        debug!(target: "journey", "rejected request body: {}", e);
        ActionOutcome { status: 400, response: ActionResponse::failure(MSG_INVALID_BODY), cookies: Vec::new() }
    })
}

fn render(state: &AppState, outcome: ActionOutcome) -> Response {
    let mut headers = HeaderMap::new();
    for c in outcome.cookies.iter() {
        let v = match c {
            CookieDirective::Set { name, value, max_age } => set_cookie_value(name, value, *max_age, state.secure_cookies),
            CookieDirective::Clear { name } => clear_cookie_value(name, state.secure_cookies),
        };
        match HeaderValue::from_str(&v) {
            Ok(hv) => { headers.append("set-cookie", hv); }
            Err(e) => warn!(target: "journey", cookie = c.name(), "cookie not representable as a header: {}", e),
        }
    }
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, headers, Json(outcome.response)).into_response()
}

// ---- handlers ----

async fn session_start(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = request_context(&state, &headers);
    let outcome = state.journey.start_session(&ctx).await;
    render(&state, outcome)
}

async fn session_end(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = request_context(&state, &headers);
    // Logout never fails on a bad body; it just skips the evaluation.
    let req = parse_body(&body).unwrap_or_default();
    let outcome = state.journey.end_session(&ctx, req).await;
    render(&state, outcome)
}

async fn signup(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = request_context(&state, &headers);
    let outcome = match parse_body(&body) {
        Ok(req) => state.journey.signup(&ctx, req).await,
        Err(o) => o,
    };
    render(&state, outcome)
}

async fn login(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = request_context(&state, &headers);
    let outcome = match parse_body(&body) {
        Ok(req) => state.journey.login(&ctx, req).await,
        Err(o) => o,
    };
    render(&state, outcome)
}

async fn cart_add(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = request_context(&state, &headers);
    let outcome = match parse_body(&body) {
        Ok(req) => state.journey.add_to_cart(&ctx, req).await,
        Err(o) => o,
    };
    render(&state, outcome)
}

async fn password_reset(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = request_context(&state, &headers);
    let outcome = match parse_body(&body) {
        Ok(req) => state.journey.reset_password(&ctx, req).await,
        Err(o) => o,
    };
    render(&state, outcome)
}

async fn checkout(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = request_context(&state, &headers);
    let outcome = match parse_body(&body) {
        Ok(req) => state.journey.checkout(&ctx, req).await,
        Err(o) => o,
    };
    render(&state, outcome)
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
