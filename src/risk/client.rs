use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::wire::{EvaluateRequest, RawResponse, VerifyResponse};
use crate::config::AppConfig;

const PLAIN: &str = "plain";

#[derive(Debug, Error)]
pub enum EvaluateError {
    /// Caller error: raised before any network activity.
    #[error("proof token is required")]
    MissingToken,
    #[error("request encoding failed: {0}")]
    Encoding(String),
    #[error("risk provider unreachable: {0}")]
    Transport(String),
    /// The provider answered, but not with a verify document.
    #[error("risk provider returned an unreadable body (HTTP {status}): {detail}")]
    Malformed { status: u16, detail: String },
}

/// Single-attempt evaluation against the risk provider. Implementations must hand back the parsed
/// body whatever the HTTP status was, since failure reasons travel in the body.
#[async_trait]
pub trait RiskEvaluator: Send + Sync {
    async fn evaluate(&self, req: &EvaluateRequest, remote_ip: Option<&str>) -> Result<RawResponse, EvaluateError>;
}

/// Form-POST siteverify client.
#[derive(Clone)]
pub struct HttpRiskClient {
    http: reqwest::Client,
    url: String,
    secret: String,
    sitekey: Option<String>,
}

impl HttpRiskClient {
    pub fn new(url: impl Into<String>, secret: impl Into<String>, sitekey: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), url: url.into(), secret: secret.into(), sitekey: sitekey.filter(|s| !s.trim().is_empty()) }
    }

    pub fn from_config(cfg: &AppConfig) -> Self { Self::new(cfg.risk_url.clone(), cfg.risk_secret.clone(), cfg.risk_sitekey.clone()) }

    pub fn url(&self) -> &str { &self.url }

    /// Build the outbound form fields in wire order. Blank optional values are left out.
    pub fn build_form(&self, req: &EvaluateRequest, remote_ip: Option<&str>) -> Result<Vec<(&'static str, String)>, EvaluateError> {
        if req.token.trim().is_empty() { return Err(EvaluateError::MissingToken); }
        let label = req.behavior.as_wire();
        let mut form: Vec<(&'static str, String)> = vec![("secret", self.secret.clone()), ("response", req.token.clone())];
        if let Some(ip) = remote_ip.map(str::trim).filter(|s| !s.is_empty()) { form.push(("remoteip", ip.to_string())); }
        if let Some(sk) = &self.sitekey { form.push(("sitekey", sk.clone())); }
        form.push(("behavior_type", label.to_string()));
        if let Some(ok) = req.behavior_success { form.push(("behavior_success", if ok { "true" } else { "false" }.to_string())); }
        let hints = [
            ("user_id", "user_id_type", &req.user_id),
            ("session_id", "session_id_type", &req.session_id),
            ("user_email", "user_email_type", &req.user_email),
        ];
        for (field, type_field, value) in hints {
            if let Some(v) = value.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                form.push((field, v.to_string()));
                form.push((type_field, PLAIN.to_string()));
            }
        }
        // Only commerce behaviors carry a transaction payload.
        if let Some(data) = req.event_data.as_ref().filter(|_| req.behavior.is_commerce()) {
            let mut data = data.clone();
            if data.behavior_type.trim().is_empty() { data.behavior_type = label.to_string(); }
            let json = serde_json::to_string(&data).map_err(|e| EvaluateError::Encoding(e.to_string()))?;
            form.push(("event_data", json));
        } else if req.event_data.is_some() {
            debug!(target: "risk", behavior = label, "event_data dropped for non-commerce behavior");
        }
        if req.post_verify { form.push(("post_verify", "true".to_string())); }
        Ok(form)
    }
}

/// Interpret a provider reply. Any status is accepted as long as the body is a verify document.
pub fn parse_response(http_status: u16, raw: String) -> Result<RawResponse, EvaluateError> {
    match serde_json::from_str::<VerifyResponse>(&raw) {
        Ok(body) => Ok(RawResponse { body, raw, http_status }),
        Err(e) => Err(EvaluateError::Malformed { status: http_status, detail: e.to_string() }),
    }
}

#[async_trait]
impl RiskEvaluator for HttpRiskClient {
    async fn evaluate(&self, req: &EvaluateRequest, remote_ip: Option<&str>) -> Result<RawResponse, EvaluateError> {
        let form = self.build_form(req, remote_ip)?;
        info!(
            target: "risk",
            behavior = %req.behavior,
            post_verify = req.post_verify,
            user_id = req.user_id.is_some(),
            session_id = req.session_id.is_some(),
            email = req.user_email.is_some(),
            event_data = req.event_data.is_some(),
            "siteverify start"
        );
        let resp = self.http.post(&self.url).form(&form).send().await.map_err(|e| {
            warn!(target: "risk", "siteverify transport failure: {}", e);
            EvaluateError::Transport(e.to_string())
        })?;
        let status = resp.status().as_u16();
        let raw = resp.text().await.map_err(|e| EvaluateError::Transport(e.to_string()))?;
        debug!(target: "risk", status, bytes = raw.len(), "siteverify response");
        let parsed = parse_response(status, raw);
        match &parsed {
            Ok(r) => info!(target: "risk", status, success = r.body.success, "siteverify done"),
            Err(e) => warn!(target: "risk", status, "siteverify unreadable: {}", e),
        }
        parsed
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
