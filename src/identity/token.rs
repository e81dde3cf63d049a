use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use super::principal::Principal;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

pub trait TokenIssuer: Send + Sync {
    /// Signed, time-boxed token binding `user_id` and `email`.
    fn issue(&self, user_id: &str, email: &str) -> Result<String>;
    /// `None` on any failure (signature, issuer, audience, expiry, shape). Callers treat that as anonymous.
    fn validate(&self, token: &str) -> Option<Principal>;
}

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub validity: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    uid: String,
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// HS256 compact token (`header.claims.signature`, base64url without padding).
pub struct HmacTokenIssuer {
    settings: TokenSettings,
}

impl HmacTokenIssuer {
    pub fn new(settings: TokenSettings) -> Self { Self { settings } }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.settings.secret.as_bytes()).map_err(|e| anyhow!(e.to_string()))
    }

    pub fn issue_at(&self, user_id: &str, email: &str, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            uid: user_id.to_string(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now.timestamp(),
            exp: now.checked_add_signed(self.settings.validity).ok_or_else(|| anyhow!("token validity overflows the clock"))?.timestamp(),
        };
        let header = URL_SAFE_NO_PAD.encode(HEADER.as_bytes());
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signing_input = format!("{}.{}", header, body);
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signing_input, sig))
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Option<Principal> {
        let mut parts = token.trim().split('.');
        let (header, body, sig) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() { return None; }
        let header_json: serde_json::Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).ok()?).ok()?;
        if header_json.get("alg").and_then(|a| a.as_str()) != Some("HS256") { return None; }
        let sig_bytes = URL_SAFE_NO_PAD.decode(sig).ok()?;
        let mut mac = self.mac().ok()?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        // verify_slice compares in constant time
        mac.verify_slice(&sig_bytes).ok()?;
        let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(body).ok()?).ok()?;
        if claims.iss != self.settings.issuer || claims.aud != self.settings.audience {
            debug!(target: "identity", "token rejected: issuer/audience mismatch");
            return None;
        }
        if now.timestamp() >= claims.exp {
            debug!(target: "identity", "token rejected: expired");
            return None;
        }
        if claims.uid.trim().is_empty() { return None; }
        Some(Principal::new(claims.uid, &claims.email))
    }
}

impl TokenIssuer for HmacTokenIssuer {
    fn issue(&self, user_id: &str, email: &str) -> Result<String> { self.issue_at(user_id, email, Utc::now()) }
    fn validate(&self, token: &str) -> Option<Principal> { self.validate_at(token, Utc::now()) }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
