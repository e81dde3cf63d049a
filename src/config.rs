//!
//! journeyguard configuration
//! --------------------------
//! Read once at startup from environment variables, then optionally overridden by CLI flags.
//! Nothing mutates the configuration after the server starts.

use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "JOURNEYGUARD_";
pub const DEFAULT_HTTP_PORT: u16 = 7071;
pub const DEFAULT_RISK_URL: &str = "https://api.hcaptcha.com/siteverify";
pub const DEFAULT_TOKEN_PARTY: &str = "journeyguard";
pub const DEFAULT_JWT_MINUTES: i64 = 60;
/// Token validity ceiling: 30 days.
pub const MAX_JWT_MINUTES: i64 = 60 * 24 * 30;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_port: u16,
    /// When set, tables are snapshotted as JSON under this folder and reloaded on startup.
    pub data_dir: Option<PathBuf>,
    pub snapshot_interval_ms: u64,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_minutes: i64,
    pub use_secure_cookies: bool,
    pub risk_secret: String,
    pub risk_sitekey: Option<String>,
    pub risk_url: String,
    pub running_local: bool,
}

fn var(name: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, name)).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

pub const USAGE: &str = "journeyguard\n\nUSAGE:\n  journeyguard [--http-port N] [--data-dir PATH]\n\nOPTIONS:\n  --http-port N     HTTP port (env: JOURNEYGUARD_HTTP_PORT, default 7071)\n  --data-dir PATH   Snapshot folder for tables (env: JOURNEYGUARD_DATA_DIR, default: in-memory only)\n\nREQUIRED ENV:\n  JOURNEYGUARD_JWT_SECRET, JOURNEYGUARD_RISK_SECRET\n";

impl AppConfig {
    /// Load from `JOURNEYGUARD_*` environment variables. Secrets are required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(var)
    }

    /// Same as `from_env` but with an explicit lookup, which keeps tests away from process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET").ok_or_else(|| anyhow!("{}JWT_SECRET missing", ENV_PREFIX))?;
        let risk_secret = lookup("RISK_SECRET").ok_or_else(|| anyhow!("{}RISK_SECRET missing", ENV_PREFIX))?;
        let http_port = match lookup("HTTP_PORT") {
            Some(p) => p.trim().parse::<u16>().map_err(|e| anyhow!("invalid {}HTTP_PORT '{}': {}", ENV_PREFIX, p, e))?,
            None => DEFAULT_HTTP_PORT,
        };
        let jwt_minutes = match lookup("JWT_MINUTES") {
            Some(m) => m.trim().parse::<i64>().ok().filter(|m| (1..=MAX_JWT_MINUTES).contains(m))
                .ok_or_else(|| anyhow!("invalid {}JWT_MINUTES '{}': expected 1..={}", ENV_PREFIX, m, MAX_JWT_MINUTES))?,
            None => DEFAULT_JWT_MINUTES,
        };
        let snapshot_interval_ms = lookup("SNAPSHOT_MS").and_then(|m| m.trim().parse::<u64>().ok()).unwrap_or(5_000);
        Ok(Self {
            http_port,
            data_dir: lookup("DATA_DIR").map(PathBuf::from),
            snapshot_interval_ms,
            jwt_secret,
            jwt_issuer: lookup("JWT_ISSUER").unwrap_or_else(|| DEFAULT_TOKEN_PARTY.to_string()),
            jwt_audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| DEFAULT_TOKEN_PARTY.to_string()),
            jwt_minutes,
            use_secure_cookies: lookup("SECURE_COOKIES").and_then(|v| parse_bool(&v)).unwrap_or(true),
            risk_secret,
            risk_sitekey: lookup("RISK_SITEKEY"),
            risk_url: lookup("RISK_URL").unwrap_or_else(|| DEFAULT_RISK_URL.to_string()),
            running_local: lookup("RUNNING_LOCAL").and_then(|v| parse_bool(&v)).unwrap_or(false),
        })
    }

    /// CLI arguments override environment.
    pub fn apply_args(mut self, args: &[String]) -> Result<Self> {
        if let Some(p) = parse_arg(args, "--http-port") {
            self.http_port = p.parse::<u16>().map_err(|e| anyhow!("invalid --http-port '{}': {}", p, e))?;
        }
        if let Some(d) = parse_arg(args, "--data-dir") {
            self.data_dir = Some(PathBuf::from(d));
        }
        Ok(self)
    }
}
