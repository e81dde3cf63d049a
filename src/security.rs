//! Password hashing and verification.
//!
//! Digests are PHC strings (`$argon2id$v=19$m=..,t=..,p=..$<salt>$<key>`), so the algorithm tag,
//! cost parameters, salt and derived key travel with the digest and verification never needs
//! outside configuration.

use anyhow::{anyhow, Result};
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use password_hash::{PasswordHash, SaltString};

/// Memory cost in KiB, iterations and lanes used for every new digest.
pub const ARGON2_M_COST: u32 = 19_456;
pub const ARGON2_T_COST: u32 = 2;
pub const ARGON2_P_COST: u32 = 1;

pub trait CredentialVault: Send + Sync {
    /// Derive a fresh digest with a random per-call salt.
    fn hash(&self, password: &str) -> Result<String>;
    /// Constant-time check of `password` against a stored digest. Malformed digests verify false.
    fn verify(&self, password: &str, digest: &str) -> bool;
}

#[derive(Clone)]
pub struct Argon2Vault {
    params: Params,
}

impl Default for Argon2Vault {
    fn default() -> Self {
        // The constants are within argon2's accepted ranges; fall back to library defaults regardless.
        let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, None).unwrap_or_default();
        Self { params }
    }
}

impl Argon2Vault {
    pub fn new() -> Self { Self::default() }

    /// Vault with explicit cost parameters. Existing digests keep verifying with whatever they embed.
    pub fn with_cost(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self> {
        let params = Params::new(m_cost, t_cost, p_cost, None).map_err(|e| anyhow!(e.to_string()))?;
        Ok(Self { params })
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl CredentialVault for Argon2Vault {
    fn hash(&self, password: &str) -> Result<String> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
        let phc = self.hasher().hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
        Ok(phc)
    }

    fn verify(&self, password: &str, digest: &str) -> bool {
        // Params come from the digest itself; the vault's own cost only applies to new hashes.
        if let Ok(parsed) = PasswordHash::new(digest) {
            Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
        } else { false }
    }
}

#[cfg(test)]
#[path = "security_tests.rs"]
mod tests;
