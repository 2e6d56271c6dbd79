//! TOTP provisioning and verification plus one-time backup codes.
//!
//! TOTP parameters are fixed: SHA-1, 6 digits, 30-second step, 160-bit
//! secret. Backup codes are 5 random bytes, base32 without padding,
//! lower-cased (8 characters), stored only as argon2 hashes.

use base32::Alphabet;
use rand::{rngs::OsRng, RngCore};
use std::time::{SystemTime, UNIX_EPOCH};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::config::SecondFactorConfig;
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;
const BACKUP_CODE_BYTES: usize = 5;
const BASE32: Alphabet = Alphabet::Rfc4648 { padding: false };

#[derive(Debug, Clone)]
pub struct ProvisionedSecret {
    /// Base32 secret, the value persisted on the principal.
    pub secret: String,
    /// `otpauth://totp/...` URI for authenticator apps.
    pub provisioning_uri: String,
}

/// Plain codes (shown once) and their hashes, index-aligned.
#[derive(Debug, Clone)]
pub struct GeneratedBackupCodes {
    pub plain: Vec<String>,
    pub hashed: Vec<PasswordHashString>,
}

#[derive(Debug, Clone)]
pub struct SecondFactorManager {
    issuer: String,
    skew_steps: u8,
    backup_code_count: usize,
}

impl SecondFactorManager {
    pub fn new(config: &SecondFactorConfig) -> Self {
        Self {
            issuer: config.totp_issuer.clone(),
            skew_steps: config.totp_skew_steps,
            backup_code_count: config.backup_code_count,
        }
    }

    pub fn backup_code_count(&self) -> usize {
        self.backup_code_count
    }

    /// Generate a fresh secret for `account_label`. Nothing is persisted here.
    pub fn provision_secret(&self, account_label: &str) -> Result<ProvisionedSecret, anyhow::Error> {
        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("TOTP secret generation failed: {:?}", e))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            self.skew_steps,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(|e| anyhow::anyhow!("TOTP init failed: {}", e))?;

        Ok(ProvisionedSecret {
            secret: totp.get_secret_base32(),
            provisioning_uri: totp.get_url(),
        })
    }

    /// Check `code` against the current step, ± the configured skew.
    pub fn validate_code(&self, secret: &str, code: &str) -> bool {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(now) => self.validate_code_at(secret, code, now.as_secs()),
            Err(e) => {
                tracing::error!(error = %e, "System clock before UNIX epoch");
                false
            }
        }
    }

    pub fn validate_code_at(&self, secret: &str, code: &str, unix_seconds: u64) -> bool {
        let code = code.trim();
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }

        match self.verifier(secret) {
            Some(totp) => totp.check(code, unix_seconds),
            None => false,
        }
    }

    fn verifier(&self, secret: &str) -> Option<TOTP> {
        let bytes = base32::decode(BASE32, secret.trim_end_matches('='))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            self.skew_steps,
            STEP_SECONDS,
            bytes,
            None,
            String::new(),
        )
        .map_err(|e| tracing::warn!(error = %e, "Stored TOTP secret rejected"))
        .ok()
    }

    /// Produce `backup_code_count` codes. CPU-heavy (one argon2 hash per
    /// code); call from the blocking pool.
    pub fn generate_backup_codes(&self) -> Result<GeneratedBackupCodes, anyhow::Error> {
        let mut plain = Vec::with_capacity(self.backup_code_count);
        let mut hashed = Vec::with_capacity(self.backup_code_count);

        for _ in 0..self.backup_code_count {
            let mut bytes = [0u8; BACKUP_CODE_BYTES];
            OsRng
                .try_fill_bytes(&mut bytes)
                .map_err(|e| anyhow::anyhow!("OS random source failed: {}", e))?;
            let code = base32::encode(BASE32, &bytes).to_lowercase();

            hashed.push(hash_password(&Password::new(code.clone()))?);
            plain.push(code);
        }

        Ok(GeneratedBackupCodes { plain, hashed })
    }
}

/// Compare a submitted code against one stored hash. Input is trimmed and
/// lower-cased first; a corrupt stored hash never matches.
pub fn check_backup_code(code: &str, stored_hash: &str) -> bool {
    let normalized = normalize_backup_code(code);
    if normalized.is_empty() {
        return false;
    }

    verify_password(
        &Password::new(normalized),
        &PasswordHashString::new(stored_hash.to_string()),
    )
    .unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Stored backup code hash unreadable");
        false
    })
}

pub fn normalize_backup_code(code: &str) -> String {
    code.trim().to_lowercase()
}
