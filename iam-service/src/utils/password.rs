use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;

/// Plaintext secret (password or backup code) that never prints itself.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Argon2id PHC string.
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash compared against when the principal does not exist, so an unknown
/// username costs the same as a wrong password.
static DUMMY_HASH: Lazy<Option<PasswordHashString>> =
    Lazy::new(|| hash_password(&Password::new("dummy-password-for-timing".to_string())).ok());

/// Hash with Argon2id and a fresh random salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Constant-time verification. A malformed stored hash is an error, a
/// mismatch is `Ok(false)`.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<bool, anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .is_ok())
}

/// Burn one verification's worth of CPU against the dummy hash.
pub fn verify_dummy(password: &Password) {
    if let Some(hash) = DUMMY_HASH.as_ref() {
        let _ = verify_password(password, hash);
    }
}

/// `hash_password` on the blocking pool.
pub async fn hash_password_blocking(password: Password) -> Result<PasswordHashString, anyhow::Error> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| anyhow::anyhow!("Password hashing task failed: {}", e))?
}

/// `verify_password` on the blocking pool.
pub async fn verify_password_blocking(
    password: Password,
    password_hash: PasswordHashString,
) -> Result<bool, anyhow::Error> {
    tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
        .await
        .map_err(|e| anyhow::anyhow!("Password verification task failed: {}", e))?
}

/// `verify_dummy` on the blocking pool.
pub async fn verify_dummy_blocking(password: Password) {
    if let Err(e) = tokio::task::spawn_blocking(move || verify_dummy(&password)).await {
        tracing::warn!(error = %e, "Dummy password verification task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id_phc() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash = hash_password(&password).unwrap();
        assert!(hash.as_str().starts_with("$argon2id$"));
    }

    #[test]
    fn test_verify_correct_and_incorrect() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash = hash_password(&password).unwrap();

        assert!(verify_password(&password, &hash).unwrap());
        assert!(!verify_password(&Password::new("wrongPassword".to_string()), &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash1 = hash_password(&password).unwrap();
        let hash2 = hash_password(&password).unwrap();
        assert_ne!(hash1.as_str(), hash2.as_str());
    }

    #[test]
    fn test_malformed_hash_is_error() {
        let password = Password::new("whatever".to_string());
        assert!(verify_password(&password, &PasswordHashString::new("not-a-hash".into())).is_err());
    }

    #[test]
    fn test_debug_hides_plaintext() {
        let password = Password::new("hunter22".to_string());
        assert!(!format!("{:?}", password).contains("hunter22"));
    }

    #[tokio::test]
    async fn test_blocking_wrappers() {
        let hash = hash_password_blocking(Password::new("pw-123456".into())).await.unwrap();
        assert!(verify_password_blocking(Password::new("pw-123456".into()), hash)
            .await
            .unwrap());
    }
}
