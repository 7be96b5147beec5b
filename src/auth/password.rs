//! Password hashing and verification
//!
//! Uses bcrypt for secure password hashing. bcrypt is CPU-bound, so request
//! paths go through the `*_async` variants which run on the blocking pool.

use crate::auth::AuthError;
use bcrypt::{hash, verify};
use tracing::warn;

/// Work factor used when none is configured
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// bcrypt hasher with a configurable work factor
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a password using bcrypt
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        hash(password, self.cost)
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e)))
    }

    /// Verify a password against a hash. A malformed stored hash counts as a mismatch.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match verify(password, hash) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Stored password hash could not be verified");
                false
            }
        }
    }

    pub async fn hash_async(&self, password: &str) -> Result<String, AuthError> {
        let hasher = *self;
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    pub async fn verify_async(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = *self;
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("Password verification task failed: {}", e)))
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // bcrypt's minimum cost keeps the suite fast
    const TEST_COST: u32 = 4;

    #[test]
    fn hash_then_verify() {
        let hasher = PasswordHasher::new(TEST_COST);
        let hashed = hasher.hash("correct horse").unwrap();
        assert_ne!(hashed, "correct horse");
        assert!(hasher.verify("correct horse", &hashed));
        assert!(!hasher.verify("battery staple", &hashed));
    }

    #[test]
    fn hashes_are_salted() {
        let hasher = PasswordHasher::new(TEST_COST);
        let a = hasher.hash("same").unwrap();
        let b = hasher.hash("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_a_mismatch_not_an_error() {
        let hasher = PasswordHasher::new(TEST_COST);
        assert!(!hasher.verify("anything", "not-a-bcrypt-hash"));
    }

    #[test]
    fn invalid_cost_is_an_internal_error() {
        let hasher = PasswordHasher::new(99);
        assert!(matches!(hasher.hash("pw"), Err(AuthError::Internal(_))));
    }

    #[test]
    fn default_cost_is_ten() {
        assert_eq!(PasswordHasher::default().cost, 10);
    }

    #[tokio::test]
    async fn async_variants_agree_with_sync() {
        let hasher = PasswordHasher::new(TEST_COST);
        let hashed = hasher.hash_async("s3cret-pass").await.unwrap();
        assert!(hasher.verify_async("s3cret-pass", &hashed).await.unwrap());
        assert!(!hasher.verify_async("wrong", &hashed).await.unwrap());
    }
}
