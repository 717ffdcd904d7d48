// Password hashing and verification using bcrypt.
// The cost factor comes from configuration and is validated to be >= 10 at
// startup; verification is constant-time within the bcrypt library.

use thiserror::Error;

/// Errors that can occur during password operations
#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingError(String),

    #[error("Failed to verify password: {0}")]
    VerificationError(String),
}

/// Hash a password with the given bcrypt cost
pub fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    bcrypt::hash(password, cost).map_err(|e| PasswordError::HashingError(e.to_string()))
}

/// Verify a password against a stored bcrypt hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    bcrypt::verify(password, hash).map_err(|e| PasswordError::VerificationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimum bcrypt cost keeps the test suite fast
    const TEST_COST: u32 = 4;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("ValidPass@123", TEST_COST).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("ValidPass@123", &hash).unwrap());
        assert!(!verify_password("WrongPass@123", &hash).unwrap());
    }

    #[test]
    fn test_same_password_different_hashes() {
        let hash1 = hash_password("ValidPass@123", TEST_COST).unwrap();
        let hash2 = hash_password("ValidPass@123", TEST_COST).unwrap();
        assert_ne!(hash1, hash2);
        assert!(verify_password("ValidPass@123", &hash1).unwrap());
        assert!(verify_password("ValidPass@123", &hash2).unwrap());
    }

    #[test]
    fn test_garbage_hash_errors() {
        assert!(verify_password("anything", "not-a-bcrypt-hash").is_err());
    }
}
