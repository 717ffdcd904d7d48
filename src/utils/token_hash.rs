// One-way fingerprint of opaque refresh tokens.
// The digest doubles as the session record's token_hash field and as the
// key component of the reverse index, so it must stay deterministic.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// SHA-256 of the token's UTF-8 bytes, base64-encoded
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    STANDARD.encode(hasher.finalize())
}
