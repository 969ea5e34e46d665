//! Password hashing and token key generation.
//!
//! Passwords are stored as `hmac-sha256$<iterations>$<salt-hex>$<digest-hex>`:
//! an HMAC-SHA256 keyed on a random salt, iterated to slow down offline
//! guessing. OAuth accounts carry no usable password and always fail
//! verification.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::base::types::Res;

type HmacSha256 = Hmac<Sha256>;

/// Scheme label stored in encoded hashes.
const SCHEME: &str = "hmac-sha256";

/// Iteration count for newly hashed passwords.
const ITERATIONS: u32 = 24_000;

/// Marker stored for accounts that authenticate externally (OAuth).
pub const UNUSABLE_PASSWORD: &str = "!";

/// Hash a password for storage.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let digest = derive(password, &salt, ITERATIONS);

    format!("{SCHEME}${ITERATIONS}${}${}", hex::encode(salt), hex::encode(digest))
}

/// Verify a password against a stored hash.
///
/// Returns `false` for unusable or malformed hashes rather than erroring, so
/// a corrupt record behaves like a wrong password.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    if encoded.is_empty() || encoded.starts_with(UNUSABLE_PASSWORD) {
        return false;
    }

    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    if scheme != SCHEME {
        return false;
    }

    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };

    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(digest)) else {
        return false;
    };

    let actual = derive(password, &salt, iterations);

    constant_time_eq(&actual, &expected)
}

/// Generate an opaque 40-character token key.
pub fn generate_token_key() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());

    let mut key = hex::encode(hasher.finalize());
    key.truncate(40);
    key
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut block = password.as_bytes().to_vec();

    for _ in 0..iterations {
        let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC accepts any key length");
        mac.update(&block);
        block = mac.finalize().into_bytes().to_vec();
    }

    block
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }

    diff == 0
}

/// Validate a requested password meets the minimum bar.
pub fn validate_password(password: &str) -> Res<()> {
    if password.len() < 8 {
        return Err(anyhow::anyhow!("Password must be at least 8 characters long"));
    }

    Ok(())
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_roundtrip() {
        let encoded = hash_password("hunter22");

        assert!(encoded.starts_with("hmac-sha256$"));
        assert!(verify_password("hunter22", &encoded));
        assert!(!verify_password("hunter23", &encoded));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same-password");
        let b = hash_password("same-password");

        assert_ne!(a, b);
        assert!(verify_password("same-password", &a));
        assert!(verify_password("same-password", &b));
    }

    #[test]
    fn test_unusable_password_never_verifies() {
        assert!(!verify_password("anything", UNUSABLE_PASSWORD));
        assert!(!verify_password("", UNUSABLE_PASSWORD));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("pw", "not-a-hash"));
        assert!(!verify_password("pw", "hmac-sha256$abc$zz$zz"));
        assert!(!verify_password("pw", "md5$1$00$00"));
    }

    #[test]
    fn test_token_keys_are_unique_and_sized() {
        let a = generate_token_key();
        let b = generate_token_key();

        assert_eq!(a.len(), 40);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("longenough").is_ok());
        assert!(validate_password("short").is_err());
    }
}
