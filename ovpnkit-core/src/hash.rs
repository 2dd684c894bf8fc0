//! Salted one-way password hashing.
//!
//! Every stored credential, portal and VPN alike, goes through the same
//! scheme: `sha256$<salt-hex>$<digest-hex>` with a fresh 16-byte random salt
//! and `digest = SHA-256(salt || password)`. There is no plaintext
//! comparison path anywhere in the engine.

use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

const SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

/// Hashes a password with a fresh random salt.
///
/// # Panics
///
/// Panics if the system's random number generator fails.
#[must_use]
pub fn hash_password(password: &SecretString) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = digest_with_salt(&salt, password.expose_secret());
    format!("{SCHEME}${}${}", hex::encode(salt), hex::encode(digest))
}

/// Verifies a password against a stored hash.
///
/// Returns `false` for hashes in an unrecognized format rather than erroring;
/// a corrupt entry must never authenticate.
#[must_use]
pub fn verify_password(password: &SecretString, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(salt_hex), Some(digest_hex), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let digest = digest_with_salt(&salt, password.expose_secret());
    hex::encode(digest) == digest_hex
}

fn digest_with_salt(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_hash_verify_round_trip() {
        let stored = hash_password(&secret("secret1"));
        assert!(stored.starts_with("sha256$"));
        assert!(verify_password(&secret("secret1"), &stored));
        assert!(!verify_password(&secret("secret2"), &stored));
    }

    #[test]
    fn test_salts_differ_between_hashes() {
        let a = hash_password(&secret("same"));
        let b = hash_password(&secret("same"));
        assert_ne!(a, b);
        assert!(verify_password(&secret("same"), &a));
        assert!(verify_password(&secret("same"), &b));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password(&secret("pw"), ""));
        assert!(!verify_password(&secret("pw"), "plaintextpw"));
        assert!(!verify_password(&secret("pw"), "md5$abcd$1234"));
        assert!(!verify_password(&secret("pw"), "sha256$nothex$1234"));
        assert!(!verify_password(&secret("pw"), "sha256$$$$"));
    }
}
