// ── Login password derivation ──
//
// The bridge checks `sha256_hex(salt ++ sha256_hex(device_id ++ auth_key))`
// where `++` is UTF-8 byte concatenation and the hex digests are lowercase.
// The salt is client-chosen per login and travels with the request.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Salt length used by the login flow.
pub const DEFAULT_SALT_LEN: usize = 32;

/// Derive the login password for `LoginRequest`.
pub fn password_hash(device_id: &str, auth_key: &str, salt: &str) -> String {
    let inner = sha256_hex(format!("{device_id}{auth_key}").as_bytes());
    sha256_hex(format!("{salt}{inner}").as_bytes())
}

/// Random `[A-Za-z0-9]` salt drawn from the OS entropy source.
pub fn generate_salt(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = password_hash("BR-1", "key", "saltsalt");
        let b = password_hash("BR-1", "key", "saltsalt");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_is_lowercase_hex_of_sha256_width() {
        let hash = password_hash("BR-1", "key", "saltsalt");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn every_input_affects_the_hash() {
        let base = password_hash("BR-1", "key", "salt");
        assert_ne!(base, password_hash("BR-2", "key", "salt"));
        assert_ne!(base, password_hash("BR-1", "other", "salt"));
        assert_ne!(base, password_hash("BR-1", "key", "pepper"));
    }

    #[test]
    fn outer_hash_covers_salt_and_inner_digest() {
        let inner = sha256_hex("BR-1key".as_bytes());
        let expected = sha256_hex(format!("salt{inner}").as_bytes());
        assert_eq!(password_hash("BR-1", "key", "salt"), expected);
    }

    #[test]
    fn salt_has_requested_length_and_charset() {
        for len in [0, 1, 32, 64] {
            let salt = generate_salt(len);
            assert_eq!(salt.len(), len);
            assert!(salt.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn salts_are_not_repeated() {
        assert_ne!(generate_salt(32), generate_salt(32));
    }
}
