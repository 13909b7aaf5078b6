//! Credential hashing.
//!
//! PBKDF2-HMAC-SHA256 with a per-user random salt. The encoded form keeps
//! the round count so the work factor can be raised without invalidating
//! existing hashes:
//!
//! `pbkdf2-sha256$<rounds>$<salt hex>$<hash hex>`

use rand::RngCore;
use sha2::Sha256;

const SCHEME: &str = "pbkdf2-sha256";

/// Salt byte length.
const SALT_BYTES: usize = 16;

/// Derived key length.
const HASH_BYTES: usize = 32;

/// Fixed salt for [`PasswordHasher::burn`].
const BURN_SALT: [u8; SALT_BYTES] = [0u8; SALT_BYTES];

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    rounds: u32,
}

impl PasswordHasher {
    pub fn new(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(1),
        }
    }

    pub fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let derived = derive(password, &salt, self.rounds);
        format!(
            "{SCHEME}${}${}${}",
            self.rounds,
            hex::encode(salt),
            hex::encode(derived)
        )
    }

    /// Unknown schemes and malformed encodings verify as `false`.
    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        let mut parts = encoded.split('$');
        let (Some(scheme), Some(rounds), Some(salt), Some(expected), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return false;
        };
        if scheme != SCHEME {
            return false;
        }
        let Ok(rounds) = rounds.parse::<u32>() else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
            return false;
        };
        if rounds == 0 {
            return false;
        }

        let derived = derive(password, &salt, rounds);
        constant_time_eq(&derived, &expected)
    }

    /// Spend one hash so a lookup miss costs the same as a mismatch.
    pub fn burn(&self, password: &str) {
        let _ = derive(password, &BURN_SALT, self.rounds);
    }
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut out);
    out
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
