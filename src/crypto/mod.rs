//! Cryptographic primitives for the vault.
//!
//! Provides authenticated encryption, password hashing and key lifecycle.

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{generate_salt, secure_random};
pub use kdf::{KdfParams, PasswordHash};
pub use keys::KeyManager;

/// Length of the salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the nonce (24 bytes for XChaCha20-Poly1305).
pub const NONCE_LEN: usize = 24;
/// Length of the encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of an Argon2id password hash output.
pub const HASH_LEN: usize = 32;
/// Length of the memory cost field (4 bytes).
pub const MEM_LEN: usize = 4;
/// Length of the time cost field (4 bytes).
pub const TIME_LEN: usize = 4;
/// Length of the parallelism field (4 bytes).
pub const PAR_LEN: usize = 4;

/// Lowercase hex encoding.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decodes lowercase or uppercase hex; `None` on odd length or bad digits.
pub(crate) fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Equality check whose running time does not depend on where inputs differ.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let bytes = [0u8, 1, 0xab, 0xff];
        assert_eq!(to_hex(&bytes), "0001abff");
        assert_eq!(from_hex("0001ABff").unwrap(), bytes);
    }

    #[test]
    fn hex_rejects_garbage() {
        assert!(from_hex("abc").is_none());
        assert!(from_hex("zz").is_none());
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
