use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{HASH_LEN, MEM_LEN, PAR_LEN, SALT_LEN, TIME_LEN, constant_time_eq, from_hex, to_hex};
use crate::error::{Result, VaultError};

/// Length of an unsalted SHA-256 digest as written by older credential files.
const LEGACY_DIGEST_LEN: usize = 32;
/// Encoded length of an Argon2id credential before hex encoding.
const ARGON2_RECORD_LEN: usize = MEM_LEN + TIME_LEN + PAR_LEN + SALT_LEN + HASH_LEN;

/// Upper bounds for Argon2 costs, whether from flags or from a stored hash.
pub const MAX_MEM_COST_KIB: u32 = 4 * 1024 * 1024; // 4 GiB
pub const MAX_TIME_COST: u32 = 64;
pub const MAX_PARALLELISM: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    mem_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            // default memory cost
            mem_cost_kib: 64 * 1024, // 64 MiB
            // default number of itereations
            time_cost: 3,
            // default number of threads
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Result<Self> {
        let params = Self {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn mem_cost_kib(&self) -> u32 {
        self.mem_cost_kib
    }

    pub fn time_cost(&self) -> u32 {
        self.time_cost
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(VaultError::Validation(msg.to_string()));
        if self.mem_cost_kib < 8 {
            return invalid("argon2 memory cost too low");
        }
        if self.time_cost < 1 {
            return invalid("argon2 time cost must be >= 1");
        }
        if self.parallelism < 1 {
            return invalid("argon2 parallelism must be >= 1");
        }
        if self.mem_cost_kib > MAX_MEM_COST_KIB {
            return invalid("argon2 memory cost exceeds 4 GiB");
        }
        if self.time_cost > MAX_TIME_COST {
            return invalid("argon2 time cost too high");
        }
        if self.parallelism > MAX_PARALLELISM {
            return invalid("argon2 parallelism too high");
        }
        if self.mem_cost_kib < 8 * self.parallelism {
            return invalid("argon2 memory cost must be at least 8 * parallelism");
        }
        Ok(())
    }
}

fn argon2_hash(password: &str, salt: &[u8], kdf: KdfParams) -> Result<Zeroizing<[u8; HASH_LEN]>> {
    kdf.validate()?;

    let params = Params::new(
        kdf.mem_cost_kib,
        kdf.time_cost,
        kdf.parallelism,
        Some(HASH_LEN),
    )
    .map_err(|e| VaultError::Crypto(format!("failed to construct Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = Zeroizing::new([0u8; HASH_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut out[..])
        .map_err(|e| VaultError::Crypto(format!("argon2 hashing failed {e}")))?;

    Ok(out)
}

fn sha256(password: &str) -> [u8; LEGACY_DIGEST_LEN] {
    let mut digest = [0u8; LEGACY_DIGEST_LEN];
    digest.copy_from_slice(&Sha256::digest(password.as_bytes()));
    digest
}

/// A stored one-way password hash.
///
/// New hashes are salted Argon2id. Unsalted SHA-256 digests are still
/// accepted for verification so credential files from earlier releases
/// keep working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordHash {
    Argon2id {
        kdf: KdfParams,
        salt: [u8; SALT_LEN],
        hash: [u8; HASH_LEN],
    },
    LegacySha256([u8; LEGACY_DIGEST_LEN]),
}

impl PasswordHash {
    /// Hashes `password` under a freshly generated salt.
    pub fn compute(password: &str, kdf: KdfParams) -> Result<Self> {
        let salt = super::generate_salt()?;
        let hash = argon2_hash(password, &salt, kdf)?;
        Ok(PasswordHash::Argon2id {
            kdf,
            salt,
            hash: *hash,
        })
    }

    /// Unsalted SHA-256, the format written by older credential files.
    pub fn legacy(password: &str) -> Self {
        PasswordHash::LegacySha256(sha256(password))
    }

    pub fn verify(&self, password: &str) -> Result<bool> {
        match self {
            PasswordHash::Argon2id { kdf, salt, hash } => {
                let candidate = argon2_hash(password, salt, *kdf)?;
                Ok(constant_time_eq(&candidate[..], hash))
            }
            PasswordHash::LegacySha256(digest) => {
                Ok(constant_time_eq(&sha256(password), digest))
            }
        }
    }

    /// Fixed-length lowercase hex: 120 characters for Argon2id, 64 for legacy.
    ///
    /// Argon2id layout before encoding:
    /// ```text
    /// MEM_COST (4) | TIME_COST (4) | PARALLELISM (4) | SALT (16) | HASH (32)
    /// ```
    pub fn to_hex(&self) -> String {
        match self {
            PasswordHash::Argon2id { kdf, salt, hash } => {
                let mut buf = Vec::with_capacity(ARGON2_RECORD_LEN);
                buf.extend_from_slice(&kdf.mem_cost_kib.to_le_bytes());
                buf.extend_from_slice(&kdf.time_cost.to_le_bytes());
                buf.extend_from_slice(&kdf.parallelism.to_le_bytes());
                buf.extend_from_slice(salt);
                buf.extend_from_slice(hash);
                to_hex(&buf)
            }
            PasswordHash::LegacySha256(digest) => to_hex(digest),
        }
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = from_hex(s)
            .ok_or_else(|| VaultError::Encoding("password hash is not valid hex".into()))?;

        match bytes.len() {
            LEGACY_DIGEST_LEN => {
                let digest = bytes
                    .try_into()
                    .map_err(|_| VaultError::Encoding("invalid digest length".into()))?;
                Ok(PasswordHash::LegacySha256(digest))
            }
            ARGON2_RECORD_LEN => {
                let read_u32 = |offset: usize| {
                    let mut field = [0u8; 4];
                    field.copy_from_slice(&bytes[offset..offset + 4]);
                    u32::from_le_bytes(field)
                };
                let mut offset = 0;
                let mem_cost = read_u32(offset);
                offset += MEM_LEN;
                let time_cost = read_u32(offset);
                offset += TIME_LEN;
                let parallelism = read_u32(offset);
                offset += PAR_LEN;

                let mut salt = [0u8; SALT_LEN];
                salt.copy_from_slice(&bytes[offset..offset + SALT_LEN]);
                offset += SALT_LEN;

                let mut hash = [0u8; HASH_LEN];
                hash.copy_from_slice(&bytes[offset..offset + HASH_LEN]);

                let kdf = KdfParams::new(mem_cost, time_cost, parallelism).map_err(|e| {
                    VaultError::Encoding(format!("stored argon2 parameters rejected: {e}"))
                })?;

                Ok(PasswordHash::Argon2id { kdf, salt, hash })
            }
            n => Err(VaultError::Encoding(format!(
                "unexpected password hash length: {n} bytes"
            ))),
        }
    }
}
