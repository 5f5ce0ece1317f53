//! Binary envelope for a single encrypted history entry.
//!
//! Provides version-aware parsing and serialization. The envelope is what
//! `KeyManager::encrypt` returns and what the ledger stores (base64url, one
//! per line).

use crate::crypto::NONCE_LEN;
use crate::error::{Result, VaultError};

pub mod v1;

/// Length of version field.
pub const VER_LEN: usize = 1;
/// Latest format version
pub const CURRENT_VERSION: u8 = v1::VERSION_V1;

/// A parsed envelope: nonce plus AEAD ciphertext (tag included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Envelope {
    version: u8,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn new(nonce: [u8; NONCE_LEN], ciphertext: Vec<u8>) -> Self {
        Self {
            version: CURRENT_VERSION,
            nonce,
            ciphertext,
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}

/// Parses an envelope, dispatching on the leading version byte.
///
/// # Errors
///
/// Returns an encoding error if the data is empty, the version is unknown,
/// or the version-specific layout does not fit.
pub(crate) fn parse(data: &[u8]) -> Result<Envelope> {
    let Some(&version) = data.first() else {
        return Err(VaultError::Encoding("empty envelope".into()));
    };

    match version {
        v1::VERSION_V1 => v1::parse(data),
        v => Err(VaultError::Encoding(format!("unsupported envelope version: {v}"))),
    }
}

/// Serializes an envelope to bytes.
pub(crate) fn serialize(envelope: &Envelope) -> Result<Vec<u8>> {
    match envelope.version() {
        v1::VERSION_V1 => Ok(v1::serialize(envelope)),
        v => Err(VaultError::Encoding(format!("unsupported envelope version: {v}"))),
    }
}
