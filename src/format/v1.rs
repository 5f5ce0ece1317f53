//! Envelope format v1.
//!
//! ```text
//! VERSION (1) | NONCE (24) | CIPHERTEXT + TAG (>= 16)
//! ```

use super::{Envelope, VER_LEN};
use crate::crypto::NONCE_LEN;
use crate::error::{Result, VaultError};

pub const VERSION_V1: u8 = 1;

/// Poly1305 tag length; every valid ciphertext is at least this long.
const TAG_LEN: usize = 16;

const MIN_LEN: usize = VER_LEN + NONCE_LEN + TAG_LEN;

pub(crate) fn parse(data: &[u8]) -> Result<Envelope> {
    if data.len() < MIN_LEN {
        return Err(VaultError::Encoding("envelope too short for v1".into()));
    }

    let mut offset = VER_LEN;

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&data[offset..offset + NONCE_LEN]);
    offset += NONCE_LEN;

    Ok(Envelope::new(nonce, data[offset..].to_vec()))
}

pub(crate) fn serialize(envelope: &Envelope) -> Vec<u8> {
    let mut buf = Vec::with_capacity(VER_LEN + NONCE_LEN + envelope.ciphertext().len());
    buf.push(VERSION_V1);
    buf.extend_from_slice(envelope.nonce());
    buf.extend_from_slice(envelope.ciphertext());
    buf
}
