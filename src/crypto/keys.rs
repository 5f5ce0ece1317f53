use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{KEY_LEN, aead, secure_random, to_hex};
use crate::error::{Result, VaultError};
use crate::format::{self, Envelope};
use crate::storage::Storage;

/// Owns the vault's single symmetric key.
///
/// The key is generated on first use, persisted, and from then on loaded
/// unchanged. Losing the key file makes every existing history entry
/// unrecoverable; there is no rotation.
pub struct KeyManager {
    path: PathBuf,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("path", &self.path)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl KeyManager {
    /// Loads the key at `path`, generating and persisting one if absent.
    ///
    /// Idempotent: as long as the file is intact every call returns the same
    /// key. If another caller creates the file concurrently, its key wins and
    /// is loaded here.
    pub fn ensure_key(path: impl Into<PathBuf>) -> Result<Self> {
        let storage = Storage::new(path.into());

        if !storage.exists() {
            let mut fresh = Zeroizing::new([0u8; KEY_LEN]);
            secure_random(fresh.as_mut_slice())?;

            if storage.save_new(fresh.as_slice())? {
                info!(path = %storage.path().display(), "generated new encryption key");
                return Ok(Self {
                    path: storage.path().to_path_buf(),
                    key: fresh,
                });
            }
            debug!("key file appeared concurrently, loading it");
        }

        Self::load(&storage)
    }

    fn load(storage: &Storage) -> Result<Self> {
        let data = Zeroizing::new(storage.load()?);
        if data.len() != KEY_LEN {
            return Err(VaultError::Encoding(format!(
                "key file {} has {} bytes, expected {KEY_LEN}",
                storage.path().display(),
                data.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&data);
        debug!(path = %storage.path().display(), "loaded encryption key");

        Ok(Self {
            path: storage.path().to_path_buf(),
            key,
        })
    }

    /// Path of the key file this manager was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Short, non-secret identifier of the key: hex of the first 8 bytes
    /// of its SHA-256.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key.as_slice());
        to_hex(&digest[..8])
    }

    /// Authenticated encryption with a fresh nonce; output is a v1 envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let (ciphertext, nonce) = aead::encrypt(&self.key, plaintext)?;
        format::serialize(&Envelope::new(nonce, ciphertext))
    }

    /// Reverses [`encrypt`](Self::encrypt).
    ///
    /// Anything that was not produced by `encrypt` under this key, including
    /// a malformed envelope, fails with [`VaultError::Authentication`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let envelope = format::parse(data).map_err(|_| VaultError::Authentication)?;
        aead::decrypt(&self.key, envelope.nonce(), envelope.ciphertext())
    }
}
