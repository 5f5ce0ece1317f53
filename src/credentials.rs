//! Username/password identity store.
//!
//! Backed by a line-oriented file of `username,hashhex` records. Lines are
//! only ever appended.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::crypto::{KdfParams, PasswordHash};
use crate::error::{Result, VaultError};
use crate::storage::Storage;

/// Longest accepted username.
pub const MAX_USERNAME_LEN: usize = 64;

/// Checks that `username` is non-empty and safe to embed in a file name.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(VaultError::Validation("username must not be empty".into()));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(VaultError::Validation(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if username.starts_with('.') {
        return Err(VaultError::Validation("username must not start with '.'".into()));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(VaultError::Validation(
            "username may only contain letters, digits, '_', '-' and '.'".into(),
        ));
    }
    Ok(())
}

#[derive(Debug)]
struct UserEntry {
    username: String,
    hash: PasswordHash,
}

impl UserEntry {
    fn parse(line: &str, line_no: usize) -> Result<Self> {
        let (username, hash) = line.split_once(',').ok_or_else(|| {
            VaultError::Encoding(format!("credential line {line_no} has no separator"))
        })?;
        let hash = PasswordHash::from_hex(hash.trim())
            .map_err(|e| VaultError::Encoding(format!("credential line {line_no}: {e}")))?;
        Ok(Self {
            username: username.to_string(),
            hash,
        })
    }
}

/// Registers and authenticates users.
///
/// Safe to share between threads: the check-then-append in
/// [`register`](Self::register) runs under a lock, so two registrations of
/// the same name yield exactly one success.
#[derive(Debug)]
pub struct CredentialStore {
    storage: Storage,
    kdf: KdfParams,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, kdf: KdfParams) -> Self {
        Self {
            storage: Storage::new(path.into()),
            kdf,
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &std::path::Path {
        self.storage.path()
    }

    fn load(&self) -> Result<Vec<UserEntry>> {
        self.storage
            .read_lines()?
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| UserEntry::parse(line, i + 1))
            .collect()
    }

    fn find(&self, username: &str) -> Result<Option<UserEntry>> {
        Ok(self.load()?.into_iter().find(|u| u.username == username))
    }

    /// Adds a user.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty or unsafe username or an empty password,
    /// `DuplicateUser` if the name is taken, `Storage` on I/O failure.
    pub fn register(&self, username: &str, password: &str) -> Result<()> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(VaultError::Validation("password must not be empty".into()));
        }

        // hashing is slow; keep it outside the lock
        let hash = PasswordHash::compute(password, self.kdf)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.find(username)?.is_some() {
            return Err(VaultError::DuplicateUser(username.to_string()));
        }
        self.storage
            .append_line(&format!("{},{}", username, hash.to_hex()))?;

        info!(username, "registered user");
        Ok(())
    }

    /// Returns `true` only if `username` exists and `password` matches.
    ///
    /// Unknown users and wrong passwords both yield `Ok(false)`.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        let Some(entry) = self.find(username)? else {
            // spend the same hashing time as for a real user
            let _ = PasswordHash::compute(password, self.kdf)?;
            debug!("authentication rejected");
            return Ok(false);
        };
        let ok = entry.hash.verify(password)?;
        if !ok {
            debug!("authentication rejected");
        }
        Ok(ok)
    }

    pub fn contains(&self, username: &str) -> Result<bool> {
        Ok(self.find(username)?.is_some())
    }

    /// Number of registered users.
    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
