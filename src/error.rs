use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Coarse classification of a [`VaultError`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    DuplicateUser,
    Authentication,
    Storage,
    Encoding,
    Crypto,
    Classification,
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("{0}")]
    Validation(String),

    #[error("user '{0}' already exists")]
    DuplicateUser(String),

    /// Login failure. Deliberately says nothing about which part was wrong.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Ciphertext was not produced by the current key or has been altered.
    #[error("authentication failed: wrong key or corrupted data")]
    Authentication,

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    /// The image classifier could not produce a diagnosis.
    #[error("classification failed: {0}")]
    Classification(String),

    /// Failure of a single history entry, 0-based in append order.
    #[error("history entry {index}: {source}")]
    Entry {
        index: usize,
        #[source]
        source: Box<VaultError>,
    },
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Validation(_) => ErrorKind::Validation,
            VaultError::DuplicateUser(_) => ErrorKind::DuplicateUser,
            VaultError::InvalidCredentials | VaultError::Authentication => {
                ErrorKind::Authentication
            }
            VaultError::Storage { .. } => ErrorKind::Storage,
            VaultError::Encoding(_) => ErrorKind::Encoding,
            VaultError::Crypto(_) => ErrorKind::Crypto,
            VaultError::Classification(_) => ErrorKind::Classification,
            VaultError::Entry { source, .. } => source.kind(),
        }
    }

    pub(crate) fn storage(path: &Path, source: io::Error) -> Self {
        VaultError::Storage {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn entry(index: usize, source: VaultError) -> Self {
        VaultError::Entry {
            index,
            source: Box::new(source),
        }
    }
}

pub type Result<T, E = VaultError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_kind_follows_source() {
        let err = VaultError::entry(3, VaultError::Authentication);
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(
            err.to_string(),
            "history entry 3: authentication failed: wrong key or corrupted data"
        );
    }

    #[test]
    fn invalid_credentials_does_not_name_the_user() {
        let msg = VaultError::InvalidCredentials.to_string();
        assert_eq!(msg, "invalid username or password");
        assert_eq!(VaultError::InvalidCredentials.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn storage_error_mentions_path() {
        let err = VaultError::storage(
            Path::new("/tmp/users.txt"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.to_string().contains("/tmp/users.txt"));
    }
}
