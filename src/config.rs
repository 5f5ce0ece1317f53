use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::crypto::KdfParams;
use crate::error::{Result, VaultError};

const KEY_FILE: &str = "secret.key";
const USERS_FILE: &str = "users.txt";

/// Where a vault lives and how it hashes passwords.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    data_dir: PathBuf,
    kdf: KdfParams,
}

impl VaultConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            kdf: KdfParams::default(),
        }
    }

    /// Configuration rooted at the platform data directory.
    pub fn from_default_dir() -> Result<Self> {
        Ok(Self::new(default_data_dir()?))
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    pub fn key_file(&self) -> PathBuf {
        self.data_dir.join(KEY_FILE)
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join(USERS_FILE)
    }

    /// Directory holding the per-user `<username>_history.txt` files.
    pub fn history_dir(&self) -> &Path {
        &self.data_dir
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "neurovault").ok_or_else(|| {
        VaultError::Validation("could not determine platform directories".into())
    })?;

    Ok(project_dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_data_dir() {
        let config = VaultConfig::new("/tmp/nv");
        assert_eq!(config.key_file(), Path::new("/tmp/nv/secret.key"));
        assert_eq!(config.users_file(), Path::new("/tmp/nv/users.txt"));
        assert_eq!(config.history_dir(), Path::new("/tmp/nv"));
    }

    #[test]
    fn with_kdf_overrides_default() {
        let kdf = KdfParams::new(1024, 1, 1).unwrap();
        let config = VaultConfig::new("x").with_kdf(kdf);
        assert_eq!(config.kdf().mem_cost_kib(), 1024);
        assert_eq!(VaultConfig::new("x").kdf().mem_cost_kib(), 65536);
    }
}
