mod collaborators;
mod config;
mod credentials;
mod crypto;
mod error;
mod format;
mod ledger;
mod record;
mod report;
mod storage;

pub use crate::collaborators::{
    FixedDiagnosis, ImageClassifier, PLACEHOLDER_FINDING, PlaceholderClassifier, TextResponder,
};
pub use crate::config::{VaultConfig, default_data_dir};
pub use crate::credentials::{CredentialStore, MAX_USERNAME_LEN, validate_username};
pub use crate::crypto::{KdfParams, KeyManager, PasswordHash};
pub use crate::error::{ErrorKind, Result, VaultError};
pub use crate::ledger::EncryptedLedger;
pub use crate::record::{MAX_AGE, PatientInfo, Record, ScanType};
pub use crate::report::{DEFAULT_TITLE, ReportGenerator, data_uri, report_file_name};
pub use crate::storage::Storage;

use std::fs;
use std::sync::Arc;

use tracing::info;

/// Proof of a successful login.
///
/// Only [`NeuroVault::login`] hands these out, so every history operation
/// is tied to a user who presented the right password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    username: String,
}

impl Session {
    pub fn username(&self) -> &str {
        &self.username
    }
}

/// One vault on disk: a key, a credential file and the per-user histories.
#[derive(Debug)]
pub struct NeuroVault {
    config: VaultConfig,
    keys: Arc<KeyManager>,
    users: CredentialStore,
    ledger: EncryptedLedger,
    reports: ReportGenerator,
}

impl NeuroVault {
    /// Opens the vault described by `config`, creating the data directory
    /// and the encryption key on first use.
    pub fn open(config: VaultConfig) -> Result<Self> {
        fs::create_dir_all(config.data_dir())
            .map_err(|e| VaultError::storage(config.data_dir(), e))?;

        let keys = Arc::new(KeyManager::ensure_key(config.key_file())?);
        let users = CredentialStore::new(config.users_file(), config.kdf());
        let ledger = EncryptedLedger::new(config.history_dir(), Arc::clone(&keys));

        info!(data_dir = %config.data_dir().display(), "opened vault");

        Ok(Self {
            config,
            keys,
            users,
            ledger,
            reports: ReportGenerator::default(),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn key_fingerprint(&self) -> String {
        self.keys.fingerprint()
    }

    pub fn user_count(&self) -> Result<usize> {
        self.users.len()
    }

    pub fn is_registered(&self, username: &str) -> Result<bool> {
        self.users.contains(username)
    }

    pub fn register(&self, username: &str, password: &str) -> Result<()> {
        self.users.register(username, password)
    }

    /// Checks the password and returns a session for `username`.
    ///
    /// An unknown user and a wrong password fail identically with
    /// [`VaultError::InvalidCredentials`].
    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        if !self.users.authenticate(username, password)? {
            return Err(VaultError::InvalidCredentials);
        }
        info!(username, "login succeeded");
        Ok(Session {
            username: username.to_string(),
        })
    }

    /// Classifies `image`, stamps a record with the current time, stores it
    /// in the session user's history and returns it.
    pub fn record_analysis(
        &self,
        session: &Session,
        info: PatientInfo,
        classifier: &dyn ImageClassifier,
        image: &[u8],
    ) -> Result<Record> {
        info.validate()?;
        let diagnosis = classifier
            .classify(image)
            .map_err(|e| VaultError::Classification(format!("{e:#}")))?;

        let record = Record::new(info, diagnosis)?;
        self.ledger.append(&session.username, &record)?;
        Ok(record)
    }

    pub fn append(&self, session: &Session, record: &Record) -> Result<()> {
        self.ledger.append(&session.username, record)
    }

    /// The session user's records, oldest first. Fails on the first damaged
    /// entry.
    pub fn history(&self, session: &Session) -> Result<Vec<Record>> {
        self.ledger.read_all(&session.username)
    }

    /// Same as [`history`](Self::history), most recent first.
    pub fn history_newest_first(&self, session: &Session) -> Result<Vec<Record>> {
        let mut records = self.history(session)?;
        records.reverse();
        Ok(records)
    }

    /// Per-entry outcome of reading the session user's history, oldest first.
    pub fn verify_history(&self, session: &Session) -> Result<Vec<Result<Record>>> {
        self.ledger.read_each(&session.username)
    }

    pub fn report(&self, info: &PatientInfo, diagnosis: &str) -> Result<Vec<u8>> {
        info.validate()?;
        Ok(self.reports.generate(&info.labelled_fields(), diagnosis))
    }

    pub fn report_for(&self, record: &Record) -> Vec<u8> {
        self.reports.generate_for(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn vault(dir: &tempfile::TempDir) -> NeuroVault {
        let config = VaultConfig::new(dir.path().join("secure_data"))
            .with_kdf(KdfParams::new(1024, 1, 1).unwrap());
        NeuroVault::open(config).unwrap()
    }

    fn bob() -> PatientInfo {
        PatientInfo {
            name: "Bob".into(),
            age: 45,
            scan_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            scan_type: ScanType::Mri,
            physician: "Dr. Grey".into(),
        }
    }

    #[test]
    fn register_login_append_read_then_tamper() {
        let dir = tempdir().unwrap();
        let vault = vault(&dir);

        vault.register("bob", "secret1").unwrap();
        let session = vault.login("bob", "secret1").unwrap();
        assert_eq!(session.username(), "bob");

        let record = Record::new(bob(), "Possible abnormality in frontal lobe.").unwrap();
        vault.append(&session, &record).unwrap();
        assert_eq!(vault.history(&session).unwrap(), vec![record]);

        let path = dir.path().join("secure_data").join("bob_history.txt");
        let mut line = std::fs::read_to_string(&path).unwrap();
        let flipped = if line.starts_with('A') { "B" } else { "A" };
        line.replace_range(0..1, flipped);
        std::fs::write(&path, line).unwrap();

        match vault.history(&session) {
            Err(VaultError::Entry { index: 0, source }) => {
                assert_eq!(source.kind(), ErrorKind::Authentication)
            }
            other => panic!("expected tampered entry error, got: {other:?}"),
        }
    }

    #[test]
    fn login_failure_hides_which_part_was_wrong() {
        let dir = tempdir().unwrap();
        let vault = vault(&dir);
        vault.register("bob", "secret1").unwrap();

        let wrong_pw = vault.login("bob", "nope").unwrap_err();
        let no_user = vault.login("alice", "secret1").unwrap_err();
        assert_eq!(wrong_pw.to_string(), no_user.to_string());
        assert!(matches!(wrong_pw, VaultError::InvalidCredentials));
    }

    #[test]
    fn record_analysis_uses_classifier_and_stores_result() {
        let dir = tempdir().unwrap();
        let vault = vault(&dir);
        vault.register("bob", "secret1").unwrap();
        let session = vault.login("bob", "secret1").unwrap();

        let record = vault
            .record_analysis(&session, bob(), &PlaceholderClassifier, b"\x89PNG")
            .unwrap();
        assert_eq!(record.diagnosis(), PLACEHOLDER_FINDING);
        assert_eq!(vault.history(&session).unwrap(), vec![record]);
    }

    #[test]
    fn classifier_failure_stores_nothing() {
        let dir = tempdir().unwrap();
        let vault = vault(&dir);
        vault.register("bob", "secret1").unwrap();
        let session = vault.login("bob", "secret1").unwrap();

        let err = vault
            .record_analysis(&session, bob(), &PlaceholderClassifier, &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Classification);
        assert!(vault.history(&session).unwrap().is_empty());
    }

    #[test]
    fn newest_first_reverses_append_order() {
        let dir = tempdir().unwrap();
        let vault = vault(&dir);
        vault.register("bob", "secret1").unwrap();
        let session = vault.login("bob", "secret1").unwrap();

        for finding in ["first", "second", "third"] {
            let record = Record::new(bob(), finding).unwrap();
            vault.append(&session, &record).unwrap();
        }

        let newest: Vec<_> = vault
            .history_newest_first(&session)
            .unwrap()
            .iter()
            .map(|r| r.diagnosis().to_string())
            .collect();
        assert_eq!(newest, ["third", "second", "first"]);
        assert_eq!(vault.verify_history(&session).unwrap().len(), 3);
    }

    #[test]
    fn reopening_keeps_users_key_and_history() {
        let dir = tempdir().unwrap();
        let fingerprint = {
            let vault = vault(&dir);
            vault.register("bob", "secret1").unwrap();
            let session = vault.login("bob", "secret1").unwrap();
            vault
                .append(&session, &Record::new(bob(), "kept").unwrap())
                .unwrap();
            vault.key_fingerprint()
        };

        let vault = vault(&dir);
        assert_eq!(vault.key_fingerprint(), fingerprint);
        assert_eq!(vault.user_count().unwrap(), 1);
        assert!(vault.is_registered("bob").unwrap());
        assert!(!vault.is_registered("alice").unwrap());
        let session = vault.login("bob", "secret1").unwrap();
        assert_eq!(vault.history(&session).unwrap()[0].diagnosis(), "kept");
    }

    #[test]
    fn report_validates_patient_info() {
        let dir = tempdir().unwrap();
        let vault = vault(&dir);

        let mut info = bob();
        assert!(vault.report(&info, "ok").unwrap().starts_with(b"%PDF-1.4"));
        info.age = 200;
        assert_eq!(
            vault.report(&info, "ok").unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn report_for_record_matches_report_of_its_fields() {
        let dir = tempdir().unwrap();
        let vault = vault(&dir);

        let record = Record::new(bob(), "ok").unwrap();
        assert_eq!(
            vault.report_for(&record),
            vault.report(&record.patient_info(), "ok").unwrap()
        );
    }
}
