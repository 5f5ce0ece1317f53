//! Encrypted, append-only scan history, one file per user.
//!
//! Each line of `<username>_history.txt` is the base64url encoding of one
//! [`KeyManager::encrypt`] envelope holding one serialized [`Record`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use tracing::{debug, info, warn};

use crate::credentials::validate_username;
use crate::crypto::KeyManager;
use crate::error::{Result, VaultError};
use crate::record::Record;
use crate::storage::Storage;

#[derive(Debug)]
pub struct EncryptedLedger {
    dir: PathBuf,
    keys: Arc<KeyManager>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EncryptedLedger {
    pub fn new(dir: impl Into<PathBuf>, keys: Arc<KeyManager>) -> Self {
        Self {
            dir: dir.into(),
            keys,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Location of `username`'s history file.
    pub fn history_path(&self, username: &str) -> Result<PathBuf> {
        validate_username(username)?;
        Ok(history_file(&self.dir, username))
    }

    /// Runs `f` holding `username`'s lock. The lock's map entry is dropped
    /// again once no other caller holds it, so the map only ever contains
    /// users with an operation in flight.
    fn with_user_lock<T>(&self, username: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(username.to_string()).or_default())
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(username);
        }
        result
    }

    /// Encrypts `record` and appends it as one line to `username`'s history.
    ///
    /// Appends for the same user are serialized; prior entries are never
    /// rewritten.
    pub fn append(&self, username: &str, record: &Record) -> Result<()> {
        let storage = Storage::new(self.history_path(username)?);

        let plaintext = zeroize::Zeroizing::new(record.to_bytes()?);
        let token = URL_SAFE.encode(self.keys.encrypt(&plaintext)?);

        self.with_user_lock(username, || storage.append_line(&token))?;

        info!(username, "appended history entry");
        Ok(())
    }

    fn lines(&self, username: &str) -> Result<Vec<Vec<u8>>> {
        let storage = Storage::new(self.history_path(username)?);
        self.with_user_lock(username, || storage.read_raw_lines())
    }

    fn open_entry(&self, token: &[u8]) -> Result<Record> {
        // an undecodable token, including one that is not even text, is as
        // untrustworthy as a bad tag
        let envelope = URL_SAFE
            .decode(token.trim_ascii())
            .map_err(|_| VaultError::Authentication)?;
        let plaintext = self.keys.decrypt(&envelope)?;
        Record::from_bytes(&plaintext)
    }

    /// Every record of `username` in append order, oldest first.
    ///
    /// Fails fast: the first entry that does not decrypt or decode aborts
    /// the read with [`VaultError::Entry`] naming its index. A user without
    /// history yields an empty vector.
    pub fn read_all(&self, username: &str) -> Result<Vec<Record>> {
        let lines = self.lines(username)?;
        let records = lines
            .iter()
            .enumerate()
            .map(|(i, token)| {
                self.open_entry(token).map_err(|e| {
                    warn!(username, index = i, error = %e, "history entry rejected");
                    VaultError::entry(i, e)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(username, count = records.len(), "read history");
        Ok(records)
    }

    /// Like [`read_all`](Self::read_all) but reports each entry separately,
    /// so one damaged entry does not hide its siblings.
    pub fn read_each(&self, username: &str) -> Result<Vec<Result<Record>>> {
        let lines = self.lines(username)?;
        Ok(lines
            .iter()
            .enumerate()
            .map(|(i, token)| self.open_entry(token).map_err(|e| VaultError::entry(i, e)))
            .collect())
    }

    /// Number of stored entries for `username`.
    pub fn len(&self, username: &str) -> Result<usize> {
        Ok(self.lines(username)?.len())
    }
}

pub(crate) fn history_file(dir: &Path, username: &str) -> PathBuf {
    dir.join(format!("{username}_history.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::record::tests::bob;
    use std::fs;
    use std::thread;
    use tempfile::tempdir;

    fn write_lines(path: &Path, lines: &[Vec<u8>]) {
        let mut data = Vec::new();
        for line in lines {
            data.extend_from_slice(line);
            data.push(b'\n');
        }
        fs::write(path, data).unwrap();
    }

    fn ledger(dir: &tempfile::TempDir) -> EncryptedLedger {
        let keys = KeyManager::ensure_key(dir.path().join("secret.key")).unwrap();
        EncryptedLedger::new(dir.path(), Arc::new(keys))
    }

    fn record(n: usize) -> Record {
        let mut info = bob();
        info.name = format!("Patient {n}");
        info.age = (n % 120) as u8;
        Record::new(info, format!("finding {n}")).unwrap()
    }

    #[test]
    fn empty_history_reads_as_empty() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);

        assert!(ledger.read_all("nobody").unwrap().is_empty());
        assert!(ledger.read_each("nobody").unwrap().is_empty());
        assert_eq!(ledger.len("nobody").unwrap(), 0);
    }

    #[test]
    fn read_all_returns_append_order() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);

        let written: Vec<_> = (0..5).map(record).collect();
        for r in &written {
            ledger.append("bob", r).unwrap();
        }

        assert_eq!(ledger.read_all("bob").unwrap(), written);
    }

    #[test]
    fn users_are_isolated() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);

        let a = record(1);
        let b = record(2);
        ledger.append("alice", &a).unwrap();
        ledger.append("bob", &b).unwrap();

        assert_eq!(ledger.read_all("alice").unwrap(), vec![a]);
        assert_eq!(ledger.read_all("bob").unwrap(), vec![b]);
    }

    #[test]
    fn file_holds_no_plaintext() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);
        ledger.append("bob", &record(7)).unwrap();

        let content = fs::read_to_string(ledger.history_path("bob").unwrap()).unwrap();
        assert!(!content.contains("Patient"));
        assert!(!content.contains("finding"));
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn tampered_entry_fails_fast_with_its_index() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);
        for n in 0..3 {
            ledger.append("bob", &record(n)).unwrap();
        }

        let path = ledger.history_path("bob").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        lines[1] = flip_char(&lines[1], 10);
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        match ledger.read_all("bob") {
            Err(VaultError::Entry { index, source }) => {
                assert_eq!(index, 1);
                assert_eq!(source.kind(), ErrorKind::Authentication);
            }
            other => panic!("expected entry error, got: {other:?}"),
        }

        let each = ledger.read_each("bob").unwrap();
        assert!(each[0].is_ok());
        assert_eq!(each[1].as_ref().unwrap_err().kind(), ErrorKind::Authentication);
        assert!(each[2].is_ok());
    }

    fn flip_char(token: &str, at: usize) -> String {
        token
            .char_indices()
            .map(|(i, c)| {
                if i == at {
                    if c == 'A' { 'B' } else { 'A' }
                } else {
                    c
                }
            })
            .collect()
    }

    #[test]
    fn garbage_line_is_authentication_error() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);
        ledger.append("bob", &record(0)).unwrap();

        let path = ledger.history_path("bob").unwrap();
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("!!! not base64 !!!\n");
        fs::write(&path, content).unwrap();

        let err = ledger.read_all("bob").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(matches!(err, VaultError::Entry { index: 1, .. }));
    }

    #[test]
    fn valid_ciphertext_of_non_record_is_encoding_error() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);

        let token = URL_SAFE.encode(ledger.keys.encrypt(b"[1,2,3]").unwrap());
        Storage::new(ledger.history_path("bob").unwrap())
            .append_line(&token)
            .unwrap();

        let err = ledger.read_all("bob").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[test]
    fn entries_from_another_key_are_rejected() {
        let dir = tempdir().unwrap();
        let ledger_a = ledger(&dir);
        ledger_a.append("bob", &record(0)).unwrap();

        let other = KeyManager::ensure_key(dir.path().join("other.key")).unwrap();
        let ledger_b = EncryptedLedger::new(dir.path(), Arc::new(other));

        let err = ledger_b.read_all("bob").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn unsafe_username_is_rejected() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);

        let err = ledger.append("../escape", &record(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(ledger(&dir));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for n in 0..10 {
                        ledger.append("bob", &record(t * 100 + n)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let records = ledger.read_all("bob").unwrap();
        assert_eq!(records.len(), 40);

        // each writer's entries keep their relative order
        for t in 0..4 {
            let mine: Vec<_> = records
                .iter()
                .map(|r| r.diagnosis().to_string())
                .filter(|d| {
                    let n: usize = d.trim_start_matches("finding ").parse().unwrap();
                    n / 100 == t
                })
                .collect();
            let expected: Vec<_> = (0..10).map(|n| format!("finding {}", t * 100 + n)).collect();
            assert_eq!(mine, expected);
        }
    }

    #[test]
    fn non_utf8_byte_only_fails_its_own_entry() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);
        let written: Vec<_> = (0..3).map(record).collect();
        for r in &written {
            ledger.append("bob", r).unwrap();
        }

        let path = ledger.history_path("bob").unwrap();
        let mut lines: Vec<Vec<u8>> = fs::read(&path)
            .unwrap()
            .split(|&b| b == b'\n')
            .filter(|l| !l.is_empty())
            .map(<[u8]>::to_vec)
            .collect();
        lines[1][5] = 0xFF;
        write_lines(&path, &lines);

        let each = ledger.read_each("bob").unwrap();
        assert_eq!(each.len(), 3);
        assert_eq!(each[0].as_ref().unwrap(), &written[0]);
        assert_eq!(each[1].as_ref().unwrap_err().kind(), ErrorKind::Authentication);
        assert_eq!(each[2].as_ref().unwrap(), &written[2]);

        match ledger.read_all("bob") {
            Err(VaultError::Entry { index, source }) => {
                assert_eq!(index, 1);
                assert_eq!(source.kind(), ErrorKind::Authentication);
            }
            other => panic!("expected entry error, got: {other:?}"),
        }
    }

    #[test]
    fn lock_map_is_emptied_after_use() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir);

        ledger.append("alice", &record(0)).unwrap();
        ledger.read_all("bob").unwrap();
        ledger.len("carol").unwrap();

        assert!(ledger.locks.lock().unwrap().is_empty());
    }
}
