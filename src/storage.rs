//! File storage backend for key, credential and history files.

use crate::error::{Result, VaultError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A single file on disk, written either whole (atomic replace), once
/// (exclusive create), or line by line (append).
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Returns `true` if the storage file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Returns the path to the storage file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn err(&self, e: io::Error) -> VaultError {
        VaultError::storage(&self.path, e)
    }

    /// Loads the entire storage file into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| self.err(e))
    }

    /// Replaces the whole file: the data goes to a synced temporary file
    /// that is then renamed over the target, so readers see the old or the
    /// new content and never a partial write. Used for exported reports.
    pub fn save(&self, data: &[u8]) -> Result<()> {
        self.create_parent()?;

        let tmp_path = self.write_tmp(data, false)?;

        if let Err(e) = self.atomic_replace(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(self.err(e));
        }

        self.sync_parent()
    }

    /// Writes `data` only if the file does not exist yet.
    ///
    /// The data is staged in a temporary file and hard-linked into place, so
    /// the target appears complete or not at all and at most one of several
    /// racing writers succeeds. Returns `false` if the file already existed.
    /// The file is created owner-readable only on Unix.
    pub fn save_new(&self, data: &[u8]) -> Result<bool> {
        self.create_parent()?;

        let tmp_path = self.write_tmp(data, true)?;
        let linked = fs::hard_link(&tmp_path, &self.path);
        let _ = fs::remove_file(&tmp_path);

        match linked {
            Ok(()) => {
                self.sync_parent()?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(self.err(e)),
        }
    }

    /// Appends one newline-terminated line with a single write, then fsyncs.
    ///
    /// An unterminated tail left by an interrupted earlier append is cut off
    /// first; complete lines are never touched.
    pub fn append_line(&self, line: &str) -> Result<()> {
        if line.contains('\n') {
            return Err(VaultError::Encoding("line must not contain a newline".into()));
        }

        self.create_parent()?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.err(e))?;

        self.repair_torn_tail(&mut file).map_err(|e| self.err(e))?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        file.write_all(&buf).map_err(|e| self.err(e))?;
        file.sync_all().map_err(|e| self.err(e))?;
        Ok(())
    }

    /// Reads every complete line in file order as raw bytes, without the
    /// line terminator.
    ///
    /// A missing file reads as no lines. An unterminated final fragment is
    /// not a committed line and is skipped. Lines are not required to be
    /// UTF-8, so one damaged line does not hide the others.
    pub fn read_raw_lines(&self) -> Result<Vec<Vec<u8>>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.err(e)),
        };

        let mut lines: Vec<&[u8]> = data.split(|&b| b == b'\n').collect();
        // split leaves the bytes after the last '\n' as the final element
        if let Some(tail) = lines.pop() {
            if !tail.is_empty() {
                warn!(path = %self.path.display(), "ignoring unterminated trailing line");
            }
        }

        Ok(lines
            .into_iter()
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l).to_vec())
            .collect())
    }

    /// Like [`read_raw_lines`](Self::read_raw_lines) for text files.
    ///
    /// A line that is not UTF-8 is an `Encoding` error naming its 1-based
    /// line number.
    pub fn read_lines(&self) -> Result<Vec<String>> {
        self.read_raw_lines()?
            .into_iter()
            .enumerate()
            .map(|(i, line)| {
                String::from_utf8(line).map_err(|_| {
                    VaultError::Encoding(format!(
                        "{} line {} is not valid UTF-8",
                        self.path.display(),
                        i + 1
                    ))
                })
            })
            .collect()
    }

    fn create_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| VaultError::storage(parent, e))?;
        }
        Ok(())
    }

    fn sync_parent(&self) -> Result<()> {
        // directories cannot be opened for syncing on Windows
        #[cfg(not(target_os = "windows"))]
        {
            if let Some(parent) = self.path.parent() {
                // a bare file name lives in the working directory
                let parent = if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                };
                let dir = File::open(parent).map_err(|e| VaultError::storage(parent, e))?;
                dir.sync_all().map_err(|e| VaultError::storage(parent, e))?;
            }
        }
        Ok(())
    }

    /// Writes and fsyncs `data` into a fresh temporary file next to the target.
    fn write_tmp(&self, data: &[u8], secret: bool) -> Result<PathBuf> {
        let tmp_path = self.random_tmp_path()?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            if secret {
                options.mode(0o600);
            }
        }
        #[cfg(not(unix))]
        let _ = secret;

        // securely create temp file (fail if exists)
        let mut tmp_file = options
            .open(&tmp_path)
            .map_err(|e| VaultError::storage(&tmp_path, e))?;

        let written = tmp_file
            .write_all(data)
            .and_then(|_| tmp_file.sync_all());
        if let Err(e) = written {
            drop(tmp_file);
            let _ = fs::remove_file(&tmp_path);
            return Err(VaultError::storage(&tmp_path, e));
        }

        Ok(tmp_path)
    }

    /// Truncates the file back to its last newline if it does not end in one.
    fn repair_torn_tail(&self, file: &mut File) -> io::Result<()> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(());
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] == b'\n' {
            return Ok(());
        }

        file.seek(SeekFrom::Start(0))?;
        let mut content = Vec::with_capacity(len as usize);
        file.read_to_end(&mut content)?;
        let keep = content
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);

        warn!(
            path = %self.path.display(),
            dropped_bytes = content.len() - keep,
            "truncating torn trailing line"
        );
        file.set_len(keep as u64)?;
        file.sync_all()
    }

    /// Generates a unique temporary file path in the same directory.
    ///
    /// Uses cryptographically secure random bytes to avoid name collisions.
    /// Format: `filename.tmp.<randomhex>`
    fn random_tmp_path(&self) -> Result<PathBuf> {
        let mut buf = [0u8; 8]; // 64 bit entropy
        crate::crypto::secure_random(&mut buf)?;

        let rand_string = crate::crypto::to_hex(&buf);

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| VaultError::Validation("storage path has no file name".into()))?
            .to_string_lossy();

        let tmp_name = format!("{}.tmp.{}", file_name, rand_string);

        Ok(self.path.with_file_name(tmp_name))
    }

    /// Atomically replaces the target file with the temporary file.
    ///
    /// Uses Windows `ReplaceFileW` API with `REPLACEFILE_WRITE_THROUGH` flag
    /// to ensure the operation is truly atomic and persisted to disk.
    /// `ReplaceFileW` needs an existing target, so first writes fall back to
    /// a plain rename.
    #[cfg(target_os = "windows")]
    fn atomic_replace(&self, tmp_path: &Path) -> io::Result<()> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

        if !self.path.exists() {
            return fs::rename(tmp_path, &self.path);
        }

        fn to_wide(s: &OsStr) -> Vec<u16> {
            s.encode_wide().chain(std::iter::once(0)).collect()
        }

        let target_w = to_wide(self.path.as_os_str());
        let tmp_w = to_wide(tmp_path.as_os_str());

        // SAFETY:
        // - Strings are valid UTF-16 and null-terminated
        // - Pointers remain valid during the call
        // - Windows does not retain the pointers after return
        let result = unsafe {
            ReplaceFileW(
                target_w.as_ptr(),
                tmp_w.as_ptr(),
                std::ptr::null(),
                REPLACEFILE_WRITE_THROUGH,
                std::ptr::null(),
                std::ptr::null(),
            )
        };

        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Atomically replaces the target file with the temporary file.
    ///
    /// On Unix, `rename()` is atomic when both paths are on the same filesystem.
    #[cfg(not(target_os = "windows"))]
    fn atomic_replace(&self, tmp_path: &Path) -> io::Result<()> {
        fs::rename(tmp_path, &self.path)
    }
}
