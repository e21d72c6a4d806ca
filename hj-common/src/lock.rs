//! Host-local process lock for the sender
//!
//! The primary mechanism is an OS advisory exclusive lock (`flock`) on a
//! named file, released by the kernel if the holder dies. Where the platform
//! refuses advisory locks, a `create_new` sentinel file is used instead; that
//! fallback survives a crash and then needs manual removal.

use crate::time::{format_timestamp, now};
use crate::{Error, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Metadata the holder writes into the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub started_at: String,
    pub script_name: String,
    pub platform: String,
}

impl LockHolder {
    fn current(script_name: &str) -> Self {
        Self {
            pid: std::process::id(),
            started_at: format_timestamp(&now()),
            script_name: script_name.to_string(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

enum Held {
    Advisory(File),
    Sentinel(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMechanism {
    Advisory,
    Sentinel,
}

/// Exclusive sender lock
pub struct ProcessLock {
    path: PathBuf,
    script_name: String,
    held: Option<Held>,
}

impl std::fmt::Debug for ProcessLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLock")
            .field("path", &self.path)
            .field("script_name", &self.script_name)
            .field("held", &self.mechanism())
            .finish()
    }
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>, script_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            script_name: script_name.into(),
            held: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sentinel_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".sentinel");
        self.path.with_file_name(name)
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    pub fn mechanism(&self) -> Option<LockMechanism> {
        match self.held {
            Some(Held::Advisory(_)) => Some(LockMechanism::Advisory),
            Some(Held::Sentinel(_)) => Some(LockMechanism::Sentinel),
            None => None,
        }
    }

    /// Try to become the lock holder, polling until `timeout` elapses.
    ///
    /// Returns `Ok(false)` when another process still holds the lock at the
    /// deadline. A zero timeout makes exactly one attempt.
    pub fn acquire(&mut self, timeout: Duration) -> Result<bool> {
        if self.held.is_some() {
            return Ok(true);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.try_acquire_once()? {
                Some(held) => {
                    self.held = Some(held);
                    tracing::info!(
                        lock = %self.path.display(),
                        mechanism = ?self.mechanism(),
                        "Process lock acquired"
                    );
                    return Ok(true);
                }
                None if Instant::now() >= deadline => return Ok(false),
                None => std::thread::sleep(
                    POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())),
                ),
            }
        }
    }

    /// Acquire or fail with `Error::LockTimeout` naming the current holder
    pub fn acquire_or_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.acquire(timeout)? {
            return Ok(());
        }
        let holder = match self.holder() {
            Some(h) => format!(
                "held by pid {} ({}) since {}",
                h.pid, h.script_name, h.started_at
            ),
            None => "held by another process".to_string(),
        };
        Err(Error::LockTimeout(format!(
            "{} after {}s: {}",
            self.path.display(),
            timeout.as_secs(),
            holder
        )))
    }

    fn try_acquire_once(&self) -> Result<Option<Held>> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                self.write_holder(&mut file)?;
                Ok(Some(Held::Advisory(file)))
            }
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => {
                tracing::warn!(
                    lock = %self.path.display(),
                    error = %e,
                    "Advisory locking unsupported; falling back to sentinel file (remove it manually after a crash)"
                );
                self.try_sentinel()
            }
        }
    }

    fn try_sentinel(&self) -> Result<Option<Held>> {
        let sentinel = self.sentinel_path();
        match OpenOptions::new().write(true).create_new(true).open(&sentinel) {
            Ok(mut file) => {
                self.write_holder(&mut file)?;
                Ok(Some(Held::Sentinel(sentinel)))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_holder(&self, file: &mut File) -> Result<()> {
        let holder = LockHolder::current(&self.script_name);
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serde_json::to_string(&holder)?.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Metadata of the current holder, if readable
    pub fn holder(&self) -> Option<LockHolder> {
        let read = |path: &Path| -> Option<LockHolder> {
            let mut contents = String::new();
            File::open(path).ok()?.read_to_string(&mut contents).ok()?;
            serde_json::from_str(&contents).ok()
        };
        read(&self.path).or_else(|| read(&self.sentinel_path()))
    }

    /// Give up the lock. Safe to call any number of times.
    pub fn release(&mut self) {
        match self.held.take() {
            Some(Held::Advisory(file)) => {
                let _ = file.set_len(0);
                let _ = FileExt::unlock(&file);
                tracing::info!(lock = %self.path.display(), "Process lock released");
            }
            Some(Held::Sentinel(path)) => {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(sentinel = %path.display(), error = %e, "Failed to remove lock sentinel");
                }
                tracing::info!(lock = %path.display(), "Sentinel lock released");
            }
            None => {}
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_holder_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sender.lock");

        let mut first = ProcessLock::new(&path, "hj-sender");
        assert!(first.acquire(Duration::ZERO).unwrap());
        assert_eq!(first.mechanism(), Some(LockMechanism::Advisory));

        let mut second = ProcessLock::new(&path, "hj-sender");
        assert!(!second.acquire(Duration::from_millis(300)).unwrap());

        let holder = second.holder().unwrap();
        assert_eq!(holder.pid, std::process::id());
        assert_eq!(holder.script_name, "hj-sender");
        assert!(!holder.platform.is_empty());

        first.release();
        assert!(second.acquire(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_timeout_error_names_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sender.lock");
        let mut first = ProcessLock::new(&path, "first-run");
        first.acquire(Duration::ZERO).unwrap();

        let mut second = ProcessLock::new(&path, "second-run");
        let err = second.acquire_or_timeout(Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::LockTimeout(ref msg) if msg.contains("first-run")));
    }

    #[test]
    fn test_release_is_idempotent_and_drop_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sender.lock");
        {
            let mut lock = ProcessLock::new(&path, "hj-sender");
            lock.acquire(Duration::ZERO).unwrap();
            lock.release();
            lock.release();
            assert!(!lock.is_held());
            lock.acquire(Duration::ZERO).unwrap();
        }
        let mut again = ProcessLock::new(&path, "hj-sender");
        assert!(again.acquire(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_sentinel_fallback_excludes_second_holder() {
        let dir = TempDir::new().unwrap();
        let lock = ProcessLock::new(dir.path().join("sender.lock"), "hj-sender");
        let first = lock.try_sentinel().unwrap();
        assert!(matches!(first, Some(Held::Sentinel(_))));
        assert!(lock.try_sentinel().unwrap().is_none());
        assert!(lock.sentinel_path().exists());
    }
}
