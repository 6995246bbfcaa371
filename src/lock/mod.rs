//! Advisory exclusive locks on canonical file paths, used to serialize
//! concurrent editor invocations against the same target file.
//!
//! This is distinct from [`crate::system::file::FileLock`], which is the raw
//! `flock(2)` wrapper; this module adds the on-disk record (owner, pid,
//! timestamp) and the stale-lock reaping policy.
use std::{
    collections::hash_map::DefaultHasher,
    fs::{File, OpenOptions},
    hash::{Hash, Hasher},
    io::{Read, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::common::{Error, Result};
use crate::system::file::FileLock as RawFileLock;
use crate::system::{interface::ProcessId, kill, process_id};

const STALE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockRecord {
    pub(crate) canonical_path: PathBuf,
    pub(crate) owner_user: String,
    pub(crate) owner_pid: ProcessId,
    pub(crate) acquired_at: u64,
}

impl LockRecord {
    fn serialize(&self) -> String {
        format!(
            "path={}\nuser={}\npid={}\nacquired_at={}\n",
            self.canonical_path.display(),
            self.owner_user,
            self.owner_pid,
            self.acquired_at
        )
    }

    fn parse(contents: &str) -> Option<Self> {
        let mut path = None;
        let mut user = None;
        let mut pid = None;
        let mut acquired_at = None;

        for line in contents.lines() {
            let (key, value) = line.split_once('=')?;
            match key {
                "path" => path = Some(PathBuf::from(value)),
                "user" => user = Some(value.to_string()),
                "pid" => pid = value.parse().ok(),
                "acquired_at" => acquired_at = value.parse().ok(),
                _ => {}
            }
        }

        Some(LockRecord {
            canonical_path: path?,
            owner_user: user?,
            owner_pid: pid?,
            acquired_at: acquired_at?,
        })
    }

    fn is_stale(&self) -> bool {
        let alive = kill(self.owner_pid, 0).is_ok();
        if !alive {
            return true;
        }
        let age = now_unix().saturating_sub(self.acquired_at);
        Duration::from_secs(age) > STALE_TIMEOUT
    }
}

#[derive(Debug)]
pub(crate) struct LockHandle {
    lock_path: PathBuf,
    file: Option<File>,
    raw_lock: Option<RawFileLock>,
}

impl LockHandle {
    pub(crate) fn release(mut self) {
        if let Some(raw_lock) = self.raw_lock.take() {
            let _ = raw_lock.unlock();
        }
        self.file = None;
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(raw_lock) = self.raw_lock.take() {
            let _ = raw_lock.unlock();
        }
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs()
}

pub(crate) struct LockManager {
    lock_dir: PathBuf,
}

impl LockManager {
    pub(crate) fn new(lock_dir: PathBuf) -> Self {
        Self { lock_dir }
    }

    fn lock_path_for(&self, canonical_path: &Path) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        canonical_path.hash(&mut hasher);
        self.lock_dir.join(format!("{:016x}", hasher.finish()))
    }

    /// Acquire an exclusive lock on `canonical_path`, which must already be
    /// canonicalized by the caller. Retries once, after reaping, if the
    /// existing lock is stale.
    pub(crate) fn acquire(&self, canonical_path: &Path, owner_user: &str) -> Result<LockHandle> {
        std::fs::create_dir_all(&self.lock_dir)
            .map_err(|err| Error::IoError(Some(self.lock_dir.clone()), err))?;

        match self.try_acquire(canonical_path, owner_user) {
            Ok(handle) => Ok(handle),
            Err(Error::Lock { .. }) => {
                let lock_path = self.lock_path_for(canonical_path);
                let existing = std::fs::read_to_string(&lock_path).ok().and_then(|c| LockRecord::parse(&c));
                match existing {
                    Some(record) if record.is_stale() => {
                        std::fs::remove_file(&lock_path).ok();
                        self.try_acquire(canonical_path, owner_user)
                    }
                    Some(record) => Err(Error::Lock {
                        path: canonical_path.to_path_buf(),
                        owner_user: record.owner_user,
                        acquired_at: record.acquired_at,
                    }),
                    None => Err(Error::Lock {
                        path: canonical_path.to_path_buf(),
                        owner_user: "unknown".to_string(),
                        acquired_at: 0,
                    }),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn try_acquire(&self, canonical_path: &Path, owner_user: &str) -> Result<LockHandle> {
        let lock_path = self.lock_path_for(canonical_path);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Lock {
                    path: canonical_path.to_path_buf(),
                    owner_user: read_owner(&lock_path),
                    acquired_at: 0,
                });
            }
            Err(err) => return Err(Error::IoError(Some(lock_path), err)),
        };

        let record = LockRecord {
            canonical_path: canonical_path.to_path_buf(),
            owner_user: owner_user.to_string(),
            owner_pid: process_id(),
            acquired_at: now_unix(),
        };
        file.write_all(record.serialize().as_bytes())
            .map_err(|err| Error::IoError(Some(lock_path.clone()), err))?;

        let raw_lock = RawFileLock::exclusive(&file, true)
            .map_err(|err| Error::IoError(Some(lock_path.clone()), err))?;

        Ok(LockHandle {
            lock_path,
            file: Some(file),
            raw_lock: Some(raw_lock),
        })
    }
}

fn read_owner(lock_path: &Path) -> String {
    std::fs::read_to_string(lock_path)
        .ok()
        .and_then(|contents| LockRecord::parse(&contents))
        .map(|record| record.owner_user)
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (LockManager, PathBuf) {
        let dir = std::env::temp_dir().join(format!("sudosh_lock_test_{}", std::process::id()));
        (LockManager::new(dir.clone()), dir)
    }

    #[test]
    fn acquires_and_releases_a_lock() {
        let (manager, dir) = manager();
        let target = PathBuf::from("/etc/hosts");
        let handle = manager.acquire(&target, "alice").unwrap();
        handle.release();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn second_acquisition_conflicts_while_first_is_held() {
        let (manager, dir) = manager();
        let target = PathBuf::from("/etc/passwd");
        let first = manager.acquire(&target, "alice").unwrap();
        let err = manager.acquire(&target, "bob").unwrap_err();
        assert!(matches!(err, Error::Lock { .. }));
        first.release();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn record_round_trips_through_serialization() {
        let record = LockRecord {
            canonical_path: PathBuf::from("/etc/hosts"),
            owner_user: "alice".to_string(),
            owner_pid: 1234,
            acquired_at: 1_000_000,
        };
        let parsed = LockRecord::parse(&record.serialize()).unwrap();
        assert_eq!(record, parsed);
    }

    #[test]
    fn stale_lock_with_dead_pid_is_reaped() {
        let (manager, dir) = manager();
        let target = PathBuf::from("/etc/shadow");
        let lock_path = manager.lock_path_for(&target);
        std::fs::create_dir_all(&dir).unwrap();

        let stale = LockRecord {
            canonical_path: target.clone(),
            owner_user: "ghost".to_string(),
            owner_pid: unreachable_pid(),
            acquired_at: 1,
        };
        std::fs::write(&lock_path, stale.serialize()).unwrap();

        let handle = manager.acquire(&target, "alice").unwrap();
        handle.release();
        std::fs::remove_dir_all(&dir).ok();
    }

    fn unreachable_pid() -> ProcessId {
        // A pid extremely unlikely to be alive; the test only needs
        // kill(pid, 0) to fail with ESRCH.
        ProcessId::MAX - 1
    }
}
