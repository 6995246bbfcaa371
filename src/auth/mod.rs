//! Interactive authentication and the per-(user, tty) credential cache.
//!
//! Authentication is delegated to the PAM module chain configured for this
//! program's service name; this module only owns the policy of *when* PAM
//! gets consulted (the cache) and *how* failures are reported.
use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::common::{Error, Result};
use crate::config::{Configuration, PROGRAM_NAME};
use crate::log::{auth_info, auth_warn};
use crate::pam::PamContext;
use crate::system::file::FileLock;

/// Turns a tty device path like `/dev/pts/3` into something safe to embed in
/// a file name.
fn sanitize_tty(tty: &str) -> String {
    tty.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub(crate) struct Authenticator<'c> {
    config: &'c Configuration,
}

impl<'c> Authenticator<'c> {
    pub(crate) fn new(config: &'c Configuration) -> Self {
        Self { config }
    }

    fn cache_path(&self, user: &str, tty: &str) -> PathBuf {
        self.config
            .cache_directory
            .join(format!("{user}:{}", sanitize_tty(tty)))
    }

    /// Returns `true` if a still-fresh credential exists for `(user, tty)`.
    ///
    /// Reading and the freshness check happen under an exclusive lock on the
    /// cache file so a concurrent session cannot race a stale-but-unexpired
    /// read against this session's write.
    fn has_fresh_credential(&self, user: &str, tty: &str) -> Result<bool> {
        let path = self.cache_path(user, tty);
        let Ok(file) = File::open(&path) else {
            return Ok(false);
        };

        let _lock = FileLock::exclusive(&file, false)
            .map_err(|err| Error::IoError(Some(path.clone()), err))?;

        let mut contents = String::new();
        (&file)
            .read_to_string(&mut contents)
            .map_err(|err| Error::IoError(Some(path.clone()), err))?;

        let Ok(timestamp) = contents.trim().parse::<u64>() else {
            return Ok(false);
        };

        let age = now_unix().saturating_sub(timestamp);
        Ok(Duration::from_secs(age) < self.config.auth_cache_timeout)
    }

    /// Records that `user` has just authenticated successfully from `tty`.
    fn record_credential(&self, user: &str, tty: &str) -> Result<()> {
        let dir = &self.config.cache_directory;
        fs::create_dir_all(dir).map_err(|err| Error::IoError(Some(dir.clone()), err))?;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|err| Error::IoError(Some(dir.clone()), err))?;

        let path = self.cache_path(user, tty);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&path)
            .map_err(|err| Error::IoError(Some(path.clone()), err))?;

        let lock = FileLock::exclusive(&file, false)
            .map_err(|err| Error::IoError(Some(path.clone()), err))?;

        (&file)
            .set_len(0)
            .map_err(|err| Error::IoError(Some(path.clone()), err))?;
        (&file)
            .write_all(now_unix().to_string().as_bytes())
            .map_err(|err| Error::IoError(Some(path.clone()), err))?;

        lock.unlock().map_err(|err| Error::IoError(Some(path), err))
    }

    /// Authenticate `user` for actions performed from `tty`.
    ///
    /// If a fresh cached credential exists this is a no-op. In test mode the
    /// PAM conversation is skipped entirely but the bypass is still audited
    /// so it cannot pass unnoticed in a log review.
    pub(crate) fn authenticate(&self, user: &str, tty: &str, no_interact: bool) -> Result<()> {
        if self.config.test_mode {
            auth_warn!("test mode: authentication bypassed for {user} on {tty}");
            return Ok(());
        }

        if self.has_fresh_credential(user, tty)? {
            auth_info!("using cached credential for {user} on {tty}");
            return Ok(());
        }

        let mut pam = PamContext::builder_cli(PROGRAM_NAME, true, no_interact)
            .target_user(user.to_owned())
            .build()?;

        pam.mark_silent(false);
        match pam.authenticate() {
            Ok(()) => {}
            Err(err) => {
                auth_warn!("authentication failed for {user} on {tty}: {err}");
                return Err(Error::from(err));
            }
        }
        pam.validate_account_or_change_auth_token()?;

        auth_info!("authentication succeeded for {user} on {tty}");
        self.record_credential(user, tty)?;
        Ok(())
    }

    /// Forget any cached credential for `(user, tty)`, used on session exit.
    pub(crate) fn forget(&self, user: &str, tty: &str) {
        let path = self.cache_path(user, tty);
        let _ = fs::remove_file(path);
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs()
}

/// `false` if `path`'s parent directories don't yet exist, used by callers
/// that want to skip cache lookups entirely rather than create directories
/// just to find out there is nothing cached.
#[allow(dead_code)]
fn cache_dir_exists(path: &Path) -> bool {
    path.parent().is_some_and(Path::exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> Configuration {
        let mut config = Configuration::default();
        config.test_mode = false;
        config.cache_directory = dir.to_path_buf();
        config.auth_cache_timeout = Duration::from_secs(900);
        config
    }

    #[test]
    fn fresh_credential_is_recognized() {
        let dir = std::env::temp_dir().join(format!("sudosh_auth_test_{}", std::process::id()));
        let config = test_config(&dir);
        let auth = Authenticator::new(&config);

        auth.record_credential("alice", "/dev/pts/0").unwrap();
        assert!(auth.has_fresh_credential("alice", "/dev/pts/0").unwrap());
        assert!(!auth.has_fresh_credential("bob", "/dev/pts/0").unwrap());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn expired_credential_is_not_fresh() {
        let dir = std::env::temp_dir().join(format!("sudosh_auth_test2_{}", std::process::id()));
        let mut config = test_config(&dir);
        config.auth_cache_timeout = Duration::from_secs(0);
        let auth = Authenticator::new(&config);

        auth.record_credential("alice", "/dev/pts/0").unwrap();
        assert!(!auth.has_fresh_credential("alice", "/dev/pts/0").unwrap());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tty_paths_are_sanitized_for_the_filesystem() {
        assert_eq!(sanitize_tty("/dev/pts/3"), "_dev_pts_3");
    }
}
