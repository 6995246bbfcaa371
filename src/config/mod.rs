//! Process-wide configuration record, loaded once at startup from a key=value text file and
//! overridable through a handful of `SUDOSH_*` environment variables used by the test suite.
use std::{path::PathBuf, time::Duration};

use crate::common::{Error, Result};
use crate::log::user_warn;

pub(crate) const PROGRAM_NAME: &str = "sudosh";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Configuration {
    pub(crate) auth_cache_timeout: Duration,
    pub(crate) inactivity_timeout: Duration,
    pub(crate) max_command_length: usize,
    pub(crate) log_facility: String,
    pub(crate) cache_directory: PathBuf,
    pub(crate) lock_directory: PathBuf,
    pub(crate) verbose_mode: bool,
    pub(crate) test_mode: bool,
    pub(crate) automation_detection_enabled: bool,
    pub(crate) automation_detection_confidence_threshold: u8,
    pub(crate) rc_alias_import_enabled: bool,
    pub(crate) sudoers_path: PathBuf,
    pub(crate) sudoers_dir: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        let cache_directory = PathBuf::from(format!("/var/run/{PROGRAM_NAME}"));
        let lock_directory = cache_directory.join("locks");

        Self {
            auth_cache_timeout: Duration::from_secs(900),
            inactivity_timeout: Duration::from_secs(300),
            max_command_length: 4096,
            log_facility: "auth".to_string(),
            cache_directory,
            lock_directory,
            verbose_mode: false,
            test_mode: false,
            automation_detection_enabled: true,
            automation_detection_confidence_threshold: 70,
            rc_alias_import_enabled: true,
            sudoers_path: PathBuf::from(format!("/etc/{PROGRAM_NAME}.conf")),
            sudoers_dir: PathBuf::from(format!("/etc/{PROGRAM_NAME}.d")),
        }
    }
}

impl Configuration {
    /// Load configuration from `path` if it exists, falling back to defaults, and then apply
    /// `SUDOSH_*` environment variable overrides used by integration tests and operators.
    pub(crate) fn load(path: &std::path::Path) -> Result<Self> {
        let mut config = Self::default();

        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|err| Error::IoError(Some(path.to_path_buf()), err))?;
            config.apply_file(&contents)?;
        }

        config.apply_env();

        Ok(config)
    }

    fn apply_file(&mut self, contents: &str) -> Result<()> {
        for (lineno, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                user_warn!("config line {}: missing '=', ignoring", lineno + 1);
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            self.apply_key(key, value).map_err(|msg| {
                Error::Configuration(format!("config line {}: {msg}", lineno + 1))
            })?;
        }

        Ok(())
    }

    fn apply_key(&mut self, key: &str, value: &str) -> std::result::Result<(), String> {
        match key {
            "auth_cache_timeout" => {
                self.auth_cache_timeout = Duration::from_secs(parse_bounded(value, 0, 86400)?)
            }
            "inactivity_timeout" => {
                self.inactivity_timeout = Duration::from_secs(parse_bounded(value, 0, 86400)?)
            }
            "max_command_length" => {
                self.max_command_length = parse_bounded(value, 256, 65536)? as usize
            }
            "log_facility" => self.log_facility = value.to_string(),
            "cache_directory" => self.cache_directory = absolute_path(value)?,
            "lock_directory" => self.lock_directory = absolute_path(value)?,
            "verbose_mode" => self.verbose_mode = parse_bool(value)?,
            "test_mode" => self.test_mode = parse_bool(value)?,
            "automation_detection_enabled" => {
                self.automation_detection_enabled = parse_bool(value)?
            }
            "automation_detection_confidence_threshold" => {
                self.automation_detection_confidence_threshold = parse_bounded(value, 0, 100)? as u8
            }
            "rc_alias_import_enabled" => self.rc_alias_import_enabled = parse_bool(value)?,
            unknown => {
                user_warn!("unknown configuration key '{unknown}', ignoring");
            }
        }

        Ok(())
    }

    fn apply_env(&mut self) {
        if env_flag("SUDOSH_TEST_MODE") {
            self.test_mode = true;
        }
        if let Some(path) = std::env::var_os("SUDOSH_SUDOERS_PATH") {
            self.sudoers_path = path.into();
        }
        if let Some(dir) = std::env::var_os("SUDOSH_SUDOERS_DIR") {
            self.sudoers_dir = dir.into();
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("'{other}' is not a valid boolean")),
    }
}

fn parse_bounded(value: &str, min: u64, max: u64) -> std::result::Result<u64, String> {
    let n: u64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a valid number"))?;
    if n < min || n > max {
        return Err(format!("{n} is out of range [{min}, {max}]"));
    }
    Ok(n)
}

fn absolute_path(value: &str) -> std::result::Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if !path.is_absolute() {
        return Err(format!("'{value}' is not an absolute path"));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Configuration::default();
        assert_eq!(config.auth_cache_timeout, Duration::from_secs(900));
        assert_eq!(config.inactivity_timeout, Duration::from_secs(300));
        assert_eq!(config.max_command_length, 4096);
    }

    #[test]
    fn unknown_keys_warn_and_continue() {
        let mut config = Configuration::default();
        config.apply_file("frobnicate = yes\nverbose_mode = true\n").unwrap();
        assert!(config.verbose_mode);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Configuration::default();
        assert!(config.apply_file("max_command_length = 10\n").is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let mut config = Configuration::default();
        config
            .apply_file("# a comment\n\nverbose_mode = true\n")
            .unwrap();
        assert!(config.verbose_mode);
    }
}
