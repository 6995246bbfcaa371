#[macro_use]
mod macros;

pub(crate) mod auth;
pub(crate) mod automation;
pub(crate) mod cli;
pub(crate) mod command;
pub(crate) mod common;
pub(crate) mod config;
pub(crate) mod cutils;
pub(crate) mod exec;
pub(crate) mod lock;
pub(crate) mod log;
pub(crate) mod pam;
pub(crate) mod parser;
pub(crate) mod policy;
pub(crate) mod resolver;
pub(crate) mod session;
pub(crate) mod system;
pub(crate) mod validator;

use std::path::Path;

use crate::automation::EnvironmentDetector;
use crate::cli::Action;
use crate::common::Error;
use crate::config::Configuration;
use crate::log::{auth_warn, dev_warn, user_error, SudoLogger};
use crate::policy::{sudoers::SudoersSource, PolicyEngine};
use crate::resolver::Resolver;
use crate::session::Session;

/// Load configuration, set up logging, and dispatch to either the
/// single-command path or the interactive session loop. Returns the
/// process exit code; never panics on a caller-triggered error.
pub fn main() -> i32 {
    SudoLogger::new("sudosh: ").into_global_logger();

    let config = match Configuration::load(Path::new("/etc/sudosh.conf")) {
        Ok(config) => config,
        Err(err) => {
            user_error!("{} {err}", err.kind().tag());
            return err.exit_code();
        }
    };

    if config.test_mode {
        // First audit line of the process, unconditionally, so a test-mode run
        // that never calls Authenticator::authenticate (NOPASSWD, -n, single
        // command with no auth required) still shows up in the audit trail.
        auth_warn!("TEST_MODE_ACTIVE: privilege drop and PAM are bypassed for this process");
    }

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let options = match cli::parse(&argv) {
        Ok(options) => options,
        Err(err) => {
            user_error!("{} {err}", err.kind().tag());
            return err.exit_code();
        }
    };

    let automation = automation::evaluate(&config, &EnvironmentDetector);
    if automation.detected {
        dev_warn!(
            "automation context detected: source={} confidence={}",
            automation.source,
            automation.confidence
        );
    }

    match run(&config, options) {
        Ok(code) => code,
        Err(err) => {
            user_error!("{} {err}", err.kind().tag());
            err.exit_code()
        }
    }
}

fn run(config: &Configuration, options: cli::Options) -> common::Result<i32> {
    let resolver = Resolver::new();
    let caller_uid = system::real_uid();
    let caller = resolver
        .get_user_by_id(caller_uid)?
        .ok_or_else(|| Error::Resolve(format!("caller uid {caller_uid} has no passwd entry")))?;

    let host = system::hostname();
    let tty = system::term::current_tty_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "no-tty".to_string());

    let rules = policy::sudoers::load(&config.sudoers_path, &config.sudoers_dir)?;
    let mut sources: Vec<Box<dyn policy::PolicySource>> = vec![Box::new(SudoersSource(policy::RuleSet(rules)))];
    sources.push(Box::new(policy::directory_service::DirectoryServiceSource::new(
        Path::new("/var/run/sudosh/sssd.sock").to_path_buf(),
    )));
    let policy_engine = PolicyEngine::new(sources);

    let runas_user = options.runas_user.clone().unwrap_or_else(|| "root".to_string());

    match options.action {
        Some(Action::Version) => {
            println_ignore_io_error!("sudosh {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
        Some(Action::Help) => {
            println_ignore_io_error!("{}", cli::HELP_TEXT);
            Ok(0)
        }
        Some(Action::PrintRules) | Some(Action::ListRules) => {
            println_ignore_io_error!("policy rules are evaluated per-command; no static listing is cached");
            Ok(0)
        }
        Some(Action::RefreshCache) => {
            let authenticator = auth::Authenticator::new(config);
            authenticator.authenticate(&caller.name, &tty, options.non_interactive)?;
            Ok(0)
        }
        Some(Action::Run { command }) => {
            let mut session = Session::new(config, policy_engine, caller, tty, host);
            Ok(session.run_single_command(command, &runas_user))
        }
        Some(Action::Interactive) | None => {
            let mut session = Session::new(config, policy_engine, caller, tty, host);
            Ok(session.run())
        }
    }
}
