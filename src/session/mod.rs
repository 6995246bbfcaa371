//! The interactive session loop: `READY -> READING -> VALIDATING -> EXECUTING
//! -> READY`, terminating in `EXIT`. Built-ins are dispatched locally;
//! everything else is routed through the parser, validator, and executor.
use std::{
    io::{BufRead, Write},
    path::Path,
};

use crate::auth::Authenticator;
use crate::command::Pipeline;
use crate::common::{Error, Result};
use crate::config::Configuration;
use crate::lock::LockManager;
use crate::log::{user_error, user_info};
use crate::parser::{InteractiveContext, Parser};
use crate::policy::PolicyEngine;
use crate::resolver::Resolver;
use crate::system::interface::UnixUser;
use crate::system::poll::{PollEvent, PollSet};
use crate::system::signal::{consts::SIGINT, SignalHandler, SignalHandlerBehavior};
use crate::validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Reading,
    Validating,
    Executing,
    Exit,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PollKey {
    Signal,
    Stdin,
}

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) struct Session<'c> {
    config: &'c Configuration,
    resolver: Resolver,
    policy: PolicyEngine,
    caller: UnixUser,
    tty: String,
    host: String,
    ctx: InteractiveContext,
    correlation_counter: u64,
    state: State,
}

impl<'c> Session<'c> {
    pub(crate) fn new(
        config: &'c Configuration,
        policy: PolicyEngine,
        caller: UnixUser,
        tty: String,
        host: String,
    ) -> Self {
        Self {
            config,
            resolver: Resolver::new(),
            policy,
            caller,
            tty,
            host,
            ctx: InteractiveContext::new(),
            correlation_counter: 0,
            state: State::Ready,
        }
    }

    fn next_correlation_id(&mut self) -> u64 {
        self.correlation_counter += 1;
        self.correlation_counter
    }

    /// Run the interactive loop until the inactivity timer expires, the
    /// caller exits explicitly, or stdin reaches EOF. Returns the process
    /// exit code.
    pub(crate) fn run(&mut self) -> i32 {
        let _sigint_guard = SignalHandler::register(SIGINT, SignalHandlerBehavior::Stream).ok();
        let stream = crate::exec::signal_stream_handle().ok();

        loop {
            self.state = State::Ready;
            match self.read_line(stream) {
                ReadOutcome::Line(line) => {
                    self.state = State::Reading;
                    self.ctx.record_history(&line);
                    if let Some(code) = self.dispatch(&line) {
                        return code;
                    }
                }
                ReadOutcome::Interrupted => continue,
                ReadOutcome::Eof => return 0,
                ReadOutcome::TimedOut => {
                    user_info!("inactivity timeout after {:?}", self.config.inactivity_timeout);
                    return 0;
                }
            }
        }
    }

    fn read_line(&self, stream: Option<&'static crate::system::signal::SignalStream>) -> ReadOutcome {
        let stdin = std::io::stdin();
        let timeout_ms = (self.config.inactivity_timeout.as_millis()).min(i32::MAX as u128) as i32;

        let mut poll_set: PollSet<PollKey> = PollSet::new();
        poll_set.add_fd(PollKey::Stdin, &stdin, PollEvent::Readable);
        if let Some(stream) = stream {
            poll_set.add_fd(PollKey::Signal, stream, PollEvent::Readable);
        }

        let timeout = if timeout_ms == 0 { -1 } else { timeout_ms };
        match poll_set.poll_timeout(timeout) {
            Ok((_, true)) => return ReadOutcome::TimedOut,
            Ok((keys, false)) => {
                if keys.contains(&PollKey::Signal) {
                    if let Some(stream) = stream {
                        if stream.recv().is_ok() {
                            return ReadOutcome::Interrupted;
                        }
                    }
                }
            }
            Err(_) => {}
        }

        let mut line = String::new();
        let _ = write!(std::io::stdout(), "sudosh> ");
        let _ = std::io::stdout().flush();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => ReadOutcome::Eof,
            Ok(_) => ReadOutcome::Line(line.trim_end_matches('\n').to_string()),
            Err(_) => ReadOutcome::Eof,
        }
    }

    /// Dispatch one line: either a built-in, returning `Some(exit_code)` if
    /// it should end the session, or a regular command routed through the
    /// parser/validator/executor pipeline (always returns `None`).
    fn dispatch(&mut self, line: &str) -> Option<i32> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        match trimmed {
            "exit" | "quit" => return Some(0),
            "help" => {
                println_ignore_io_error!("built-ins: help, exit, quit, version, rules, which, history");
                return None;
            }
            "version" => {
                println_ignore_io_error!("sudosh {VERSION}");
                return None;
            }
            "rules" => {
                self.print_rules();
                return None;
            }
            "history" => {
                for (i, entry) in self.ctx.history().iter().enumerate() {
                    println_ignore_io_error!("{}: {entry}", i + 1);
                }
                return None;
            }
            _ => {}
        }

        if let Some(target) = trimmed.strip_prefix("which ") {
            self.print_which(target.trim());
            return None;
        }

        self.execute_line(trimmed);
        None
    }

    fn print_rules(&self) {
        println_ignore_io_error!("policy rules are evaluated per-command; no static listing is cached");
    }

    fn print_which(&self, name: &str) {
        let Some(path_var) = std::env::var_os("PATH") else {
            println_ignore_io_error!("{name}: not found");
            return;
        };
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                println_ignore_io_error!("{}", candidate.display());
                return;
            }
        }
        println_ignore_io_error!("{name}: not found");
    }

    fn execute_line(&mut self, line: &str) {
        self.state = State::Validating;
        let correlation_id = self.next_correlation_id();

        let outcome = (|| -> Result<()> {
            let parser = Parser::new(self.config.max_command_length);
            let pipeline = parser.parse_line(line, "root", Some(&self.ctx))?;
            self.run_pipeline(pipeline, correlation_id)
        })();

        if let Err(err) = outcome {
            user_error!("[{correlation_id}] {} {err}", err.kind().tag());
        }
    }

    fn run_pipeline(&mut self, mut pipeline: Pipeline, correlation_id: u64) -> Result<()> {
        self.state = State::Validating;
        let home = self.caller.home.clone();
        let in_shells_group = self
            .resolver
            .is_member_of_group(
                &self.caller,
                &format!("{}{}", crate::config::PROGRAM_NAME, validator::SHELLS_GROUP_SUFFIX),
            )
            .unwrap_or(false);
        let group_names = self.resolver.group_names_for(&self.caller).unwrap_or_default();

        let requires_auth = validator::validate_pipeline(
            &mut pipeline,
            &self.caller.name,
            &group_names,
            &self.host,
            &home,
            in_shells_group,
            &self.policy,
        )?;

        if requires_auth.iter().any(|r| *r) {
            let authenticator = Authenticator::new(self.config);
            authenticator.authenticate(&self.caller.name, &self.tty, false)?;
        }

        user_info!("[{correlation_id}] AUTHORIZED command={:?}", pipeline.stages[0].argv);

        let runas_name = &pipeline.stages[0].runas_user;
        let target = self
            .resolver
            .get_user_by_name(runas_name)?
            .ok_or_else(|| Error::Resolve(format!("no such user '{runas_name}'")))?;

        self.state = State::Executing;
        let target_gid = target.gid;
        let lock_manager = LockManager::new(self.config.lock_directory.clone());
        let _editor_lock = self.maybe_acquire_editor_lock(&pipeline, &lock_manager)?;

        let executor = crate::exec::Executor::new(self.config.test_mode);
        let reason = executor.run(&pipeline, &target, target_gid)?;

        user_info!("[{correlation_id}] EXECUTED result={reason:?}");
        self.state = State::Ready;
        Ok(())
    }

    fn maybe_acquire_editor_lock(
        &self,
        pipeline: &Pipeline,
        lock_manager: &LockManager,
    ) -> Result<Option<crate::lock::LockHandle>> {
        let stage = &pipeline.stages[0];
        let Some(argv0) = stage.program() else {
            return Ok(None);
        };
        let basename = Path::new(argv0).file_name().and_then(|n| n.to_str()).unwrap_or(argv0);
        if !["vi", "vim", "nano", "pico", "ed", "ex"].contains(&basename) {
            return Ok(None);
        }
        let Some(file_arg) = stage.argv.get(1) else {
            return Ok(None);
        };
        let canonical = Path::new(file_arg)
            .canonicalize()
            .unwrap_or_else(|_| Path::new(file_arg).to_path_buf());
        lock_manager.acquire(&canonical, &self.caller.name).map(Some)
    }

    /// Single-command (`-c`) mode: one pass through parser/validator/
    /// executor, returning the child's exit status.
    pub(crate) fn run_single_command(&mut self, argv: Vec<String>, runas_user: &str) -> i32 {
        let parser = Parser::new(self.config.max_command_length);
        let correlation_id = self.next_correlation_id();

        let outcome = (|| -> Result<i32> {
            let pipeline = parser.parse_argv(argv, runas_user)?;
            self.run_pipeline(pipeline, correlation_id)?;
            Ok(0)
        })();

        match outcome {
            Ok(code) => code,
            Err(err) => {
                user_error!("[{correlation_id}] {} {err}", err.kind().tag());
                err.exit_code()
            }
        }
    }
}

enum ReadOutcome {
    Line(String),
    Interrupted,
    Eof,
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_is_not_dispatched_as_a_command() {
        // dispatch() on an empty/whitespace line must not attempt to run anything.
        let config = Configuration::default();
        let caller = UnixUser {
            name: "alice".to_string(),
            uid: 1000,
            gid: 1000,
            home: "/home/alice".into(),
            shell: "/bin/bash".into(),
            groups: vec![],
        };
        let policy = PolicyEngine::new(vec![]);
        let mut session = Session::new(&config, policy, caller, "/dev/pts/0".to_string(), "localhost".to_string());
        assert_eq!(session.dispatch("   "), None);
        assert_eq!(session.dispatch("exit"), Some(0));
    }
}
