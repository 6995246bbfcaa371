//! Fork/exec of a single command or a pipeline of commands, with privilege
//! transition, redirection wiring, and signal forwarding to the foreground
//! process group.
use std::{
    collections::HashMap,
    ffi::CString,
    io,
    os::fd::RawFd,
    sync::OnceLock,
};

use crate::command::{Command, Pipeline, Redirect};
use crate::common::{Error, Result};
use crate::cutils::cerr;
use crate::validator::{is_editor, EDITOR_UMASK};
use crate::system::{
    self,
    interface::{GroupId, ProcessId, UnixUser},
    signal::{
        consts::{SIGCHLD, SIGHUP, SIGINT, SIGPIPE, SIGQUIT, SIGTSTP},
        register_handlers, SignalHandler, SignalHandlerBehavior, SignalStream,
    },
    wait::{ExitReason, Wait, WaitError, WaitOptions},
    ForkResult,
};

static SIGNAL_STREAM: OnceLock<&'static SignalStream> = OnceLock::new();

/// Obtain the process-wide [`SignalStream`], initializing it on first use.
/// `SignalStream::init` panics if called twice, so this crate must never
/// call it directly outside of this function.
fn signal_stream() -> io::Result<&'static SignalStream> {
    if let Some(stream) = SIGNAL_STREAM.get() {
        return Ok(stream);
    }
    let stream = SignalStream::init()?;
    let _ = SIGNAL_STREAM.set(stream);
    Ok(stream)
}

/// Shared accessor for the process-wide signal stream, used by the session
/// loop to watch for `SIGINT` on the same stream the executor forwards
/// signals through.
pub(crate) fn signal_stream_handle() -> io::Result<&'static SignalStream> {
    signal_stream()
}

fn build_argv(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|s| {
            CString::new(s.as_str())
                .map_err(|_| Error::Input(format!("argument '{s}' contains a NUL byte")))
        })
        .collect()
}

fn build_envp(env: &[(String, String)]) -> Result<Vec<CString>> {
    env.iter()
        .map(|(k, v)| {
            CString::new(format!("{k}={v}"))
                .map_err(|_| Error::Input(format!("environment variable '{k}' contains a NUL byte")))
        })
        .collect()
}

/// The sanitized base environment every stage starts from, overridden by any
/// stage-specific entries (editor/pager hardening, etc).
pub(crate) fn base_environment(target: &UnixUser) -> Vec<(String, String)> {
    let mut env = vec![
        ("PATH".to_string(), "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string()),
        ("HOME".to_string(), target.home.to_string_lossy().into_owned()),
        ("USER".to_string(), target.name.clone()),
        ("LOGNAME".to_string(), target.name.clone()),
    ];
    if let Ok(term) = std::env::var("TERM") {
        env.push(("TERM".to_string(), term));
    }
    env
}

fn open_redirect_fd(redirect: &Redirect) -> Result<Option<(RawFd, libc::c_int)>> {
    use std::os::fd::IntoRawFd;

    let (path, flags, target_fd) = match redirect {
        Redirect::None => return Ok(None),
        Redirect::In(path) => (path, libc::O_RDONLY, libc::STDIN_FILENO),
        Redirect::Out(path) => (path, libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, libc::STDOUT_FILENO),
        Redirect::Append(path) => (path, libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND, libc::STDOUT_FILENO),
    };

    let file = std::fs::OpenOptions::new()
        .read(flags & libc::O_WRONLY == 0)
        .write(flags & libc::O_WRONLY != 0)
        .create(flags & libc::O_CREAT != 0)
        .truncate(flags & libc::O_TRUNC != 0)
        .append(flags & libc::O_APPEND != 0)
        .open(path)
        .map_err(|err| Error::IoError(Some(path.clone()), err))?;

    Ok(Some((file.into_raw_fd(), target_fd)))
}

struct Pipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

fn make_pipe() -> io::Result<Pipe> {
    let mut fds: [RawFd; 2] = [0; 2];
    cerr(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    Ok(Pipe {
        read_fd: fds[0],
        write_fd: fds[1],
    })
}

fn close_fd(fd: RawFd) {
    unsafe { libc::close(fd) };
}

/// Reset any signal this process may have set to `SIG_IGN` back to the
/// default disposition before `exec`, since an ignored disposition survives
/// `exec` while a handled one does not.
fn reset_ignored_signals() {
    for signal in [SIGPIPE, SIGTSTP, SIGINT, SIGQUIT, SIGHUP, SIGCHLD] {
        unsafe { libc::signal(signal, libc::SIG_DFL) };
    }
}

/// Run the child side of a fork: wire stdio, drop privileges, and exec. Never
/// returns on success; on failure writes nothing (the parent has no way to
/// observe a child-side `Result`, so the child exits with 127 instead).
fn run_child(
    stage: &Command,
    target: &UnixUser,
    target_gid: GroupId,
    env: &[(String, String)],
    upstream_read: Option<RawFd>,
    downstream_write: Option<RawFd>,
    all_pipe_fds: &[RawFd],
    test_mode: bool,
) -> ! {
    for fd in all_pipe_fds {
        if Some(*fd) != upstream_read && Some(*fd) != downstream_write {
            close_fd(*fd);
        }
    }

    if is_editor(&stage.argv[0]) {
        unsafe { libc::umask(EDITOR_UMASK) };
    }

    if let Some(fd) = upstream_read {
        unsafe { libc::dup2(fd, libc::STDIN_FILENO) };
        if fd != libc::STDIN_FILENO {
            close_fd(fd);
        }
    } else if let Ok(Some((fd, target_fd))) = open_redirect_fd(&stage.redirect_in) {
        unsafe { libc::dup2(fd, target_fd) };
        close_fd(fd);
    }

    if let Some(fd) = downstream_write {
        unsafe { libc::dup2(fd, libc::STDOUT_FILENO) };
        if fd != libc::STDOUT_FILENO {
            close_fd(fd);
        }
    } else if let Ok(Some((fd, target_fd))) = open_redirect_fd(&stage.redirect_out) {
        unsafe { libc::dup2(fd, target_fd) };
        close_fd(fd);
    }

    unsafe { libc::setpgid(0, 0) };

    if !test_mode && target.uid != system::interface::ROOT_UID {
        // SAFETY: single-threaded child, right before exec.
        if unsafe { system::drop_privileges_to(target, target_gid) }.is_err() {
            std::process::exit(126);
        }
    }

    reset_ignored_signals();

    let Some(resolved) = resolve_executable(&stage.argv[0], env) else {
        std::process::exit(127);
    };
    let Ok(program) = CString::new(resolved) else {
        std::process::exit(126);
    };
    let Ok(argv) = build_argv(&stage.argv) else {
        std::process::exit(126);
    };
    let Ok(envp) = build_envp(env) else {
        std::process::exit(126);
    };

    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    let mut envp_ptrs: Vec<*const libc::c_char> = envp.iter().map(|s| s.as_ptr()).collect();
    envp_ptrs.push(std::ptr::null());

    unsafe { libc::execve(program.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr()) };

    match io::Error::last_os_error().raw_os_error() {
        Some(libc::ENOENT) => std::process::exit(127),
        _ => std::process::exit(126),
    }
}

/// Resolve `argv0` to an absolute, executable path: used as-is if it already
/// contains a `/`, otherwise searched for along the `PATH` entry of `env`.
/// Portable replacement for the GNU-only `execvpe`, since this program also
/// targets FreeBSD.
fn resolve_executable(argv0: &str, env: &[(String, String)]) -> Option<String> {
    if argv0.contains('/') {
        return Some(argv0.to_string());
    }

    let path_var = env.iter().find(|(k, _)| k == "PATH").map(|(_, v)| v.as_str())?;
    for dir in std::env::split_paths(path_var) {
        let candidate = dir.join(argv0);
        if candidate.is_file() {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }
    None
}

pub(crate) struct Executor {
    test_mode: bool,
}

impl Executor {
    pub(crate) fn new(test_mode: bool) -> Self {
        Self { test_mode }
    }

    /// Run every stage of `pipeline` as `target`, wiring N-1 pipes between
    /// stages, and return the last stage's exit reason.
    pub(crate) fn run(&self, pipeline: &Pipeline, target: &UnixUser, target_gid: GroupId) -> Result<ExitReason> {
        let stage_count = pipeline.stages.len();
        let mut pipes = Vec::with_capacity(stage_count.saturating_sub(1));
        for _ in 0..stage_count.saturating_sub(1) {
            pipes.push(make_pipe().map_err(|err| Error::Exec(std::path::PathBuf::from("pipe"), err))?);
        }

        let all_pipe_fds: Vec<RawFd> = pipes.iter().flat_map(|p| [p.read_fd, p.write_fd]).collect();

        let sigpipe_guard = SignalHandler::register(SIGPIPE, SignalHandlerBehavior::Ignore)
            .map_err(Error::from)?;
        let sigtstp_guard = SignalHandler::register(SIGTSTP, SignalHandlerBehavior::Ignore)
            .map_err(Error::from)?;
        let stream = signal_stream().map_err(Error::from)?;
        let forward_guards = register_handlers([SIGINT, SIGQUIT, SIGHUP, SIGCHLD]).map_err(Error::from)?;

        let mut children: HashMap<ProcessId, usize> = HashMap::new();
        let mut leader_pgid: Option<ProcessId> = None;

        for (index, stage) in pipeline.stages.iter().enumerate() {
            let upstream_read = if index > 0 { Some(pipes[index - 1].read_fd) } else { None };
            let downstream_write = if index < stage_count - 1 { Some(pipes[index].write_fd) } else { None };
            let env = {
                let mut env = base_environment(target);
                env.extend(stage.env.clone());
                env
            };

            // SAFETY: single-threaded at this point, right before exec in the child branch.
            match unsafe { system::fork() }.map_err(Error::from)? {
                ForkResult::Child => {
                    run_child(
                        stage,
                        target,
                        target_gid,
                        &env,
                        upstream_read,
                        downstream_write,
                        &all_pipe_fds,
                        self.test_mode,
                    );
                }
                ForkResult::Parent(pid) => {
                    match leader_pgid {
                        None => leader_pgid = Some(pid),
                        Some(leader) => {
                            let _ = system::setpgid(pid, leader);
                        }
                    }
                    children.insert(pid, index);
                }
            }
        }

        for fd in &all_pipe_fds {
            close_fd(*fd);
        }

        let leader_pgid = leader_pgid.expect("a pipeline has at least one stage");
        let mut final_reason = ExitReason::Code(0);

        while !children.is_empty() {
            let info = stream.recv().map_err(Error::from)?;
            let signal = info.signal();

            if signal == SIGCHLD {
                loop {
                    match (-1 as ProcessId).wait(WaitOptions::new().no_hang()) {
                        Ok((pid, reason)) => {
                            if let Some(index) = children.remove(&pid) {
                                if index == stage_count - 1 {
                                    final_reason = reason;
                                }
                            }
                        }
                        Err(WaitError::NotReady) => break,
                        Err(WaitError::Io(err)) if err.raw_os_error() == Some(libc::ECHILD) => {
                            children.clear();
                            break;
                        }
                        Err(WaitError::Io(err)) => return Err(Error::from(err)),
                    }
                }
            } else if signal == SIGINT || signal == SIGQUIT || signal == SIGHUP {
                let _ = system::killpg(leader_pgid, signal);
            }
        }

        drop(forward_guards);
        drop(sigtstp_guard);
        drop(sigpipe_guard);

        Ok(final_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    fn dummy_target() -> UnixUser {
        system::user_by_id(system::real_uid())
            .unwrap()
            .expect("current user must resolve")
    }

    #[test]
    fn runs_a_single_safe_command() {
        let target = dummy_target();
        let pipeline = Pipeline::single(Command::new(vec!["/bin/true".to_string()], &target.name));
        let executor = Executor::new(true);
        let reason = executor.run(&pipeline, &target, target.gid).unwrap();
        assert_eq!(reason, ExitReason::Code(0));
    }

    #[test]
    fn propagates_nonzero_exit_status() {
        let target = dummy_target();
        let pipeline = Pipeline::single(Command::new(
            vec!["/bin/sh".to_string(), "-c".to_string(), "exit 7".to_string()],
            &target.name,
        ));
        let executor = Executor::new(true);
        let reason = executor.run(&pipeline, &target, target.gid).unwrap();
        assert_eq!(reason, ExitReason::Code(7));
    }
}
