use std::io;

use crate::cutils::cerr;

use super::interface::ProcessId;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WaitOptions {
    flags: libc::c_int,
}

impl WaitOptions {
    pub(crate) fn new() -> Self {
        Self { flags: 0 }
    }

    pub(crate) fn untraced(self) -> Self {
        Self {
            flags: self.flags | libc::WUNTRACED,
        }
    }

    pub(crate) fn no_hang(self) -> Self {
        Self {
            flags: self.flags | libc::WNOHANG,
        }
    }
}

#[derive(Debug)]
pub(crate) enum WaitError {
    Io(io::Error),
    /// Returned for a `WNOHANG` wait when the child has not yet changed state.
    NotReady,
}

impl From<io::Error> for WaitError {
    fn from(err: io::Error) -> Self {
        WaitError::Io(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitReason {
    Code(libc::c_int),
    Signal(libc::c_int),
}

pub(crate) trait Wait {
    /// Wait for this process to change state according to `options`.
    fn wait(&self, options: WaitOptions) -> Result<(ProcessId, ExitReason), WaitError>;
}

impl Wait for ProcessId {
    fn wait(&self, options: WaitOptions) -> Result<(ProcessId, ExitReason), WaitError> {
        let mut status: libc::c_int = 0;

        // SAFETY: `status` is a valid pointer to a local variable.
        let pid = cerr(unsafe { libc::waitpid(*self, &mut status, options.flags) })?;

        if pid == 0 {
            return Err(WaitError::NotReady);
        }

        let reason = if libc::WIFSIGNALED(status) {
            ExitReason::Signal(libc::WTERMSIG(status))
        } else if libc::WIFEXITED(status) {
            ExitReason::Code(libc::WEXITSTATUS(status))
        } else {
            ExitReason::Code(0)
        };

        Ok((pid, reason))
    }
}
