use std::{ffi::OsString, io, os::fd::AsRawFd};

use crate::cutils::{cerr, os_string_from_ptr};

use super::interface::ProcessId;

mod sealed {
    use std::os::fd::AsRawFd;

    pub(crate) trait Sealed {}

    impl<F: AsRawFd> Sealed for F {}
}

pub(crate) trait Terminal: sealed::Sealed {
    fn tcgetpgrp(&self) -> io::Result<ProcessId>;
    fn tcsetpgrp(&self, pgrp: ProcessId) -> io::Result<()>;
    fn ttyname(&self) -> io::Result<OsString>;
}

impl<F: AsRawFd> Terminal for F {
    /// Get the foreground process group ID associated with this terminal.
    fn tcgetpgrp(&self) -> io::Result<ProcessId> {
        cerr(unsafe { libc::tcgetpgrp(self.as_raw_fd()) })
    }

    /// Set the foreground process group ID associated with this terminal to `pgrp`.
    fn tcsetpgrp(&self, pgrp: ProcessId) -> io::Result<()> {
        cerr(unsafe { libc::tcsetpgrp(self.as_raw_fd(), pgrp) }).map(|_| ())
    }

    /// Get the filename of the tty.
    fn ttyname(&self) -> io::Result<OsString> {
        let mut buf: [libc::c_char; 1024] = [0; 1024];

        cerr(unsafe { libc::ttyname_r(self.as_raw_fd(), buf.as_mut_ptr(), buf.len()) })?;
        Ok(unsafe { os_string_from_ptr(buf.as_ptr()) })
    }
}

/// Try to get the path of the current TTY, e.g. to key the auth cache entry on.
pub(crate) fn current_tty_name() -> io::Result<OsString> {
    std::io::stdin().ttyname()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn ttyname_of_non_tty_fails() {
        let file = File::open("/dev/null").unwrap();
        assert!(file.ttyname().is_err());
    }
}
