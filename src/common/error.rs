use crate::pam::PamError;
use std::{fmt, path::PathBuf};

/// The taxonomy of error kinds an invocation can fail with. Every error
/// surfaced to the session loop or the CLI boundary carries one of these so
/// it can be logged with a stable tag and mapped to an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or overlong input.
    Input,
    /// No rule permits this action.
    Policy,
    /// Authentication required and failed, or required and suppressed by `-n`.
    Auth,
    /// Command parsed but rejected by safety rules.
    Validate,
    /// File is locked by another session.
    Lock,
    /// User, group, host, or interpreter not found.
    Resolve,
    /// Fork/exec failure.
    Exec,
    /// Configuration invalid, memory/IO failure.
    Internal,
}

impl ErrorKind {
    /// The short tag used in audit log lines, e.g. `E_POLICY`.
    pub fn tag(self) -> &'static str {
        match self {
            ErrorKind::Input => "E_INPUT",
            ErrorKind::Policy => "E_POLICY",
            ErrorKind::Auth => "E_AUTH",
            ErrorKind::Validate => "E_VALIDATE",
            ErrorKind::Lock => "E_LOCK",
            ErrorKind::Resolve => "E_RESOLVE",
            ErrorKind::Exec => "E_EXEC",
            ErrorKind::Internal => "E_INTERNAL",
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Input(String),
    Policy(String),
    Auth(String),
    MaxAuthAttempts(usize),
    Validate(String),
    Lock {
        path: PathBuf,
        owner_user: String,
        acquired_at: u64,
    },
    Resolve(String),
    Exec(PathBuf, std::io::Error),
    Configuration(String),
    Pam(PamError),
    IoError(Option<PathBuf>, std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Input(_) => ErrorKind::Input,
            Error::Policy(_) => ErrorKind::Policy,
            Error::Auth(_) | Error::MaxAuthAttempts(_) | Error::Pam(_) => ErrorKind::Auth,
            Error::Validate(_) => ErrorKind::Validate,
            Error::Lock { .. } => ErrorKind::Lock,
            Error::Resolve(_) => ErrorKind::Resolve,
            Error::Exec(_, _) => ErrorKind::Exec,
            Error::Configuration(_) | Error::IoError(_, _) => ErrorKind::Internal,
        }
    }

    /// Exit code this error maps to at the CLI boundary: 1 for validation or
    /// policy denial, 2 for authentication failure, 126 for permission-like
    /// errors, 127 for command-not-found.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Input | ErrorKind::Policy | ErrorKind::Validate => 1,
            ErrorKind::Auth => 2,
            ErrorKind::Resolve => 127,
            ErrorKind::Lock | ErrorKind::Exec | ErrorKind::Internal => 126,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn validate(message: impl Into<String>) -> Self {
        Self::Validate(message.into())
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy(message.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Input(e) => write!(f, "{e}"),
            Error::Policy(e) => write!(f, "{e}"),
            Error::Auth(e) => write!(f, "authentication failed: {e}"),
            Error::MaxAuthAttempts(num) => {
                write!(f, "{num} incorrect authentication attempts")
            }
            Error::Validate(e) => write!(f, "{e}"),
            Error::Lock {
                path,
                owner_user,
                acquired_at,
            } => write!(
                f,
                "'{}' is locked by {owner_user} since {acquired_at}",
                path.display()
            ),
            Error::Resolve(e) => write!(f, "{e}"),
            Error::Exec(p, e) => write!(f, "cannot execute '{}': {e}", p.display()),
            Error::Configuration(e) => write!(f, "invalid configuration: {e}"),
            Error::Pam(e) => write!(f, "{e}"),
            Error::IoError(location, e) => {
                if let Some(path) = location {
                    write!(f, "'{}': {e}", path.display())
                } else {
                    write!(f, "IO error: {e}")
                }
            }
        }
    }
}

impl From<PamError> for Error {
    fn from(err: PamError) -> Self {
        Error::Pam(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(None, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
