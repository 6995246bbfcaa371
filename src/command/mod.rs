//! The parsed, not-yet-validated representation of what a user asked to run.
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Redirect {
    None,
    In(PathBuf),
    Out(PathBuf),
    Append(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Command {
    pub(crate) argv: Vec<String>,
    pub(crate) redirect_in: Redirect,
    pub(crate) redirect_out: Redirect,
    pub(crate) runas_user: String,
    pub(crate) env: Vec<(String, String)>,
}

impl Command {
    pub(crate) fn new(argv: Vec<String>, runas_user: impl Into<String>) -> Self {
        Self {
            argv,
            redirect_in: Redirect::None,
            redirect_out: Redirect::None,
            runas_user: runas_user.into(),
            env: Vec::new(),
        }
    }

    pub(crate) fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

/// A sequence of [`Command`]s connected by pipes: `argv[0] | argv[1] | ...`.
/// Only the last stage may carry an output redirection and only the first
/// stage may carry an input redirection; intermediate stages' redirects are
/// always `Redirect::None` by construction (see `parser`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pipeline {
    pub(crate) stages: Vec<Command>,
}

impl Pipeline {
    pub(crate) fn single(command: Command) -> Self {
        Self {
            stages: vec![command],
        }
    }

    pub(crate) fn is_single_stage(&self) -> bool {
        self.stages.len() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pipeline_wraps_one_command() {
        let cmd = Command::new(vec!["/bin/ls".to_string()], "root");
        let pipeline = Pipeline::single(cmd);
        assert!(pipeline.is_single_stage());
        assert_eq!(pipeline.stages[0].program(), Some("/bin/ls"));
    }
}
