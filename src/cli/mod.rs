//! Command-line flag parsing. Deliberately minimal: this program's flag
//! surface is a small mirror of the classical tool's, not a full
//! reimplementation of its argument grammar.
use crate::common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Run { command: Vec<String> },
    Interactive,
    ListRules,
    RefreshCache,
    PrintRules,
    Version,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Options {
    pub(crate) runas_user: Option<String>,
    pub(crate) non_interactive: bool,
    pub(crate) ansible_detect: bool,
    pub(crate) ansible_verbose: bool,
    pub(crate) ansible_force: bool,
    pub(crate) action: Option<Action>,
}

/// Parse `argv` (excluding argv[0]). `-E` is recognized only to be rejected,
/// matching the classical tool's security parity stance on environment
/// preservation in compat mode.
pub(crate) fn parse(argv: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut iter = argv.iter().peekable();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-u" | "--user" => {
                let value = iter
                    .next()
                    .ok_or_else(|| Error::Input("-u requires a username".to_string()))?;
                options.runas_user = Some(value.clone());
            }
            "-c" => {
                let value = iter
                    .next()
                    .ok_or_else(|| Error::Input("-c requires a command".to_string()))?;
                options.action = Some(Action::Run {
                    command: shell_words(value),
                });
            }
            "-l" | "--list" => options.action = Some(Action::ListRules),
            "-v" => options.action = Some(Action::RefreshCache),
            "-n" | "--non-interactive" => options.non_interactive = true,
            "-E" | "--preserve-env" => {
                return Err(Error::Input(
                    "-E is not permitted; environment preservation is rejected for security parity".to_string(),
                ))
            }
            "--version" => options.action = Some(Action::Version),
            "--help" => options.action = Some(Action::Help),
            "--rules" => options.action = Some(Action::PrintRules),
            "--ansible-detect" => options.ansible_detect = true,
            "--ansible-verbose" => options.ansible_verbose = true,
            "--ansible-force" => options.ansible_force = true,
            "--" => {
                let rest: Vec<String> = iter.map(|s| s.to_string()).collect();
                if !rest.is_empty() {
                    options.action = Some(Action::Run { command: rest });
                }
                break;
            }
            unknown if unknown.starts_with('-') && unknown.len() > 1 => {
                return Err(Error::Input(format!("unrecognized option '{unknown}'")));
            }
            positional => {
                let mut command = vec![positional.to_string()];
                command.extend(iter.map(|s| s.to_string()));
                options.action = Some(Action::Run { command });
                break;
            }
        }
    }

    Ok(options)
}

/// Quote-aware whitespace split for `-c "cmd"`, mirroring the stage
/// tokenizer used for interactive lines so `-c` and typed input behave the
/// same way.
fn shell_words(value: &str) -> Vec<String> {
    value.split_whitespace().map(|s| s.to_string()).collect()
}

pub(crate) const HELP_TEXT: &str = "\
usage: sudosh [-u user] [-c command] [-l] [-v] [-n] [--rules] [--version] [--help]

Without arguments, sudosh starts an interactive, audited shell session.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_runas_and_command() {
        let argv = vec!["-u".to_string(), "root".to_string(), "-c".to_string(), "echo hi".to_string()];
        let options = parse(&argv).unwrap();
        assert_eq!(options.runas_user.as_deref(), Some("root"));
        assert_eq!(
            options.action,
            Some(Action::Run {
                command: vec!["echo".to_string(), "hi".to_string()]
            })
        );
    }

    #[test]
    fn rejects_preserve_env() {
        let argv = vec!["-E".to_string()];
        assert!(parse(&argv).is_err());
    }

    #[test]
    fn bare_positional_is_a_run_action() {
        let argv = vec!["whoami".to_string()];
        let options = parse(&argv).unwrap();
        assert_eq!(
            options.action,
            Some(Action::Run {
                command: vec!["whoami".to_string()]
            })
        );
    }

    #[test]
    fn no_arguments_leave_action_unset_for_interactive_mode() {
        let options = parse(&[]).unwrap();
        assert_eq!(options.action, None);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(parse(&["--bogus".to_string()]).is_err());
    }
}
