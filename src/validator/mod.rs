//! Multi-layer command validation: safety classification, dangerous-command
//! gating, pipeline whitelist, redirection containment, editor/pager
//! hardening, and the final policy consultation.
use std::path::{Component, Path, PathBuf};

use crate::command::{Command, Pipeline, Redirect};
use crate::common::{Error, Result};
use crate::policy::{Decision, PolicyEngine};

const ALWAYS_SAFE: &[&str] = &[
    "ls", "pwd", "id", "whoami", "date", "uptime", "cat", "echo", "head", "tail", "wc", "grep",
    "awk", "sed", "cut", "sort", "uniq",
];

const ALWAYS_BLOCKED: &[&str] = &[
    "init", "shutdown", "halt", "reboot", "fdisk", "parted", "mkfs", "dd", "iptables", "ufw",
    "su", "sudo", "passwd", "chpasswd", "useradd", "userdel", "usermod", "nvim", "emacs", "joe",
    "mcedit", "ed", "ex",
];

const CONDITIONALLY_BLOCKED_SHELLS: &[&str] = &[
    "bash", "sh", "zsh", "csh", "tcsh", "ksh", "fish", "dash",
];

const CONDITIONALLY_BLOCKED_INTERPRETERS: &[&str] = &[
    "python", "python3", "perl", "ruby", "node", "nodejs", "irb", "pry", "ipython", "ipython3",
];

const EDITORS: &[&str] = &["vi", "vim", "view", "nano", "pico"];

/// Group whose members are trusted to invoke conditionally-blocked
/// interpreters interactively, named after the running program.
pub(crate) const SHELLS_GROUP_SUFFIX: &str = "-shells";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Classification {
    AlwaysSafe,
    AlwaysBlocked,
    ConditionallyBlocked,
    Unclassified,
}

fn basename(argv0: &str) -> &str {
    Path::new(argv0)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(argv0)
}

pub(crate) fn classify(argv0: &str) -> Classification {
    let name = basename(argv0);
    if ALWAYS_SAFE.contains(&name) {
        Classification::AlwaysSafe
    } else if ALWAYS_BLOCKED.contains(&name) {
        Classification::AlwaysBlocked
    } else if CONDITIONALLY_BLOCKED_SHELLS.contains(&name)
        || CONDITIONALLY_BLOCKED_INTERPRETERS.contains(&name)
    {
        Classification::ConditionallyBlocked
    } else {
        Classification::Unclassified
    }
}

pub(crate) fn is_editor(argv0: &str) -> bool {
    EDITORS.contains(&basename(argv0))
}

/// The sanitized environment an editor stage runs under, overriding anything
/// the caller supplied for these keys.
pub(crate) fn editor_environment() -> Vec<(String, String)> {
    vec![
        ("SHELL".to_string(), "/bin/false".to_string()),
        ("VISUAL".to_string(), "/bin/false".to_string()),
        ("EDITOR".to_string(), "/bin/false".to_string()),
        ("PAGER".to_string(), "/bin/false".to_string()),
        ("MANPAGER".to_string(), "/bin/false".to_string()),
        (
            "VIMINIT".to_string(),
            "set nomodeline noexrc secure".to_string(),
        ),
    ]
}

/// Environment variables that must never reach an editor child even if the
/// caller set them, since they can point at an attacker-controlled init file.
const EDITOR_BLOCKED_ENV_VARS: &[&str] = &["VIMRC", "EXINIT", "MYVIMRC"];

pub(crate) fn sanitize_editor_env(env: &mut Vec<(String, String)>) {
    env.retain(|(key, _)| !EDITOR_BLOCKED_ENV_VARS.contains(&key.as_str()));
    env.extend(editor_environment());
}

/// The umask an editor child is started under, so files it creates aren't
/// group/world readable.
pub(crate) const EDITOR_UMASK: libc::mode_t = 0o077;

/// `LESSSECURE=1`, clearing `LESSOPEN`/`VISUAL`, applied when a stage's
/// output feeds a pager (`less`, `more`).
const PAGERS: &[&str] = &["less", "more"];

pub(crate) fn is_pager(argv0: &str) -> bool {
    PAGERS.contains(&basename(argv0))
}

pub(crate) fn pager_environment() -> Vec<(String, String)> {
    vec![("LESSSECURE".to_string(), "1".to_string())]
}

const PAGER_BLOCKED_ENV_VARS: &[&str] = &["LESSOPEN", "VISUAL"];

pub(crate) fn sanitize_pager_env(env: &mut Vec<(String, String)>) {
    env.retain(|(key, _)| !PAGER_BLOCKED_ENV_VARS.contains(&key.as_str()));
    env.extend(pager_environment());
}

/// Directories whose contents a redirection may target.
const REDIRECT_ALLOWED_PREFIXES: &[&str] = &["/tmp/", "/var/tmp/"];

/// Check the redirect-containment property: the canonicalized target must
/// fall under `/tmp/`, `/var/tmp/`, or the caller's home directory, and must
/// not traverse back out of that prefix via `..`.
pub(crate) fn check_redirect_target(path: &Path, caller_home: &Path) -> Result<()> {
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::Validate(format!(
            "redirection target '{}' may not contain '..'",
            path.display()
        )));
    }

    let canonical = canonicalize_best_effort(path);
    let canonical_str = canonical.to_string_lossy();

    let under_allowed_prefix = REDIRECT_ALLOWED_PREFIXES
        .iter()
        .any(|prefix| canonical_str.starts_with(prefix));
    let under_home = caller_home
        .to_str()
        .is_some_and(|home| canonical.starts_with(home));

    if under_allowed_prefix || under_home {
        Ok(())
    } else {
        Err(Error::Validate(format!(
            "redirection target '{}' is outside writable directories",
            path.display()
        )))
    }
}

/// Canonicalize `path` if it (or its existing parent) can be resolved;
/// otherwise lexically normalize it. A redirection target usually doesn't
/// exist yet, so `fs::canonicalize` alone would fail for the common case.
fn canonicalize_best_effort(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let mut base = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical_base) = base.canonicalize() {
            let mut result = canonical_base;
            for component in tail.into_iter().rev() {
                result.push(component);
            }
            return result;
        }
        let Some(parent) = base.parent() else {
            return normalize_lexically(path);
        };
        if let Some(name) = base.file_name() {
            tail.push(name.to_os_string());
        }
        if parent == base {
            return normalize_lexically(path);
        }
        base = parent.to_path_buf();
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Validate a full pipeline: pipeline whitelist, per-stage redirection
/// containment, editor/pager environment hardening, and a final policy
/// consultation for each distinct program. `group_names` is every group the
/// caller belongs to, used to match `%group` policy rule entries.
pub(crate) fn validate_pipeline(
    pipeline: &mut Pipeline,
    caller: &str,
    group_names: &[String],
    host: &str,
    caller_home: &Path,
    in_distinguished_shells_group: bool,
    policy: &PolicyEngine,
) -> Result<Vec<bool>> {
    let last_index = pipeline.stages.len() - 1;
    let mut requires_auth_per_stage = Vec::with_capacity(pipeline.stages.len());

    for (index, stage) in pipeline.stages.iter_mut().enumerate() {
        let is_terminal = index == last_index;
        validate_stage(stage, is_terminal, in_distinguished_shells_group, policy)?;

        if let Redirect::Out(path) | Redirect::Append(path) = &stage.redirect_out {
            check_redirect_target(path, caller_home)?;
        }

        let argv0 = stage
            .program()
            .ok_or_else(|| Error::Input("empty command".to_string()))?;
        match policy.check(caller, group_names, host, &stage.runas_user, &stage.argv)? {
            Decision::Allow { requires_auth } => requires_auth_per_stage.push(requires_auth),
            Decision::Deny | Decision::NotFound => {
                return Err(Error::Policy(format!(
                    "no rule permits '{argv0}' as {}",
                    stage.runas_user
                )))
            }
        }
    }

    Ok(requires_auth_per_stage)
}

fn validate_stage(
    stage: &mut Command,
    is_terminal: bool,
    in_distinguished_shells_group: bool,
    _policy: &PolicyEngine,
) -> Result<()> {
    let argv0 = stage
        .program()
        .ok_or_else(|| Error::Input("empty command".to_string()))?
        .to_string();

    let classification = classify(&argv0);

    if classification == Classification::AlwaysBlocked {
        return Err(Error::Validate(format!("'{argv0}' may never be run here")));
    }

    if classification == Classification::ConditionallyBlocked && !in_distinguished_shells_group {
        return Err(Error::Validate(format!(
            "'{argv0}' requires explicit policy or {} group membership",
            SHELLS_GROUP_SUFFIX.trim_start_matches('-')
        )));
    }

    if !is_terminal && classification != Classification::AlwaysSafe {
        return Err(Error::Validate(format!(
            "'{argv0}' may not appear in a non-terminal pipeline stage"
        )));
    }

    if is_editor(&argv0) {
        sanitize_editor_env(&mut stage.env);
    }
    if is_pager(&argv0) {
        sanitize_pager_env(&mut stage.env);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyEngine, Rule, RuleFlags, RuleSet};

    fn allow_all_policy() -> PolicyEngine {
        PolicyEngine::new(vec![Box::new(RuleSet(vec![Rule {
            users: vec!["ALL".to_string()],
            hosts: vec!["ALL".to_string()],
            runas_users: vec!["ALL".to_string()],
            commands: vec!["ALL".to_string()],
            flags: RuleFlags {
                nopasswd: false,
                authenticate: true,
            },
        }]))])
    }

    #[test]
    fn classifies_known_commands() {
        assert_eq!(classify("/bin/ls"), Classification::AlwaysSafe);
        assert_eq!(classify("su"), Classification::AlwaysBlocked);
        assert_eq!(classify("bash"), Classification::ConditionallyBlocked);
        assert_eq!(classify("nonexistent-tool"), Classification::Unclassified);
    }

    #[test]
    fn redirect_to_tmp_is_allowed() {
        assert!(check_redirect_target(Path::new("/tmp/foo"), Path::new("/home/alice")).is_ok());
    }

    #[test]
    fn redirect_to_etc_is_rejected() {
        assert!(check_redirect_target(Path::new("/etc/ls.txt"), Path::new("/home/alice")).is_err());
    }

    #[test]
    fn redirect_with_parent_traversal_is_rejected() {
        assert!(check_redirect_target(Path::new("/tmp/../etc/passwd"), Path::new("/home/alice")).is_err());
    }

    #[test]
    fn non_terminal_unsafe_stage_is_rejected() {
        let mut pipeline = Pipeline {
            stages: vec![
                Command::new(vec!["bash".to_string()], "root"),
                Command::new(vec!["grep".to_string(), "root".to_string()], "root"),
            ],
        };
        let policy = allow_all_policy();
        let err = validate_pipeline(&mut pipeline, "alice", &[], "host1", Path::new("/home/alice"), false, &policy)
            .unwrap_err();
        assert!(matches!(err, Error::Validate(_)));
    }

    #[test]
    fn accepted_two_stage_pipeline_returns_per_stage_auth_requirement() {
        let mut pipeline = Pipeline {
            stages: vec![
                Command::new(vec!["cat".to_string(), "/etc/passwd".to_string()], "root"),
                Command::new(vec!["grep".to_string(), "root".to_string()], "root"),
            ],
        };
        let policy = allow_all_policy();
        let result = validate_pipeline(&mut pipeline, "alice", &[], "host1", Path::new("/home/alice"), false, &policy)
            .unwrap();
        assert_eq!(result, vec![true, true]);
    }

    #[test]
    fn editor_stage_env_is_sanitized_during_validation() {
        let mut pipeline = Pipeline {
            stages: vec![Command::new(vec!["vim".to_string(), "/tmp/f".to_string()], "root")],
        };
        pipeline.stages[0].env.push(("VIMRC".to_string(), "/tmp/evil".to_string()));
        let policy = allow_all_policy();
        validate_pipeline(&mut pipeline, "alice", &[], "host1", Path::new("/home/alice"), false, &policy)
            .unwrap();
        assert!(!pipeline.stages[0].env.iter().any(|(k, _)| k == "VIMRC"));
        assert!(pipeline.stages[0]
            .env
            .iter()
            .any(|(k, v)| k == "VISUAL" && v == "/bin/false"));
    }

    #[test]
    fn editor_env_strips_user_supplied_init_vars() {
        let mut env = vec![("VIMRC".to_string(), "/tmp/evil".to_string())];
        sanitize_editor_env(&mut env);
        assert!(!env.iter().any(|(k, _)| k == "VIMRC"));
        assert!(env.iter().any(|(k, v)| k == "VISUAL" && v == "/bin/false"));
    }

    #[test]
    fn pager_env_sets_lesssecure_and_clears_lessopen() {
        let mut env = vec![("LESSOPEN".to_string(), "|evil".to_string())];
        sanitize_pager_env(&mut env);
        assert!(!env.iter().any(|(k, _)| k == "LESSOPEN"));
        assert!(env.iter().any(|(k, v)| k == "LESSSECURE" && v == "1"));
    }
}
