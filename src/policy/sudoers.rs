//! A compatible subset of the sudoers grammar: alias definitions and user
//! specifications, loaded from a main file plus a drop-in directory.
//!
//! Supported constructs per line:
//!
//! ```text
//! User_Alias ADMINS = alice, bob
//! Host_Alias WEBSERVERS = web1, web2
//! Runas_Alias DEPLOYERS = deploy, release
//! Cmnd_Alias SERVICES = /bin/systemctl, /usr/bin/journalctl
//! alice ALL = (root) NOPASSWD: /bin/ls, /usr/bin/whoami
//! %wheel ALL = (ALL) ALL
//! ```
//!
//! Full sudoers (nested aliases, `Defaults` lines, negation) is out of scope;
//! unrecognized lines are rejected rather than silently ignored, so a typo in
//! a security-relevant file fails loudly at load time.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::common::{Error, Result};
use crate::policy::{Decision, PolicySource, Rule, RuleFlags, RuleSet};

#[derive(Default)]
struct Aliases {
    user: HashMap<String, Vec<String>>,
    host: HashMap<String, Vec<String>>,
    runas: HashMap<String, Vec<String>>,
    cmnd: HashMap<String, Vec<String>>,
}

impl Aliases {
    fn expand(list: &HashMap<String, Vec<String>>, items: Vec<String>) -> Vec<String> {
        let mut expanded = Vec::new();
        for item in items {
            match list.get(&item) {
                Some(members) => expanded.extend(members.iter().cloned()),
                None => expanded.push(item),
            }
        }
        expanded
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a sudoers-like source into a list of [`Rule`]s, resolving alias
/// references along the way. `%group` prefixes on the user field are kept
/// verbatim; matching against group membership happens in `Rule::matches`,
/// against the `group_names` passed into [`PolicySource::evaluate`], which
/// callers obtain from the resolver (`Resolver::group_names_for`).
pub(crate) fn parse(source: &str) -> Result<Vec<Rule>> {
    let mut aliases = Aliases::default();
    let mut rules = Vec::new();

    for (lineno, raw_line) in source.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("User_Alias ") {
            let (name, value) = split_alias(rest, lineno)?;
            aliases.user.insert(name, split_list(&value));
        } else if let Some(rest) = line.strip_prefix("Host_Alias ") {
            let (name, value) = split_alias(rest, lineno)?;
            aliases.host.insert(name, split_list(&value));
        } else if let Some(rest) = line.strip_prefix("Runas_Alias ") {
            let (name, value) = split_alias(rest, lineno)?;
            aliases.runas.insert(name, split_list(&value));
        } else if let Some(rest) = line.strip_prefix("Cmnd_Alias ") {
            let (name, value) = split_alias(rest, lineno)?;
            aliases.cmnd.insert(name, split_list(&value));
        } else {
            rules.push(parse_user_spec(line, &aliases, lineno)?);
        }
    }

    Ok(rules)
}

fn split_alias(rest: &str, lineno: usize) -> Result<(String, String)> {
    rest.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .ok_or_else(|| {
            Error::Configuration(format!("line {}: malformed alias definition", lineno + 1))
        })
}

/// `user host = (runas) [TAG:] commands`
fn parse_user_spec(line: &str, aliases: &Aliases, lineno: usize) -> Result<Rule> {
    let (lhs, rhs) = line.split_once('=').ok_or_else(|| {
        Error::Configuration(format!("line {}: missing '='", lineno + 1))
    })?;

    let mut lhs_parts = lhs.split_whitespace();
    let user = lhs_parts
        .next()
        .ok_or_else(|| Error::Configuration(format!("line {}: missing user field", lineno + 1)))?
        .to_string();
    let host = lhs_parts
        .next()
        .ok_or_else(|| Error::Configuration(format!("line {}: missing host field", lineno + 1)))?
        .to_string();

    let mut rhs = rhs.trim();
    let runas_users = if let Some(stripped) = rhs.strip_prefix('(') {
        let (inside, after) = stripped.split_once(')').ok_or_else(|| {
            Error::Configuration(format!("line {}: unterminated runas group", lineno + 1))
        })?;
        rhs = after.trim();
        split_list(inside)
    } else {
        vec!["ALL".to_string()]
    };

    let mut flags = RuleFlags {
        nopasswd: false,
        authenticate: true,
    };

    loop {
        if let Some(stripped) = rhs.strip_prefix("NOPASSWD:") {
            flags.nopasswd = true;
            flags.authenticate = false;
            rhs = stripped.trim();
        } else if let Some(stripped) = rhs.strip_prefix("PASSWD:") {
            flags.nopasswd = false;
            flags.authenticate = true;
            rhs = stripped.trim();
        } else if let Some(stripped) = rhs.strip_prefix("NOAUTHENTICATE:") {
            flags.authenticate = false;
            rhs = stripped.trim();
        } else if let Some(stripped) = rhs.strip_prefix("AUTHENTICATE:") {
            flags.authenticate = true;
            rhs = stripped.trim();
        } else {
            break;
        }
    }

    let commands = Aliases::expand(&aliases.cmnd, split_list(rhs));

    Ok(Rule {
        users: Aliases::expand(&aliases.user, vec![user]),
        hosts: Aliases::expand(&aliases.host, vec![host]),
        runas_users: Aliases::expand(&aliases.runas, runas_users),
        commands,
        flags,
    })
}

/// Loads a main sudoers-style file plus every regular file in its companion
/// drop-in directory, in lexical order, matching `/etc/sudoers.d`'s
/// conventions. A missing directory is not an error.
pub(crate) fn load(main_file: &Path, drop_in_dir: &Path) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();

    if main_file.exists() {
        let contents = std::fs::read_to_string(main_file)
            .map_err(|err| Error::IoError(Some(main_file.to_path_buf()), err))?;
        rules.extend(parse(&contents)?);
    }

    if drop_in_dir.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(drop_in_dir)
            .map_err(|err| Error::IoError(Some(drop_in_dir.to_path_buf()), err))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        entries.sort();

        for path in entries {
            let contents = std::fs::read_to_string(&path)
                .map_err(|err| Error::IoError(Some(path.clone()), err))?;
            rules.extend(parse(&contents)?);
        }
    }

    Ok(rules)
}

pub(crate) struct SudoersSource(pub(crate) RuleSet);

impl PolicySource for SudoersSource {
    fn evaluate(
        &self,
        user: &str,
        group_names: &[String],
        host: &str,
        runas_user: &str,
        argv: &[String],
    ) -> Result<Decision> {
        self.0.evaluate(user, group_names, host, runas_user, argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_user_spec() {
        let rules = parse("alice ALL = (root) NOPASSWD: /bin/ls, /usr/bin/whoami\n").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].users, vec!["alice"]);
        assert!(rules[0].flags.nopasswd);
        assert_eq!(rules[0].commands, vec!["/bin/ls", "/usr/bin/whoami"]);
    }

    #[test]
    fn expands_aliases() {
        let source = "User_Alias ADMINS = alice, bob\n\
                       Cmnd_Alias SAFE = /bin/ls\n\
                       ADMINS ALL = (root) SAFE\n";
        let rules = parse(source).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].users, vec!["alice", "bob"]);
        assert_eq!(rules[0].commands, vec!["/bin/ls"]);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse("this is not a rule\n").is_err());
    }

    #[test]
    fn group_prefix_is_kept_verbatim() {
        let rules = parse("%wheel ALL = (ALL) ALL\n").unwrap();
        assert_eq!(rules[0].users, vec!["%wheel"]);
    }

    #[test]
    fn passwd_tag_overrides_nopasswd() {
        let rules = parse("alice ALL = NOPASSWD: PASSWD: /bin/ls\n").unwrap();
        assert!(!rules[0].flags.nopasswd);
        assert!(rules[0].flags.authenticate);
    }
}
