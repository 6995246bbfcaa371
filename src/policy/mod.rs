//! Authorization policy: is `user` allowed to run `command` as `runas_user`
//! on `host`, and does it still require authentication.
//!
//! Two independent backends implement [`PolicySource`]: a local file grammar
//! ([`sudoers`]) and an optional directory-service query
//! ([`directory_service`]). [`PolicyEngine`] consults both in order and stops
//! at the first `Allow`/`Deny`; a `NotFound` from every source denies by
//! default, matching sudoers' "implicit deny" semantics.
pub(crate) mod directory_service;
pub(crate) mod sudoers;

use crate::common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct RuleFlags {
    pub(crate) nopasswd: bool,
    pub(crate) authenticate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rule {
    pub(crate) users: Vec<String>,
    pub(crate) hosts: Vec<String>,
    pub(crate) runas_users: Vec<String>,
    pub(crate) commands: Vec<String>,
    pub(crate) flags: RuleFlags,
}

impl Rule {
    /// A user field matches either a literal username, `ALL`, or, when
    /// prefixed with `%`, a group the caller belongs to.
    fn matches_user(&self, user: &str, group_names: &[String]) -> bool {
        self.users.iter().any(|u| match u.strip_prefix('%') {
            Some(group) => group_names.iter().any(|g| g == group),
            None => u == "ALL" || u == user,
        })
    }

    fn matches_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == "ALL" || h == host)
    }

    fn matches_runas(&self, runas_user: &str) -> bool {
        if self.runas_users.is_empty() {
            return runas_user == "root";
        }
        self.runas_users.iter().any(|u| u == "ALL" || u == runas_user)
    }

    fn matches_command(&self, argv: &[String]) -> bool {
        let Some(requested) = argv.first() else {
            return false;
        };
        self.commands.iter().any(|pattern| {
            if pattern == "ALL" {
                return true;
            }
            match glob::Pattern::new(pattern) {
                Ok(glob) => glob.matches(requested),
                Err(_) => pattern == requested,
            }
        })
    }

    fn matches(&self, user: &str, group_names: &[String], host: &str, runas_user: &str, argv: &[String]) -> bool {
        self.matches_user(user, group_names)
            && self.matches_host(host)
            && self.matches_runas(runas_user)
            && self.matches_command(argv)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Allow { requires_auth: bool },
    Deny,
    NotFound,
}

pub(crate) trait PolicySource {
    /// Evaluate the rules this source knows about. `group_names` is every
    /// group `user` belongs to, used to match `%group` rule entries. A
    /// source that has nothing to say about this request returns
    /// `Decision::NotFound` so the engine can fall through to the next
    /// source.
    fn evaluate(
        &self,
        user: &str,
        group_names: &[String],
        host: &str,
        runas_user: &str,
        argv: &[String],
    ) -> Result<Decision>;
}

pub(crate) struct RuleSet(pub(crate) Vec<Rule>);

impl PolicySource for RuleSet {
    fn evaluate(
        &self,
        user: &str,
        group_names: &[String],
        host: &str,
        runas_user: &str,
        argv: &[String],
    ) -> Result<Decision> {
        // Later rules override earlier ones, matching sudoers' last-match-wins semantics.
        let mut decision = Decision::NotFound;
        for rule in &self.0 {
            if rule.matches(user, group_names, host, runas_user, argv) {
                decision = Decision::Allow {
                    requires_auth: !rule.flags.nopasswd,
                };
            }
        }
        Ok(decision)
    }
}

pub(crate) struct PolicyEngine {
    sources: Vec<Box<dyn PolicySource>>,
}

impl PolicyEngine {
    pub(crate) fn new(sources: Vec<Box<dyn PolicySource>>) -> Self {
        Self { sources }
    }

    pub(crate) fn check(
        &self,
        user: &str,
        group_names: &[String],
        host: &str,
        runas_user: &str,
        argv: &[String],
    ) -> Result<Decision> {
        for source in &self.sources {
            match source.evaluate(user, group_names, host, runas_user, argv)? {
                Decision::NotFound => continue,
                decision => return Ok(decision),
            }
        }
        Ok(Decision::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(users: &[&str], commands: &[&str], nopasswd: bool) -> Rule {
        Rule {
            users: users.iter().map(|s| s.to_string()).collect(),
            hosts: vec!["ALL".to_string()],
            runas_users: vec!["ALL".to_string()],
            commands: commands.iter().map(|s| s.to_string()).collect(),
            flags: RuleFlags {
                nopasswd,
                authenticate: !nopasswd,
            },
        }
    }

    #[test]
    fn allows_matching_rule() {
        let rules = RuleSet(vec![rule(&["alice"], &["/bin/ls"], false)]);
        let argv = vec!["/bin/ls".to_string()];
        let decision = rules.evaluate("alice", &[], "box1", "root", &argv).unwrap();
        assert_eq!(decision, Decision::Allow { requires_auth: true });
    }

    #[test]
    fn nopasswd_flag_suppresses_auth() {
        let rules = RuleSet(vec![rule(&["alice"], &["/bin/ls"], true)]);
        let argv = vec!["/bin/ls".to_string()];
        let decision = rules.evaluate("alice", &[], "box1", "root", &argv).unwrap();
        assert_eq!(decision, Decision::Allow { requires_auth: false });
    }

    #[test]
    fn non_matching_user_is_not_found() {
        let rules = RuleSet(vec![rule(&["alice"], &["/bin/ls"], false)]);
        let argv = vec!["/bin/ls".to_string()];
        let decision = rules.evaluate("mallory", &[], "box1", "root", &argv).unwrap();
        assert_eq!(decision, Decision::NotFound);
    }

    #[test]
    fn later_rule_overrides_earlier_one() {
        let rules = RuleSet(vec![
            rule(&["alice"], &["ALL"], false),
            rule(&["alice"], &["/bin/ls"], true),
        ]);
        let argv = vec!["/bin/ls".to_string()];
        let decision = rules.evaluate("alice", &[], "box1", "root", &argv).unwrap();
        assert_eq!(decision, Decision::Allow { requires_auth: false });
    }

    #[test]
    fn glob_command_pattern_matches() {
        let rules = RuleSet(vec![rule(&["alice"], &["/usr/bin/*"], false)]);
        let argv = vec!["/usr/bin/whoami".to_string()];
        let decision = rules.evaluate("alice", &[], "box1", "root", &argv).unwrap();
        assert_eq!(decision, Decision::Allow { requires_auth: true });
    }

    #[test]
    fn group_prefixed_rule_matches_a_member() {
        let rules = RuleSet(vec![rule(&["%wheel"], &["ALL"], false)]);
        let argv = vec!["/bin/ls".to_string()];
        let group_names = vec!["wheel".to_string()];
        let decision = rules.evaluate("alice", &group_names, "box1", "root", &argv).unwrap();
        assert_eq!(decision, Decision::Allow { requires_auth: true });
    }

    #[test]
    fn group_prefixed_rule_does_not_match_a_non_member() {
        let rules = RuleSet(vec![rule(&["%wheel"], &["ALL"], false)]);
        let argv = vec!["/bin/ls".to_string()];
        let decision = rules.evaluate("alice", &[], "box1", "root", &argv).unwrap();
        assert_eq!(decision, Decision::NotFound);
    }

    #[test]
    fn engine_falls_through_not_found_sources() {
        let empty = RuleSet(vec![]);
        let matching = RuleSet(vec![rule(&["alice"], &["ALL"], true)]);
        let engine = PolicyEngine::new(vec![Box::new(empty), Box::new(matching)]);
        let argv = vec!["/bin/ls".to_string()];
        let decision = engine.check("alice", &[], "box1", "root", &argv).unwrap();
        assert_eq!(decision, Decision::Allow { requires_auth: false });
    }
}
