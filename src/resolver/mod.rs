//! Identity resolution for users, groups, and group membership.
//!
//! Lookups go through a small ordered chain of sources, mirroring the way NSS
//! itself is configured: each source is consulted in turn and the first hit
//! wins. A source that has nothing to say is not an error; only a source that
//! is misconfigured or unreachable logs a warning and is skipped. This module
//! never shells out to an external `getent`/`sudo`-style query binary; every
//! source here is either a direct libc call or an in-process fallback.
use crate::common::{Error, Result};
use crate::log::dev_warn;
use crate::system::interface::{GroupId, UnixGroup, UnixUser, UserId};
use crate::system::{group_by_id, group_by_name, user_by_id, user_by_name};

/// A source of identity information, consulted in the order given to [`Resolver::new`].
pub(crate) trait NameServiceSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn user_by_name(&self, name: &str) -> Result<Option<UnixUser>>;
    fn user_by_id(&self, uid: UserId) -> Result<Option<UnixUser>>;
    fn group_by_name(&self, name: &str) -> Result<Option<UnixGroup>>;
    fn group_by_id(&self, gid: GroupId) -> Result<Option<UnixGroup>>;
}

/// The local `/etc/passwd` and `/etc/group` databases, reached through libc.
pub(crate) struct FilesSource;

impl NameServiceSource for FilesSource {
    fn name(&self) -> &'static str {
        "files"
    }

    fn user_by_name(&self, name: &str) -> Result<Option<UnixUser>> {
        let cname = std::ffi::CString::new(name).map_err(|_| Error::Resolve(
            format!("user name '{name}' contains a NUL byte"),
        ))?;
        Ok(user_by_name(&cname)?)
    }

    fn user_by_id(&self, uid: UserId) -> Result<Option<UnixUser>> {
        Ok(user_by_id(uid)?)
    }

    fn group_by_name(&self, name: &str) -> Result<Option<UnixGroup>> {
        let cname = std::ffi::CString::new(name).map_err(|_| Error::Resolve(
            format!("group name '{name}' contains a NUL byte"),
        ))?;
        Ok(group_by_name(&cname)?)
    }

    fn group_by_id(&self, gid: GroupId) -> Result<Option<UnixGroup>> {
        Ok(group_by_id(gid)?)
    }
}

/// Resolves identities by consulting an ordered list of [`NameServiceSource`]s.
///
/// By default this holds just [`FilesSource`]. The directory-service policy
/// backend (see [`crate::policy::directory_service`]) answers rule questions,
/// not identity questions, so it is not wired in here; should a future
/// directory-backed identity source be added it plugs in the same way.
pub(crate) struct Resolver {
    sources: Vec<Box<dyn NameServiceSource>>,
}

impl Resolver {
    pub(crate) fn new() -> Self {
        Self {
            sources: vec![Box::new(FilesSource)],
        }
    }

    /// Build a resolver limited to the local files source, used when the
    /// name-service configuration itself cannot be read.
    pub(crate) fn files_only() -> Self {
        Self::new()
    }

    pub(crate) fn get_user_by_name(&self, name: &str) -> Result<Option<UnixUser>> {
        for source in &self.sources {
            match source.user_by_name(name) {
                Ok(Some(user)) => return Ok(Some(user)),
                Ok(None) => continue,
                Err(err) => {
                    dev_warn!("name service source '{}' failed: {err}", source.name());
                    continue;
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn get_user_by_id(&self, uid: UserId) -> Result<Option<UnixUser>> {
        for source in &self.sources {
            match source.user_by_id(uid) {
                Ok(Some(user)) => return Ok(Some(user)),
                Ok(None) => continue,
                Err(err) => {
                    dev_warn!("name service source '{}' failed: {err}", source.name());
                    continue;
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn get_group_by_name(&self, name: &str) -> Result<Option<UnixGroup>> {
        for source in &self.sources {
            match source.group_by_name(name) {
                Ok(Some(group)) => return Ok(Some(group)),
                Ok(None) => continue,
                Err(err) => {
                    dev_warn!("name service source '{}' failed: {err}", source.name());
                    continue;
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn get_group_by_id(&self, gid: GroupId) -> Result<Option<UnixGroup>> {
        for source in &self.sources {
            match source.group_by_id(gid) {
                Ok(Some(group)) => return Ok(Some(group)),
                Ok(None) => continue,
                Err(err) => {
                    dev_warn!("name service source '{}' failed: {err}", source.name());
                    continue;
                }
            }
        }
        Ok(None)
    }

    /// True if `user` is a member of the group named `group_name`, either as
    /// primary or supplementary group.
    pub(crate) fn is_member_of_group(&self, user: &UnixUser, group_name: &str) -> Result<bool> {
        let Some(group) = self.get_group_by_name(group_name)? else {
            return Ok(false);
        };
        Ok(user.gid == group.gid || user.groups.contains(&group.gid))
    }

    /// Names of every group `user` belongs to (primary and supplementary),
    /// used to match `%group` entries in policy rules. A gid with no
    /// resolvable name is silently skipped rather than treated as an error.
    pub(crate) fn group_names_for(&self, user: &UnixUser) -> Result<Vec<String>> {
        let mut gids = vec![user.gid];
        gids.extend(user.groups.iter().copied());
        gids.sort_unstable();
        gids.dedup();

        let mut names = Vec::with_capacity(gids.len());
        for gid in gids {
            if let Some(group) = self.get_group_by_id(gid)? {
                names.push(group.name);
            }
        }
        Ok(names)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_root_through_files_source() {
        let resolver = Resolver::new();
        let root = resolver.get_user_by_name("root").unwrap().unwrap();
        assert_eq!(root.uid, 0);
    }

    #[test]
    fn missing_user_is_not_an_error() {
        let resolver = Resolver::new();
        let result = resolver.get_user_by_name("no-such-user-ever-xyz").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn root_is_member_of_its_own_primary_group() {
        let resolver = Resolver::new();
        let root = resolver.get_user_by_name("root").unwrap().unwrap();
        let primary_group = resolver.get_group_by_name("root").ok().flatten();
        if let Some(group) = primary_group {
            assert!(resolver.is_member_of_group(&root, &group.name).unwrap());
        }
    }

    #[test]
    fn group_names_for_includes_the_primary_group() {
        let resolver = Resolver::new();
        let root = resolver.get_user_by_name("root").unwrap().unwrap();
        let primary_group = resolver.get_group_by_id(root.gid).ok().flatten();
        if let Some(group) = primary_group {
            let names = resolver.group_names_for(&root).unwrap();
            assert!(names.contains(&group.name));
        }
    }
}
