//! Thin, directly-callable aliases for the identifier types the kernel hands
//! back from `getpwnam_r`, `fork`, `waitpid`, and friends. Kept as raw
//! integers (not newtypes) since they flow straight into libc calls
//! (`fchown`, `flock`, `kill`) without any intermediate validation.

pub(crate) type ProcessId = libc::pid_t;
pub(crate) type UserId = libc::uid_t;
pub(crate) type GroupId = libc::gid_t;

pub(crate) const ROOT_UID: UserId = 0;

/// A resolved user identity, as produced by the resolver from `getpwnam_r`/
/// `getpwuid_r` or an equivalent directory-service lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnixUser {
    pub(crate) name: String,
    pub(crate) uid: UserId,
    pub(crate) gid: GroupId,
    pub(crate) home: std::path::PathBuf,
    pub(crate) shell: std::path::PathBuf,
    pub(crate) groups: Vec<GroupId>,
}

/// A resolved group identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnixGroup {
    pub(crate) name: String,
    pub(crate) gid: GroupId,
}
