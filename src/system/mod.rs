use std::{
    ffi::{c_char, c_int, c_uint, CStr},
    fs, io,
    mem::MaybeUninit,
};

use crate::cutils::{cerr, os_string_from_ptr, string_from_ptr, sysconf};

pub(crate) mod file;
pub(crate) mod interface;
pub(crate) mod poll;
pub(crate) mod signal;
pub(crate) mod term;
pub(crate) mod wait;

use interface::{GroupId, ProcessId, UnixGroup, UnixUser, UserId};
use libc::{CLOSE_RANGE_CLOEXEC, EINVAL, ENOSYS, STDERR_FILENO};
use signal::SignalNumber;

#[cfg(not(any(target_os = "freebsd", target_os = "linux")))]
compile_error!("this program only works on Linux and FreeBSD");

/// Mark every file descriptor that is not one of the IO streams as CLOEXEC, so they are not
/// inherited across `exec` by the privileged command we are about to run.
pub(crate) fn mark_fds_as_cloexec() -> io::Result<()> {
    let lowfd = STDERR_FILENO + 1;

    let res = unsafe {
        #[cfg(not(target_os = "linux"))]
        {
            cerr(libc::close_range(
                lowfd as c_uint,
                c_uint::MAX,
                CLOSE_RANGE_CLOEXEC as c_int,
            ))
        }
        // close_range was only added in glibc 2.34 and is not part of musl, so go through the
        // raw syscall instead on Linux.
        #[cfg(target_os = "linux")]
        {
            cerr(libc::syscall(
                libc::SYS_close_range,
                lowfd as c_uint,
                c_uint::MAX,
                CLOSE_RANGE_CLOEXEC as c_uint,
            ))
        }
    };

    match res {
        Err(err) if err.raw_os_error() == Some(ENOSYS) || err.raw_os_error() == Some(EINVAL) => {
            for entry in fs::read_dir("/proc/self/fd")? {
                let entry = entry?;
                let file_name = entry.file_name();
                let file_name = file_name.to_str().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "procfs returned non-integer fd name")
                })?;
                if file_name == "." || file_name == ".." {
                    continue;
                }
                let fd: c_int = file_name.parse().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "procfs returned non-integer fd name")
                })?;
                if fd < lowfd {
                    continue;
                }
                unsafe {
                    cerr(libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
                }
            }
            Ok(())
        }
        Err(err) => Err(err),
        Ok(_) => Ok(()),
    }
}

pub(crate) enum ForkResult {
    Parent(ProcessId),
    Child,
}

/// Create a new process.
///
/// # Safety
///
/// Must not be called in multithreaded programs, other than right before an `exec`.
pub(crate) unsafe fn fork() -> io::Result<ForkResult> {
    // SAFETY: calling async-signal-unsafe functions after fork is safe as the caller guarantees
    // the program is single threaded at this point.
    let pid = cerr(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(pid))
    }
}

pub(crate) fn setsid() -> io::Result<ProcessId> {
    cerr(unsafe { libc::setsid() })
}

pub(crate) fn chdir<P: AsRef<std::path::Path>>(path: P) -> io::Result<()> {
    let path = std::ffi::CString::new(path.as_ref().as_os_str().as_encoded_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    cerr(unsafe { libc::chdir(path.as_ptr()) }).map(|_| ())
}

/// Resolve the hostname of the current machine, e.g. for `Host_Alias` matching.
pub(crate) fn hostname() -> String {
    const FALLBACK_MAX_LEN: std::ffi::c_long = 255;

    let max_len = sysconf(libc::_SC_HOST_NAME_MAX).unwrap_or(FALLBACK_MAX_LEN) as usize;
    let mut buf = vec![0u8; max_len + 1];

    match cerr(unsafe { libc::gethostname(buf.as_mut_ptr() as *mut c_char, buf.len()) }) {
        Ok(_) => unsafe { string_from_ptr(buf.as_ptr() as *const c_char) },
        Err(_) => String::new(),
    }
}

/// Send a formatted message to syslog under the given priority and facility.
pub(crate) fn syslog(priority: c_int, facility: c_int, message: &CStr) {
    const MSG: *const c_char = match CStr::from_bytes_until_nul(b"%s\0") {
        Ok(cstr) => cstr.as_ptr(),
        Err(_) => panic!("syslog formatting string is not null-terminated"),
    };

    // SAFETY: MSG is a constant "%s" format string, and message is a valid, null-terminated
    // C string supplied as its one varargs argument.
    unsafe {
        libc::syslog(priority | facility, MSG, message.as_ptr());
    }
}

/// Makes sure the target group is included in `groups`, and is its first element (required on
/// FreeBSD).
fn inject_group(target: GroupId, groups: &mut Vec<GroupId>) {
    if let Some(index) = groups.iter().position(|id| *id == target) {
        groups.swap(0, index)
    } else {
        groups.insert(0, target);
    }
}

fn set_supplementary_groups(groups: &[GroupId]) -> io::Result<()> {
    let len = groups.len().try_into().map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "too many supplementary groups")
    })?;
    cerr(unsafe { libc::setgroups(len, groups.as_ptr()) })?;
    Ok(())
}

/// Drop privileges from the effective root identity down to the target user and group, setting
/// the real, effective and saved uid/gid so the command cannot regain root afterwards.
///
/// # Safety
///
/// Must be called after `fork`, before `exec`, while still single-threaded.
pub(crate) unsafe fn drop_privileges_to(target_user: &UnixUser, target_group_id: GroupId) -> io::Result<()> {
    let mut groups = target_user.groups.clone();
    inject_group(target_group_id, &mut groups);

    set_supplementary_groups(&groups)?;
    cerr(unsafe { libc::setgid(target_group_id) })?;
    cerr(unsafe { libc::setuid(target_user.uid) })?;

    Ok(())
}

pub(crate) fn kill(pid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    cerr(unsafe { libc::kill(pid, signal) }).map(|_| ())
}

pub(crate) fn killpg(pgid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    cerr(unsafe { libc::killpg(pgid, signal) }).map(|_| ())
}

pub(crate) fn getpgrp() -> ProcessId {
    unsafe { libc::getpgrp() }
}

pub(crate) fn getpgid(pid: ProcessId) -> io::Result<ProcessId> {
    cerr(unsafe { libc::getpgid(pid) })
}

pub(crate) fn setpgid(pid: ProcessId, pgid: ProcessId) -> io::Result<()> {
    cerr(unsafe { libc::setpgid(pid, pgid) }).map(|_| ())
}

pub(crate) fn process_id() -> ProcessId {
    std::process::id() as ProcessId
}

/// # Safety
/// `pwd` must be the result of a successful call to `getpwnam_r`/`getpwuid_r`, with all its
/// pointed-to strings null-terminated.
unsafe fn user_from_libc(pwd: &libc::passwd) -> io::Result<UnixUser> {
    let mut buf_len: c_int = 32;
    let mut groups_buffer: Vec<libc::gid_t>;

    while {
        groups_buffer = vec![0; buf_len as usize];
        // SAFETY: groups_buffer is a valid buffer of buf_len elements, as required.
        let result = unsafe {
            libc::getgrouplist(pwd.pw_name, pwd.pw_gid, groups_buffer.as_mut_ptr(), &mut buf_len)
        };
        result == -1
    } {
        if buf_len >= 65536 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "user belongs to an implausible number of groups",
            ));
        }
        buf_len *= 2;
    }
    groups_buffer.truncate(buf_len.max(0) as usize);

    // SAFETY: all pointers were initialized by the successful getpwXXX_r call, as required.
    unsafe {
        Ok(UnixUser {
            uid: pwd.pw_uid,
            gid: pwd.pw_gid,
            name: string_from_ptr(pwd.pw_name),
            home: os_string_from_ptr(pwd.pw_dir).into(),
            shell: os_string_from_ptr(pwd.pw_shell).into(),
            groups: groups_buffer,
        })
    }
}

/// Look up a user account by numeric uid, via `getpwuid_r`.
pub(crate) fn user_by_id(uid: UserId) -> io::Result<Option<UnixUser>> {
    let max_pw_size = sysconf(libc::_SC_GETPW_R_SIZE_MAX).unwrap_or(16_384);
    let mut buf = vec![0; max_pw_size as usize];
    let mut pwd = MaybeUninit::uninit();
    let mut pwd_ptr = std::ptr::null_mut();

    cerr(unsafe {
        libc::getpwuid_r(uid, pwd.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut pwd_ptr)
    })?;

    if pwd_ptr.is_null() {
        Ok(None)
    } else {
        let pwd = unsafe { pwd.assume_init() };
        unsafe { user_from_libc(&pwd).map(Some) }
    }
}

/// Look up a user account by name, via `getpwnam_r`.
pub(crate) fn user_by_name(name: &CStr) -> io::Result<Option<UnixUser>> {
    let max_pw_size = sysconf(libc::_SC_GETPW_R_SIZE_MAX).unwrap_or(16_384);
    let mut buf = vec![0; max_pw_size as usize];
    let mut pwd = MaybeUninit::uninit();
    let mut pwd_ptr = std::ptr::null_mut();

    cerr(unsafe {
        libc::getpwnam_r(name.as_ptr(), pwd.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut pwd_ptr)
    })?;

    if pwd_ptr.is_null() {
        Ok(None)
    } else {
        let pwd = unsafe { pwd.assume_init() };
        unsafe { user_from_libc(&pwd).map(Some) }
    }
}

pub(crate) fn effective_uid() -> UserId {
    unsafe { libc::geteuid() }
}

pub(crate) fn effective_gid() -> GroupId {
    unsafe { libc::getegid() }
}

pub(crate) fn real_uid() -> UserId {
    unsafe { libc::getuid() }
}

pub(crate) fn real_gid() -> GroupId {
    unsafe { libc::getgid() }
}

/// # Safety
/// `grp` must be the result of a successful call to `getgrnam_r`/`getgrgid_r`.
unsafe fn group_from_libc(grp: &libc::group) -> UnixGroup {
    UnixGroup {
        gid: grp.gr_gid,
        name: unsafe { string_from_ptr(grp.gr_name) },
    }
}

/// Look up a group by numeric gid, via `getgrgid_r`.
pub(crate) fn group_by_id(gid: GroupId) -> io::Result<Option<UnixGroup>> {
    let max_gr_size = sysconf(libc::_SC_GETGR_R_SIZE_MAX).unwrap_or(16_384);
    let mut buf = vec![0; max_gr_size as usize];
    let mut grp = MaybeUninit::uninit();
    let mut grp_ptr = std::ptr::null_mut();

    cerr(unsafe {
        libc::getgrgid_r(gid, grp.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut grp_ptr)
    })?;

    if grp_ptr.is_null() {
        Ok(None)
    } else {
        let grp = unsafe { grp.assume_init() };
        Ok(Some(unsafe { group_from_libc(&grp) }))
    }
}

/// Look up a group by name, via `getgrnam_r`.
pub(crate) fn group_by_name(name: &CStr) -> io::Result<Option<UnixGroup>> {
    let max_gr_size = sysconf(libc::_SC_GETGR_R_SIZE_MAX).unwrap_or(16_384);
    let mut buf = vec![0; max_gr_size as usize];
    let mut grp = MaybeUninit::uninit();
    let mut grp_ptr = std::ptr::null_mut();

    cerr(unsafe {
        libc::getgrnam_r(name.as_ptr(), grp.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut grp_ptr)
    })?;

    if grp_ptr.is_null() {
        Ok(None)
    } else {
        let grp = unsafe { grp.assume_init() };
        Ok(Some(unsafe { group_from_libc(&grp) }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    pub(crate) fn tempfile() -> std::io::Result<std::fs::File> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is before the epoch")
            .as_nanos();
        let pid = std::process::id();

        let path = std::env::temp_dir().join(format!("sudosh_test_{pid}_{timestamp}"));
        std::fs::File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
    }

    #[test]
    fn resolves_root_by_uid_and_name() {
        let root = super::user_by_id(0).unwrap().unwrap();
        assert_eq!(root.uid, 0);
        assert_eq!(root.name, "root");

        let root = super::user_by_name(&std::ffi::CString::new("root").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(root.uid, 0);
    }

    #[test]
    fn cloexec_marks_descriptors() {
        use std::os::fd::AsRawFd;

        let f = tempfile().unwrap();
        let fd = f.as_raw_fd();
        assert_eq!(
            crate::cutils::cerr(unsafe { libc::fcntl(fd, libc::F_GETFD) }).unwrap() & libc::FD_CLOEXEC,
            0
        );
    }
}
