//! Thin typed wrappers over the mount/namespace syscalls the engine needs.
//! Every failure carries the syscall name and the kernel error code.

use std::os::fd::BorrowedFd;
use std::path::Path;

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;
use nix::unistd::Pid;

use crate::core::error::{Error, Result};

/// Outcome of a fork-style `clone`.
#[derive(Debug)]
pub enum CloneResult {
    Child,
    Parent { child: Pid },
}

pub fn mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    nix::mount::mount(source, target, fstype, flags, data)
        .map_err(|errno| Error::KernelSyscall { call: "mount", errno })
}

pub fn umount(target: &Path) -> Result<()> {
    nix::mount::umount(target).map_err(|errno| Error::KernelSyscall { call: "umount", errno })
}

pub fn umount2(target: &Path, flags: MntFlags) -> Result<()> {
    nix::mount::umount2(target, flags)
        .map_err(|errno| Error::KernelSyscall { call: "umount2", errno })
}

pub fn unshare(flags: CloneFlags) -> Result<()> {
    nix::sched::unshare(flags).map_err(|errno| Error::KernelSyscall { call: "unshare", errno })
}

/// Join the namespace referred to by `fd`.
pub fn setns(fd: BorrowedFd<'_>, flags: CloneFlags) -> Result<()> {
    nix::sched::setns(fd, flags).map_err(|errno| Error::KernelSyscall { call: "setns", errno })
}

pub fn pivot_root(new_root: &Path, put_old: &Path) -> Result<()> {
    nix::unistd::pivot_root(new_root, put_old)
        .map_err(|errno| Error::KernelSyscall { call: "pivot_root", errno })
}

/// Fork-style `clone(2)`: with a zero stack the child continues from the call
/// site on a copy-on-write copy of the parent's stack, exactly like `fork`.
///
/// # Safety
///
/// Same constraints as `fork` in a possibly multi-threaded process: the child
/// must restrict itself to async-signal-safe work until it calls `exec`.
pub unsafe fn clone(flags: libc::c_ulong, stack: usize) -> Result<CloneResult> {
    let res = libc::syscall(
        libc::SYS_clone,
        flags | libc::SIGCHLD as libc::c_ulong,
        stack,
        0usize,
        0usize,
        0usize,
    );
    match res {
        0 => Ok(CloneResult::Child),
        r if r > 0 => Ok(CloneResult::Parent {
            child: Pid::from_raw(r as libc::pid_t),
        }),
        _ => Err(Error::KernelSyscall {
            call: "clone",
            errno: Errno::last(),
        }),
    }
}

/// `getpid(2)` via a raw syscall. libc may cache the PID and the cache goes
/// stale when processes are created with raw `clone`; the bring-up sequence
/// relies on this returning the real kernel answer.
pub fn getpid_nocache() -> Result<libc::pid_t> {
    let res = unsafe { libc::syscall(libc::SYS_getpid) };
    if res < 0 {
        return Err(Error::KernelSyscall {
            call: "getpid",
            errno: Errno::last(),
        });
    }
    Ok(res as libc::pid_t)
}
