//! Scoped mount acquisitions. A mount taken through one of these guards is
//! released when the guard drops, on every control-flow exit path; a failed
//! plain unmount falls back to a lazy detach.

use std::path::{Path, PathBuf};

use log::warn;
use nix::mount::{MntFlags, MsFlags};

use crate::core::error::{Error, Result};
use crate::platform::linux::syscall;
use crate::util::fs as fsutil;

/// A bind mount held for a scope, optionally remounted read-only.
#[derive(Debug)]
pub struct BindMount {
    target: PathBuf,
}

impl BindMount {
    pub fn acquire(source: &Path, target: &Path, read_only: bool) -> Result<Self> {
        syscall::mount(Some(source), target, None, MsFlags::MS_BIND, None)?;
        let guard = Self { target: target.to_path_buf() };
        if read_only {
            // A read-only bind needs a second remount call; the initial
            // MS_BIND ignores MS_RDONLY.
            syscall::mount(
                None,
                target,
                None,
                MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
                None,
            )?;
        }
        Ok(guard)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for BindMount {
    fn drop(&mut self) {
        release(&self.target);
    }
}

/// An overlay filesystem held for a scope: read-only lower layers stacked
/// under a writable upper layer at `target`.
#[derive(Debug)]
pub struct OverlayMount {
    target: PathBuf,
}

impl OverlayMount {
    pub fn acquire(
        lowerdirs: &[&Path],
        upperdir: &Path,
        workdir: &Path,
        target: &Path,
    ) -> Result<Self> {
        let lower = lowerdirs
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":");
        let data = format!(
            "lowerdir={lower},upperdir={},workdir={}",
            upperdir.display(),
            workdir.display()
        );
        syscall::mount(
            Some(Path::new("overlay")),
            target,
            Some("overlay"),
            MsFlags::empty(),
            Some(&data),
        )?;
        Ok(Self { target: target.to_path_buf() })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for OverlayMount {
    fn drop(&mut self) {
        release(&self.target);
    }
}

fn release(target: &Path) {
    if let Err(err) = syscall::umount(target) {
        warn!("failed to unmount {}, detaching instead: {err}", target.display());
        if let Err(err) = syscall::umount2(target, MntFlags::MNT_DETACH) {
            warn!("failed to detach {}: {err}", target.display());
        }
    }
}

/// Whether `path` is a mount point, by scanning `/proc/self/mounts`.
/// `statfs`-based checks miss bind mounts of the same filesystem.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let mounts = fsutil::read_to_string(Path::new("/proc/self/mounts"))?;
    let needle = path
        .canonicalize()
        .map_err(Error::io(format!("failed to resolve {}", path.display())))?;
    for line in mounts.lines() {
        if let Some(raw) = line.split(' ').nth(1) {
            if PathBuf::from(unescape_mount_path(raw)) == needle {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Decode the octal escapes (`\040` for space etc.) used in /proc mount lists.
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            if let Ok(code) = u8::from_str_radix(&raw[i + 1..i + 4], 8) {
                out.push(code as char);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}
