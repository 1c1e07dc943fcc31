//! The in-container init sequence. A freshly cloned process in a new PID
//! namespace re-execs the engine binary with a serialized [`InitArgs`] blob;
//! [`Pid1::run`] then finalizes isolation and hands control to the
//! entrypoint. The steps are strictly ordered: namespaces before mount
//! surgery, pivot before the default mounts, masking before the old root is
//! detached.

use std::ffi::CString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use nix::mount::MsFlags;
use nix::sched::CloneFlags;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use nix::unistd::{chdir, chroot, sethostname, setsid};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::platform::linux::{mounts, syscall, tables};

/// Bytes PID 1 writes to the control pipe once isolation is complete.
pub const READY: &[u8] = b"RDY";

/// One bind mount requested for the container: `destination` is interpreted
/// relative to the container root at mount time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindSpec {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub read_only: bool,
}

/// Everything PID 1 needs, serialized into the `init` argv blob. The two fds
/// survive the re-exec because pipes are created without close-on-exec.
#[derive(Debug, Serialize, Deserialize)]
pub struct InitArgs {
    pub root_dir: PathBuf,
    pub control_read: RawFd,
    pub control_write: RawFd,
    pub isolate_networking: bool,
    pub bind_mounts: Vec<BindSpec>,
    pub hostname: String,
    pub entrypoint: Vec<String>,
}

pub struct Pid1 {
    root_dir: PathBuf,
    control_read: File,
    control_write: File,
    isolate_networking: bool,
    bind_mounts: Vec<BindSpec>,
    hostname: String,
    entrypoint: Vec<String>,
}

impl Pid1 {
    pub fn new(args: InitArgs) -> Result<Self> {
        // SAFETY: the supervisor passed these fds down through exec and this
        // process is their sole owner.
        let control_read = unsafe { File::from_raw_fd(args.control_read) };
        let control_write = unsafe { File::from_raw_fd(args.control_write) };
        let root_dir = args
            .root_dir
            .canonicalize()
            .map_err(Error::io(format!("failed to resolve {}", args.root_dir.display())))?;
        Ok(Self {
            root_dir,
            control_read,
            control_write,
            isolate_networking: args.isolate_networking,
            bind_mounts: args.bind_mounts.iter().map(relative_bind).collect(),
            hostname: args.hostname,
            entrypoint: args.entrypoint,
        })
    }

    /// Run the bring-up sequence. Returns the exit status when the container
    /// is released without an entrypoint; otherwise execs and never returns.
    pub fn run(self) -> Result<i32> {
        // Refuse to run outside a fresh PID namespace; everything below
        // would mangle the host.
        let pid = syscall::getpid_nocache()?;
        if pid != 1 {
            return Err(Error::PreconditionFailed(format!(
                "not running as PID 1 (got {pid}), refusing to continue"
            )));
        }

        setsid().map_err(|errno| Error::KernelSyscall { call: "setsid", errno })?;
        self.enable_zombie_reaping()?;
        self.create_namespaces()?;
        self.setup_root_mount()?;
        self.mount_defaults()?;
        self.create_device_nodes()?;
        self.create_device_symlinks()?;
        self.inaccessible_mounts()?;
        self.readonly_mounts()?;
        self.umount_old_root()?;
        sethostname(&self.hostname)
            .map_err(|errno| Error::KernelSyscall { call: "sethostname", errno })?;
        self.handover()
    }

    /// As PID 1 we inherit every orphan. Explicitly ignoring SIGCHLD tells
    /// the kernel to reap them without a waitpid loop.
    fn enable_zombie_reaping(&self) -> Result<()> {
        // SAFETY: SigIgn installs no handler code.
        unsafe { signal(Signal::SIGCHLD, SigHandler::SigIgn) }
            .map_err(|errno| Error::KernelSyscall { call: "sigaction", errno })?;
        Ok(())
    }

    /// Unshare every namespace this kernel supports, except PID (we are
    /// already inside the fresh PID namespace our parent cloned) and, when
    /// host networking is requested, NET.
    fn create_namespaces(&self) -> Result<()> {
        let mut flags = CloneFlags::empty();
        for (name, flag) in tables::NAMESPACES {
            if *flag == CloneFlags::CLONE_NEWPID {
                continue;
            }
            if *flag == CloneFlags::CLONE_NEWNET && !self.isolate_networking {
                continue;
            }
            if Path::new("/proc/self/ns").join(name).exists() {
                flags |= *flag;
            } else {
                warn!("namespace type {name} not supported on this system");
            }
        }
        syscall::unshare(flags)
    }

    /// Steps 6-9: contain mount propagation, apply the requested bind
    /// mounts, make the root a mount point, and pivot into it.
    fn setup_root_mount(&self) -> Result<()> {
        // MS_SLAVE: host mount events still reach us, ours never escape.
        syscall::mount(
            Some(Path::new("none")),
            Path::new("/"),
            None,
            MsFlags::MS_REC | MsFlags::MS_SLAVE,
            None,
        )?;
        self.create_bind_mounts()?;
        if !mounts::is_mount_point(&self.root_dir)? {
            // pivot_root demands that the new root be a mount point.
            syscall::mount(
                Some(&self.root_dir),
                &self.root_dir,
                None,
                MsFlags::MS_BIND,
                None,
            )?;
        }
        let old_root = self.root_dir.join("old_root");
        fs::create_dir_all(&old_root)
            .map_err(Error::io(format!("failed to create {}", old_root.display())))?;
        chdir(&self.root_dir).map_err(|errno| Error::KernelSyscall { call: "chdir", errno })?;
        syscall::pivot_root(Path::new("."), Path::new("old_root"))?;
        chroot(".").map_err(|errno| Error::KernelSyscall { call: "chroot", errno })?;
        Ok(())
    }

    fn create_bind_mounts(&self) -> Result<()> {
        for spec in &self.bind_mounts {
            let destination = self.root_dir.join(&spec.destination);
            create_mount_target(&spec.source, &destination)?;
            syscall::mount(
                Some(spec.source.as_path()),
                &destination,
                None,
                MsFlags::MS_BIND,
                None,
            )?;
            if spec.read_only {
                // Read-only binds need a second remount call.
                syscall::mount(
                    None,
                    &destination,
                    None,
                    MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
                    None,
                )?;
            }
        }
        Ok(())
    }

    /// Step 10: the fixed mount table, in table order.
    fn mount_defaults(&self) -> Result<()> {
        for m in tables::CONTAINER_MOUNTS {
            let destination = Path::new(m.destination);
            fs::create_dir_all(destination)
                .map_err(Error::io(format!("failed to create {}", destination.display())))?;
            syscall::mount(
                m.source.map(Path::new),
                destination,
                m.fstype,
                m.flags,
                m.options,
            )?;
        }
        Ok(())
    }

    /// Step 11: character device nodes under the fresh /dev tmpfs.
    fn create_device_nodes(&self) -> Result<()> {
        for d in tables::DEVICE_NODES {
            let mode = if d.name == "console" { 0o600 } else { 0o666 };
            create_device_node(d.name, d.major, d.minor, mode)?;
        }
        Ok(())
    }

    fn create_device_symlinks(&self) -> Result<()> {
        for (target, link) in tables::DEVICE_SYMLINKS {
            symlink(target, link)
                .map_err(Error::io(format!("failed to create symlink {link} -> {target}")))?;
        }
        Ok(())
    }

    /// Step 13a: hide sensitive kernel interfaces behind /dev/null.
    fn inaccessible_mounts(&self) -> Result<()> {
        for path in tables::INACCESSIBLE_PATHS {
            let path = Path::new(path);
            syscall::mount(Some(Path::new("/dev/null")), path, None, MsFlags::MS_BIND, None)?;
            remount_readonly(path)?;
        }
        Ok(())
    }

    /// Step 13b: leave these visible but refuse writes.
    fn readonly_mounts(&self) -> Result<()> {
        for path in tables::READONLY_PATHS {
            let path = Path::new(path);
            if path.exists() {
                syscall::mount(Some(path), path, None, MsFlags::MS_BIND, None)?;
                remount_readonly(path)?;
            }
        }
        Ok(())
    }

    /// Step 14: after this, no path into the host rootfs remains.
    fn umount_old_root(&self) -> Result<()> {
        syscall::umount2(Path::new("/old_root"), nix::mount::MntFlags::MNT_DETACH)?;
        fs::remove_dir("/old_root").map_err(Error::io("failed to remove /old_root"))?;
        Ok(())
    }

    /// Steps 16-17: signal readiness, then wait for the release byte. A byte
    /// means the supervisor finished attaching us (cgroups et al.) and we may
    /// exec the entrypoint; EOF means the supervisor died and we exit.
    fn handover(mut self) -> Result<i32> {
        self.control_write
            .write_all(READY)
            .map_err(Error::io("failed to write readiness to control pipe"))?;
        debug!("container started");

        let mut byte = [0u8; 1];
        let n = self
            .control_read
            .read(&mut byte)
            .map_err(Error::io("failed to read from control pipe"))?;
        if n == 0 || self.entrypoint.is_empty() {
            debug!("control pipe closed, stopping");
            return Ok(0);
        }
        self.exec_entrypoint()
    }

    fn exec_entrypoint(self) -> Result<i32> {
        let program = CString::new(self.entrypoint[0].as_str())
            .map_err(|_| Error::Invalid(format!("invalid command: '{}'", self.entrypoint[0])))?;
        let argv = self
            .entrypoint
            .iter()
            .map(|a| {
                CString::new(a.as_str())
                    .map_err(|_| Error::Invalid(format!("invalid argument: '{a}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        let env = [CString::new(tables::CONTAINER_PATH_ENV).unwrap()];

        // The entrypoint must not inherit the control pipe.
        drop(self.control_read);
        drop(self.control_write);

        nix::unistd::execvpe(&program, &argv, &env[..])
            .map_err(|errno| Error::KernelSyscall { call: "execvpe", errno })?;
        unreachable!("execvpe returned without error");
    }
}

/// Prepare a bind destination: touch a file for file sources, otherwise
/// create the directory tree.
fn create_mount_target(source: &Path, destination: &Path) -> Result<()> {
    if source.is_file() {
        if destination.is_symlink() {
            fs::remove_file(destination)
                .map_err(Error::io(format!("failed to remove {}", destination.display())))?;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(Error::io(format!("failed to create {}", parent.display())))?;
        }
        File::create(destination)
            .map_err(Error::io(format!("failed to create {}", destination.display())))?;
    } else {
        fs::create_dir_all(destination)
            .map_err(Error::io(format!("failed to create {}", destination.display())))?;
    }
    Ok(())
}

fn create_device_node(name: &str, major: u64, minor: u64, mode: u32) -> Result<()> {
    let path = Path::new("/dev").join(name);
    mknod(
        &path,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(mode),
        makedev(major, minor),
    )
    .map_err(|errno| Error::KernelSyscall { call: "mknod", errno })?;
    // mknod applies the umask; set the intended mode explicitly.
    fs::set_permissions(&path, fs::Permissions::from_mode(mode))
        .map_err(Error::io(format!("failed to chmod {}", path.display())))?;
    Ok(())
}

fn remount_readonly(path: &Path) -> Result<()> {
    syscall::mount(
        None,
        path,
        None,
        MsFlags::MS_BIND
            | MsFlags::MS_RDONLY
            | MsFlags::MS_NOSUID
            | MsFlags::MS_NOEXEC
            | MsFlags::MS_NODEV
            | MsFlags::MS_REMOUNT,
        None,
    )
}

/// Absolute bind destinations are reinterpreted relative to the root.
fn relative_bind(spec: &BindSpec) -> BindSpec {
    let destination = match spec.destination.strip_prefix("/") {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => spec.destination.clone(),
    };
    BindSpec {
        source: spec.source.clone(),
        destination,
        read_only: spec.read_only,
    }
}
