//! The container supervisor: the daemonized service that stacks the overlay,
//! clones PID 1 into a fresh PID namespace, synchronizes over the control
//! pipe, attaches the cgroup leaf, and supervises until exit or signal.

use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::thread::sleep;

use log::{info, warn};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::core::error::{Error, Result};
use crate::core::workspace;
use crate::platform::linux::cgroups::{Cgroup, MemoryUnit};
use crate::platform::linux::daemon::{DaemonContext, Service, STOP_POLL_INTERVAL};
use crate::platform::linux::init::{BindSpec, InitArgs, READY};
use crate::platform::linux::mounts::OverlayMount;
use crate::platform::linux::syscall::{self, CloneResult};
use crate::util::hostname;

/// Configuration of one container run; becomes the daemonized supervisor.
pub struct ContainerService {
    pub name: String,
    pub container_dir: PathBuf,
    pub image_dir: PathBuf,
    pub entrypoint: Vec<String>,
    pub hostname: Option<String>,
    pub isolate_networking: bool,
    pub bind_mounts: Vec<BindSpec>,
    pub cpu_limit: Option<f64>,
    pub memory_limit: Option<(u64, MemoryUnit)>,
}

impl Service for ContainerService {
    fn run(&mut self, ctx: &mut DaemonContext) -> Result<()> {
        let merged = workspace::merged_dir(&self.container_dir);
        let overlay = OverlayMount::acquire(
            &[self.image_dir.as_path()],
            &workspace::upper_dir(&self.container_dir),
            &workspace::work_dir(&self.container_dir),
            &merged,
        )?;

        // Two one-way pipes: PID 1 reports RDY on one, we release it on the
        // other once the cgroup is attached.
        let (ready_read, ready_write) = nix::unistd::pipe()
            .map_err(|errno| Error::KernelSyscall { call: "pipe", errno })?;
        let (release_read, release_write) = nix::unistd::pipe()
            .map_err(|errno| Error::KernelSyscall { call: "pipe", errno })?;

        let args = InitArgs {
            root_dir: merged,
            control_read: release_read.as_raw_fd(),
            control_write: ready_write.as_raw_fd(),
            isolate_networking: self.isolate_networking,
            bind_mounts: self.bind_mounts.clone(),
            hostname: self
                .hostname
                .take()
                .unwrap_or_else(|| hostname::generate(hostname::HOSTNAME_LEN)),
            entrypoint: self.entrypoint.clone(),
        };

        let supervisor_ends = [ready_read.as_raw_fd(), release_write.as_raw_fd()];
        let child = spawn_init(&args, &supervisor_ends)?;
        // Close the child's pipe ends so EOF semantics work on ours.
        drop(release_read);
        drop(ready_write);

        let mut ready = File::from(ready_read);
        let mut release = File::from(release_write);

        let mut buf = [0u8; 3];
        if ready.read_exact(&mut buf).is_err() || buf != READY {
            let _ = waitpid(child, None);
            return Err(Error::PreconditionFailed(format!(
                "container '{}' init exited before signaling readiness",
                self.name
            )));
        }

        let cgroup = self.attach_cgroup(child);

        // Release PID 1: it execs the entrypoint (or exits when none).
        release
            .write_all(&[1])
            .map_err(Error::io("failed to write release byte to control pipe"))?;
        ctx.notify_ready();
        info!("container '{}' started with init pid {child}", self.name);

        self.supervise(child, ctx);

        if let Some(cgroup) = cgroup {
            if let Err(err) = cgroup.delete() {
                warn!("failed to reclaim cgroup of '{}': {err}", self.name);
            }
        }
        drop(overlay);
        Ok(())
    }
}

impl ContainerService {
    /// Create the per-container cgroup leaves and attach PID 1. Failures are
    /// reported but never bring the container down.
    fn attach_cgroup(&self, child: Pid) -> Option<Cgroup> {
        let cgroup = match Cgroup::create(&self.name) {
            Ok(cgroup) => cgroup,
            Err(err) => {
                warn!("cgroup setup for '{}' failed: {err}", self.name);
                return None;
            }
        };
        if let Err(err) = cgroup.attach(child) {
            warn!("failed to attach pid {child} to cgroup '{}': {err}", self.name);
        }
        if self.cpu_limit.is_some() {
            if let Err(err) = cgroup.set_cpu_limit(self.cpu_limit) {
                warn!("failed to set cpu limit for '{}': {err}", self.name);
            }
        }
        if self.memory_limit.is_some() {
            if let Err(err) = cgroup.set_memory_limit(self.memory_limit) {
                warn!("failed to set memory limit for '{}': {err}", self.name);
            }
        }
        Some(cgroup)
    }

    /// Poll the container init until it exits, forwarding SIGTERM when the
    /// daemon is asked to shut down.
    fn supervise(&self, child: Pid, ctx: &DaemonContext) {
        let mut term_sent = false;
        loop {
            if ctx.shutdown_requested() && !term_sent {
                info!("shutting down container '{}'", self.name);
                let _ = kill(child, Signal::SIGTERM);
                term_sent = true;
            }
            match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => sleep(STOP_POLL_INTERVAL),
                Ok(status) => {
                    info!("container '{}' init exited: {status:?}", self.name);
                    break;
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }
}

/// Clone into a fresh PID namespace and re-exec the engine binary as the
/// init payload, with the [`InitArgs`] blob as its single argument.
fn spawn_init(args: &InitArgs, supervisor_ends: &[i32]) -> Result<Pid> {
    let payload = serde_json::to_string(args)
        .map_err(|err| Error::Invalid(format!("failed to encode init arguments: {err}")))?;
    let exe = CString::new("/proc/self/exe").unwrap();
    let argv = [
        CString::new("vessel").unwrap(),
        CString::new("init").unwrap(),
        CString::new(payload).map_err(|_| Error::Invalid("init arguments contain NUL".into()))?,
    ];

    // SAFETY: the child only closes fds and execs.
    match unsafe { syscall::clone(libc::CLONE_NEWPID as libc::c_ulong, 0) }? {
        CloneResult::Parent { child } => Ok(child),
        CloneResult::Child => {
            // Drop the supervisor's pipe ends so the container cannot hold
            // them open across our lifetime.
            for fd in supervisor_ends {
                unsafe { libc::close(*fd) };
            }
            let _ = nix::unistd::execv(&exe, &argv[..]);
            unsafe { libc::_exit(127) }
        }
    }
}
