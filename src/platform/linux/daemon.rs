//! A generic double-fork daemonizer. The launcher process calls
//! [`Daemon::start`], which forks twice, writes and locks the pidfile, and
//! hands control to a [`Service`]; the launcher itself blocks until the
//! service signals readiness and then returns. [`Daemon::stop`] drives a
//! SIGTERM loop against the pidfile's owner.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use log::{error, warn};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::{umask, Mode};
use nix::sys::wait::waitpid;
use nix::unistd::{chdir, dup2, fork, setsid, ForkResult, Pid};

use crate::core::error::{Error, Result};

/// Interval between SIGTERMs while stopping, and between liveness polls.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The daemonized payload. `run` executes inside the double-forked process.
pub trait Service {
    fn run(&mut self, ctx: &mut DaemonContext) -> Result<()>;
}

/// Handles the daemonized service uses to talk back to the world: a one-shot
/// readiness ack to the launcher, and the signal-driven shutdown flag.
pub struct DaemonContext {
    ready: Option<File>,
    shutdown: Arc<AtomicBool>,
}

impl DaemonContext {
    /// Release the launcher. Called once the container is actually up;
    /// dropping the fd without writing makes the launcher report failure.
    pub fn notify_ready(&mut self) {
        if let Some(mut ack) = self.ready.take() {
            let _ = ack.write_all(&[1]);
        }
    }

    /// Whether SIGTERM or SIGINT has been received.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Double-forking daemon driver bound to one pidfile.
pub struct Daemon {
    pidfile: PathBuf,
    stdout: PathBuf,
    stderr: PathBuf,
}

impl Daemon {
    pub fn new(pidfile: impl Into<PathBuf>) -> Self {
        Self {
            pidfile: pidfile.into(),
            stdout: PathBuf::from("/dev/null"),
            stderr: PathBuf::from("/dev/null"),
        }
    }

    /// Redirect the daemon's stdout/stderr somewhere more useful than
    /// /dev/null (they are inherited by the supervised container).
    pub fn with_stdio(mut self, stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    pub fn pidfile(&self) -> &Path {
        &self.pidfile
    }

    /// Daemonize and run `service`. Returns in the calling process once the
    /// service acks readiness; the daemonized process never returns from
    /// here (it exits).
    pub fn start<S: Service>(&self, mut service: S) -> Result<()> {
        if self.pidfile.exists() {
            return Err(Error::Concurrency(format!(
                "pidfile {} already exists; daemon already running?",
                self.pidfile.display()
            )));
        }

        let (ack_read, ack_write) = nix::unistd::pipe()
            .map_err(|errno| Error::KernelSyscall { call: "pipe", errno })?;

        // SAFETY: single-threaded at this point; the child only execs or exits.
        match unsafe { fork() }.map_err(|errno| Error::KernelSyscall { call: "fork", errno })? {
            ForkResult::Parent { child } => {
                drop(ack_write);
                // Reap the intermediate child; it exits right after fork #2.
                let _ = waitpid(child, None);
                let mut ack = File::from(ack_read);
                let mut byte = [0u8; 1];
                match ack.read(&mut byte) {
                    Ok(1) => Ok(()),
                    _ => Err(Error::PreconditionFailed(format!(
                        "daemon for {} failed to start",
                        self.pidfile.display()
                    ))),
                }
            }
            ForkResult::Child => {
                drop(ack_read);
                // Decouple from the launcher's environment.
                let _ = chdir("/");
                let _ = setsid();
                umask(Mode::empty());

                // SAFETY: see above.
                match unsafe { fork() } {
                    Ok(ForkResult::Parent { .. }) => unsafe { libc::_exit(0) },
                    Err(_) => unsafe { libc::_exit(1) },
                    Ok(ForkResult::Child) => {}
                }

                let code = match self.daemon_main(&mut service, File::from(ack_write)) {
                    Ok(()) => 0,
                    Err(err) => {
                        error!("daemon failed: {err}");
                        1
                    }
                };
                std::process::exit(code);
            }
        }
    }

    /// Body of the daemonized (grand-child) process.
    fn daemon_main<S: Service>(&self, service: &mut S, ack: File) -> Result<()> {
        redirect_stdio(&self.stdout, &self.stderr)?;

        let lock = self.write_pidfile()?;
        let _cleanup = PidfileGuard { path: self.pidfile.clone() };

        let shutdown = Arc::new(AtomicBool::new(false));
        for sig in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
            signal_hook::flag::register(sig, Arc::clone(&shutdown))
                .map_err(Error::io("failed to install signal handler"))?;
        }

        let mut ctx = DaemonContext { ready: Some(ack), shutdown };
        let result = service.run(&mut ctx);
        drop(lock);
        result
    }

    /// Write our PID (mode 0644) and take a blocking exclusive lock that
    /// lives as long as the returned guard.
    fn write_pidfile(&self) -> Result<Flock<File>> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o644)
            .open(&self.pidfile)
            .map_err(Error::io(format!("failed to create pidfile {}", self.pidfile.display())))?;
        writeln!(file, "{}", std::process::id())
            .map_err(Error::io(format!("failed to write pidfile {}", self.pidfile.display())))?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            Error::Concurrency(format!(
                "pidfile {} is locked by another supervisor: {errno}",
                self.pidfile.display()
            ))
        })
    }

    /// Signal the pidfile's owner with SIGTERM every 100 ms until it is
    /// gone, then clean up the pidfile. An absent pidfile is not an error.
    pub fn stop(&self) -> Result<()> {
        let pid = match fs::read_to_string(&self.pidfile) {
            Ok(contents) => contents.trim().parse::<i32>().map_err(|_| {
                Error::Invalid(format!("pidfile {} is corrupt", self.pidfile.display()))
            })?,
            Err(_) => {
                warn!(
                    "pidfile {} does not exist; daemon not running?",
                    self.pidfile.display()
                );
                return Ok(());
            }
        };

        loop {
            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => sleep(STOP_POLL_INTERVAL),
                Err(Errno::ESRCH) => break,
                Err(errno) => return Err(Error::KernelSyscall { call: "kill", errno }),
            }
        }

        // The daemon removes its own pidfile on clean exit; sweep up after
        // one that died hard.
        if self.pidfile.exists() {
            fs::remove_file(&self.pidfile).map_err(Error::io(format!(
                "failed to remove pidfile {}",
                self.pidfile.display()
            )))?;
        }
        Ok(())
    }

    /// Stop the running daemon, then start `service` in a fresh one.
    pub fn restart<S: Service>(&self, service: S) -> Result<()> {
        self.stop()?;
        self.start(service)
    }
}

struct PidfileGuard {
    path: PathBuf,
}

impl Drop for PidfileGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn redirect_stdio(stdout: &Path, stderr: &Path) -> Result<()> {
    let stdin = File::open("/dev/null").map_err(Error::io("failed to open /dev/null"))?;
    dup2(stdin.as_raw_fd(), 0).map_err(|errno| Error::KernelSyscall { call: "dup2", errno })?;
    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(stdout)
        .map_err(Error::io(format!("failed to open {}", stdout.display())))?;
    dup2(out.as_raw_fd(), 1).map_err(|errno| Error::KernelSyscall { call: "dup2", errno })?;
    let err = OpenOptions::new()
        .create(true)
        .append(true)
        .open(stderr)
        .map_err(Error::io(format!("failed to open {}", stderr.display())))?;
    dup2(err.as_raw_fd(), 2).map_err(|errno| Error::KernelSyscall { call: "dup2", errno })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_with_absent_pidfile_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let daemon = Daemon::new(tmp.path().join("gone.pid"));
        assert!(daemon.stop().is_ok());
    }

    #[test]
    fn stop_with_corrupt_pidfile_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let pidfile = tmp.path().join("bad.pid");
        fs::write(&pidfile, "not-a-pid\n").unwrap();
        let daemon = Daemon::new(&pidfile);
        assert!(matches!(daemon.stop(), Err(Error::Invalid(_))));
    }

    #[test]
    fn start_refuses_existing_pidfile() {
        let tmp = tempfile::tempdir().unwrap();
        let pidfile = tmp.path().join("taken.pid");
        fs::write(&pidfile, "1\n").unwrap();

        struct Noop;
        impl Service for Noop {
            fn run(&mut self, _ctx: &mut DaemonContext) -> Result<()> {
                Ok(())
            }
        }

        let daemon = Daemon::new(&pidfile);
        assert!(matches!(daemon.start(Noop), Err(Error::Concurrency(_))));
    }
}
