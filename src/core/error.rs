use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The invoking user is not root.
    #[error("this command requires root privileges")]
    PermissionDenied,

    /// A required state was not met (image missing, container exists, not running).
    #[error("{0}")]
    PreconditionFailed(String),

    /// A kernel syscall failed.
    #[error("{call} failed: {errno}")]
    KernelSyscall { call: &'static str, errno: Errno },

    /// An I/O failure on a cgroupfs file.
    #[error("cgroup operation on {path} failed: {source}")]
    Cgroup { path: PathBuf, source: io::Error },

    /// The cgroup filesystem or a required hierarchy is missing.
    #[error("cgroup filesystem is not available: {0}")]
    CgroupUnavailable(String),

    /// The image catalog file could not be parsed.
    #[error("image catalog is corrupt: {0}")]
    CatalogCorrupt(String),

    /// An HTTP download failed.
    #[error("download of {url} failed: {reason}")]
    NetworkFetch { url: String, reason: String },

    /// A downloaded file did not match its published checksum.
    #[error("'{file}': checksum verification failed")]
    IntegrityFailed { file: String },

    /// An external helper program is missing or exited non-zero.
    #[error("{tool}: {reason}")]
    ExternalTool { tool: &'static str, reason: String },

    /// A pidfile is already present or locked by another supervisor.
    #[error("{0}")]
    Concurrency(String),

    /// Bad user input: unknown distribution, unsupported version, bad limit.
    #[error("{0}")]
    Invalid(String),

    /// A plain filesystem failure with context.
    #[error("{context}: {source}")]
    Io { context: String, source: io::Error },
}

impl Error {
    /// Build an `Io` error from a context string, for use with `map_err`.
    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Error {
        let context = context.into();
        move |source| Error::Io { context, source }
    }

    /// Build a `Cgroup` error bound to a control file, for use with `map_err`.
    pub fn cgroup(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Error {
        let path = path.into();
        move |source| Error::Cgroup { path, source }
    }
}
