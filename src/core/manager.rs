//! Top-level orchestration: every privileged operation the CLI exposes.

use std::fs;
use std::path::PathBuf;

use log::{info, warn};
use nix::unistd::Uid;

use crate::core::error::{Error, Result};
use crate::core::{images, paths, workspace};
use crate::util::fs as fsutil;
use crate::platform::linux::cgroups::MemoryUnit;
use crate::platform::linux::daemon::Daemon;
use crate::platform::linux::init::BindSpec;
use crate::platform::linux::service::ContainerService;
use crate::platform::linux::tables;

/// Optional knobs for `run`.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub hostname: Option<String>,
    /// Keep the host network namespace and pass `/etc/resolv.conf` through.
    pub host_network: bool,
    /// CPU share as a percentage in `(0, 100]`.
    pub cpu_limit: Option<f64>,
    /// Memory hard limit in MiB.
    pub memory_limit: Option<u64>,
}

fn require_root() -> Result<()> {
    if !Uid::effective().is_root() {
        return Err(Error::PermissionDenied);
    }
    Ok(())
}

/// Bootstrap a new image from a distribution mirror.
pub fn bootstrap(name: &str, dist: &str, version: Option<&str>) -> Result<()> {
    require_root()?;
    images::bootstrap(name, dist, version)
}

/// Create a container workspace over `image` and start its supervisor with
/// the shell-split `command` as entrypoint. Returns once the supervisor has
/// confirmed the container is up.
pub fn run(name: &str, image: &str, command: &str, opts: RunOptions) -> Result<()> {
    require_root()?;

    if !images::exists(image) {
        return Err(Error::PreconditionFailed(format!("image '{image}' does not exist")));
    }
    if container_exists(name) {
        return Err(Error::PreconditionFailed(format!("container '{name}' already exists")));
    }

    let entrypoint = shell_words::split(command)
        .map_err(|err| Error::Invalid(format!("bad command '{command}': {err}")))?;
    if entrypoint.is_empty() {
        return Err(Error::Invalid("no command specified".into()));
    }

    let container_dir = paths::container_dir(name);
    workspace::create(&container_dir)?;
    // The pidfile directory may not exist on a fresh host.
    fsutil::ensure_dir(&paths::run_dir())?;

    let bind_mounts = if opts.host_network {
        host_network_binds()
    } else {
        Vec::new()
    };

    let service = ContainerService {
        name: name.to_string(),
        container_dir: container_dir.clone(),
        image_dir: paths::image_dir(image),
        entrypoint,
        hostname: opts.hostname,
        isolate_networking: !opts.host_network,
        bind_mounts,
        cpu_limit: opts.cpu_limit,
        memory_limit: opts.memory_limit.map(|mib| (mib, MemoryUnit::MiB)),
    };

    Daemon::new(paths::pidfile(name))
        .with_stdio(container_dir.join("stdout.log"), container_dir.join("stderr.log"))
        .start(service)
}

/// Stop the named running containers. Non-running names get a warning.
pub fn kill(names: &[String]) -> Result<()> {
    require_root()?;
    for name in names {
        if container_running(name) {
            Daemon::new(paths::pidfile(name)).stop()?;
            info!("stopped container '{name}'");
        } else {
            warn!("container is not running: {name}");
        }
    }
    Ok(())
}

/// Remove a stopped container's workspace.
pub fn container_remove(name: &str) -> Result<()> {
    require_root()?;
    if container_running(name) {
        return Err(Error::PreconditionFailed(format!("container '{name}' is running")));
    }
    if !container_exists(name) {
        return Err(Error::PreconditionFailed(format!("container '{name}' does not exist")));
    }
    workspace::remove(&paths::container_dir(name))
}

pub fn image_list() -> Vec<String> {
    images::list()
}

pub fn image_remove(names: &[String]) -> Result<()> {
    require_root()?;
    images::remove(names)
}

/// All containers: the subdirectories of the container root.
pub fn container_list_all() -> Vec<String> {
    let Ok(entries) = fs::read_dir(paths::container_root()) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// Running containers: the basenames of `*.pid` files in the run directory.
pub fn container_list_running() -> Vec<String> {
    let Ok(entries) = fs::read_dir(paths::run_dir()) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "pid"))
        .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
        .collect();
    names.sort();
    names
}

pub fn container_exists(name: &str) -> bool {
    paths::container_dir(name).is_dir()
}

pub fn container_running(name: &str) -> bool {
    paths::pidfile(name).is_file()
}

fn host_network_binds() -> Vec<BindSpec> {
    tables::HOST_NETWORK_BIND_MOUNTS
        .iter()
        .map(|(source, destination, read_only)| BindSpec {
            source: PathBuf::from(source),
            destination: PathBuf::from(destination),
            read_only: *read_only,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_network_binds_pass_resolv_conf_read_only() {
        let binds = host_network_binds();
        assert_eq!(binds.len(), 1);
        assert_eq!(binds[0].source, PathBuf::from("/etc/resolv.conf"));
        assert!(binds[0].read_only);
    }

    #[test]
    fn run_options_default_to_isolated_network() {
        let opts = RunOptions::default();
        assert!(!opts.host_network);
        assert!(opts.cpu_limit.is_none());
        assert!(opts.memory_limit.is_none());
        assert!(opts.hostname.is_none());
    }
}
