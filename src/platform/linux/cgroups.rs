//! Per-container cgroup leaves under a shared parent, v1 layout:
//! `/sys/fs/cgroup/<hierarchy>/<parent>/<name>`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::core::error::{Error, Result};
use crate::core::paths;

/// The cgroup v1 mount root.
pub const CGROUP_BASE: &str = "/sys/fs/cgroup";

/// Supported hierarchies, in priority order (`pids` reads the first).
pub const HIERARCHIES: &[&str] = &["cpu", "memory"];

const CPU_SHARES_DEFAULT: u64 = 1024;
const MEMORY_UNLIMITED: i64 = -1;

/// Unit for memory limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUnit {
    B,
    KiB,
    MiB,
    GiB,
}

impl MemoryUnit {
    fn multiplier(self) -> u64 {
        let index = match self {
            Self::B => 0,
            Self::KiB => 1,
            Self::MiB => 2,
            Self::GiB => 3,
        };
        1u64 << (10 * index)
    }
}

/// Convert a CPU percentage in `(0, 100]` to a `cpu.shares` value.
/// `None` restores the kernel default of 1024.
fn cpu_shares_value(limit: Option<f64>) -> Result<u64> {
    match limit {
        None => Ok(CPU_SHARES_DEFAULT),
        Some(pct) if pct > 0.0 && pct <= 100.0 => {
            Ok((CPU_SHARES_DEFAULT as f64 * pct / 100.0).round() as u64)
        }
        Some(pct) => Err(Error::Invalid(format!(
            "cpu limit must be between 0 and 100, got {pct}"
        ))),
    }
}

/// Convert a memory limit to bytes. `None` restores the "unlimited" sentinel.
fn memory_bytes_value(limit: Option<(u64, MemoryUnit)>) -> i64 {
    match limit {
        None => MEMORY_UNLIMITED,
        Some((n, unit)) => (n * unit.multiplier()) as i64,
    }
}

/// A per-container leaf in every supported hierarchy.
#[derive(Debug)]
pub struct Cgroup {
    name: String,
    parent: String,
}

impl Cgroup {
    /// Create the leaves for `name` under the engine's shared parent cgroup,
    /// creating the parent first if needed.
    pub fn create(name: &str) -> Result<Self> {
        Self::create_in(paths::ENGINE, name)
    }

    pub fn create_in(parent: &str, name: &str) -> Result<Self> {
        let base = Path::new(CGROUP_BASE);
        let mounted = fs::read_dir(base)
            .map_err(|_| {
                Error::CgroupUnavailable(format!("no cgroup filesystem mounted on {CGROUP_BASE}"))
            })?
            .count();
        if mounted == 0 {
            return Err(Error::CgroupUnavailable(format!(
                "no hierarchies under {CGROUP_BASE}"
            )));
        }

        for hierarchy in HIERARCHIES {
            let mount = base.join(hierarchy);
            if !mount.is_dir() {
                return Err(Error::CgroupUnavailable(format!(
                    "hierarchy '{hierarchy}' is not mounted"
                )));
            }
            create_cgroup_dir(&mount.join(parent))?;
            create_cgroup_dir(&mount.join(parent).join(name))?;
        }

        Ok(Self {
            name: name.to_string(),
            parent: parent.to_string(),
        })
    }

    fn leaf_file(&self, hierarchy: &str, file: &str) -> PathBuf {
        Path::new(CGROUP_BASE)
            .join(hierarchy)
            .join(&self.parent)
            .join(&self.name)
            .join(file)
    }

    fn parent_file(&self, hierarchy: &str, file: &str) -> PathBuf {
        Path::new(CGROUP_BASE)
            .join(hierarchy)
            .join(&self.parent)
            .join(file)
    }

    /// Add a live process to every leaf.
    pub fn attach(&self, pid: Pid) -> Result<()> {
        probe_process(pid)?;
        for hierarchy in HIERARCHIES {
            let tasks = self.leaf_file(hierarchy, "tasks");
            if !read_pids(&tasks)?.contains(&pid.as_raw()) {
                append_pid(&tasks, pid)?;
            }
        }
        Ok(())
    }

    /// Move a live process from every leaf back to the parent cgroup.
    pub fn detach(&self, pid: Pid) -> Result<()> {
        probe_process(pid)?;
        for hierarchy in HIERARCHIES {
            let tasks = self.leaf_file(hierarchy, "tasks");
            if read_pids(&tasks)?.contains(&pid.as_raw()) {
                append_pid(&self.parent_file(hierarchy, "tasks"), pid)?;
            }
        }
        Ok(())
    }

    /// PIDs currently in the leaf, read from the first hierarchy.
    pub fn pids(&self) -> Result<Vec<i32>> {
        read_pids(&self.leaf_file(HIERARCHIES[0], "tasks"))
    }

    /// Apply a CPU limit as a share of the default 1024 `cpu.shares`.
    pub fn set_cpu_limit(&self, limit: Option<f64>) -> Result<()> {
        let value = cpu_shares_value(limit)?;
        write_value(&self.leaf_file("cpu", "cpu.shares"), &value.to_string())
    }

    /// Read back the CPU limit as a percentage.
    pub fn cpu_limit(&self) -> Result<u32> {
        let path = self.leaf_file("cpu", "cpu.shares");
        let shares: u64 = read_value(&path)?;
        Ok((shares as f64 / CPU_SHARES_DEFAULT as f64 * 100.0).round() as u32)
    }

    /// Apply a memory hard limit; `None` lifts it.
    pub fn set_memory_limit(&self, limit: Option<(u64, MemoryUnit)>) -> Result<()> {
        let value = memory_bytes_value(limit);
        write_value(
            &self.leaf_file("memory", "memory.limit_in_bytes"),
            &value.to_string(),
        )
    }

    /// Read back the memory limit in MiB.
    pub fn memory_limit(&self) -> Result<i64> {
        let path = self.leaf_file("memory", "memory.limit_in_bytes");
        let bytes: i64 = read_value(&path)?;
        Ok(bytes / 1024 / 1024)
    }

    /// Move every task back to the parent cgroup and remove the leaves.
    pub fn delete(self) -> Result<()> {
        for hierarchy in HIERARCHIES {
            let leaf_tasks = self.leaf_file(hierarchy, "tasks");
            let pids = read_pids(&leaf_tasks)?;
            let parent_tasks = self.parent_file(hierarchy, "tasks");
            for pid in pids {
                append_pid(&parent_tasks, Pid::from_raw(pid))?;
            }
            let leaf = leaf_tasks.parent().unwrap().to_path_buf();
            fs::remove_dir(&leaf).map_err(Error::cgroup(leaf))?;
        }
        Ok(())
    }
}

fn create_cgroup_dir(path: &Path) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => Err(Error::PermissionDenied),
        Err(err) => Err(Error::Cgroup { path: path.to_path_buf(), source: err }),
    }
}

/// Signal-0 probe: succeeds iff the process exists.
fn probe_process(pid: Pid) -> Result<()> {
    kill(pid, None).map_err(|_| Error::PreconditionFailed(format!("process {pid} does not exist")))
}

fn read_pids(tasks: &Path) -> Result<Vec<i32>> {
    let data = fs::read_to_string(tasks).map_err(Error::cgroup(tasks))?;
    Ok(data.lines().filter_map(|l| l.trim().parse().ok()).collect())
}

fn append_pid(tasks: &Path, pid: Pid) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(tasks)
        .map_err(Error::cgroup(tasks))?;
    writeln!(file, "{pid}").map_err(Error::cgroup(tasks))
}

fn write_value(path: &Path, value: &str) -> Result<()> {
    fs::write(path, format!("{value}\n")).map_err(Error::cgroup(path))
}

fn read_value<T: std::str::FromStr>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).map_err(Error::cgroup(path))?;
    data.split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Cgroup {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidData, "unparsable control file"),
        })
}
