//! Static tables fixing the in-container filesystem layout.
//!
//! The mount flags here are load-bearing: they mask kernel interfaces that
//! would otherwise allow a container to inspect or disrupt the host. Change
//! them only with a clear understanding of what each flag protects.

use nix::mount::MsFlags;
use nix::sched::CloneFlags;

/// One entry of the default in-container mount sequence.
#[derive(Debug, Clone, Copy)]
pub struct MountSpec {
    pub destination: &'static str,
    pub fstype: Option<&'static str>,
    pub source: Option<&'static str>,
    pub flags: MsFlags,
    pub options: Option<&'static str>,
}

/// A device node to create under `/dev`.
#[derive(Debug, Clone, Copy)]
pub struct DeviceNode {
    pub name: &'static str,
    pub major: u64,
    pub minor: u64,
}

/// Namespace kinds by their `/proc/self/ns` entry name.
pub const NAMESPACES: &[(&str, CloneFlags)] = &[
    ("pid", CloneFlags::CLONE_NEWPID),
    ("cgroup", CloneFlags::CLONE_NEWCGROUP),
    ("ipc", CloneFlags::CLONE_NEWIPC),
    ("uts", CloneFlags::CLONE_NEWUTS),
    ("mnt", CloneFlags::CLONE_NEWNS),
    ("net", CloneFlags::CLONE_NEWNET),
];

/// Default mounts applied by PID 1 after the pivot, in this exact order.
/// `/proc/sys` is first bound writable, then the `net` subtree is re-exposed
/// writable, then the whole of `/proc/sys` is remounted read-only: the net
/// subtree stays writable because the later remount applies to the outer bind.
pub const CONTAINER_MOUNTS: &[MountSpec] = &[
    MountSpec {
        destination: "/proc",
        fstype: Some("proc"),
        source: Some("proc"),
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NOEXEC)
            .union(MsFlags::MS_NODEV),
        options: None,
    },
    MountSpec {
        destination: "/proc/sys",
        fstype: None,
        source: Some("/proc/sys"),
        flags: MsFlags::MS_BIND,
        options: None,
    },
    MountSpec {
        destination: "/proc/sys/net",
        fstype: None,
        source: Some("/proc/sys/net"),
        flags: MsFlags::MS_BIND,
        options: None,
    },
    MountSpec {
        destination: "/proc/sys",
        fstype: None,
        source: None,
        flags: MsFlags::MS_BIND
            .union(MsFlags::MS_RDONLY)
            .union(MsFlags::MS_NOSUID)
            .union(MsFlags::MS_NOEXEC)
            .union(MsFlags::MS_NODEV)
            .union(MsFlags::MS_REMOUNT),
        options: None,
    },
    MountSpec {
        destination: "/dev",
        fstype: Some("tmpfs"),
        source: Some("tmpfs"),
        flags: MsFlags::MS_NOSUID.union(MsFlags::MS_STRICTATIME),
        options: Some("mode=755,size=4m,nr_inodes=1m"),
    },
    MountSpec {
        destination: "/dev/pts",
        fstype: Some("devpts"),
        source: Some("devpts"),
        flags: MsFlags::MS_NOSUID.union(MsFlags::MS_NOEXEC),
        options: Some("newinstance,ptmxmode=0666,mode=0620,gid=5"),
    },
    MountSpec {
        destination: "/dev/shm",
        fstype: Some("tmpfs"),
        source: Some("shm"),
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NOEXEC)
            .union(MsFlags::MS_NODEV),
        options: Some("mode=1777,size=10%,nr_inodes=400k"),
    },
    MountSpec {
        destination: "/dev/mqueue",
        fstype: Some("mqueue"),
        source: Some("mqueue"),
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NOEXEC)
            .union(MsFlags::MS_NODEV),
        options: None,
    },
    MountSpec {
        destination: "/sys",
        fstype: Some("sysfs"),
        source: Some("sysfs"),
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NOEXEC)
            .union(MsFlags::MS_NODEV)
            .union(MsFlags::MS_RDONLY),
        options: None,
    },
    MountSpec {
        destination: "/run",
        fstype: Some("tmpfs"),
        source: Some("tmpfs"),
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_STRICTATIME)
            .union(MsFlags::MS_NODEV),
        options: Some("mode=755,size=20%,nr_inodes=800k"),
    },
    MountSpec {
        destination: "/tmp",
        fstype: Some("tmpfs"),
        source: Some("tmpfs"),
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_STRICTATIME)
            .union(MsFlags::MS_NODEV),
        options: Some("mode=1777,size=10%,nr_inodes=400k"),
    },
];

/// Kernel interfaces hidden behind a `/dev/null` bind.
pub const INACCESSIBLE_PATHS: &[&str] = &[
    "/proc/kallsyms",
    "/proc/kcore",
    "/proc/keys",
    "/proc/sysrq-trigger",
    "/proc/timer_list",
];

/// Kernel interfaces left visible but remounted read-only.
pub const READONLY_PATHS: &[&str] = &[
    "/proc/acpi",
    "/proc/apm",
    "/proc/asound",
    "/proc/bus",
    "/proc/fs",
    "/proc/irq",
    "/proc/scsi",
];

/// Character device nodes created under `/dev`, mode 0666 (`console`, when
/// present, gets 0600).
pub const DEVICE_NODES: &[DeviceNode] = &[
    DeviceNode { name: "null", major: 1, minor: 3 },
    DeviceNode { name: "zero", major: 1, minor: 5 },
    DeviceNode { name: "full", major: 1, minor: 7 },
    DeviceNode { name: "tty", major: 5, minor: 0 },
    DeviceNode { name: "random", major: 1, minor: 8 },
    DeviceNode { name: "urandom", major: 1, minor: 9 },
];

/// Symlinks created under `/dev`: `(target, link)`.
pub const DEVICE_SYMLINKS: &[(&str, &str)] = &[
    ("pts/ptmx", "/dev/ptmx"),
    ("pts/0", "/dev/console"),
    ("/proc/self/fd", "/dev/fd"),
    ("/proc/self/fd/0", "/dev/stdin"),
    ("/proc/self/fd/1", "/dev/stdout"),
    ("/proc/self/fd/2", "/dev/stderr"),
    ("/proc/kcore", "/dev/core"),
];

/// Host files bound into the container when it shares the host network:
/// `(source, destination, read_only)`.
pub const HOST_NETWORK_BIND_MOUNTS: &[(&str, &str, bool)] =
    &[("/etc/resolv.conf", "/etc/resolv.conf", true)];

/// Environment of a containerized entrypoint.
pub const CONTAINER_PATH_ENV: &str =
    "PATH=/bin:/usr/bin:/sbin:/usr/sbin:/opt/bin:/usr/local/bin:/usr/local/sbin";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_order_starts_with_proc_and_ends_with_tmp() {
        assert_eq!(CONTAINER_MOUNTS.len(), 11);
        assert_eq!(CONTAINER_MOUNTS[0].destination, "/proc");
        assert_eq!(CONTAINER_MOUNTS[10].destination, "/tmp");
        // /dev must come after the /proc/sys read-only remount.
        let dev = CONTAINER_MOUNTS
            .iter()
            .position(|m| m.destination == "/dev")
            .unwrap();
        assert_eq!(dev, 4);
    }

    #[test]
    fn proc_sys_remount_is_read_only() {
        let remount = &CONTAINER_MOUNTS[3];
        assert_eq!(remount.destination, "/proc/sys");
        assert!(remount.source.is_none());
        assert!(remount.flags.contains(MsFlags::MS_REMOUNT));
        assert!(remount.flags.contains(MsFlags::MS_RDONLY));
        assert!(remount.flags.contains(MsFlags::MS_BIND));
    }

    #[test]
    fn sysfs_is_read_only_nosuid_noexec_nodev() {
        let sys = CONTAINER_MOUNTS
            .iter()
            .find(|m| m.destination == "/sys")
            .unwrap();
        let want = MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_RDONLY;
        assert_eq!(sys.flags, want);
    }

    #[test]
    fn device_numbers_match_the_kernel() {
        let numbers: Vec<(&str, u64, u64)> = DEVICE_NODES
            .iter()
            .map(|d| (d.name, d.major, d.minor))
            .collect();
        assert_eq!(
            numbers,
            vec![
                ("null", 1, 3),
                ("zero", 1, 5),
                ("full", 1, 7),
                ("tty", 5, 0),
                ("random", 1, 8),
                ("urandom", 1, 9),
            ]
        );
    }

    #[test]
    fn masked_paths_are_under_proc() {
        for p in INACCESSIBLE_PATHS.iter().chain(READONLY_PATHS) {
            assert!(p.starts_with("/proc/"), "unexpected masked path {p}");
        }
    }
}
