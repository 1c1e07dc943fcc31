//! Integration smoke tests for vessel.
//!
//! These require:
//! 1. Running on Linux, as root (namespaces, pivot_root, overlayfs).
//! 2. An extracted rootfs (e.g. Alpine minirootfs) at `tests/rootfs/`, or the
//!    path set in `VESSEL_TEST_ROOTFS`.
//!
//! Locally you can prepare the rootfs with:
//!
//! ```bash
//! mkdir -p tests/rootfs
//! curl -L https://dl-cdn.alpinelinux.org/alpine/v3.16/releases/x86_64/alpine-minirootfs-3.16.9-x86_64.tar.gz \
//!     | tar -xz -C tests/rootfs
//! ```
//!
//! Every test is skipped when the prerequisites are missing.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::sleep;
use std::time::{Duration, Instant};

fn vessel() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vessel"))
}

fn rootfs_path() -> String {
    std::env::var("VESSEL_TEST_ROOTFS").unwrap_or_else(|_| "tests/rootfs".to_string())
}

/// Check whether we can run the full container lifecycle.
fn can_run() -> bool {
    if cfg!(not(target_os = "linux")) {
        eprintln!("SKIP: not on Linux");
        return false;
    }
    if !nix::unistd::geteuid().is_root() {
        eprintln!("SKIP: not running as root (euid != 0)");
        return false;
    }
    let rfs = rootfs_path();
    if !Path::new(&rfs).join("bin").exists() {
        eprintln!("SKIP: rootfs not found at {rfs}/bin");
        return false;
    }
    true
}

/// Whether the host has cgroup v1 cpu/memory hierarchies.
fn has_cgroup_v1() -> bool {
    Path::new("/sys/fs/cgroup/cpu").is_dir() && Path::new("/sys/fs/cgroup/memory").is_dir()
}

/// A state root with one image seeded from the test rootfs.
struct Harness {
    root: tempfile::TempDir,
}

const IMAGE: &str = "base1";

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let image_dir = root.path().join("images").join(IMAGE);
        std::fs::create_dir_all(image_dir.parent().unwrap()).unwrap();
        let status = Command::new("cp")
            .arg("-a")
            .arg(rootfs_path())
            .arg(&image_dir)
            .status()
            .expect("failed to copy rootfs");
        assert!(status.success(), "copying the test rootfs failed");
        Self { root }
    }

    fn cmd(&self) -> Command {
        let mut cmd = vessel();
        cmd.env("VESSEL_ROOT", self.root.path());
        cmd
    }

    fn pidfile(&self, name: &str) -> PathBuf {
        self.root.path().join("run").join(format!("{name}.pid"))
    }

    fn container_dir(&self, name: &str) -> PathBuf {
        self.root.path().join("containers").join(name)
    }

    fn wait_stopped(&self, name: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.pidfile(name).exists() {
                return true;
            }
            sleep(Duration::from_millis(100));
        }
        false
    }
}

#[test]
fn smoke_run_kill_remove() {
    if !can_run() {
        return;
    }
    let h = Harness::new();

    let output = h
        .cmd()
        .args(["run", "c1", IMAGE, "-c", "/bin/sh -c 'sleep 30'"])
        .output()
        .expect("failed to run vessel");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "run should succeed, stderr: {stderr}");

    // Running: pidfile present, supervisor alive, overlay workspace in place.
    assert!(h.pidfile("c1").exists(), "pidfile should exist while running");
    assert!(h.container_dir("c1").join("merged").is_dir());
    let pid: i32 = std::fs::read_to_string(h.pidfile("c1"))
        .unwrap()
        .trim()
        .parse()
        .expect("pidfile should hold a pid");
    assert!(Path::new(&format!("/proc/{pid}")).exists(), "supervisor should be alive");

    // `container list` shows it.
    let list = h.cmd().args(["container", "list"]).output().unwrap();
    assert!(String::from_utf8_lossy(&list.stdout).contains("c1"));

    // Stop it.
    let kill = h.cmd().args(["kill", "c1"]).output().unwrap();
    assert!(kill.status.success(), "kill should succeed");
    assert!(h.wait_stopped("c1", Duration::from_secs(10)), "container should stop");

    // Remove the workspace.
    let rm = h.cmd().args(["container", "rm", "c1"]).output().unwrap();
    assert!(rm.status.success(), "container rm should succeed");
    assert!(!h.container_dir("c1").exists());
}

#[test]
fn smoke_entrypoint_output_and_exit() {
    if !can_run() {
        return;
    }
    let h = Harness::new();

    let output = h
        .cmd()
        .args(["run", "c2", IMAGE, "-c", "/bin/sh -c 'echo hi from container'"])
        .output()
        .expect("failed to run vessel");
    assert!(
        output.status.success(),
        "run should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // The entrypoint exits immediately; the supervisor notices and cleans up.
    assert!(h.wait_stopped("c2", Duration::from_secs(10)));

    let log = std::fs::read_to_string(h.container_dir("c2").join("stdout.log")).unwrap();
    assert!(log.contains("hi from container"), "got log: {log:?}");
}

#[test]
fn smoke_second_run_with_same_name_fails() {
    if !can_run() {
        return;
    }
    let h = Harness::new();

    let first = h
        .cmd()
        .args(["run", "c3", IMAGE, "-c", "/bin/sh -c 'sleep 30'"])
        .output()
        .unwrap();
    assert!(first.status.success());

    let second = h
        .cmd()
        .args(["run", "c3", IMAGE, "-c", "/bin/true"])
        .output()
        .unwrap();
    assert!(!second.status.success(), "duplicate name should be rejected");
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.contains("already exists"), "got: {stderr}");

    let _ = h.cmd().args(["kill", "c3"]).output();
}

#[test]
fn smoke_masking_hides_kcore() {
    if !can_run() {
        return;
    }
    let h = Harness::new();

    // /proc/kcore is bound to /dev/null inside the container, so cat sees an
    // empty file; the sentinel still prints.
    let output = h
        .cmd()
        .args([
            "run",
            "c4",
            IMAGE,
            "-c",
            "/bin/sh -c 'cat /proc/kcore; echo MASKED-OK'",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "run should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(h.wait_stopped("c4", Duration::from_secs(10)));

    let log = std::fs::read_to_string(h.container_dir("c4").join("stdout.log")).unwrap();
    assert_eq!(log.trim(), "MASKED-OK", "kcore must read back empty");
}

#[test]
fn smoke_cgroup_limits_applied() {
    if !can_run() {
        return;
    }
    if !has_cgroup_v1() {
        eprintln!("SKIP: no cgroup v1 cpu/memory hierarchies");
        return;
    }
    let h = Harness::new();

    let output = h
        .cmd()
        .args([
            "run", "c5", IMAGE, "-c", "/bin/sh -c 'sleep 30'", "--cpu", "50", "--memory", "128",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "run should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let cpu_leaf = Path::new("/sys/fs/cgroup/cpu/vessel/c5");
    let mem_leaf = Path::new("/sys/fs/cgroup/memory/vessel/c5");
    let shares: u64 = std::fs::read_to_string(cpu_leaf.join("cpu.shares"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(shares, 512);
    let limit: i64 = std::fs::read_to_string(mem_leaf.join("memory.limit_in_bytes"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(limit, 128 << 20);
    let tasks = std::fs::read_to_string(cpu_leaf.join("tasks")).unwrap();
    assert!(!tasks.trim().is_empty(), "container init should be attached");

    let kill = h.cmd().args(["kill", "c5"]).output().unwrap();
    assert!(kill.status.success());
    assert!(h.wait_stopped("c5", Duration::from_secs(10)));

    // Teardown reclaims the leaves.
    assert!(!cpu_leaf.exists(), "cpu leaf should be removed");
    assert!(!mem_leaf.exists(), "memory leaf should be removed");
}
