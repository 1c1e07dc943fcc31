/// Tests for CLI argument parsing and error surfacing. These drive the real
/// binary but never touch container machinery, so they run unprivileged.
use std::process::Command;

fn vessel() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vessel"))
}

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Verify the binary can print help without error.
#[test]
fn cli_help_works() {
    let output = vessel().arg("--help").output().expect("failed to execute vessel --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("vessel"), "help output should mention vessel");
    assert!(stdout.contains("bootstrap"), "help should list the bootstrap command");
}

/// `usage` prints the same information and exits 0.
#[test]
fn cli_usage_works() {
    let output = vessel().arg("usage").output().expect("failed to execute vessel usage");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("container"), "usage should list commands, got: {stdout}");
}

/// The `version` subcommand prints the crate version.
#[test]
fn cli_version_subcommand() {
    let output = vessel().arg("version").output().expect("failed to execute vessel version");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim().contains(env!("CARGO_PKG_VERSION")));
}

/// Verify `run` requires the -c entrypoint.
#[test]
fn cli_run_requires_cmd() {
    let output = vessel()
        .args(["run", "c1", "img1"])
        .output()
        .expect("failed to execute vessel run");

    assert!(!output.status.success(), "run without -c should fail");
}

/// Verify `kill` requires at least one name.
#[test]
fn cli_kill_requires_names() {
    let output = vessel().arg("kill").output().expect("failed to execute vessel kill");

    assert!(!output.status.success(), "kill without names should fail");
}

/// Unprivileged bootstrap is rejected before touching the filesystem.
#[test]
fn cli_bootstrap_rejects_non_root() {
    if is_root() {
        eprintln!("SKIP: running as root");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let output = vessel()
        .args(["bootstrap", "alp1", "alpine", "v3.16"])
        .env("VESSEL_ROOT", tmp.path())
        .output()
        .expect("failed to execute vessel bootstrap");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("root privileges"),
        "should report missing privileges, got: {stderr}"
    );
    // No image directory may be left behind.
    assert!(!tmp.path().join("images").join("alp1").exists());
}

/// Unknown distributions are rejected (as root; unprivileged invocations are
/// stopped by the root gate first).
#[test]
fn cli_bootstrap_unknown_distribution() {
    let tmp = tempfile::tempdir().unwrap();
    let output = vessel()
        .args(["bootstrap", "img1", "gentoo"])
        .env("VESSEL_ROOT", tmp.path())
        .output()
        .expect("failed to execute vessel bootstrap");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    if is_root() {
        assert!(
            stderr.contains("unsupported distribution"),
            "should reject the distribution, got: {stderr}"
        );
    } else {
        assert!(stderr.contains("root privileges"), "got: {stderr}");
    }
}

/// Listing images and containers works on an empty root.
#[test]
fn cli_lists_are_empty_on_fresh_root() {
    let tmp = tempfile::tempdir().unwrap();

    for args in [
        ["image", "list"],
        ["container", "list"],
        ["container", "list-all"],
    ] {
        let output = vessel()
            .args(args)
            .env("VESSEL_ROOT", tmp.path())
            .output()
            .expect("failed to execute vessel");
        assert!(output.status.success(), "{args:?} should succeed");
        assert!(output.stdout.is_empty(), "{args:?} should print nothing");
    }
}

/// The short aliases parse.
#[test]
fn cli_list_aliases() {
    let tmp = tempfile::tempdir().unwrap();

    for args in [["image", "ls"], ["container", "ls"], ["container", "lsa"]] {
        let output = vessel()
            .args(args)
            .env("VESSEL_ROOT", tmp.path())
            .output()
            .expect("failed to execute vessel");
        assert!(output.status.success(), "{args:?} should succeed");
    }
}

/// `run` against a missing image fails with a precondition error.
#[test]
fn cli_run_missing_image() {
    if !is_root() {
        eprintln!("SKIP: not running as root (euid != 0)");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let output = vessel()
        .args(["run", "c1", "missing", "-c", "/bin/true"])
        .env("VESSEL_ROOT", tmp.path())
        .output()
        .expect("failed to execute vessel run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "got: {stderr}");
}

/// Removing an unknown container fails gracefully.
#[test]
fn cli_container_rm_nonexistent() {
    if !is_root() {
        eprintln!("SKIP: not running as root (euid != 0)");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let output = vessel()
        .args(["container", "rm", "ghost"])
        .env("VESSEL_ROOT", tmp.path())
        .output()
        .expect("failed to execute vessel container rm");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "got: {stderr}");
}
