//! The image store: integrity-verified bootstrap of rootfs images from
//! upstream distribution mirrors, plus catalog-backed list/remove.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{info, warn};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::core::catalog::{self, ImageEntry};
use crate::core::error::{Error, Result};
use crate::core::paths;

const ALPINE_MIRROR: &str = "https://dl-cdn.alpinelinux.org/alpine/";
const ALPINE_BASE: &str = "Alpine Linux";
const ALPINE_RELEASES: &[&str] = &["v3.13", "v3.14", "v3.15", "v3.16"];
const ALPINE_LATEST: &str = "v3.16";

const DEBIAN_BASE: &str = "Debian Linux";
const DEBIAN_RELEASES: &[&str] = &["stretch", "buster", "bullseye", "stable"];
const DEBIAN_DEFAULT: &str = "stable";

const UBUNTU_BASE: &str = "Ubuntu Linux";
const UBUNTU_RELEASES: &[&str] = &["bionic", "focal", "jammy"];
const UBUNTU_DEFAULT: &str = "focal";

/// Bootstrap a named image from the given distribution.
pub fn bootstrap(name: &str, dist: &str, version: Option<&str>) -> Result<()> {
    match dist {
        "alpine" => bootstrap_alpine(name, version),
        "debian" => {
            let version = resolve_version(version, DEBIAN_RELEASES, DEBIAN_DEFAULT, "Debian")?;
            bootstrap_debootstrap(name, &version, DEBIAN_BASE)
        }
        "ubuntu" => {
            let version = resolve_version(version, UBUNTU_RELEASES, UBUNTU_DEFAULT, "Ubuntu")?;
            bootstrap_debootstrap(name, &version, UBUNTU_BASE)
        }
        other => Err(Error::Invalid(format!("unsupported distribution '{other}'"))),
    }
}

/// Names of all images: the directories under the image root.
pub fn list() -> Vec<String> {
    list_dirs(&paths::image_root())
}

pub fn exists(name: &str) -> bool {
    paths::image_dir(name).is_dir()
}

/// Remove images and their catalog entries. Unknown names produce a warning,
/// not an error.
pub fn remove(names: &[String]) -> Result<()> {
    let catalog_path = paths::catalog_file();
    catalog::ensure(&catalog_path)?;

    let mut removed = Vec::new();
    for name in names {
        let dir = paths::image_dir(name);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)
                .map_err(Error::io(format!("failed to remove image {}", dir.display())))?;
            removed.push(name.clone());
            info!("removed image '{name}'");
        } else {
            warn!("image '{name}' not found");
        }
    }
    catalog::update(&catalog_path, |catalog| {
        catalog.images.retain(|entry| !removed.contains(&entry.image_name))
    })
}

// ─── alpine ─────────────────────────────────────────────────────────────────

fn bootstrap_alpine(name: &str, version: Option<&str>) -> Result<()> {
    let version = match version {
        None | Some("latest-stable") => ALPINE_LATEST.to_string(),
        Some(v) if ALPINE_RELEASES.contains(&v) => v.to_string(),
        Some(v) => {
            return Err(Error::Invalid(format!(
                "unsupported Alpine version '{v}'; only \"latest-stable\" or \"v3.13\" and newer are supported"
            )))
        }
    };

    let dest = make_image_root(name)?;
    catalog::ensure(&paths::catalog_file())?;

    let result = fetch_alpine_rootfs(&dest, &version).and_then(|()| {
        catalog::add(&paths::catalog_file(), ImageEntry::new(name, ALPINE_BASE, &version))
    });
    if let Err(err) = result {
        build_failed(&dest, name);
        return Err(err);
    }
    info!("bootstrapped Alpine image '{name}' ({version})");
    Ok(())
}

fn fetch_alpine_rootfs(dest: &Path, version: &str) -> Result<()> {
    let arch = host_arch();
    let base_url = format!("{ALPINE_MIRROR}{version}/releases/{arch}/");
    let staging = tempfile::tempdir().map_err(Error::io("failed to create staging directory"))?;

    let yaml_url = format!("{base_url}latest-releases.yaml");
    let yaml = http_get_string(&yaml_url)?;
    let rootfs_file = latest_minirootfs(&yaml).ok_or_else(|| Error::NetworkFetch {
        url: yaml_url,
        reason: "no minirootfs entry in latest-releases.yaml".into(),
    })?;

    let tarball = staging.path().join(&rootfs_file);
    http_get_file(&format!("{base_url}{rootfs_file}"), &tarball)?;

    let sums = http_get_string(&format!("{base_url}{rootfs_file}.sha256"))?;
    let expected = parse_checksum(&sums, &rootfs_file)
        .ok_or_else(|| Error::IntegrityFailed { file: rootfs_file.clone() })?;
    verify_sha256(&tarball, &expected, &rootfs_file)?;

    extract_tarball(&tarball, dest)
}

/// First `alpine-minirootfs-…` mention in the release manifest; the manifest
/// lists the newest build first.
fn latest_minirootfs(yaml: &str) -> Option<String> {
    Regex::new(r"alpine-minirootfs-.+")
        .unwrap()
        .find(yaml)
        .map(|m| m.as_str().trim().to_string())
}

/// Extract the hex digest for `file_name` from a `sha256sum`-style listing.
fn parse_checksum(sums: &str, file_name: &str) -> Option<String> {
    sums.lines()
        .find(|line| line.contains(file_name))
        .and_then(|line| line.split_whitespace().next())
        .filter(|digest| digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_string)
}

fn verify_sha256(path: &Path, expected: &str, file_name: &str) -> Result<()> {
    let mut file = File::open(path)
        .map_err(Error::io(format!("failed to open {}", path.display())))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(Error::io(format!("failed to hash {}", path.display())))?;
    let actual = hex::encode(hasher.finalize());
    if actual != expected.to_lowercase() {
        return Err(Error::IntegrityFailed { file: file_name.to_string() });
    }
    Ok(())
}

fn extract_tarball(tarball: &Path, dest: &Path) -> Result<()> {
    let file = File::open(tarball)
        .map_err(Error::io(format!("failed to open {}", tarball.display())))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(Error::io(format!("failed to extract rootfs into {}", dest.display())))
}

// ─── debian / ubuntu ────────────────────────────────────────────────────────

fn bootstrap_debootstrap(name: &str, version: &str, image_base: &str) -> Result<()> {
    if which("debootstrap").is_none() {
        return Err(Error::ExternalTool {
            tool: "debootstrap",
            reason: "not found; is the debootstrap package installed?".into(),
        });
    }

    let dest = make_image_root(name)?;
    catalog::ensure(&paths::catalog_file())?;

    let result = run_debootstrap(version, &dest).and_then(|()| {
        catalog::add(&paths::catalog_file(), ImageEntry::new(name, image_base, version))
    });
    if let Err(err) = result {
        build_failed(&dest, name);
        return Err(err);
    }
    info!("bootstrapped {image_base} image '{name}' ({version})");
    Ok(())
}

fn run_debootstrap(version: &str, dest: &Path) -> Result<()> {
    let status = Command::new("debootstrap")
        .arg("--include=systemd-container")
        .arg(version)
        .arg(dest)
        .status()
        .map_err(|err| Error::ExternalTool { tool: "debootstrap", reason: err.to_string() })?;
    if !status.success() {
        return Err(Error::ExternalTool {
            tool: "debootstrap",
            reason: format!("exited with {status}"),
        });
    }
    Ok(())
}

// ─── shared helpers ─────────────────────────────────────────────────────────

fn http_get_string(url: &str) -> Result<String> {
    let response = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .map_err(|err| Error::NetworkFetch { url: url.to_string(), reason: err.to_string() })?;
    response
        .text()
        .map_err(|err| Error::NetworkFetch { url: url.to_string(), reason: err.to_string() })
}

fn http_get_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .map_err(|err| Error::NetworkFetch { url: url.to_string(), reason: err.to_string() })?;
    let mut file = File::create(dest)
        .map_err(Error::io(format!("failed to create {}", dest.display())))?;
    response
        .copy_to(&mut file)
        .map_err(|err| Error::NetworkFetch { url: url.to_string(), reason: err.to_string() })?;
    Ok(())
}

fn resolve_version(
    version: Option<&str>,
    releases: &[&str],
    default: &str,
    dist: &str,
) -> Result<String> {
    match version {
        None => Ok(default.to_string()),
        Some(v) if releases.contains(&v) => Ok(v.to_string()),
        Some(v) => Err(Error::Invalid(format!(
            "unsupported {dist} version '{v}'; supported: {}",
            releases.join(", ")
        ))),
    }
}

fn make_image_root(name: &str) -> Result<PathBuf> {
    let path = paths::image_dir(name);
    if path.exists() {
        return Err(Error::PreconditionFailed(format!("image '{name}' already exists")));
    }
    fs::create_dir_all(&path)
        .map_err(Error::io(format!("failed to create image directory {}", path.display())))?;
    Ok(path)
}

/// Best-effort cleanup of a partially built image.
fn build_failed(dest: &Path, name: &str) {
    warn!("bootstrap of image '{name}' failed, removing {}", dest.display());
    let _ = fs::remove_dir_all(dest);
}

fn list_dirs(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
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

fn which(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x86_64",
        "aarch64" => "aarch64",
        "x86" => "x86",
        "arm" => "armv7",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpine_version_resolution() {
        assert!(matches!(
            bootstrap("x", "alpine", Some("v3.11")),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            bootstrap("x", "alpine", Some("3.16")),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn unknown_distribution_is_invalid() {
        assert!(matches!(bootstrap("x", "arch", None), Err(Error::Invalid(_))));
        assert!(matches!(bootstrap("x", "", None), Err(Error::Invalid(_))));
    }

    #[test]
    fn version_resolution_defaults_and_rejects() {
        assert_eq!(
            resolve_version(None, DEBIAN_RELEASES, DEBIAN_DEFAULT, "Debian").unwrap(),
            "stable"
        );
        assert_eq!(
            resolve_version(Some("buster"), DEBIAN_RELEASES, DEBIAN_DEFAULT, "Debian").unwrap(),
            "buster"
        );
        assert!(resolve_version(Some("woody"), DEBIAN_RELEASES, DEBIAN_DEFAULT, "Debian").is_err());
        assert_eq!(
            resolve_version(None, UBUNTU_RELEASES, UBUNTU_DEFAULT, "Ubuntu").unwrap(),
            "focal"
        );
    }

    #[test]
    fn minirootfs_name_is_found_in_manifest() {
        let yaml = "\
-\n  branch: v3.16\n  arch: x86_64\n  file: alpine-minirootfs-3.16.9-x86_64.tar.gz\n  \
date: 2023-11-30\n-\n  file: alpine-standard-3.16.9-x86_64.iso\n";
        assert_eq!(
            latest_minirootfs(yaml).unwrap(),
            "alpine-minirootfs-3.16.9-x86_64.tar.gz"
        );
        assert!(latest_minirootfs("no match here").is_none());
    }

    #[test]
    fn checksum_parsing_wants_a_sha256_hex() {
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let sums = format!("{digest}  alpine-minirootfs-3.16.9-x86_64.tar.gz\n");
        assert_eq!(
            parse_checksum(&sums, "alpine-minirootfs-3.16.9-x86_64.tar.gz").as_deref(),
            Some(digest)
        );
        assert!(parse_checksum(&sums, "other-file.tar.gz").is_none());
        assert!(parse_checksum("garbage  alpine-minirootfs-x.tar.gz", "alpine-minirootfs-x.tar.gz").is_none());
    }

    #[test]
    fn sha256_verification_detects_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data");
        fs::write(&path, b"hello").unwrap();
        let good = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        verify_sha256(&path, good, "data").unwrap();

        fs::write(&path, b"hellp").unwrap();
        assert!(matches!(
            verify_sha256(&path, good, "data"),
            Err(Error::IntegrityFailed { .. })
        ));
    }

    #[test]
    fn which_finds_a_shell() {
        assert!(which("sh").is_some());
        assert!(which("definitely-not-a-real-tool-xyz").is_none());
    }
}
