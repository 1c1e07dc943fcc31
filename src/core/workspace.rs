//! Per-container directory layout: a writable `upperdir`, an overlayfs
//! scratch `workdir`, and the `merged` mount target the image is stacked
//! onto.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, Result};

const SUBDIRS: &[&str] = &["upperdir", "workdir", "merged"];

pub fn upper_dir(container_dir: &Path) -> PathBuf {
    container_dir.join("upperdir")
}

pub fn work_dir(container_dir: &Path) -> PathBuf {
    container_dir.join("workdir")
}

pub fn merged_dir(container_dir: &Path) -> PathBuf {
    container_dir.join("merged")
}

/// Materialize the workspace. Creation is all-or-nothing: a partial failure
/// removes whatever was created.
pub fn create(container_dir: &Path) -> Result<()> {
    if container_dir.exists() {
        return Err(Error::PreconditionFailed(format!(
            "container directory {} already exists",
            container_dir.display()
        )));
    }
    let result = (|| -> Result<()> {
        fs::create_dir_all(container_dir)
            .map_err(Error::io(format!("failed to create {}", container_dir.display())))?;
        for sub in SUBDIRS {
            let dir = container_dir.join(sub);
            fs::create_dir(&dir)
                .map_err(Error::io(format!("failed to create {}", dir.display())))?;
        }
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_dir_all(container_dir);
    }
    result
}

/// Remove the whole workspace of a stopped container.
pub fn remove(container_dir: &Path) -> Result<()> {
    if container_dir.exists() {
        fs::remove_dir_all(container_dir)
            .map_err(Error::io(format!("failed to remove {}", container_dir.display())))?;
    }
    Ok(())
}
