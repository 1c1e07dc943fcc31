use std::fs;
use std::path::Path;

use crate::core::error::{Error, Result};

/// Recursively ensure a directory exists.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(Error::io(format!("failed to create directory {}", path.display())))
}

/// Read a file to string, returning a descriptive error on failure.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(Error::io(format!("failed to read {}", path.display())))
}
