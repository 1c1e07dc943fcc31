use std::path::PathBuf;

/// Engine name; fixes every default path below.
pub const ENGINE: &str = "vessel";

/// Environment override relocating all engine state under one base directory.
/// Used by the test suite; production deployments run with the defaults.
pub const ROOT_ENV: &str = "VESSEL_ROOT";

/// Name of the image catalog file inside the image root.
pub const CATALOG_FILE: &str = "images.json";

fn base_override() -> Option<PathBuf> {
    std::env::var_os(ROOT_ENV).map(PathBuf::from)
}

/// Directory holding one subdirectory per image, plus the catalog file.
pub fn image_root() -> PathBuf {
    match base_override() {
        Some(base) => base.join("images"),
        None => PathBuf::from("/var/lib").join(ENGINE).join("images"),
    }
}

/// Directory holding one workspace subdirectory per container.
pub fn container_root() -> PathBuf {
    match base_override() {
        Some(base) => base.join("containers"),
        None => PathBuf::from("/var/lib").join(ENGINE).join("containers"),
    }
}

/// Directory holding supervisor pidfiles.
pub fn run_dir() -> PathBuf {
    match base_override() {
        Some(base) => base.join("run"),
        None => PathBuf::from("/var/run").join(ENGINE),
    }
}

/// Rootfs directory of a named image.
pub fn image_dir(name: &str) -> PathBuf {
    image_root().join(name)
}

/// Workspace directory of a named container.
pub fn container_dir(name: &str) -> PathBuf {
    container_root().join(name)
}

/// Pidfile of a named container's supervisor.
pub fn pidfile(name: &str) -> PathBuf {
    run_dir().join(format!("{name}.pid"))
}

/// Path of the image catalog file.
pub fn catalog_file() -> PathBuf {
    image_root().join(CATALOG_FILE)
}
