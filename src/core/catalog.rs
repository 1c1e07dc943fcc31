//! The image catalog: `images.json` in the image root, rewritten in place
//! (seek to 0, dump, truncate) so a crash mid-update never leaves trailing
//! garbage from a longer previous version.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

use crate::core::error::{Error, Result};

/// One catalog entry. Field order is the sorted key order the file is
/// serialized with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    #[serde(rename = "CreatedTime")]
    pub created_time: String,
    #[serde(rename = "ImageBase")]
    pub image_base: String,
    #[serde(rename = "ImageName")]
    pub image_name: String,
    #[serde(rename = "Version")]
    pub version: String,
}

impl ImageEntry {
    pub fn new(name: &str, image_base: &str, version: &str) -> Self {
        Self {
            created_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            image_base: image_base.to_string(),
            image_name: name.to_string(),
            version: version.to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub images: Vec<ImageEntry>,
}

/// Create an empty catalog file if none exists yet.
pub fn ensure(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(Error::io(format!("failed to create {}", parent.display())))?;
    }
    let mut file = File::create(path)
        .map_err(Error::io(format!("failed to create catalog {}", path.display())))?;
    write_catalog(&mut file, &Catalog::default())
}

/// Read and parse the catalog.
pub fn load(path: &Path) -> Result<Catalog> {
    let data = std::fs::read_to_string(path)
        .map_err(|err| Error::CatalogCorrupt(format!("{}: {err}", path.display())))?;
    serde_json::from_str(&data)
        .map_err(|err| Error::CatalogCorrupt(format!("{}: {err}", path.display())))
}

/// Append a new entry.
pub fn add(path: &Path, entry: ImageEntry) -> Result<()> {
    update(path, |catalog| catalog.images.push(entry))
}

/// Read-modify-rewrite the catalog under a single open handle.
pub fn update(path: &Path, mutate: impl FnOnce(&mut Catalog)) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(Error::io(format!("failed to open catalog {}", path.display())))?;
    let mut data = String::new();
    file.read_to_string(&mut data)
        .map_err(|err| Error::CatalogCorrupt(format!("{}: {err}", path.display())))?;
    let mut catalog: Catalog = serde_json::from_str(&data)
        .map_err(|err| Error::CatalogCorrupt(format!("{}: {err}", path.display())))?;

    mutate(&mut catalog);

    file.seek(SeekFrom::Start(0))
        .map_err(Error::io(format!("failed to rewind catalog {}", path.display())))?;
    write_catalog(&mut file, &catalog)
}

fn write_catalog(file: &mut File, catalog: &Catalog) -> Result<()> {
    let mut json = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
    catalog
        .serialize(&mut serializer)
        .expect("catalog serialization cannot fail");
    file.write_all(&json)
        .map_err(Error::io("failed to write catalog"))?;
    file.set_len(json.len() as u64)
        .map_err(Error::io("failed to truncate catalog"))?;
    Ok(())
}
