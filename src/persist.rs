//! On-disk layout of a built index.
//!
//! Everything lives in `[index] output_dir`:
//!
//! | File | Contents |
//! |------|----------|
//! | `units.index` / `units.meta.json` | evidence unit vectors and metadata |
//! | `summaries.index` / `summaries.meta.json` | file summary vectors and metadata (optional) |
//! | `config_files.json` | configuration file inventory |
//! | `implemented_requirements.json` | generated control mappings |
//! | `validation_failures.json` | controls that fell back, duplicate ids |
//!
//! Each file is written to a `.tmp` sibling first and renamed into place.
//! For an index/metadata pair both temp files are written before either
//! rename, and the index header carries a SHA-256 of the metadata bytes.
//! A pair left mismatched by a crash between the two renames fails to load
//! instead of joining vectors to the wrong items.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use control_mapper_core::index::{IndexTag, VectorIndex};
use control_mapper_core::store::{IndexedCollection, MetadataStore};

pub const UNITS: &str = "units";
pub const SUMMARIES: &str = "summaries";
pub const CONFIG_FILES_FILE: &str = "config_files.json";
pub const REQUIREMENTS_FILE: &str = "implemented_requirements.json";
pub const FAILURES_FILE: &str = "validation_failures.json";
pub const SECURITY_OVERVIEW_FILE: &str = "security_overview.md";

fn index_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.index", name))
}

fn meta_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.meta.json", name))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn write_tmp(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    Ok(tmp)
}

fn commit(tmp: &Path, path: &Path) -> Result<()> {
    std::fs::rename(tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))
}

/// Write `bytes` to `path` via a temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = write_tmp(path, bytes)?;
    commit(&tmp, path)
}

fn metadata_digest(bytes: &[u8]) -> IndexTag {
    Sha256::digest(bytes).into()
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

/// Save an index/store pair as `<name>.index` and `<name>.meta.json`.
///
/// Nothing is renamed until both payloads are serialized and both temp
/// files are on disk.
pub fn save_collection<T: Serialize>(
    dir: &Path,
    name: &str,
    collection: &IndexedCollection<T>,
) -> Result<()> {
    let meta_bytes = serde_json::to_vec_pretty(collection.store())
        .with_context(|| format!("Failed to serialize {} metadata", name))?;
    let index_bytes = collection
        .index()
        .to_bytes_tagged(&metadata_digest(&meta_bytes));

    let (idx, meta) = (index_path(dir, name), meta_path(dir, name));
    let idx_tmp = write_tmp(&idx, &index_bytes)?;
    let meta_tmp = match write_tmp(&meta, &meta_bytes) {
        Ok(tmp) => tmp,
        Err(e) => {
            let _ = std::fs::remove_file(&idx_tmp);
            return Err(e);
        }
    };
    commit(&idx_tmp, &idx)?;
    commit(&meta_tmp, &meta)
}

/// Load a pair written by [`save_collection`].
pub fn load_collection<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<IndexedCollection<T>> {
    let idx = index_path(dir, name);
    let meta = meta_path(dir, name);

    let bytes = std::fs::read(&idx).with_context(|| format!("Failed to read {}", idx.display()))?;
    let (index, tag) = VectorIndex::from_bytes_tagged(&bytes)
        .with_context(|| format!("Failed to decode {}", idx.display()))?;

    let meta_bytes =
        std::fs::read(&meta).with_context(|| format!("Failed to read {}", meta.display()))?;
    if metadata_digest(&meta_bytes) != tag {
        bail!(
            "Index {} does not belong to {}. Rebuild with `cmap index`.",
            idx.display(),
            meta.display()
        );
    }
    let store: MetadataStore<T> = serde_json::from_slice(&meta_bytes)
        .with_context(|| format!("Failed to parse {}", meta.display()))?;

    IndexedCollection::from_parts(index, store)
        .with_context(|| format!("Index {} does not match its metadata", name))
}

/// Like [`load_collection`], but `Ok(None)` when the pair was never written.
pub fn load_optional_collection<T: DeserializeOwned>(
    dir: &Path,
    name: &str,
) -> Result<Option<IndexedCollection<T>>> {
    let idx_exists = index_path(dir, name).exists();
    let meta_exists = meta_path(dir, name).exists();
    match (idx_exists, meta_exists) {
        (false, false) => Ok(None),
        (true, true) => load_collection(dir, name).map(Some),
        _ => bail!("Index {} is incomplete in {}", name, dir.display()),
    }
}

/// Delete a stale pair. Missing files are not an error.
pub fn remove_collection(dir: &Path, name: &str) -> Result<()> {
    for path in [index_path(dir, name), meta_path(dir, name)] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
    Ok(())
}

/// Read `<dir>/security_overview.md` if it exists.
pub fn read_security_overview(dir: &Path) -> Result<Option<String>> {
    let path = dir.join(SECURITY_OVERVIEW_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if text.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}
