//! Repository scanner.
//!
//! Walks `[scan] root` with `walkdir`, drops everything that is not useful
//! evidence, and reads the survivors in parallel with rayon.
//!
//! A file is skipped when any of these match:
//!
//! | Rule | Example |
//! |------|---------|
//! | Hidden path component | `.env`, `.git/config`, `.cmap/units.meta.json` |
//! | Ignored directory | `node_modules/`, `vendor/`, `target/`, `fixtures/` |
//! | Filename pattern | `user_test.go`, `mock_client.py`, `config.sample.yaml` |
//! | Ignored extension | `logo.png`, `server.key`, `bundle.min.js`, `Cargo.lock` |
//! | `exclude_globs` | `**/generated/**` |
//! | Larger than `max_file_bytes` | |
//! | Unreadable or not UTF-8 | logged with `warn!` |
//!
//! Hidden and ignored directories are pruned during the walk rather than
//! filtered file by file. Output is sorted by relative path so index
//! positions are deterministic.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use control_mapper_core::models::UnitKind;
use control_mapper_core::segment::detect_kind;

use crate::config::ScanConfig;

const IGNORED_DIRECTORIES: &[&str] = &[
    "node_modules",
    "vendor",
    "dist",
    "build",
    "target",
    "coverage",
    "logs",
    "log",
    "cache",
    "tmp",
    "temp",
    "uploads",
    "downloads",
    "migrations",
    "seeds",
    "fixtures",
    "test",
    "tests",
    "__pycache__",
];

const IGNORED_FILENAME_PATTERNS: &[&str] = &[
    "test",
    "mock",
    "example",
    "sample",
    "terraform.tfstate",
    ".golangci.yml",
    ".golangci.yaml",
    ".goreleaser.yml",
    ".goreleaser.yaml",
];

/// Matched as a suffix of the lowercased file name.
const IGNORED_SUFFIXES: &[&str] = &[
    // images
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".svg", ".ico", ".webp", ".tiff",
    // generated or packed
    ".1", ".meta", ".tgz", ".s2", ".idx", ".pack", ".lock", ".min.js", ".min.css", ".map",
    // binaries
    ".exe", ".dll", ".so", ".dylib", ".bin", ".o", ".a", ".class", ".jar", ".war", ".pyc",
    ".wasm",
    // archives
    ".zip", ".tar", ".gz", ".bz2", ".xz", ".7z", ".rar",
    // documents
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
    // media
    ".mp3", ".mp4", ".wav", ".avi", ".mov", ".mkv", ".flac", ".ttf", ".woff", ".woff2",
    ".eot",
    // runtime leftovers
    ".log", ".tmp", ".temp", ".cache",
    // keys and certificates
    ".pem", ".key", ".crt", ".cer", ".der", ".p12", ".pfx", ".p7b", ".p7c", ".p8", ".p7s",
    ".p7m", ".jks", ".keystore", ".truststore", ".gpg", ".asc", ".pgp", ".mobileprovision",
    ".id_rsa", ".id_dsa", ".id_ecdsa", ".id_ed25519",
    // secrets
    ".secret", ".secrets", ".private", ".priv",
];

/// Why a path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Hidden,
    IgnoredDirectory,
    IgnoredFilename,
    IgnoredExtension,
    Excluded,
    TooLarge,
    Unreadable,
}

/// A file accepted for indexing.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Path relative to the scan root, `/`-separated.
    pub relative_path: String,
    pub kind: UnitKind,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub files: Vec<ScannedFile>,
    pub skipped: usize,
}

/// Decide whether a root-relative path is excluded by name alone.
pub fn skip_reason(relative_path: &str, exclude: &GlobSet) -> Option<SkipReason> {
    let components: Vec<&str> = relative_path.split('/').filter(|c| !c.is_empty()).collect();
    let (file_name, dirs) = components.split_last()?;

    if components.iter().any(|c| c.starts_with('.')) {
        return Some(SkipReason::Hidden);
    }
    if dirs
        .iter()
        .any(|d| IGNORED_DIRECTORIES.contains(&d.to_lowercase().as_str()))
    {
        return Some(SkipReason::IgnoredDirectory);
    }

    let lower = file_name.to_lowercase();
    if IGNORED_FILENAME_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(SkipReason::IgnoredFilename);
    }
    if IGNORED_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return Some(SkipReason::IgnoredExtension);
    }
    if exclude.is_match(relative_path) {
        return Some(SkipReason::Excluded);
    }
    None
}

/// Hidden and ignored directories are not descended into.
fn prune_directory(name: &str) -> bool {
    name.starts_with('.') || IGNORED_DIRECTORIES.contains(&name.to_lowercase().as_str())
}

/// Walk the repository and read every file that survives the filters.
///
/// A pruned directory counts as one skipped entry.
pub fn scan_repository(config: &ScanConfig) -> Result<ScanReport> {
    let root = &config.root;
    if !root.is_dir() {
        bail!("Scan root does not exist: {}", root.display());
    }
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut candidates: Vec<(PathBuf, String)> = Vec::new();
    let mut skipped = 0usize;

    let mut pruned = 0usize;
    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .into_iter()
        .filter_entry(|e| {
            let prune = e.depth() > 0
                && e.file_type().is_dir()
                && prune_directory(&e.file_name().to_string_lossy());
            if prune {
                debug!(path = %e.path().display(), "directory pruned");
                pruned += 1;
            }
            !prune
        });
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = to_slash(relative);

        if let Some(reason) = skip_reason(&rel_str, &exclude_set) {
            debug!(path = %rel_str, ?reason, "skipped");
            skipped += 1;
            continue;
        }

        let too_large = entry
            .metadata()
            .map(|m| m.len() > config.max_file_bytes)
            .unwrap_or(false);
        if too_large {
            debug!(path = %rel_str, reason = ?SkipReason::TooLarge, "skipped");
            skipped += 1;
            continue;
        }

        candidates.push((path.to_path_buf(), rel_str));
    }

    skipped += pruned;

    let read: Vec<Option<ScannedFile>> = candidates
        .par_iter()
        .map(|(path, rel)| read_file(path, rel))
        .collect();

    let mut files = Vec::with_capacity(read.len());
    for file in read {
        match file {
            Some(f) => files.push(f),
            None => skipped += 1,
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok(ScanReport { files, skipped })
}

fn read_file(path: &Path, relative_path: &str) -> Option<ScannedFile> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %relative_path, error = %e, "failed to read file");
            return None;
        }
    };
    match String::from_utf8(bytes) {
        Ok(content) => Some(ScannedFile {
            relative_path: relative_path.to_string(),
            kind: detect_kind(relative_path),
            content,
        }),
        Err(_) => {
            warn!(path = %relative_path, "file is not valid UTF-8");
            None
        }
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
