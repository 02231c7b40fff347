//! Content hashing helpers for sources and staged trees.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Hex-encoded SHA-256 of a byte slice.
#[must_use]
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 of a file's contents, plus its size in bytes.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// Deterministic digest of a directory tree.
///
/// Hashes a sorted map of relative path to per-file content hash, so the
/// result is independent of traversal order and host path.
pub fn sha256_tree(root: &Path) -> Result<String> {
    let mut entries: BTreeMap<String, String> = BTreeMap::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walkdir")),
                root,
                "walk",
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| Error::load(format!("path escapes tree root: {}", root.display())))?;
        let (hash, _) = sha256_file(entry.path())?;
        entries.insert(rel.to_string_lossy().replace('\\', "/"), hash);
    }

    let mut hasher = Sha256::new();
    for (rel, hash) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Copy a directory tree, creating parents as needed.
///
/// Sockets, FIFOs and other special files are skipped with a warning;
/// only regular files and directories are staged.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0usize;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walkdir")),
                src,
                "walk",
            )
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| Error::load(format!("path escapes tree root: {}", src.display())))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(e, &target, "create_dir_all"))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| Error::io(e, &target, "copy"))?;
            copied += 1;
        } else {
            warn!(
                path = %entry.path().display(),
                "Ignoring special file while staging tree"
            );
        }
    }
    Ok(copied)
}
