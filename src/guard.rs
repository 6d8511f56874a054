//! Extraction guard
//!
//! Every path decoded from an archive is untrusted. Before anything is written it is
//! normalized lexically and checked to stay inside the extraction root.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result, TraversalReason};

fn rejected(path: &str, reason: TraversalReason) -> Error {
    Error::PathTraversal {
        path: path.to_string(),
        reason,
    }
}

/// Normalize an archive path to forward-slash segments without `.` or `..`.
///
/// Both `/` and `\` separate segments. A `..` that would climb above the root is
/// rejected, as are absolute paths, drive prefixes, NUL bytes and empty segments.
pub fn normalize(entry_path: &str) -> Result<String> {
    if entry_path.is_empty() {
        return Err(rejected(entry_path, TraversalReason::Empty));
    }
    if entry_path.contains('\0') {
        return Err(rejected(entry_path, TraversalReason::NulByte));
    }
    if entry_path.starts_with(['/', '\\']) || has_drive_prefix(entry_path) {
        return Err(rejected(entry_path, TraversalReason::Absolute));
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in entry_path.split(['/', '\\']) {
        match segment {
            "" => return Err(rejected(entry_path, TraversalReason::EmptySegment)),
            "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(rejected(entry_path, TraversalReason::EscapesRoot));
                }
            }
            part => parts.push(part),
        }
    }

    if parts.is_empty() {
        // "." or "a/.." name the root itself
        return Err(rejected(entry_path, TraversalReason::Empty));
    }
    Ok(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolve an archive path to its destination under `target_root`
pub fn resolve(entry_path: &str, target_root: &Path) -> Result<PathBuf> {
    let normalized = normalize(entry_path)?;
    let mut dest = target_root.to_path_buf();
    dest.extend(normalized.split('/'));

    if !dest.starts_with(target_root) || dest == target_root {
        return Err(rejected(entry_path, TraversalReason::EscapesRoot));
    }
    Ok(dest)
}

/// Refuse destinations reached through an existing symbolic link.
///
/// Checks every component from `target_root` down to `dest`, including `dest` itself.
pub fn check_no_symlinks(entry_path: &str, target_root: &Path, dest: &Path) -> Result<()> {
    let Ok(rest) = dest.strip_prefix(target_root) else {
        return Err(rejected(entry_path, TraversalReason::EscapesRoot));
    };

    let mut current = target_root.to_path_buf();
    for component in rest.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(rejected(entry_path, TraversalReason::SymlinkInPath));
            }
            Ok(_) => {}
            // nothing below a missing component can exist yet
            Err(_) => break,
        }
    }
    Ok(())
}
