//! Path and filter utilities

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::types::InodeId;
use crate::utils::config::PackagePaths;

/// Normalize a path for storage: forward slashes so rows are portable.
pub fn path_to_db_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" | "$RECYCLE.BIN" => true,
            // Linux
            ".directory" => true,
            _ => name.starts_with("._") || name.starts_with(".Trash-"),
        }
    } else {
        false
    }
}

/// True if `path` has one of `extensions` (case-insensitive, without the dot).
pub fn is_video_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

/// Returns true if the path should be considered by the scan (not excluded).
pub fn should_include_in_walk(
    path: &Path,
    root: &Path,
    db_canonical: &Option<PathBuf>,
    exclude_patterns: &[String],
) -> bool {
    if path == root {
        return false;
    }
    if let Some(db) = db_canonical
        && path == db.as_path()
    {
        return false;
    }
    if is_os_hidden_file(path) {
        return false;
    }
    if exclude_patterns.is_empty() {
        return true;
    }
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return true,
    };
    let path_str = path.to_str().unwrap_or("");
    for pattern in exclude_patterns {
        if glob_match(pattern, name) || glob_match(pattern, path_str) {
            return false;
        }
    }
    true
}

/// Glob matching with `*` and `?`. A leading `!` is dropped; negation is up to the caller.
///
/// Two cursors walk pattern and text; on a mismatch the text cursor backs up to just past the
/// position the most recent `*` last absorbed. No recursion, no allocation per step.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.strip_prefix('!').unwrap_or(pattern).chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // (pattern index of the last `*`, text index it currently extends to)
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    star = Some((sp, st + 1));
                    p = sp + 1;
                    t = st + 1;
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Inode number and size of a file, read from its metadata.
#[cfg(unix)]
pub fn file_identity(path: &Path) -> Result<(InodeId, u64)> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path)
        .with_context(|| format!("read metadata of {}", path.display()))?;
    Ok((InodeId(meta.ino()), meta.len()))
}

/// Without inode numbers, hash the canonical path so distinct paths stay distinct.
#[cfg(not(unix))]
pub fn file_identity(path: &Path) -> Result<(InodeId, u64)> {
    use std::hash::{Hash, Hasher};
    let meta = std::fs::metadata(path)
        .with_context(|| format!("read metadata of {}", path.display()))?;
    let canonical = path.canonicalize().context("canonicalize path")?;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    canonical.hash(&mut hasher);
    Ok((InodeId(hasher.finish() >> 1), meta.len()))
}

pub fn check_root_and_canonicalize(path: &Path) -> Result<PathBuf> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("canonicalize {}", path.display()))?;
    if !canonical.is_dir() {
        anyhow::bail!("not a directory: {}", canonical.display());
    }
    Ok(canonical)
}

/// Default database location for a scan root.
pub fn default_db_path(root: &Path) -> PathBuf {
    root.join(PackagePaths::get().output_filename())
}
