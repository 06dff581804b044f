//! Utility functions for fixity
//!
//! Small helpers shared by the walker, the engines and the reports:
//!
//! ### Paths
//! Records store paths relative to their history directory, always with `/`
//! as separator. [`relative_string`], [`join_relative`], [`strip_dir_prefix`]
//! and [`parent_dir`] convert between those strings and real paths.
//!
//! ### Formatting
//! [`format_size`] and [`format_timestamp`] render values the way reports
//! print them.
//!
//! ### Filesystem
//! [`remove_dir_if_empty`] cleans up after aborted writes.

use crate::error::{FixityError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Render `path` relative to `base` as a `/`-separated string
///
/// # Errors
///
/// Returns [`FixityError::OutsideRoot`] if `path` is not below `base`.
///
/// # Examples
///
/// ```rust
/// use fixity::utils::relative_string;
/// use std::path::Path;
///
/// let rel = relative_string(Path::new("/data/a/b.txt"), Path::new("/data")).unwrap();
/// assert_eq!(rel, "a/b.txt");
/// ```
pub fn relative_string(path: &Path, base: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).map_err(|_| FixityError::OutsideRoot {
        path: path.to_path_buf(),
        root: base.to_path_buf(),
    })?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

/// Append a `/`-separated relative path to `root`
pub fn join_relative(root: &Path, rel: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in rel.split('/').filter(|part| !part.is_empty()) {
        path.push(part);
    }
    path
}

/// Concatenate two relative paths, either of which may be empty
pub fn concat_relative(dir: &str, rel: &str) -> String {
    match (dir.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_string(),
        (_, true) => dir.to_string(),
        _ => format!("{}/{}", dir, rel),
    }
}

/// Strip the relative directory `dir` from `path`
///
/// Returns `None` unless `path` lies strictly inside `dir` (`""` contains
/// every non-empty path).
pub fn strip_dir_prefix<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    if dir.is_empty() {
        return (!path.is_empty()).then_some(path);
    }
    path.strip_prefix(dir)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
}

/// Parent of a relative path (`""` for top-level entries)
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|idx| &path[..idx]).unwrap_or("")
}

/// Number of components in a relative path
pub fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}

/// Format a byte count as printed by diff reports
///
/// Always two decimals with a binary-scaled unit: `3.00 B`, `1.50 KB`.
///
/// # Examples
///
/// ```rust
/// use fixity::utils::format_size;
///
/// assert_eq!(format_size(3), "3.00 B");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["", "K", "M", "G", "T", "P"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}B", size, UNITS[unit_idx])
}

/// Format a timestamp as `YYYY-MM-DDTHH:MM:SS+00:00`
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
}

/// Remove a directory if it is empty
///
/// # Returns
///
/// Whether the directory was removed.
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}
