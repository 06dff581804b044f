//! Directory walking and ignore rules
//!
//! [`FileTracker`] produces a [`Snapshot`] of a directory tree: every regular
//! file with its size, every directory, and the set of directories that own
//! a history store. The reserved store directory itself is never listed.
//!
//! ## Ignore rules
//!
//! [`IgnoreRules`] uses gitignore syntax (via the `ignore` crate), matched
//! against paths relative to the walk root:
//!
//! - Ignored **files** stay in the snapshot, flagged `ignored`, so they are
//!   reported with their size but never hashed
//! - Ignored **directories** are neither descended nor listed
//!
//! Unlike `git`, no `.gitignore` files are consulted; the rule set is always
//! explicit so that it can be stored in each generation.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use fixity::file_tracking::{FileTracker, IgnoreRules};
//! use std::path::Path;
//!
//! # fn main() -> fixity::Result<()> {
//! let root = Path::new("./project");
//! let rules = IgnoreRules::new(root, ["*.tmp", "build/"])?;
//! let snapshot = FileTracker::new(root, rules).scan()?;
//! for entry in snapshot.files() {
//!     println!("{} ({} bytes)", entry.path, entry.size);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::storage::STORE_DIR_NAME;
use crate::utils;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Patterns ignored in every tree
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[".DS_Store"];

/// Compiled gitignore-style rules
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    patterns: Vec<String>,
    matcher: Gitignore,
}

impl IgnoreRules {
    /// Compile `patterns` for paths below `root`
    ///
    /// Blank lines and `#` comments are skipped; duplicates keep their first
    /// position so negations still apply in order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FixityError::InvalidPattern`] for a malformed pattern.
    pub fn new<I, S>(root: &Path, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim_end();
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }
            if !unique.iter().any(|existing| existing == pattern) {
                unique.push(pattern.to_string());
            }
        }

        let mut builder = GitignoreBuilder::new(root);
        for pattern in &unique {
            builder.add_line(None, pattern)?;
        }
        let matcher = builder.build()?;
        Ok(Self {
            patterns: unique,
            matcher,
        })
    }

    /// Rules matching nothing but the built-in defaults
    pub fn defaults(root: &Path) -> Result<Self> {
        Self::new(root, DEFAULT_IGNORE_PATTERNS)
    }

    /// Read patterns from an ignore-spec file, one per line
    pub fn read_spec_file(path: &Path) -> Result<Vec<String>> {
        let content = fs::read_to_string(path)?;
        Ok(content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Patterns in effect, in order
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `rel_path` (relative to the root) is ignored
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        if rel_path.is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore()
    }
}

/// One walked path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Path relative to the walk root, `/`-separated
    pub path: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
    /// Whether the path matched an ignore rule
    pub ignored: bool,
}

/// Recursive listing of a directory tree
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Absolute walk root
    pub root: PathBuf,
    /// Every file and non-ignored directory, sorted by path
    pub entries: Vec<SnapshotEntry>,
    /// Directories owning a history store, relative, sorted (`""` is the root)
    pub history_dirs: Vec<String>,
}

impl Snapshot {
    /// Regular files (ignored ones included)
    pub fn files(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter().filter(|entry| !entry.is_dir)
    }

    /// Directories
    pub fn directories(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter().filter(|entry| entry.is_dir)
    }

    /// Entry for `path`
    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries
            .binary_search_by(|entry| entry.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Whether a file exists at `path`
    pub fn has_file(&self, path: &str) -> bool {
        self.get(path).map(|entry| !entry.is_dir).unwrap_or(false)
    }

    /// Absolute path of a relative entry path
    pub fn absolute(&self, path: &str) -> PathBuf {
        utils::join_relative(&self.root, path)
    }
}

/// Recursive directory walker
#[derive(Debug, Clone)]
pub struct FileTracker {
    root: PathBuf,
    rules: IgnoreRules,
    follow_symlinks: bool,
}

impl FileTracker {
    /// Create a tracker for `root` using `rules`
    pub fn new(root: impl Into<PathBuf>, rules: IgnoreRules) -> Self {
        Self {
            root: root.into(),
            rules,
            follow_symlinks: false,
        }
    }

    /// Follow symbolic links while walking
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Rules this tracker applies
    pub fn rules(&self) -> &IgnoreRules {
        &self.rules
    }

    /// Walk the tree
    ///
    /// Entries come back sorted by relative path, independent of the order
    /// the filesystem returns them in.
    ///
    /// # Errors
    ///
    /// Propagates any walk or metadata error; a tree that cannot be read
    /// completely is never summarized.
    pub fn scan(&self) -> Result<Snapshot> {
        let mut entries = Vec::new();
        let mut history_dirs = Vec::new();
        if self.root.join(STORE_DIR_NAME).is_dir() {
            history_dirs.push(String::new());
        }

        let root = &self.root;
        let rules = &self.rules;
        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                if entry.file_name() == STORE_DIR_NAME {
                    return false;
                }
                if !entry.file_type().is_dir() {
                    return true;
                }
                let rel = utils::relative_string(entry.path(), root).unwrap_or_default();
                !rules.is_ignored(&rel, true)
            });

        for entry in walker {
            let entry = entry?;
            let rel = utils::relative_string(entry.path(), root)?;
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if entry.path().join(STORE_DIR_NAME).is_dir() {
                    history_dirs.push(rel.clone());
                }
                entries.push(SnapshotEntry {
                    path: rel,
                    size: 0,
                    is_dir: true,
                    ignored: false,
                });
            } else if file_type.is_file() {
                let size = entry.metadata()?.len();
                let ignored = rules.is_ignored(&rel, false);
                trace!("Found {} ({} bytes{})", rel, size, if ignored { ", ignored" } else { "" });
                entries.push(SnapshotEntry {
                    path: rel,
                    size,
                    is_dir: false,
                    ignored,
                });
            } else {
                debug!("Skipping special file {:?}", entry.path());
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        history_dirs.sort();
        debug!(
            "Scanned {:?}: {} entries, {} history store(s)",
            root,
            entries.len(),
            history_dirs.len()
        );
        Ok(Snapshot {
            root: root.clone(),
            entries,
            history_dirs,
        })
    }
}
