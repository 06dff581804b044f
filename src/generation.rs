//! Generations: immutable, numbered snapshots of one history directory
//!
//! A [`Generation`] holds everything recorded for a directory in one create
//! run: per-file hashes, directory presence, pointers to nested histories and
//! the provenance of the run. Once persisted it is never modified; later runs
//! append new generations instead.
//!
//! ## Record naming
//!
//! Each generation is stored as its own record file named
//! `NNNN_<dirtoken>_<YYYY-MM-DD_HHMMSSZ>.<ext>`, where `NNNN` is the
//! zero-padded sequence number and `dirtoken` is the name of the history
//! directory (`root` when it has none).

use crate::types::{ChildReference, CreatorInfo, DirectoryRecord, FileRecord, ProcessInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One snapshot of a history directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// 1-based, strictly increasing sequence number
    pub sequence: u32,
    /// Creation time (UTC)
    pub created: DateTime<Utc>,
    /// Who wrote this generation
    pub creator: CreatorInfo,
    /// How it was written
    pub process: ProcessInfo,
    /// Effective ignore rules in force for this run
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Files owned by this history, sorted by path
    #[serde(default)]
    pub files: Vec<FileRecord>,
    /// Directories owned by this history, sorted by path
    #[serde(default)]
    pub directories: Vec<DirectoryRecord>,
    /// Nearest nested histories, sorted by path
    #[serde(default)]
    pub children: Vec<ChildReference>,
}

impl Generation {
    /// Create an empty generation
    pub fn new(sequence: u32, created: DateTime<Utc>, creator: CreatorInfo) -> Self {
        Self {
            sequence,
            created,
            creator,
            process: ProcessInfo::default(),
            ignore_patterns: Vec::new(),
            files: Vec::new(),
            directories: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Sort every collection into canonical order
    ///
    /// Encoded bytes (and therefore chain hashes) depend only on content,
    /// never on the order in which files were discovered or hashed.
    pub fn canonicalize(&mut self) {
        self.files.sort_by(|a, b| a.path.cmp(&b.path));
        self.directories.sort();
        self.directories.dedup();
        self.children.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// Whether all collections are in canonical order
    pub fn is_canonical(&self) -> bool {
        self.files.windows(2).all(|w| w[0].path < w[1].path)
            && self.directories.windows(2).all(|w| w[0] < w[1])
            && self.children.windows(2).all(|w| w[0].path < w[1].path)
    }

    /// Record for `path`, if present in this generation
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files
            .binary_search_by(|record| record.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.files[idx])
    }

    /// Whether `path` is present and hashed (not ignored)
    pub fn tracks(&self, path: &str) -> bool {
        self.file(path).map(|record| !record.ignored).unwrap_or(false)
    }

    /// Reference to the nested history at `path`, if any
    pub fn child(&self, path: &str) -> Option<&ChildReference> {
        self.children.iter().find(|child| child.path == path)
    }

    /// Non-ignored files
    pub fn tracked_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(|record| !record.ignored)
    }

    /// Creation time as printed by reports
    pub fn timestamp(&self) -> String {
        crate::utils::format_timestamp(&self.created)
    }

    /// Name of the record file for this generation
    ///
    /// # Arguments
    ///
    /// * `history_dir` - Directory owning the history
    /// * `extension` - Extension of the record codec in use
    pub fn record_file_name(&self, history_dir: &Path, extension: &str) -> String {
        format!(
            "{:04}_{}_{}.{}",
            self.sequence,
            directory_token(history_dir),
            self.created.format("%Y-%m-%d_%H%M%SZ"),
            extension
        )
    }
}

/// Token identifying a history directory inside record file names
pub fn directory_token(history_dir: &Path) -> String {
    history_dir
        .file_name()
        .map(|name| name.to_string_lossy().replace(char::is_whitespace, "_"))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "root".to_string())
}

/// Sequence number encoded in a record file name
pub fn parse_record_sequence(name: &str) -> Option<u32> {
    let (prefix, _) = name.split_once('_')?;
    if prefix.len() < 4 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}
