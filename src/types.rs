//! Core data types used throughout the fixity library
//!
//! This module contains the value objects that make up a persisted
//! [`crate::Generation`] and the status vocabulary used by reports.
//!
//! ## Overview
//!
//! - **Hashes**: [`HashEntry`], [`HashAction`] - one digest and its verification outcome
//! - **Tracked state**: [`FileRecord`], [`DirectoryRecord`], [`ChildReference`]
//! - **Provenance**: [`CreatorInfo`], [`ProcessInfo`] - who wrote a generation and how
//! - **Reporting**: [`FileStatus`] - diff classification of a path
//!
//! All paths stored in records are relative to the owning history directory
//! and always use `/` as separator, so records are portable between platforms.
//!
//! ## Examples
//!
//! ```rust
//! use fixity::types::{FileRecord, HashAction, HashEntry};
//! use fixity::hashing::HashFormat;
//!
//! let record = FileRecord::hashed(
//!     "Stuff.txt",
//!     6,
//!     vec![HashEntry::new(HashFormat::new("xxh64"), "94c399c2a9a21f9a", HashAction::Original)],
//! );
//! assert_eq!(record.digest(&HashFormat::new("xxh64")), Some("94c399c2a9a21f9a"));
//! ```

use crate::hashing::HashFormat;
use serde::{Deserialize, Serialize};

/// Tool name written into every generation
pub const TOOL_NAME: &str = env!("CARGO_PKG_NAME");
/// Tool version written into every generation
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Outcome of hashing one file in one format for one generation
///
/// Derived solely from whether the path existed before, the last trusted
/// digest in that format, and the digest computed now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAction {
    /// First digest ever recorded for this file
    Original,
    /// Digest matches the last trusted digest
    Verified,
    /// Digest differs from the last trusted digest
    Failed,
    /// File was known before but had never been hashed (it was ignored)
    New,
}

impl HashAction {
    /// Whether later runs may compare against a digest with this action
    pub fn is_trusted(self) -> bool {
        !matches!(self, HashAction::Failed)
    }

    /// Lowercase name as printed by reports
    pub fn as_str(self) -> &'static str {
        match self {
            HashAction::Original => "original",
            HashAction::Verified => "verified",
            HashAction::Failed => "failed",
            HashAction::New => "new",
        }
    }
}

impl std::fmt::Display for HashAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One digest of a file in a single format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashEntry {
    /// Hash format the digest was computed with
    pub format: HashFormat,
    /// Lowercase hex digest
    pub digest: String,
    /// Verification outcome for this generation
    pub action: HashAction,
}

impl HashEntry {
    /// Create a new hash entry
    pub fn new(format: HashFormat, digest: impl Into<String>, action: HashAction) -> Self {
        Self {
            format,
            digest: digest.into(),
            action,
        }
    }
}

/// State of one file in one generation
///
/// Ignored files carry their size but no hashes. `hashes` holds at most
/// one entry per format, sorted by format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the owning history directory
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Digests computed in this generation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<HashEntry>,
    /// Whether the file matched an ignore rule
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    /// Path this file was recorded under before a detected rename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
}

impl FileRecord {
    /// Create a record for a hashed file; entries are sorted by format
    pub fn hashed(path: impl Into<String>, size: u64, mut hashes: Vec<HashEntry>) -> Self {
        hashes.sort_by(|a, b| a.format.cmp(&b.format));
        hashes.dedup_by(|a, b| a.format == b.format);
        Self {
            path: path.into(),
            size,
            hashes,
            ignored: false,
            previous_path: None,
        }
    }

    /// Create a record for a file that matched an ignore rule
    pub fn ignored(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            hashes: Vec::new(),
            ignored: true,
            previous_path: None,
        }
    }

    /// Hash entry for `format`, if one was recorded
    pub fn entry(&self, format: &HashFormat) -> Option<&HashEntry> {
        self.hashes.iter().find(|entry| &entry.format == format)
    }

    /// Digest for `format`, if one was recorded
    pub fn digest(&self, format: &HashFormat) -> Option<&str> {
        self.entry(format).map(|entry| entry.digest.as_str())
    }

    /// Whether any format failed verification in this generation
    pub fn has_failure(&self) -> bool {
        self.hashes.iter().any(|entry| entry.action == HashAction::Failed)
    }

    /// Whether two records share at least one digest in a common format
    pub fn shares_digest_with(&self, other: &FileRecord) -> bool {
        self.hashes
            .iter()
            .any(|entry| other.digest(&entry.format) == Some(entry.digest.as_str()))
    }
}

/// Presence of a directory, independent of its contents
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Path relative to the owning history directory
    pub path: String,
}

impl DirectoryRecord {
    /// Create a directory record
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Pointer from a parent generation to a nested history's newest record
///
/// Acts as a Merkle-style link: the parent's own chain covers this
/// reference, and the reference covers the child's record bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildReference {
    /// Child history directory relative to the parent history directory
    pub path: String,
    /// File name of the child's newest record
    pub record: String,
    /// Digest of that record as stored in the child's chain
    pub record_hash: String,
    /// Algorithm `record_hash` was computed with
    pub algorithm: HashFormat,
    /// Sequence number of the child's newest generation
    pub sequence: u32,
}

/// Who wrote a generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorInfo {
    /// Host name of the machine that ran the tool
    pub host: String,
    /// Tool name
    pub tool: String,
    /// Tool version
    pub version: String,
    /// Optional operator name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Optional free-form comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl CreatorInfo {
    /// Describe the current process and host
    pub fn current() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            host,
            tool: TOOL_NAME.to_string(),
            version: TOOL_VERSION.to_string(),
            author: None,
            comment: None,
        }
    }
}

impl std::fmt::Display for CreatorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {} {}", self.host, self.tool, self.version)?;
        if let Some(author) = &self.author {
            write!(f, ", author: {}", author)?;
        }
        if let Some(comment) = &self.comment {
            write!(f, ", comment: {}", comment)?;
        }
        Ok(())
    }
}

/// How a generation was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process kind; files are hashed where they lie
    pub process: String,
}

impl Default for ProcessInfo {
    fn default() -> Self {
        Self {
            process: "in-place".to_string(),
        }
    }
}

impl std::fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.process)
    }
}

/// Classification of a path when comparing the filesystem to its history
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    /// Present now and in the latest generation under the same path
    Available,
    /// In the latest generation but absent now
    Missing,
    /// Present now but never recorded
    New,
    /// Matches an ignore rule
    Ignored,
    /// New path whose content uniquely matches a missing path
    Renamed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileStatus::Available => "Available",
            FileStatus::Missing => "Missing",
            FileStatus::New => "New",
            FileStatus::Ignored => "Ignored",
            FileStatus::Renamed => "Renamed",
        };
        f.write_str(name)
    }
}
