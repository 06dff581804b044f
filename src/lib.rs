//! # Fixity - Tamper-evident integrity histories for directory trees
//!
//! Fixity records the content hashes of every file in a directory tree,
//! generation after generation, so that it can later prove the files were
//! not altered as they moved through production stages.
//!
//! ## Overview
//!
//! Each directory with a history carries a reserved `.fixity` store:
//! - One **record** per generation with the size, digests and verification
//!   outcome of every file
//! - A **chain** hashing every record and linking each entry to the previous
//!   one, so edited or deleted records are detected
//!
//! Histories nest. A file belongs to the closest directory at or above it
//! that owns a history; parents keep only hash pointers to their nested
//! histories, so a change deep in the tree is provable from the root without
//! hashing every file at every level.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fixity::{CreateOptions, Fixity, FileStatus};
//! use std::path::Path;
//!
//! # fn main() -> fixity::Result<()> {
//! let fixity = Fixity::new()?;
//!
//! // First run: every file is hashed as `original`
//! fixity.create(Path::new("./card01"), CreateOptions::default())?;
//!
//! // Later runs verify against the last trusted digests
//! let report = fixity.create(Path::new("./card01"), CreateOptions::default())?;
//! if report.has_failures() {
//!     eprintln!("content changed since the last generation");
//! }
//!
//! // Compare without writing anything
//! let diff = fixity.diff(Path::new("./card01"))?;
//! println!("{} missing", diff.count(FileStatus::Missing));
//! # Ok(())
//! # }
//! ```
//!
//! ## Actions
//!
//! Every digest in a generation carries an action:
//! - `original`: first digest of the file
//! - `verified`: equal to the last trusted digest
//! - `failed`: differs from the last trusted digest
//! - `new`: first digest of a file that was previously only ignored
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with [`FixityError`]. Integrity
//! failures abort the whole operation before anything is written, and each
//! class maps to a stable process exit code via [`FixityError::exit_code`].
//!
//! ## Limitations
//!
//! There is no locking; concurrent writers on the same tree are unsupported.
//!
//! ## Module Organization
//!
//! - [`fixity`]: configured entry point and builder
//! - [`builder`]: generation creation
//! - [`diff`]: non-mutating reconciliation
//! - [`info`]: reports over verified histories
//! - [`chain`]: tamper-evidence chain and its verifier
//! - [`history`], [`generation`], [`types`]: the history model
//! - [`tree`]: nested history composition
//! - [`storage`]: on-disk stores and transactional writes
//! - [`hashing`]: pluggable digest functions
//! - [`codec`]: record serialization
//! - [`file_tracking`]: directory walking and ignore rules
//! - [`error`]: error types and exit codes

pub mod builder;
pub mod chain;
pub mod codec;
pub mod diff;
pub mod error;
pub mod file_tracking;
pub mod fixity;
pub mod generation;
pub mod hashing;
pub mod history;
pub mod info;
pub mod storage;
pub mod tree;
pub mod types;
pub mod utils;

pub use builder::{CreateOptions, CreateProgress, CreateReport, GenerationBuilder, LevelReport};
pub use chain::{Chain, ChainEntry, ChainVerifier};
pub use codec::{JsonRecordCodec, RecordCodec};
pub use diff::{DiffEngine, DiffRecord, DiffReport};
pub use error::{FixityError, IntegrityError, Result};
pub use fixity::{Fixity, FixityBuilder, FixityConfig, LoadedTree};
pub use generation::Generation;
pub use hashing::{Digester, HashFormat, HashRegistry};
pub use history::{FileTimeline, History};
pub use info::{CheckReport, FileInfo, TreeInfo};
pub use storage::{HistoryStore, Transaction};
pub use tree::{HistoryTree, Inconsistency};
pub use types::*;
