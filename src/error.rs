//! Error types for the fixity library
//!
//! Every fallible operation returns [`Result<T>`], whose error side is
//! [`FixityError`]. Integrity failures found while checking a history store
//! are grouped under [`IntegrityError`] so callers can tell tampering apart
//! from ordinary I/O or configuration problems.
//!
//! ## Exit codes
//!
//! The command-line tool maps errors onto a stable set of process exit codes
//! through [`FixityError::exit_code`]:
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | success                                                   |
//! | 30   | history store (or a required child history store) missing |
//! | 31   | a persisted record no longer matches its chain hash       |
//! | 32   | chain file missing, unreadable or broken                  |
//! | 33   | a record referenced by the chain is missing from disk     |
//! | 34   | unresolved reconciliation inconsistency during diff       |
//! | 1    | anything else                                             |

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the fixity library
pub type Result<T> = std::result::Result<T, FixityError>;

/// Exit code for a missing history or child history store
pub const EXIT_HISTORY_MISSING: i32 = 30;
/// Exit code for a record whose bytes no longer match the chain
pub const EXIT_RECORD_ALTERED: i32 = 31;
/// Exit code for a missing, unreadable or broken chain file
pub const EXIT_CHAIN_MISSING: i32 = 32;
/// Exit code for a chain-referenced record missing from disk
pub const EXIT_RECORD_MISSING: i32 = 33;
/// Exit code for an unresolved reconciliation inconsistency
pub const EXIT_RECONCILIATION: i32 = 34;
/// Exit code for every other failure
pub const EXIT_GENERAL: i32 = 1;

/// Tamper-evidence failures detected while verifying a history chain
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// A record file was changed after it was written
    #[error("record {path:?} was altered (chain expects {expected}, found {actual})")]
    Altered {
        /// Path of the altered record file
        path: PathBuf,
        /// Digest stored in the chain
        expected: String,
        /// Digest of the file as it is now
        actual: String,
    },

    /// A record file referenced by the chain is gone
    #[error("record {path:?} referenced by the chain is missing")]
    Missing {
        /// Path of the missing record file
        path: PathBuf,
    },

    /// The chain file itself is gone or cannot be read
    #[error("chain file {path:?} is missing or unreadable")]
    ChainFileMissing {
        /// Path of the chain file
        path: PathBuf,
    },

    /// The chain's own links are inconsistent
    #[error("chain {path:?} is broken at sequence {sequence}: {reason}")]
    ChainBroken {
        /// Path of the chain file
        path: PathBuf,
        /// First sequence number that failed to link
        sequence: u32,
        /// What was wrong
        reason: String,
    },
}

/// Main error type for all fixity operations
#[derive(Debug, Error)]
pub enum FixityError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Ignore rule could not be parsed
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(#[from] ignore::Error),

    /// Tamper-evidence failure in a history store
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// A persisted record or chain is syntactically valid but semantically malformed
    #[error("Invalid {kind} {path:?}: {reason}")]
    Validation {
        /// What was being validated ("record" or "chain")
        kind: ValidationTarget,
        /// File that failed validation
        path: PathBuf,
        /// Description of the problem
        reason: String,
    },

    /// Generation appended out of order
    #[error("Generation sequence error: expected {expected}, found {found}")]
    Sequence {
        /// Sequence number the history expected next
        expected: u32,
        /// Sequence number that was offered
        found: u32,
    },

    /// No history store exists at or above the requested path
    #[error("No history found at or above {0:?}")]
    HistoryNotFound(PathBuf),

    /// The file has never been recorded by its owning history
    #[error("{path:?} is not tracked by the history at {owner:?}")]
    FileNotTracked {
        /// File that was asked about
        path: PathBuf,
        /// Directory of the nearest history
        owner: PathBuf,
    },

    /// A history store that is required (e.g. referenced by a parent) is absent
    #[error("Expected history store is missing at {path:?}")]
    HistoryStoreMissing {
        /// Directory that should own a history store
        path: PathBuf,
    },

    /// Nested state that cannot be reconciled without guessing
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// The directory is already tracked by an ancestor history
    #[error("{path:?} is already tracked by the history at {owner:?}; use --new-root to start a separate history")]
    NestedHistory {
        /// Directory a new history was requested for
        path: PathBuf,
        /// Directory of the ancestor that already owns it
        owner: PathBuf,
    },

    /// Hash format with no registered digest function
    #[error("Unknown hash format: {0}")]
    UnknownHashFormat(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Path is not inside the tree being processed
    #[error("Path {path:?} is outside of {root:?}")]
    OutsideRoot {
        /// Offending path
        path: PathBuf,
        /// Root it should have been under
        root: PathBuf,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which persisted artifact a [`FixityError::Validation`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTarget {
    /// A generation record file
    Record,
    /// A chain file
    Chain,
}

impl std::fmt::Display for ValidationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationTarget::Record => write!(f, "record"),
            ValidationTarget::Chain => write!(f, "chain"),
        }
    }
}

impl FixityError {
    /// Create a record validation error
    pub fn invalid_record(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        FixityError::Validation {
            kind: ValidationTarget::Record,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a chain validation error
    pub fn invalid_chain(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        FixityError::Validation {
            kind: ValidationTarget::Chain,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a reconciliation error with a custom message
    pub fn reconciliation(msg: impl Into<String>) -> Self {
        FixityError::Reconciliation(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        FixityError::Internal(msg.into())
    }

    /// Check if this error means persisted history can no longer be trusted
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            FixityError::Integrity(_)
                | FixityError::Validation { .. }
                | FixityError::HistoryStoreMissing { .. }
        )
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FixityError::HistoryNotFound(_) | FixityError::HistoryStoreMissing { .. } => {
                EXIT_HISTORY_MISSING
            }
            FixityError::Integrity(IntegrityError::Altered { .. }) => EXIT_RECORD_ALTERED,
            FixityError::Integrity(IntegrityError::Missing { .. }) => EXIT_RECORD_MISSING,
            FixityError::Integrity(IntegrityError::ChainFileMissing { .. })
            | FixityError::Integrity(IntegrityError::ChainBroken { .. }) => EXIT_CHAIN_MISSING,
            FixityError::Validation { kind: ValidationTarget::Chain, .. } => EXIT_CHAIN_MISSING,
            FixityError::Validation { kind: ValidationTarget::Record, .. } => EXIT_RECORD_ALTERED,
            FixityError::Reconciliation(_) => EXIT_RECONCILIATION,
            _ => EXIT_GENERAL,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            FixityError::HistoryNotFound(path) => {
                format!("No history found for {:?}. Run 'fixity create' on the directory first.", path)
            }
            FixityError::HistoryStoreMissing { path } => {
                format!(
                    "The history store at {:?} is referenced by a parent history but no longer exists. \
                     Restore it from a backup before creating new generations.",
                    path
                )
            }
            FixityError::Integrity(IntegrityError::Altered { path, .. }) => {
                format!("Record {:?} was modified after it was written. The history cannot be trusted.", path)
            }
            FixityError::Integrity(IntegrityError::Missing { path }) => {
                format!("Record {:?} was deleted. The history cannot be trusted.", path)
            }
            _ => self.to_string(),
        }
    }
}
