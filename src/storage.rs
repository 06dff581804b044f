//! On-disk history stores and all-or-nothing writes
//!
//! Every directory that owns a history carries a reserved store directory:
//!
//! ```text
//! <history dir>/
//! └── .fixity/
//!     ├── 0001_<dir>_2024-01-01_120000Z.json   # one record per generation
//!     ├── 0002_<dir>_2024-01-02_090000Z.json
//!     └── chain.json                          # tamper-evident chain
//! ```
//!
//! [`HistoryStore`] locates, verifies and decodes one store.
//! [`Transaction`] stages writes across any number of stores and publishes
//! them only at [`Transaction::commit`]: every record and chain is first
//! written to a temporary file inside its store, then renamed into place,
//! records before chains. Dropping an uncommitted transaction deletes the
//! staged files and any store directory it created.
//!
//! ## Limitations
//!
//! There is no locking. Two processes creating generations in the same tree
//! at the same time can corrupt a history; callers must serialize writers.

use crate::chain::{Chain, ChainVerifier};
use crate::codec::RecordCodec;
use crate::error::{FixityError, Result};
use crate::generation::parse_record_sequence;
use crate::hashing::HashRegistry;
use crate::history::History;
use crate::utils;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, trace, warn};

/// Name of the reserved store directory
pub const STORE_DIR_NAME: &str = ".fixity";
/// Name of the chain file inside a store
pub const CHAIN_FILE_NAME: &str = "chain.json";

/// Reserved store of one history directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStore {
    history_dir: PathBuf,
}

impl HistoryStore {
    /// Store belonging to `history_dir` (which need not exist yet)
    pub fn new(history_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_dir: history_dir.into(),
        }
    }

    /// Nearest directory at or above `path` that owns a store
    pub fn find_owner(path: &Path) -> Option<PathBuf> {
        path.ancestors()
            .find(|dir| dir.join(STORE_DIR_NAME).is_dir())
            .map(Path::to_path_buf)
    }

    /// Directory whose history this store holds
    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    /// The reserved store directory
    pub fn store_dir(&self) -> PathBuf {
        self.history_dir.join(STORE_DIR_NAME)
    }

    /// Path of the chain file
    pub fn chain_path(&self) -> PathBuf {
        self.store_dir().join(CHAIN_FILE_NAME)
    }

    /// Path of a record file
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.store_dir().join(name)
    }

    /// Whether the store directory exists
    pub fn exists(&self) -> bool {
        self.store_dir().is_dir()
    }

    /// Record file names present in the store, sorted
    pub fn record_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.store_dir())? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if parse_record_sequence(&name).is_some() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Verify the chain and decode every record into a [`History`]
    ///
    /// # Arguments
    ///
    /// * `registry` - Digest functions used to re-hash records
    /// * `codec` - Codec the records were written with
    ///
    /// # Errors
    ///
    /// - [`FixityError::HistoryStoreMissing`] if the store directory is absent
    /// - any chain verification error (see [`crate::chain`])
    /// - a record validation error if a record cannot be decoded or carries
    ///   the wrong sequence number
    pub fn load(&self, registry: &HashRegistry, codec: &dyn RecordCodec) -> Result<History> {
        if !self.exists() {
            return Err(FixityError::HistoryStoreMissing {
                path: self.history_dir.clone(),
            });
        }

        let verified = ChainVerifier::new(registry).verify(&self.chain_path())?;
        let mut generations = Vec::with_capacity(verified.records.len());
        for (entry, bytes) in verified.chain.entries.iter().zip(&verified.records) {
            let record_path = self.record_path(&entry.record);
            let generation = codec
                .decode(bytes)
                .map_err(|e| FixityError::invalid_record(&record_path, e.to_string()))?;
            if generation.sequence != entry.sequence {
                return Err(FixityError::invalid_record(
                    &record_path,
                    format!("record carries sequence {} but the chain expects {}", generation.sequence, entry.sequence),
                ));
            }
            if !generation.is_canonical() {
                return Err(FixityError::invalid_record(&record_path, "collections are not sorted"));
            }
            generations.push(generation);
        }

        let referenced: BTreeSet<&str> = verified.chain.entries.iter().map(|e| e.record.as_str()).collect();
        for orphan in self.record_files()?.iter().filter(|name| !referenced.contains(name.as_str())) {
            warn!("Ignoring record {:?} in {:?}: not referenced by the chain", orphan, self.store_dir());
        }

        debug!("Loaded {} generation(s) from {:?}", generations.len(), self.store_dir());
        History::from_parts(self.history_dir.clone(), generations, verified.chain)
    }
}

struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
    replace: bool,
}

/// Staged writes across one or more stores, published together
///
/// # Examples
///
/// ```rust,no_run
/// use fixity::storage::{HistoryStore, Transaction};
/// use fixity::chain::Chain;
///
/// # fn main() -> fixity::Result<()> {
/// let store = HistoryStore::new("/data/project");
/// let mut tx = Transaction::new();
/// tx.stage_record(&store, "0001_project_2024-01-01_000000Z.json", b"{}")?;
/// tx.stage_chain(&store, &Chain::new())?;
/// tx.commit()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Transaction {
    staged: Vec<StagedFile>,
    created_stores: Vec<PathBuf>,
}

impl Transaction {
    /// Start an empty transaction
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged files
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether nothing was staged
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    fn ensure_store(&mut self, store: &HistoryStore) -> Result<PathBuf> {
        let store_dir = store.store_dir();
        if !store_dir.is_dir() {
            fs::create_dir_all(&store_dir)?;
            info!("Created history store {:?}", store_dir);
            self.created_stores.push(store_dir.clone());
        }
        Ok(store_dir)
    }

    fn stage(&mut self, store: &HistoryStore, target: PathBuf, bytes: &[u8], replace: bool) -> Result<()> {
        let store_dir = self.ensure_store(store)?;
        let mut temp = NamedTempFile::new_in(&store_dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        trace!("Staged {} bytes for {:?}", bytes.len(), target);
        self.staged.push(StagedFile { temp, target, replace });
        Ok(())
    }

    /// Stage a new record file; publishing fails if it already exists
    pub fn stage_record(&mut self, store: &HistoryStore, name: &str, bytes: &[u8]) -> Result<()> {
        self.stage(store, store.record_path(name), bytes, false)
    }

    /// Stage a replacement chain file
    pub fn stage_chain(&mut self, store: &HistoryStore, chain: &Chain) -> Result<()> {
        let bytes = chain.to_bytes()?;
        self.stage(store, store.chain_path(), &bytes, true)
    }

    /// Publish every staged file, records first
    ///
    /// # Returns
    ///
    /// The number of files published.
    pub fn commit(mut self) -> Result<usize> {
        let mut staged = std::mem::take(&mut self.staged);
        staged.sort_by_key(|file| file.replace);

        let count = staged.len();
        for file in staged {
            let StagedFile { temp, target, replace } = file;
            let result = if replace {
                temp.persist(&target)
            } else {
                temp.persist_noclobber(&target)
            };
            result.map_err(|e| FixityError::Io(e.error))?;
            trace!("Published {:?}", target);
        }

        self.created_stores.clear();
        debug!("Committed {} file(s)", count);
        Ok(count)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Temporary files go first so new stores are empty again
        self.staged.clear();
        for store_dir in self.created_stores.drain(..).rev() {
            if let Err(e) = utils::remove_dir_if_empty(&store_dir) {
                warn!("Failed to remove {:?}: {}", store_dir, e);
            }
        }
    }
}
