//! Tamper-evident hash chain over a history's record files
//!
//! Every history store keeps one chain file next to its record files. Each
//! [`ChainEntry`] names a record file, stores the digest of its bytes and
//! links to the previous entry through that entry's link hash:
//!
//! ```text
//! entry 1: record_hash(R1), previous = none
//! entry 2: record_hash(R2), previous = link(entry 1)
//! entry n: record_hash(Rn), previous = link(entry n-1)
//! ```
//!
//! ## Verification
//!
//! [`ChainVerifier`] scans the chain sequentially and stops at the first
//! problem, reporting a distinct error class for each kind of tampering:
//!
//! 1. chain file absent or unreadable → [`IntegrityError::ChainFileMissing`]
//! 2. chain file not parseable → [`FixityError::Validation`] (chain)
//! 3. sequence gap or broken link → [`IntegrityError::ChainBroken`]
//! 4. record file absent → [`IntegrityError::Missing`]
//! 5. record bytes re-hash differently → [`IntegrityError::Altered`]
//!
//! Records are re-hashed with the algorithm stored in their entry, not the
//! algorithm configured for the current run.

use crate::error::{FixityError, IntegrityError, Result};
use crate::hashing::{HashFormat, HashRegistry};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, trace};

/// Chain file format version
pub const CHAIN_VERSION: u32 = 1;

/// One link of the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Sequence number of the generation this entry covers
    pub sequence: u32,
    /// Record file name inside the store
    pub record: String,
    /// Algorithm `record_hash` was computed with
    pub algorithm: HashFormat,
    /// Digest of the record file bytes
    pub record_hash: String,
    /// Link hash of the previous entry
    pub previous: Option<String>,
}

impl ChainEntry {
    /// SHA-256 over every field of this entry
    ///
    /// The next entry stores this value in `previous`.
    pub fn link_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.record.as_bytes());
        hasher.update(b"|");
        hasher.update(self.algorithm.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.record_hash.as_bytes());
        hasher.update(b"|");
        hasher.update(self.previous.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Ordered chain entries of one history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    /// File format version
    pub version: u32,
    /// Entries, sequence 1..N
    pub entries: Vec<ChainEntry>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            version: CHAIN_VERSION,
            entries: Vec::new(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest entry
    pub fn last(&self) -> Option<&ChainEntry> {
        self.entries.last()
    }

    /// Build the entry that would follow the current last one
    pub fn next_entry(&self, record: impl Into<String>, algorithm: HashFormat, record_hash: impl Into<String>) -> ChainEntry {
        ChainEntry {
            sequence: self.entries.len() as u32 + 1,
            record: record.into(),
            algorithm,
            record_hash: record_hash.into(),
            previous: self.last().map(ChainEntry::link_hash),
        }
    }

    /// Append an entry, checking its sequence and link
    ///
    /// # Errors
    ///
    /// Returns [`FixityError::Sequence`] if the entry does not continue the
    /// chain.
    pub fn push(&mut self, entry: ChainEntry) -> Result<()> {
        let expected = self.entries.len() as u32 + 1;
        if entry.sequence != expected || entry.previous != self.last().map(ChainEntry::link_hash) {
            return Err(FixityError::Sequence {
                expected,
                found: entry.sequence,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Serialize to the on-disk representation
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Check sequence numbers and links without touching record files
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::ChainBroken`] for the first entry that does
    /// not continue its predecessor.
    pub fn verify_links(&self, chain_path: &Path) -> Result<()> {
        let mut previous: Option<String> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let expected = idx as u32 + 1;
            if entry.sequence != expected {
                return Err(IntegrityError::ChainBroken {
                    path: chain_path.to_path_buf(),
                    sequence: expected,
                    reason: format!("found sequence {} where {} was expected", entry.sequence, expected),
                }
                .into());
            }
            if entry.previous != previous {
                return Err(IntegrityError::ChainBroken {
                    path: chain_path.to_path_buf(),
                    sequence: expected,
                    reason: "link to previous entry does not match".to_string(),
                }
                .into());
            }
            previous = Some(entry.link_hash());
        }
        Ok(())
    }
}

/// A chain that passed verification together with its record bytes
#[derive(Debug, Clone)]
pub struct VerifiedChain {
    /// The chain as read from disk
    pub chain: Chain,
    /// Record file bytes, index `i` belongs to sequence `i + 1`
    pub records: Vec<Vec<u8>>,
}

/// Validates that a store's records are unmodified and the chain unbroken
pub struct ChainVerifier<'a> {
    registry: &'a HashRegistry,
}

impl<'a> ChainVerifier<'a> {
    /// Create a verifier using `registry` to re-hash records
    pub fn new(registry: &'a HashRegistry) -> Self {
        Self { registry }
    }

    /// Verify the chain file `chain_path` and every record it references
    ///
    /// Record files are resolved relative to the chain file's directory.
    ///
    /// # Returns
    ///
    /// The verified chain and the bytes of every record, in sequence order.
    ///
    /// # Errors
    ///
    /// The first problem found aborts verification; see the module docs for
    /// the error class of each problem.
    pub fn verify(&self, chain_path: &Path) -> Result<VerifiedChain> {
        let bytes = match fs::read(chain_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Cannot read chain {:?}: {}", chain_path, e);
                return Err(IntegrityError::ChainFileMissing {
                    path: chain_path.to_path_buf(),
                }
                .into());
            }
        };
        let chain: Chain = serde_json::from_slice(&bytes)
            .map_err(|e| FixityError::invalid_chain(chain_path, e.to_string()))?;
        if chain.version != CHAIN_VERSION {
            return Err(FixityError::invalid_chain(
                chain_path,
                format!("unsupported chain version {}", chain.version),
            ));
        }
        chain.verify_links(chain_path)?;

        let store_dir = chain_path.parent().unwrap_or_else(|| Path::new("."));
        let mut records = Vec::with_capacity(chain.len());
        for entry in &chain.entries {
            let record_path = store_dir.join(&entry.record);
            let record = match fs::read(&record_path) {
                Ok(record) => record,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(IntegrityError::Missing { path: record_path }.into());
                }
                Err(e) => return Err(e.into()),
            };
            let actual = self.registry.hash_bytes(&entry.algorithm, &record)?;
            if actual != entry.record_hash {
                return Err(IntegrityError::Altered {
                    path: record_path,
                    expected: entry.record_hash.clone(),
                    actual,
                }
                .into());
            }
            trace!("Verified record {} ({})", entry.record, entry.algorithm);
            records.push(record);
        }

        debug!("Chain {:?} verified with {} entries", chain_path, chain.len());
        Ok(VerifiedChain { chain, records })
    }
}
