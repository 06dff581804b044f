//! Ordered, append-only generations of one history directory
//!
//! A [`History`] couples the decoded generations of a directory with the
//! [`Chain`] that covers their record files. The two always have the same
//! length; [`History::append`] is the only way to grow them and it refuses
//! out-of-order sequence numbers.
//!
//! ## Per-file queries
//!
//! - [`History::file_timeline`] walks every generation containing a path
//! - [`History::trusted_digest`] finds the digest later runs compare against
//! - [`History::prior_names`] follows renames back through time
//!
//! Rename correlation without an explicit `previous_path` only looks at the
//! generation immediately before the one where a path first appears.

use crate::chain::{Chain, ChainEntry};
use crate::error::{FixityError, Result};
use crate::generation::Generation;
use crate::hashing::HashFormat;
use crate::types::FileRecord;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// All generations of one directory plus its chain
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
    generations: Vec<Generation>,
    chain: Chain,
}

impl History {
    /// Create an empty history for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            generations: Vec::new(),
            chain: Chain::new(),
        }
    }

    /// Assemble a history from already verified parts
    ///
    /// # Errors
    ///
    /// Returns [`FixityError::Sequence`] if generations and chain entries do
    /// not pair up as 1..N.
    pub fn from_parts(path: impl Into<PathBuf>, generations: Vec<Generation>, chain: Chain) -> Result<Self> {
        let mut history = Self::new(path);
        if generations.len() != chain.len() {
            return Err(FixityError::Sequence {
                expected: chain.len() as u32,
                found: generations.len() as u32,
            });
        }
        for (generation, entry) in generations.into_iter().zip(chain.entries) {
            history.append(generation, entry)?;
        }
        Ok(history)
    }

    /// Directory this history belongs to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All generations, oldest first
    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    /// The chain covering this history's records
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Number of generations
    pub fn len(&self) -> usize {
        self.generations.len()
    }

    /// Whether no generation was recorded yet
    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    /// Newest generation
    pub fn latest(&self) -> Option<&Generation> {
        self.generations.last()
    }

    /// Newest chain entry
    pub fn latest_entry(&self) -> Option<&ChainEntry> {
        self.chain.last()
    }

    /// Generation with sequence number `sequence`
    pub fn generation(&self, sequence: u32) -> Option<&Generation> {
        sequence
            .checked_sub(1)
            .and_then(|idx| self.generations.get(idx as usize))
    }

    /// Sequence number the next appended generation must carry
    pub fn next_sequence(&self) -> u32 {
        self.generations.len() as u32 + 1
    }

    /// Append a generation together with the chain entry covering its record
    ///
    /// # Errors
    ///
    /// Returns [`FixityError::Sequence`] unless both carry the next sequence
    /// number and the entry links to the current chain head.
    pub fn append(&mut self, generation: Generation, entry: ChainEntry) -> Result<()> {
        let expected = self.next_sequence();
        if generation.sequence != expected {
            return Err(FixityError::Sequence {
                expected,
                found: generation.sequence,
            });
        }
        self.chain.push(entry)?;
        self.generations.push(generation);
        Ok(())
    }

    /// Lazily iterate every generation that contains `path`
    ///
    /// The iterator is finite and can be restarted by cloning it or calling
    /// this method again.
    pub fn file_timeline<'a>(&'a self, path: &'a str) -> FileTimeline<'a> {
        FileTimeline {
            generations: &self.generations,
            path,
            position: 0,
        }
    }

    /// Whether `path` appears in any generation
    pub fn has_record(&self, path: &str) -> bool {
        self.file_timeline(path).next().is_some()
    }

    /// Every format `path` was ever hashed in
    pub fn recorded_formats(&self, path: &str) -> BTreeSet<HashFormat> {
        self.file_timeline(path)
            .flat_map(|(_, record)| record.hashes.iter().map(|entry| entry.format.clone()))
            .collect()
    }

    /// Most recent digest of `path` in `format` that was not a failure
    pub fn trusted_digest(&self, path: &str, format: &HashFormat) -> Option<&str> {
        self.generations.iter().rev().find_map(|generation| {
            generation
                .file(path)?
                .entry(format)
                .filter(|entry| entry.action.is_trusted())
                .map(|entry| entry.digest.as_str())
        })
    }

    /// Latest hashed record of `path`
    pub fn latest_record(&self, path: &str) -> Option<(u32, &FileRecord)> {
        self.generations.iter().rev().find_map(|generation| {
            generation
                .file(path)
                .filter(|record| !record.ignored)
                .map(|record| (generation.sequence, record))
        })
    }

    /// Every path ever recorded with digests, in any generation
    pub fn tracked_paths(&self) -> BTreeSet<&str> {
        self.generations
            .iter()
            .flat_map(|generation| generation.tracked_files().map(|record| record.path.as_str()))
            .collect()
    }

    /// Latest hashed record of every path the history still expects to find
    ///
    /// Covers paths of every generation, not only the latest one. A path
    /// that left the latest generation stays expected until a later
    /// generation renamed it away.
    pub fn expected_records(&self) -> Vec<(u32, &FileRecord)> {
        let latest = self.latest();
        self.tracked_paths()
            .into_iter()
            .filter(|path| latest.and_then(|g| g.file(path)).is_some() || self.successor_name(path).is_none())
            .filter_map(|path| self.latest_record(path))
            .collect()
    }

    /// Name `path` was renamed to in the generation after its last appearance
    pub fn successor_name(&self, path: &str) -> Option<String> {
        let index = self.generations.iter().rposition(|g| g.file(path).is_some())?;
        let next = self.generations.get(index + 1)?;
        if let Some(explicit) = next
            .files
            .iter()
            .find(|record| record.previous_path.as_deref() == Some(path))
        {
            return Some(explicit.path.clone());
        }

        let record = self.generations[index].file(path).filter(|r| !r.ignored)?;
        let previous = &self.generations[index];
        let mut candidates = next
            .tracked_files()
            .filter(|new| new.previous_path.is_none() && previous.file(&new.path).is_none())
            .filter(|new| new.shares_digest_with(record));
        let candidate = candidates.next()?;
        if candidates.next().is_some() {
            return None;
        }
        (self.correlate_predecessor(index + 1, &candidate.path).as_deref() == Some(path))
            .then(|| candidate.path.clone())
    }

    /// Names `path` was known under before, most recent first
    ///
    /// Starts at the latest generation containing `path` and follows
    /// recorded `previous_path` links, falling back to digest correlation
    /// with the immediately preceding generation.
    pub fn prior_names(&self, path: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut seen = BTreeSet::new();
        seen.insert(path.to_string());

        let mut current = path.to_string();
        let mut index = match self.generations.iter().rposition(|g| g.file(&current).is_some()) {
            Some(index) => index,
            None => return names,
        };

        loop {
            // Rewind to the first generation of this uninterrupted presence
            while index > 0 && self.generations[index - 1].file(&current).is_some() {
                index -= 1;
            }

            let record = match self.generations[index].file(&current) {
                Some(record) => record,
                None => break,
            };
            let predecessor = match &record.previous_path {
                Some(previous) => Some(previous.clone()),
                None => self.correlate_predecessor(index, &current),
            };
            let predecessor = match predecessor {
                Some(name) if seen.insert(name.clone()) => name,
                _ => break,
            };

            names.push(predecessor.clone());
            current = predecessor;
            match self.generations[..index].iter().rposition(|g| g.file(&current).is_some()) {
                Some(found) => index = found,
                None => break,
            }
        }
        names
    }

    /// Unique digest match for a path that first appears in generation `index`
    fn correlate_predecessor(&self, index: usize, path: &str) -> Option<String> {
        if index == 0 {
            return None;
        }
        let current = &self.generations[index];
        let previous = &self.generations[index - 1];
        let record = current.file(path).filter(|r| !r.ignored)?;
        if previous.file(path).is_some() {
            return None;
        }

        let vanished: Vec<&FileRecord> = previous
            .tracked_files()
            .filter(|old| current.file(&old.path).is_none())
            .collect();
        let candidates: Vec<&FileRecord> = vanished
            .iter()
            .copied()
            .filter(|old| old.shares_digest_with(record))
            .collect();
        if candidates.len() != 1 {
            return None;
        }
        let candidate = candidates[0];

        // The match must also be unique from the vanished file's side
        let rivals = current
            .tracked_files()
            .filter(|new| new.previous_path.is_none() && previous.file(&new.path).is_none())
            .filter(|new| new.shares_digest_with(candidate))
            .count();
        (rivals == 1).then(|| candidate.path.clone())
    }
}

/// Lazy iterator over `(sequence, record)` pairs of one path
#[derive(Debug, Clone)]
pub struct FileTimeline<'a> {
    generations: &'a [Generation],
    path: &'a str,
    position: usize,
}

impl<'a> Iterator for FileTimeline<'a> {
    type Item = (u32, &'a FileRecord);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(generation) = self.generations.get(self.position) {
            self.position += 1;
            if let Some(record) = generation.file(self.path) {
                return Some((generation.sequence, record));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.generations.len().saturating_sub(self.position)))
    }
}
