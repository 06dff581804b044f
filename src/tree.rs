//! Composition of nested histories
//!
//! A directory tree may contain several histories: one at the invocation
//! root and any number below it. [`HistoryTree`] keeps them in an arena keyed
//! by their directory path relative to the invocation root (`""` is the root
//! itself). Parent/child relations are lookups on those keys:
//!
//! ```text
//! ""        owns   Stuff.txt, B/… (unless B has its own history)
//! "A/AA"    owns   A/AA/…
//! "B"       owns   B/…
//! ```
//!
//! Every file is tracked exactly once, by its *nearest-owning* history: the
//! closest directory at or above it that owns a history. Ancestors only hold
//! [`ChildReference`] pointers to their nearest nested histories.

use crate::codec::RecordCodec;
use crate::error::{FixityError, Result};
use crate::file_tracking::Snapshot;
use crate::hashing::HashRegistry;
use crate::history::History;
use crate::storage::HistoryStore;
use crate::types::ChildReference;
use crate::utils;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reconciliation problem between a parent history and a nested one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// A referenced child history directory no longer exists
    ChildMissing {
        /// Parent history directory (absolute)
        parent: PathBuf,
        /// Expected child history directory (absolute)
        child: PathBuf,
    },
    /// A child history was updated without its parent
    ChildDiverged {
        /// Parent history directory (absolute)
        parent: PathBuf,
        /// Child history directory (absolute)
        child: PathBuf,
        /// Sequence recorded by the parent
        recorded: u32,
        /// Newest sequence of the child
        actual: u32,
    },
    /// A child history still exists but the ignore rules exclude its directory
    ChildExcluded {
        /// Parent history directory (absolute)
        parent: PathBuf,
        /// Excluded child history directory (absolute)
        child: PathBuf,
    },
}

impl Inconsistency {
    /// Whether the inconsistency leaves the tree unreconcilable
    pub fn is_blocking(&self) -> bool {
        matches!(self, Inconsistency::ChildMissing { .. })
    }
}

impl std::fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inconsistency::ChildMissing { parent, child } => write!(
                f,
                "child history {} referenced by {} was moved or removed",
                child.display(),
                parent.display()
            ),
            Inconsistency::ChildDiverged { parent, child, recorded, actual } => write!(
                f,
                "child history {} is at generation {} but {} references generation {}",
                child.display(),
                actual,
                parent.display(),
                recorded
            ),
            Inconsistency::ChildExcluded { parent, child } => write!(
                f,
                "child history {} referenced by {} is excluded by ignore rules",
                child.display(),
                parent.display()
            ),
        }
    }
}

/// Arena of every history below an invocation root
#[derive(Debug, Clone)]
pub struct HistoryTree {
    root: PathBuf,
    histories: BTreeMap<String, History>,
}

impl HistoryTree {
    /// Create an empty tree rooted at `root` (absolute)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            histories: BTreeMap::new(),
        }
    }

    /// Load and verify every history listed in `snapshot`
    ///
    /// Histories already present in the tree are kept as they are. Every
    /// chain is verified before this returns; nothing is written.
    ///
    /// # Errors
    ///
    /// The first verification failure of any level.
    pub fn load(&mut self, snapshot: &Snapshot, registry: &HashRegistry, codec: &dyn RecordCodec) -> Result<()> {
        for dir in &snapshot.history_dirs {
            if self.histories.contains_key(dir) {
                continue;
            }
            let history = HistoryStore::new(self.absolute(dir)).load(registry, codec)?;
            debug!("Loaded history {:?} with {} generation(s)", dir, history.len());
            self.histories.insert(dir.clone(), history);
        }
        self.verify_excluded(registry, codec)
    }

    /// Verify referenced child histories that the snapshot left out
    ///
    /// They stay out of the tree, but a broken chain or record below an
    /// ignored directory still fails the run.
    fn verify_excluded(&self, registry: &HashRegistry, codec: &dyn RecordCodec) -> Result<()> {
        let mut pending = Vec::new();
        for (dir, history) in &self.histories {
            pending.extend(self.load_excluded_children(dir, history, registry, codec)?);
        }
        while let Some((dir, history)) = pending.pop() {
            pending.extend(self.load_excluded_children(&dir, &history, registry, codec)?);
        }
        Ok(())
    }

    fn load_excluded_children(
        &self,
        dir: &str,
        history: &History,
        registry: &HashRegistry,
        codec: &dyn RecordCodec,
    ) -> Result<Vec<(String, History)>> {
        let mut loaded = Vec::new();
        for reference in history.latest().map(|g| g.children.as_slice()).unwrap_or_default() {
            let child_dir = utils::concat_relative(dir, &reference.path);
            let store = HistoryStore::new(self.absolute(&child_dir));
            if self.histories.contains_key(&child_dir) || !store.exists() {
                continue;
            }
            let child = store.load(registry, codec)?;
            debug!("Verified excluded history {:?}", child_dir);
            loaded.push((child_dir, child));
        }
        Ok(loaded)
    }

    /// Insert (or replace) the history for relative directory `dir`
    pub fn insert(&mut self, dir: impl Into<String>, history: History) {
        self.histories.insert(dir.into(), history);
    }

    /// Invocation root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a relative path
    pub fn absolute(&self, rel: &str) -> PathBuf {
        utils::join_relative(&self.root, rel)
    }

    /// History at relative directory `dir`
    pub fn get(&self, dir: &str) -> Option<&History> {
        self.histories.get(dir)
    }

    /// Mutable history at relative directory `dir`
    pub fn get_mut(&mut self, dir: &str) -> Option<&mut History> {
        self.histories.get_mut(dir)
    }

    /// All histories, ordered by directory
    pub fn iter(&self) -> impl Iterator<Item = (&str, &History)> {
        self.histories.iter().map(|(dir, history)| (dir.as_str(), history))
    }

    /// Number of histories
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    /// Whether no history is loaded
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Nearest directory at or above `rel_path` that owns a history
    ///
    /// `rel_path` itself counts when it is a history directory.
    pub fn owner_of(&self, rel_path: &str) -> Option<&str> {
        let mut candidate = rel_path;
        loop {
            if let Some((dir, _)) = self.histories.get_key_value(candidate) {
                return Some(dir.as_str());
            }
            if candidate.is_empty() {
                return None;
            }
            candidate = utils::parent_dir(candidate);
        }
    }

    /// Nearest-owning history of a file and the file's path relative to it
    pub fn locate<'a>(&self, rel_path: &'a str) -> Option<(&str, &'a str)> {
        let owner = self.owner_of(utils::parent_dir(rel_path))?;
        let local = utils::strip_dir_prefix(rel_path, owner)?;
        Some((owner, local))
    }

    /// Nearest nested histories of `dir`, ordered by path
    pub fn children_of(&self, dir: &str) -> Vec<&str> {
        self.histories
            .keys()
            .filter(|child| utils::strip_dir_prefix(child, dir).is_some())
            .filter(|child| self.owner_of(utils::parent_dir(child)) == Some(dir))
            .map(String::as_str)
            .collect()
    }

    /// Nearest history strictly above `dir`
    pub fn parent_of(&self, dir: &str) -> Option<&str> {
        if dir.is_empty() {
            return None;
        }
        self.owner_of(utils::parent_dir(dir))
    }

    /// History directories with children before parents
    ///
    /// Deeper directories come first; equal depths are ordered by path so
    /// the order is deterministic.
    pub fn bottom_up_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self.histories.keys().cloned().collect();
        order.sort_by(|a, b| utils::depth(b).cmp(&utils::depth(a)).then_with(|| a.cmp(b)));
        order
    }

    /// Reference a parent should hold for the child history at `child_dir`
    pub fn reference_to(&self, parent_dir: &str, child_dir: &str) -> Option<ChildReference> {
        let child = self.histories.get(child_dir)?;
        let entry = child.latest_entry()?;
        Some(ChildReference {
            path: utils::strip_dir_prefix(child_dir, parent_dir)?.to_string(),
            record: entry.record.clone(),
            record_hash: entry.record_hash.clone(),
            algorithm: entry.algorithm.clone(),
            sequence: entry.sequence,
        })
    }

    /// Check every stored child reference against the loaded children
    ///
    /// # Returns
    ///
    /// Inconsistencies that do not prevent further work: vanished child
    /// directories and children updated without their parent.
    ///
    /// # Errors
    ///
    /// Returns [`FixityError::HistoryStoreMissing`] when a referenced child
    /// directory still exists but its store is gone.
    pub fn check_references(&self) -> Result<Vec<Inconsistency>> {
        let mut found = Vec::new();
        for (dir, history) in &self.histories {
            let Some(latest) = history.latest() else {
                continue;
            };
            for reference in &latest.children {
                let child_dir = utils::concat_relative(dir, &reference.path);
                let child_abs = self.absolute(&child_dir);
                match self.histories.get(&child_dir) {
                    Some(child) => {
                        let Some(entry) = child.latest_entry() else {
                            continue;
                        };
                        if entry.sequence != reference.sequence || entry.record_hash != reference.record_hash {
                            let inconsistency = Inconsistency::ChildDiverged {
                                parent: history.path().to_path_buf(),
                                child: child_abs,
                                recorded: reference.sequence,
                                actual: entry.sequence,
                            };
                            warn!("{}", inconsistency);
                            found.push(inconsistency);
                        }
                    }
                    None if HistoryStore::new(&child_abs).exists() => {
                        let inconsistency = Inconsistency::ChildExcluded {
                            parent: history.path().to_path_buf(),
                            child: child_abs,
                        };
                        warn!("{}", inconsistency);
                        found.push(inconsistency);
                    }
                    None if child_abs.is_dir() => {
                        return Err(FixityError::HistoryStoreMissing { path: child_abs });
                    }
                    None => {
                        let inconsistency = Inconsistency::ChildMissing {
                            parent: history.path().to_path_buf(),
                            child: child_abs,
                        };
                        warn!("{}", inconsistency);
                        found.push(inconsistency);
                    }
                }
            }
        }
        Ok(found)
    }
}
