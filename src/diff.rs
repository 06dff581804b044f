//! Non-mutating reconciliation of a tree against its histories
//!
//! [`DiffEngine`] compares a fresh [`Snapshot`] with the latest generation
//! of every history in a [`HistoryTree`] and classifies each path:
//!
//! - **Available**: present now and in the latest generation
//! - **Missing**: in the latest generation but gone
//! - **New**: present but never recorded
//! - **Ignored**: matches an ignore rule
//! - **Renamed**: a new path whose content uniquely matches a missing one
//!
//! Rename correlation never guesses. A new file is linked to a missing one
//! only when exactly one missing file of the same history shares a digest
//! with it and no other new file matches that missing file. The old path of
//! a rename is not reported as missing.
//!
//! Nothing is written; the diff may run on a tree whose chains verified but
//! whose nested references are inconsistent. Blocking inconsistencies are
//! carried in the report and surfaced by [`DiffReport::check`] after the
//! caller has printed whatever could be determined.

use crate::error::{FixityError, Result};
use crate::file_tracking::{IgnoreRules, Snapshot, SnapshotEntry};
use crate::generation::Generation;
use crate::hashing::{HashFormat, HashRegistry};
use crate::history::History;
use crate::tree::{HistoryTree, Inconsistency};
use crate::types::{FileRecord, FileStatus};
use crate::utils;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::debug;

/// Classification of one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    /// Absolute path
    pub path: PathBuf,
    /// Generation the path was last recorded in
    pub generation: Option<u32>,
    /// Classification
    pub status: FileStatus,
    /// Earlier names relative to the owning history, most recent first
    pub other_names: Vec<String>,
    /// Size on disk now
    pub current_size: Option<u64>,
    /// Size recorded in the latest generation
    pub recorded_size: Option<u64>,
}

impl DiffRecord {
    /// `|`-delimited row with `None` for inapplicable columns
    pub fn to_row(&self) -> String {
        let none = || "None".to_string();
        format!(
            "{} | {} | {} | {} | {} | {}",
            self.path.display(),
            self.generation.map(|g| g.to_string()).unwrap_or_else(none),
            self.status,
            if self.other_names.is_empty() {
                none()
            } else {
                self.other_names.join(", ")
            },
            self.current_size.map(utils::format_size).unwrap_or_else(none),
            self.recorded_size.map(utils::format_size).unwrap_or_else(none),
        )
    }

    /// Short `<Status>: <path>` line
    pub fn to_line(&self) -> String {
        if self.other_names.is_empty() {
            format!("{}: {}", self.status, self.path.display())
        } else {
            format!(
                "{}: {} (previously: {})",
                self.status,
                self.path.display(),
                self.other_names.join(", ")
            )
        }
    }
}

/// Result of a diff
#[derive(Debug, Clone)]
pub struct DiffReport {
    /// Invocation root
    pub root: PathBuf,
    /// One record per path, sorted by path
    pub records: Vec<DiffRecord>,
    /// Reference problems between nested histories
    pub inconsistencies: Vec<Inconsistency>,
}

impl DiffReport {
    /// Number of records with `status`
    pub fn count(&self, status: FileStatus) -> usize {
        self.records.iter().filter(|record| record.status == status).count()
    }

    /// Records that are not `Available`
    pub fn changes(&self) -> impl Iterator<Item = &DiffRecord> {
        self.records
            .iter()
            .filter(|record| record.status != FileStatus::Available)
    }

    /// Record for an absolute path
    pub fn get(&self, path: &std::path::Path) -> Option<&DiffRecord> {
        self.records.iter().find(|record| record.path == path)
    }

    /// First inconsistency that prevents reconciliation
    pub fn blocking(&self) -> Option<&Inconsistency> {
        self.inconsistencies.iter().find(|i| i.is_blocking())
    }

    /// Fail with a reconciliation error if the tree could not be reconciled
    pub fn check(&self) -> Result<()> {
        match self.blocking() {
            Some(inconsistency) => Err(FixityError::reconciliation(inconsistency.to_string())),
            None => Ok(()),
        }
    }
}

/// Compares the filesystem with the latest known state
pub struct DiffEngine<'a> {
    registry: &'a HashRegistry,
}

impl<'a> DiffEngine<'a> {
    /// Create an engine using `registry` to hash rename candidates
    pub fn new(registry: &'a HashRegistry) -> Self {
        Self { registry }
    }

    /// Classify every path of `snapshot`
    ///
    /// # Arguments
    ///
    /// * `tree` - Verified histories of the tree
    /// * `snapshot` - Current filesystem state
    /// * `rules` - Ignore rules the snapshot was taken with
    /// * `inconsistencies` - Reference problems found while loading `tree`
    ///
    /// # Errors
    ///
    /// I/O errors while hashing rename candidates.
    pub fn diff(
        &self,
        tree: &HistoryTree,
        snapshot: &Snapshot,
        rules: &IgnoreRules,
        inconsistencies: Vec<Inconsistency>,
    ) -> Result<DiffReport> {
        let mut records = Vec::new();
        for (dir, history) in tree.iter() {
            self.diff_history(tree, dir, history, snapshot, rules, &mut records)?;
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Diff of {:?} produced {} record(s)", snapshot.root, records.len());
        Ok(DiffReport {
            root: tree.root().to_path_buf(),
            records,
            inconsistencies,
        })
    }

    fn diff_history(
        &self,
        tree: &HistoryTree,
        dir: &str,
        history: &History,
        snapshot: &Snapshot,
        rules: &IgnoreRules,
        records: &mut Vec<DiffRecord>,
    ) -> Result<()> {
        let latest = history.latest();
        let sequence = latest.map(|g| g.sequence);
        let expected: BTreeMap<&str, (u32, &FileRecord)> = history
            .expected_records()
            .into_iter()
            .map(|(seq, record)| (record.path.as_str(), (seq, record)))
            .collect();
        let mut unseen: Vec<(&SnapshotEntry, &str)> = Vec::new();

        for entry in snapshot.files() {
            let Some((owner, local)) = tree.locate(&entry.path) else {
                continue;
            };
            if owner != dir {
                continue;
            }
            let recorded = latest.and_then(|g| g.file(local));
            if entry.ignored {
                records.push(DiffRecord {
                    path: snapshot.absolute(&entry.path),
                    generation: None,
                    status: FileStatus::Ignored,
                    other_names: Vec::new(),
                    current_size: Some(entry.size),
                    recorded_size: None,
                });
            } else if let Some(record) = recorded.filter(|r| !r.ignored) {
                records.push(DiffRecord {
                    path: snapshot.absolute(&entry.path),
                    generation: sequence,
                    status: FileStatus::Available,
                    other_names: history.prior_names(local),
                    current_size: Some(entry.size),
                    recorded_size: Some(record.size),
                });
            } else if let Some((seq, record)) = expected.get(local).filter(|_| recorded.is_none()) {
                // Back after being missing in one or more generations
                records.push(DiffRecord {
                    path: snapshot.absolute(&entry.path),
                    generation: Some(*seq),
                    status: FileStatus::Available,
                    other_names: history.prior_names(local),
                    current_size: Some(entry.size),
                    recorded_size: Some(record.size),
                });
            } else {
                unseen.push((entry, local));
            }
        }

        let gone: Vec<(u32, &FileRecord)> = expected
            .into_values()
            .filter(|(_, record)| {
                let full = utils::concat_relative(dir, &record.path);
                !snapshot.has_file(&full)
                    && !rules.is_ignored(&full, false)
                    && tree.owner_of(utils::parent_dir(&full)) == Some(dir)
            })
            .collect();
        let missing: Vec<&FileRecord> = gone.iter().map(|(_, record)| *record).collect();

        let renames = self.correlate(snapshot, &unseen, &missing)?;
        for (idx, (entry, _)) in unseen.iter().enumerate() {
            match renames.iter().find(|(new_idx, _)| *new_idx == idx) {
                Some((_, old)) => {
                    let mut other_names = vec![old.path.clone()];
                    other_names.extend(history.prior_names(&old.path));
                    let seq = gone.iter().find(|(_, record)| record.path == old.path).map(|(seq, _)| *seq);
                    records.push(DiffRecord {
                        path: snapshot.absolute(&entry.path),
                        generation: seq,
                        status: FileStatus::Renamed,
                        other_names,
                        current_size: Some(entry.size),
                        recorded_size: Some(old.size),
                    });
                }
                None => records.push(DiffRecord {
                    path: snapshot.absolute(&entry.path),
                    generation: None,
                    status: FileStatus::New,
                    other_names: Vec::new(),
                    current_size: Some(entry.size),
                    recorded_size: None,
                }),
            }
        }

        for (seq, old) in &gone {
            if renames.iter().any(|(_, renamed)| renamed.path == old.path) {
                continue;
            }
            records.push(DiffRecord {
                path: tree.absolute(&utils::concat_relative(dir, &old.path)),
                generation: Some(*seq),
                status: FileStatus::Missing,
                other_names: history.prior_names(&old.path),
                current_size: None,
                recorded_size: Some(old.size),
            });
        }

        self.diff_directories(tree, dir, latest, snapshot, rules, records);
        Ok(())
    }

    fn diff_directories(
        &self,
        tree: &HistoryTree,
        dir: &str,
        latest: Option<&Generation>,
        snapshot: &Snapshot,
        rules: &IgnoreRules,
        records: &mut Vec<DiffRecord>,
    ) {
        let sequence = latest.map(|g| g.sequence);
        let recorded: BTreeSet<&str> = latest
            .map(|g| g.directories.iter().map(|d| d.path.as_str()).collect())
            .unwrap_or_default();

        for entry in snapshot.directories() {
            if let Some(child) = tree.get(&entry.path) {
                if tree.parent_of(&entry.path) == Some(dir) {
                    records.push(DiffRecord {
                        path: snapshot.absolute(&entry.path),
                        generation: child.latest().map(|g| g.sequence),
                        status: FileStatus::Available,
                        other_names: Vec::new(),
                        current_size: Some(0),
                        recorded_size: None,
                    });
                }
                continue;
            }
            if tree.owner_of(&entry.path) != Some(dir) {
                continue;
            }
            let Some(local) = utils::strip_dir_prefix(&entry.path, dir) else {
                continue;
            };
            let known = recorded.contains(local);
            records.push(DiffRecord {
                path: snapshot.absolute(&entry.path),
                generation: if known { sequence } else { None },
                status: if known { FileStatus::Available } else { FileStatus::New },
                other_names: Vec::new(),
                current_size: Some(0),
                recorded_size: None,
            });
        }

        for local in recorded {
            let full = utils::concat_relative(dir, local);
            if snapshot.get(&full).is_none() && !rules.is_ignored(&full, true) {
                records.push(DiffRecord {
                    path: tree.absolute(&full),
                    generation: sequence,
                    status: FileStatus::Missing,
                    other_names: Vec::new(),
                    current_size: None,
                    recorded_size: None,
                });
            }
        }
    }

    /// Unique content matches between unseen and missing files
    ///
    /// Only unseen files with the size of some missing file are hashed.
    fn correlate<'r>(
        &self,
        snapshot: &Snapshot,
        unseen: &[(&SnapshotEntry, &str)],
        missing: &[&'r FileRecord],
    ) -> Result<Vec<(usize, &'r FileRecord)>> {
        let mut pairs: Vec<(usize, &'r FileRecord)> = Vec::new();
        for (idx, (entry, _)) in unseen.iter().enumerate() {
            let candidates: Vec<&'r FileRecord> = missing
                .iter()
                .copied()
                .filter(|old| old.size == entry.size)
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let formats: Vec<HashFormat> = candidates
                .iter()
                .flat_map(|old| old.hashes.iter().map(|h| h.format.clone()))
                .filter(|format| self.registry.supports(format))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if formats.is_empty() {
                continue;
            }
            let digests = self
                .registry
                .hash_file_multi(&snapshot.absolute(&entry.path), &formats)?;

            for old in candidates {
                let matches = old.hashes.iter().any(|h| {
                    digests
                        .iter()
                        .any(|(format, digest)| format == &h.format && digest == &h.digest)
                });
                if matches {
                    pairs.push((idx, old));
                }
            }
        }

        Ok(pairs
            .iter()
            .filter(|(idx, old)| {
                pairs.iter().filter(|(i, _)| i == idx).count() == 1
                    && pairs.iter().filter(|(_, o)| o.path == old.path).count() == 1
            })
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_tracking::FileTracker;
    use crate::types::{CreatorInfo, HashAction, HashEntry};
    use chrono::Utc;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn record(registry: &HashRegistry, path: &str, content: &str) -> FileRecord {
        let format = HashFormat::new("xxh64");
        let digest = registry.hash_bytes(&format, content.as_bytes()).unwrap();
        FileRecord::hashed(
            path,
            content.len() as u64,
            vec![HashEntry::new(format, digest, HashAction::Original)],
        )
    }

    fn tree_with(root: &Path, files: Vec<FileRecord>, directories: Vec<&str>) -> HistoryTree {
        let mut history = History::new(root);
        let mut generation = Generation::new(1, Utc::now(), CreatorInfo::current());
        generation.files = files;
        generation.directories = directories.into_iter().map(crate::types::DirectoryRecord::new).collect();
        generation.canonicalize();
        let entry = history.chain().next_entry("0001.json", HashFormat::new("sha256"), "00");
        history.append(generation, entry).unwrap();
        let mut tree = HistoryTree::new(root);
        tree.insert("", history);
        tree
    }

    fn run(root: &Path, tree: &HistoryTree) -> DiffReport {
        let registry = HashRegistry::with_defaults();
        let rules = IgnoreRules::new(root, [".DS_Store", "*.tmp"]).unwrap();
        let snapshot = FileTracker::new(root, rules.clone()).scan().unwrap();
        DiffEngine::new(&registry).diff(tree, &snapshot, &rules, Vec::new()).unwrap()
    }

    #[test]
    fn test_classification() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let registry = HashRegistry::with_defaults();
        fs::create_dir_all(root.join("A")).unwrap();
        fs::write(root.join("A/A1.txt"), "A1\n").unwrap();
        fs::write(root.join("new.txt"), "fresh").unwrap();
        fs::write(root.join("scratch.tmp"), "x").unwrap();

        let tree = tree_with(
            root,
            vec![record(&registry, "A/A1.txt", "A1\n"), record(&registry, "gone.txt", "old content")],
            vec!["A", "removed"],
        );
        let report = run(root, &tree);

        let a1 = report.get(&root.join("A/A1.txt")).unwrap();
        assert_eq!(a1.status, FileStatus::Available);
        assert_eq!(a1.generation, Some(1));
        assert_eq!(report.get(&root.join("new.txt")).unwrap().status, FileStatus::New);
        assert_eq!(report.get(&root.join("scratch.tmp")).unwrap().status, FileStatus::Ignored);
        assert_eq!(report.get(&root.join("gone.txt")).unwrap().status, FileStatus::Missing);
        assert_eq!(report.get(&root.join("A")).unwrap().status, FileStatus::Available);
        assert_eq!(report.get(&root.join("removed")).unwrap().status, FileStatus::Missing);
        assert_eq!(report.count(FileStatus::Missing), 2);
        assert!(report.check().is_ok());

        let paths: Vec<_> = report.records.iter().map(|r| r.path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn test_unique_rename() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let registry = HashRegistry::with_defaults();
        fs::write(root.join("b.txt"), "A1\n").unwrap();

        let tree = tree_with(root, vec![record(&registry, "a.txt", "A1\n")], vec![]);
        let report = run(root, &tree);

        let renamed = report.get(&root.join("b.txt")).unwrap();
        assert_eq!(renamed.status, FileStatus::Renamed);
        assert_eq!(renamed.other_names, vec!["a.txt".to_string()]);
        assert!(report.get(&root.join("a.txt")).is_none());
        assert_eq!(
            renamed.to_row(),
            format!("{} | 1 | Renamed | a.txt | 3.00 B | 3.00 B", root.join("b.txt").display())
        );
    }

    #[test]
    fn test_ambiguous_rename_is_not_guessed() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let registry = HashRegistry::with_defaults();
        fs::write(root.join("c.txt"), "A1\n").unwrap();

        let tree = tree_with(
            root,
            vec![record(&registry, "a.txt", "A1\n"), record(&registry, "b.txt", "A1\n")],
            vec![],
        );
        let report = run(root, &tree);

        assert_eq!(report.get(&root.join("c.txt")).unwrap().status, FileStatus::New);
        assert_eq!(report.count(FileStatus::Missing), 2);
        assert_eq!(
            report.get(&root.join("a.txt")).unwrap().to_line(),
            format!("Missing: {}", root.join("a.txt").display())
        );
    }

    #[test]
    fn test_missing_spans_generations() {
        use crate::builder::CreateOptions;
        use crate::fixity::FixityBuilder;

        let temp_dir = TempDir::new().unwrap();
        let root = &temp_dir.path().canonicalize().unwrap();
        fs::write(root.join("a.txt"), "A1\n").unwrap();
        fs::write(root.join("b.txt"), "B1\n").unwrap();
        let fixity = FixityBuilder::new().build().unwrap();

        fixity.create(root, CreateOptions::default()).unwrap();
        fs::remove_file(root.join("a.txt")).unwrap();
        fixity.create(root, CreateOptions::default()).unwrap();
        fixity.create(root, CreateOptions::default()).unwrap();

        let report = fixity.diff(root).unwrap();
        let gone = report.get(&root.join("a.txt")).unwrap();
        assert_eq!(gone.status, FileStatus::Missing);
        assert_eq!(gone.generation, Some(1));
        assert_eq!(gone.recorded_size, Some(3));
        assert_eq!(report.get(&root.join("b.txt")).unwrap().generation, Some(3));

        fs::write(root.join("a.txt"), "A1\n").unwrap();
        let report = fixity.diff(root).unwrap();
        let back = report.get(&root.join("a.txt")).unwrap();
        assert_eq!(back.status, FileStatus::Available);
        assert_eq!(back.generation, Some(1));
        assert_eq!(report.count(FileStatus::Missing), 0);
    }

    #[test]
    fn test_blocking_inconsistency() {
        let report = DiffReport {
            root: PathBuf::from("/r"),
            records: Vec::new(),
            inconsistencies: vec![Inconsistency::ChildMissing {
                parent: PathBuf::from("/r"),
                child: PathBuf::from("/r/A"),
            }],
        };
        assert_eq!(report.check().unwrap_err().exit_code(), 34);
    }
}
