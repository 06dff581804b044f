//! Integration tests for fixity
//!
//! Tests nested histories, bottom-up propagation, renames and the
//! multi-format verification cycle through the public API.

use ::fixity::*;
use chrono::{TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Test harness with a canonical root and a configured handle
pub struct FixityTestHarness {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub fixity: Fixity,
}

impl FixityTestHarness {
    /// Create a new harness over an empty directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let fixity = FixityBuilder::new().parallel_workers(2).build().unwrap();
        Self { temp_dir, root, fixity }
    }

    /// Create the fixture tree used by the nested scenarios
    ///
    /// ```text
    /// Stuff.txt
    /// A/AA/AA1.txt
    /// B/B1.txt
    /// ```
    pub fn with_nested_fixture() -> Self {
        let harness = Self::new();
        harness.write("Stuff.txt", "stuff\n");
        harness.write("A/AA/AA1.txt", "AA1\n");
        harness.write("B/B1.txt", "B1\n");
        harness
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn append(&self, rel: &str, content: &str) {
        let mut existing = fs::read_to_string(self.path(rel)).unwrap();
        existing.push_str(content);
        fs::write(self.path(rel), existing).unwrap();
    }

    pub fn create(&self, rel: &str, formats: &[&str]) -> CreateReport {
        self.try_create(rel, formats).unwrap()
    }

    pub fn try_create(&self, rel: &str, formats: &[&str]) -> Result<CreateReport> {
        let options = CreateOptions {
            formats: formats.iter().map(HashFormat::new).collect(),
            ..Default::default()
        };
        self.fixity.create(&self.path(rel), options)
    }

    pub fn history(&self, rel: &str) -> History {
        HistoryStore::new(self.path(rel))
            .load(self.fixity.registry(), &JsonRecordCodec)
            .unwrap()
    }

    /// Number of record files across every store below the root
    pub fn record_count(&self) -> usize {
        walkdir_records(&self.root)
    }
}

impl Default for FixityTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn walkdir_records(root: &Path) -> usize {
    let mut count = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.parent().and_then(Path::file_name).is_some_and(|n| n == ".fixity")
                && path.file_name().is_some_and(|n| n != "chain.json")
            {
                count += 1;
            }
        }
    }
    count
}

fn action(history: &History, sequence: u32, path: &str, format: &str) -> (String, HashAction) {
    let entry = history
        .generation(sequence)
        .unwrap()
        .file(path)
        .unwrap()
        .entry(&HashFormat::new(format))
        .unwrap();
    (entry.digest.clone(), entry.action)
}

#[test]
fn test_verification_cycle_fixture() {
    let harness = FixityTestHarness::new();
    harness.write("Stuff.txt", "stuff\n");

    harness.create("", &["xxh64"]);
    harness.create("", &["xxh64"]);
    harness.append("Stuff.txt", "!!");
    let report = harness.create("", &["xxh64"]);
    assert_eq!(report.levels[0].failures, vec!["Stuff.txt".to_string()]);

    let history = harness.history("");
    assert_eq!(
        action(&history, 1, "Stuff.txt", "xxh64"),
        ("94c399c2a9a21f9a".to_string(), HashAction::Original)
    );
    assert_eq!(
        action(&history, 2, "Stuff.txt", "xxh64"),
        ("94c399c2a9a21f9a".to_string(), HashAction::Verified)
    );
    assert_eq!(
        action(&history, 3, "Stuff.txt", "xxh64"),
        ("2346e97eb08788cc".to_string(), HashAction::Failed)
    );
}

#[test]
fn test_idempotent_create() {
    let harness = FixityTestHarness::with_nested_fixture();
    harness.create("", &["xxh64", "md5"]);
    let report = harness.create("", &["xxh64", "md5"]);

    let level = report.level(&harness.root).unwrap();
    assert_eq!(level.sequence, 2);
    assert_eq!(level.original, 0);
    assert_eq!(level.verified, 3);

    let history = harness.history("");
    let first = history.generation(1).unwrap();
    let second = history.generation(2).unwrap();
    for record in second.tracked_files() {
        assert!(record.hashes.iter().all(|h| h.action == HashAction::Verified));
        let before = first.file(&record.path).unwrap();
        for hash in &record.hashes {
            assert_eq!(before.digest(&hash.format), Some(hash.digest.as_str()));
        }
    }
}

#[test]
fn test_tampered_file_with_new_format() {
    let harness = FixityTestHarness::new();
    harness.write("Stuff.txt", "stuff\n");
    harness.create("", &["xxh64"]);
    harness.append("Stuff.txt", "!!");
    harness.create("", &["md5"]);

    let history = harness.history("");
    assert_eq!(action(&history, 2, "Stuff.txt", "xxh64").1, HashAction::Failed);
    assert_eq!(action(&history, 2, "Stuff.txt", "md5").1, HashAction::Original);
}

#[test]
fn test_nested_propagation() {
    let harness = FixityTestHarness::with_nested_fixture();
    harness.create("A/AA", &["xxh64"]);
    harness.create("B", &["xxh64"]);
    let first = harness.create("", &["xxh64"]);
    assert_eq!(first.levels.len(), 1);
    assert_eq!(first.unchanged.len(), 2);

    // Nested files are owned by the nested histories only
    let root = harness.history("");
    let root_first = root.latest().unwrap();
    assert!(root_first.file("A/AA/AA1.txt").is_none());
    assert!(root_first.file("Stuff.txt").is_some());
    assert_eq!(root_first.children.len(), 2);

    harness.append("A/AA/AA1.txt", "changed");
    let report = harness.create("", &["xxh64"]);
    info!("Nested create wrote {} level(s)", report.levels.len());

    let written: Vec<&Path> = report.levels.iter().map(|l| l.path.as_path()).collect();
    assert_eq!(written, vec![harness.path("A/AA").as_path(), harness.root.as_path()]);
    assert_eq!(harness.history("A/AA").len(), 2);
    assert_eq!(harness.history("B").len(), 1);

    let root = harness.history("");
    assert_eq!(root.len(), 2);
    let latest = root.latest().unwrap();
    assert_eq!(latest.child("A/AA").unwrap().sequence, 2);
    assert_eq!(latest.child("B").unwrap().sequence, 1);
    assert_eq!(latest.child("B"), root_first_child(&harness, "B").as_ref());
}

fn root_first_child(harness: &FixityTestHarness, path: &str) -> Option<ChildReference> {
    harness.history("").generation(1).and_then(|g| g.child(path).cloned())
}

#[test]
fn test_nested_history_requires_new_root() {
    let harness = FixityTestHarness::with_nested_fixture();
    harness.create("", &["xxh64"]);

    let err = harness.try_create("B", &["xxh64"]).unwrap_err();
    assert!(matches!(err, FixityError::NestedHistory { .. }));

    let options = CreateOptions {
        new_root: true,
        ..Default::default()
    };
    harness.fixity.create(&harness.path("B"), options).unwrap();

    // The root now references B instead of tracking B1.txt, without reporting it missing
    let report = harness.create("", &["xxh64"]);
    let level = report.level(&harness.root).unwrap();
    assert!(level.missing.is_empty());
    let latest = harness.history("");
    assert!(latest.latest().unwrap().child("B").is_some());
    assert!(latest.latest().unwrap().file("B/B1.txt").is_none());
}

#[test]
fn test_rename_then_diff() {
    let harness = FixityTestHarness::new();
    harness.write("Stuff.txt", "stuff\n");
    harness.create("", &["xxh64"]);

    fs::rename(harness.path("Stuff.txt"), harness.path("Renamed.txt")).unwrap();
    let diff = harness.fixity.diff(&harness.root).unwrap();
    let renamed = diff.get(&harness.path("Renamed.txt")).unwrap();
    assert_eq!(renamed.status, FileStatus::Renamed);
    assert_eq!(renamed.other_names, vec!["Stuff.txt".to_string()]);
    assert!(diff.get(&harness.path("Stuff.txt")).is_none());

    // Create without rename detection records nothing special ...
    let report = harness.create("", &["xxh64"]);
    assert_eq!(report.levels[0].original, 1);
    assert!(report.levels[0].renamed.is_empty());

    // ... but later reports still correlate the names
    let diff = harness.fixity.diff(&harness.root).unwrap();
    let available = diff.get(&harness.path("Renamed.txt")).unwrap();
    assert_eq!(available.status, FileStatus::Available);
    assert_eq!(available.other_names, vec!["Stuff.txt".to_string()]);
    assert_eq!(diff.count(FileStatus::Missing), 0);
}

#[test]
fn test_detect_renaming_records_previous_path() {
    let harness = FixityTestHarness::new();
    harness.write("A1.txt", "A1\n");
    harness.create("", &["xxh64"]);

    fs::rename(harness.path("A1.txt"), harness.path("_A1.txt")).unwrap();
    let options = CreateOptions {
        formats: vec![HashFormat::new("xxh128")],
        detect_renaming: true,
        ..Default::default()
    };
    let report = harness.fixity.create(&harness.root, options).unwrap();
    assert_eq!(
        report.levels[0].renamed,
        vec![("A1.txt".to_string(), "_A1.txt".to_string())]
    );

    let history = harness.history("");
    let record = history.latest().unwrap().file("_A1.txt").unwrap();
    assert_eq!(record.previous_path.as_deref(), Some("A1.txt"));
    // Formats hashed only to match the missing file are not stored
    assert!(record.entry(&HashFormat::new("xxh64")).is_none());

    // Correlated by content in the shared format, without rename detection
    fs::rename(harness.path("_A1.txt"), harness.path("__A1.txt")).unwrap();
    harness.create("", &["xxh128"]);
    let info = harness.fixity.file_info(&harness.path("__A1.txt")).unwrap();
    let names: Vec<&str> = info.blocks.iter().map(|b| b.path.as_str()).collect();
    assert_eq!(names, vec!["A1.txt", "_A1.txt", "__A1.txt"]);
}

#[test]
fn test_ignore_patterns_are_persisted() {
    let harness = FixityTestHarness::new();
    harness.write("keep.txt", "keep");
    harness.write("scratch.tmp", "tmp");
    harness.write("build/out.bin", "bin");

    let options = CreateOptions {
        formats: vec![HashFormat::new("xxh64")],
        ignore_patterns: vec!["*.tmp".to_string(), "build/".to_string()],
        ..Default::default()
    };
    harness.fixity.create(&harness.root, options).unwrap();

    let history = harness.history("");
    let latest = history.latest().unwrap();
    assert_eq!(latest.ignore_patterns, vec![".DS_Store", "*.tmp", "build/"]);
    assert!(latest.file("scratch.tmp").unwrap().ignored);
    assert!(latest.file("build/out.bin").is_none());

    let diff = harness.fixity.diff(&harness.root).unwrap();
    let ignored = diff.get(&harness.path("scratch.tmp")).unwrap();
    assert_eq!(ignored.status, FileStatus::Ignored);
    assert_eq!(ignored.generation, None);
    assert_eq!(ignored.recorded_size, None);
    assert!(diff.get(&harness.path("build")).is_none());
}

/// Create at the root with `B/` excluded by an ignore pattern
pub fn create_ignoring_b(harness: &FixityTestHarness) -> Result<CreateReport> {
    let options = CreateOptions {
        formats: vec![HashFormat::new("xxh64")],
        ignore_patterns: vec!["B/".to_string()],
        ..Default::default()
    };
    harness.fixity.create(&harness.root, options)
}

#[test]
fn test_ignored_nested_history_is_dropped() {
    let harness = FixityTestHarness::with_nested_fixture();
    harness.create("B", &["xxh64"]);
    harness.create("", &["xxh64"]);
    assert!(harness.history("").latest().unwrap().child("B").is_some());

    let report = create_ignoring_b(&harness).unwrap();
    assert_eq!(
        report.inconsistencies,
        vec![Inconsistency::ChildExcluded {
            parent: harness.root.clone(),
            child: harness.path("B"),
        }]
    );
    assert!(harness.history("").latest().unwrap().child("B").is_none());
    assert_eq!(harness.history("B").len(), 1);

    let check = harness.fixity.check(&harness.root).unwrap();
    assert!(check.inconsistencies.is_empty());
    assert!(harness.fixity.diff(&harness.root).unwrap().check().is_ok());
}

#[test]
fn test_fixed_timestamp_and_comment() {
    let harness = FixityTestHarness::new();
    harness.write("Stuff.txt", "stuff\n");
    let options = CreateOptions {
        formats: vec![HashFormat::new("xxh64")],
        timestamp: Some(Utc.with_ymd_and_hms(2020, 1, 15, 13, 0, 0).unwrap()),
        comment: Some("ingest".to_string()),
        ..Default::default()
    };
    let report = harness.fixity.create(&harness.root, options).unwrap();
    let token = generation::directory_token(&harness.root);
    assert_eq!(report.levels[0].record, format!("0001_{}_2020-01-15_130000Z.json", token));

    let info = harness.fixity.file_info(&harness.path("Stuff.txt")).unwrap();
    let lines = info.render(true);
    assert_eq!(
        lines[2],
        "  Generation 1 (2020-01-15T13:00:00+00:00) xxh64: 94c399c2a9a21f9a (original)"
    );
    assert!(lines[4].contains("comment: ingest"));
}

#[test]
fn test_tree_info_lists_children() {
    let harness = FixityTestHarness::with_nested_fixture();
    harness.create("A/AA", &["xxh64"]);
    harness.create("", &["xxh64"]);

    let lines = harness.fixity.info(&harness.root).unwrap().render(false);
    assert_eq!(lines[0], format!("Info with history at path: {}", harness.root.display()));
    assert!(lines.contains(&format!("Child History at {}:", harness.path("A/AA").display())));

    let check = harness.fixity.check(&harness.root).unwrap();
    assert_eq!(check.histories.len(), 2);
    assert!(check.inconsistencies.is_empty());
}

#[test]
fn test_progress_callback_counts_every_file() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let harness = FixityTestHarness::with_nested_fixture();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let options = CreateOptions {
        formats: vec![HashFormat::new("sha256")],
        progress: Some(Arc::new(move |progress: CreateProgress| {
            assert!(progress.hashed <= progress.total);
            counter.fetch_add(1, Ordering::SeqCst);
        })),
        ..Default::default()
    };
    let report = harness.fixity.create(&harness.root, options).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(report.files_hashed, 3);
}
