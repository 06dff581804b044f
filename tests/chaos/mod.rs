//! Chaos tests for fixity
//!
//! Tampers with persisted stores in every way the chain is meant to detect
//! and checks that each operation fails with the matching error class,
//! without writing anything.

use crate::integration::FixityTestHarness;
use ::fixity::*;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Tampering applied to a store before the next operation
#[derive(Debug, Clone, Copy)]
pub enum Tamper {
    DeleteChain,
    CorruptChain,
    DeleteRecord,
    AlterRecord,
    DeleteStore,
}

impl Tamper {
    /// Exit code every operation must fail with
    pub fn expected_exit_code(self) -> i32 {
        match self {
            Tamper::DeleteChain | Tamper::CorruptChain => 32,
            Tamper::DeleteRecord => 33,
            Tamper::AlterRecord => 31,
            Tamper::DeleteStore => 30,
        }
    }

    /// Apply to the store of history directory `dir`
    pub fn apply(self, dir: &std::path::Path) {
        let store = HistoryStore::new(dir);
        let first_record = || -> PathBuf {
            let name = store.record_files().unwrap().into_iter().next().unwrap();
            store.record_path(&name)
        };
        warn!("Applying {:?} to {:?}", self, dir);
        match self {
            Tamper::DeleteChain => fs::remove_file(store.chain_path()).unwrap(),
            Tamper::CorruptChain => fs::write(store.chain_path(), "{ not json").unwrap(),
            Tamper::DeleteRecord => fs::remove_file(first_record()).unwrap(),
            Tamper::AlterRecord => {
                let path = first_record();
                let mut bytes = fs::read(&path).unwrap();
                bytes.extend_from_slice(b" ");
                fs::write(&path, bytes).unwrap();
            }
            Tamper::DeleteStore => fs::remove_dir_all(store.store_dir()).unwrap(),
        }
    }
}

/// Nested fixture with histories at `A/AA`, `B` and the root
fn nested() -> FixityTestHarness {
    let harness = FixityTestHarness::with_nested_fixture();
    harness.create("A/AA", &["xxh64"]);
    harness.create("B", &["xxh64"]);
    harness.create("", &["xxh64"]);
    harness
}

fn assert_create_aborts(tamper: Tamper, target: &str) {
    let harness = nested();
    harness.append("Stuff.txt", "changed");
    harness.append("A/AA/AA1.txt", "changed");
    tamper.apply(&harness.path(target));
    let before = harness.record_count();

    let err = harness.try_create("", &["xxh64"]).unwrap_err();
    assert_eq!(err.exit_code(), tamper.expected_exit_code(), "{:?} on {:?}: {}", tamper, target, err);
    assert_eq!(harness.record_count(), before, "{:?} must not write any record", tamper);
}

#[test]
fn test_missing_nested_chain_aborts_create() {
    assert_create_aborts(Tamper::DeleteChain, "B");
}

#[test]
fn test_corrupt_nested_chain_aborts_create() {
    assert_create_aborts(Tamper::CorruptChain, "A/AA");
}

#[test]
fn test_missing_nested_record_aborts_create() {
    assert_create_aborts(Tamper::DeleteRecord, "A/AA");
}

#[test]
fn test_altered_root_record_aborts_create() {
    assert_create_aborts(Tamper::AlterRecord, "");
}

#[test]
fn test_removed_nested_store_aborts_create() {
    assert_create_aborts(Tamper::DeleteStore, "B");
}

#[test]
fn test_altered_ignored_nested_record_aborts_create() {
    let harness = nested();
    Tamper::AlterRecord.apply(&harness.path("B"));
    let before = harness.record_count();

    let err = crate::integration::create_ignoring_b(&harness).unwrap_err();
    assert_eq!(err.exit_code(), 31);
    assert_eq!(harness.record_count(), before);
}

#[test]
fn test_read_operations_report_tampering() {
    for tamper in [Tamper::DeleteChain, Tamper::DeleteRecord, Tamper::AlterRecord, Tamper::DeleteStore] {
        let harness = nested();
        tamper.apply(&harness.path("B"));

        let expected = tamper.expected_exit_code();
        assert_eq!(harness.fixity.diff(&harness.root).unwrap_err().exit_code(), expected);
        assert_eq!(harness.fixity.info(&harness.root).unwrap_err().exit_code(), expected);
        assert_eq!(harness.fixity.check(&harness.root).unwrap_err().exit_code(), expected);
    }
}

#[test]
fn test_altered_chain_link_is_broken() {
    let harness = nested();
    harness.create("", &["xxh64"]);

    let store = HistoryStore::new(&harness.root);
    let mut chain: Chain = serde_json::from_slice(&fs::read(store.chain_path()).unwrap()).unwrap();
    chain.entries[0].record_hash = "0".repeat(64);
    fs::write(store.chain_path(), chain.to_bytes().unwrap()).unwrap();

    let err = harness.fixity.check(&harness.root).unwrap_err();
    assert!(matches!(err, FixityError::Integrity(IntegrityError::ChainBroken { sequence: 2, .. })));
    assert_eq!(err.exit_code(), 32);
}

#[test]
fn test_info_without_history() {
    let harness = FixityTestHarness::new();
    let err = harness.fixity.info(&harness.root).unwrap_err();
    assert_eq!(err.exit_code(), 30);
}

#[test]
fn test_moved_child_history() {
    let harness = nested();
    fs::rename(harness.path("A"), harness.path("_A")).unwrap();

    // Diff still reports what it can, then refuses to reconcile
    let diff = harness.fixity.diff(&harness.root).unwrap();
    assert_eq!(
        diff.get(&harness.path("Stuff.txt")).unwrap().status,
        FileStatus::Available
    );
    assert!(diff.blocking().is_some());
    assert_eq!(diff.check().unwrap_err().exit_code(), 34);

    // Create drops the stale reference and picks up the moved history
    let report = harness.create("", &["xxh64"]);
    assert_eq!(report.inconsistencies.len(), 1);
    let root = harness.history("");
    let latest = root.latest().unwrap();
    assert!(latest.child("A/AA").is_none());
    assert!(latest.child("_A/AA").is_some());
    assert!(harness.fixity.diff(&harness.root).unwrap().check().is_ok());
}

#[test]
fn test_child_updated_independently() {
    let harness = nested();
    harness.append("B/B1.txt", "changed");
    harness.create("B", &["xxh64"]);

    let check = harness.fixity.check(&harness.root).unwrap();
    assert_eq!(check.inconsistencies.len(), 1);
    assert!(!check.inconsistencies[0].is_blocking());

    let diff = harness.fixity.diff(&harness.root).unwrap();
    assert!(diff.check().is_ok());
}
