//! Property-based testing for fixity
//!
//! Uses proptest to verify record and chain invariants across randomly
//! generated generations and file trees.

use ::fixity::*;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Generate relative file paths
fn path_strategy() -> impl Strategy<Value = String> {
    (
        prop::collection::vec("[a-z]{1,6}", 0..=2),
        prop_oneof!["[a-z]{1,8}\\.(txt|mov|wav)", "file[0-9]{1,3}"],
    )
        .prop_map(|(dirs, name)| {
            let mut parts = dirs;
            parts.push(name);
            parts.join("/")
        })
}

fn action_strategy() -> impl Strategy<Value = HashAction> {
    prop_oneof![
        Just(HashAction::Original),
        Just(HashAction::Verified),
        Just(HashAction::Failed),
        Just(HashAction::New),
    ]
}

fn file_record_strategy() -> impl Strategy<Value = FileRecord> {
    (
        path_strategy(),
        any::<u32>(),
        prop::collection::btree_map(
            prop_oneof![Just("xxh64"), Just("md5"), Just("sha1")],
            ("[0-9a-f]{16}", action_strategy()),
            0..=3,
        ),
        any::<bool>(),
        prop::option::of(path_strategy()),
    )
        .prop_map(|(path, size, hashes, ignored, previous)| {
            if ignored {
                FileRecord::ignored(path, size as u64)
            } else {
                let entries = hashes
                    .into_iter()
                    .map(|(format, (digest, action))| HashEntry::new(HashFormat::new(format), digest, action))
                    .collect();
                let mut record = FileRecord::hashed(path, size as u64, entries);
                record.previous_path = previous;
                record
            }
        })
}

fn generation_strategy() -> impl Strategy<Value = Generation> {
    (
        1u32..1000,
        0i64..2_000_000_000,
        prop::collection::vec(file_record_strategy(), 0..12),
        prop::collection::vec("[a-z]{1,6}", 0..4),
        prop::collection::vec("[*.a-z]{1,6}", 0..3),
        prop::option::of("[a-zA-Z ]{1,20}"),
    )
        .prop_map(|(sequence, seconds, files, directories, patterns, comment)| {
            let created = Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now);
            let mut creator = CreatorInfo::current();
            creator.comment = comment;
            let mut generation = Generation::new(sequence, created, creator);
            // One record per path
            let unique: BTreeMap<String, FileRecord> =
                files.into_iter().map(|record| (record.path.clone(), record)).collect();
            generation.files = unique.into_values().collect();
            generation.directories = directories.into_iter().map(DirectoryRecord::new).collect();
            generation.ignore_patterns = patterns;
            generation
        })
}

/// File trees: relative path to content
fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), prop::collection::vec(any::<u8>(), 0..256), 1..8)
}

fn write_tree(root: &Path, tree: &BTreeMap<String, Vec<u8>>) -> bool {
    for (path, content) in tree {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            if fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        // A generated file name may collide with a generated directory
        if fs::write(&full, content).is_err() {
            return false;
        }
    }
    true
}

proptest! {
    #[test]
    fn prop_codec_round_trip(generation in generation_strategy()) {
        let codec = JsonRecordCodec;
        let mut expected = generation.clone();
        expected.canonicalize();

        let bytes = codec.encode(&generation).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &expected);
        prop_assert!(decoded.is_canonical());
        // Canonical: encoding the decoded value reproduces the bytes
        prop_assert_eq!(codec.encode(&decoded).unwrap(), bytes);
    }

    #[test]
    fn prop_chain_sequences_are_contiguous(hashes in prop::collection::vec("[0-9a-f]{64}", 1..20)) {
        let mut chain = Chain::new();
        for (idx, hash) in hashes.iter().enumerate() {
            let entry = chain.next_entry(format!("{:04}.json", idx + 1), HashFormat::new("sha256"), hash.clone());
            chain.push(entry).unwrap();
        }
        let sequences: Vec<u32> = chain.entries.iter().map(|e| e.sequence).collect();
        let expected: Vec<u32> = (1..=hashes.len() as u32).collect();
        prop_assert_eq!(sequences, expected);
        prop_assert!(chain.verify_links(Path::new("chain.json")).is_ok());
    }

    #[test]
    fn prop_chain_detects_any_edited_entry(
        hashes in prop::collection::vec("[0-9a-f]{64}", 2..12),
        victim in any::<prop::sample::Index>(),
    ) {
        let mut chain = Chain::new();
        for (idx, hash) in hashes.iter().enumerate() {
            let entry = chain.next_entry(format!("{:04}.json", idx + 1), HashFormat::new("sha256"), hash.clone());
            chain.push(entry).unwrap();
        }
        // Editing any entry but the last breaks the link of its successor
        let idx = victim.index(chain.len() - 1);
        chain.entries[idx].record = "forged.json".to_string();
        prop_assert!(chain.verify_links(Path::new("chain.json")).is_err());
    }

    #[test]
    fn prop_hash_format_is_normalized(name in "[a-zA-Z0-9]{1,10}") {
        let upper = HashFormat::new(format!("  {}  ", name.to_uppercase()));
        prop_assert_eq!(upper, HashFormat::new(name.to_lowercase()));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_fresh_history_verifies_and_repeats_verified(tree in tree_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        prop_assume!(write_tree(root, &tree));

        let fixity = FixityBuilder::new().parallel_workers(2).build().unwrap();
        fixity.create(root, CreateOptions::default()).unwrap();
        let report = fixity.create(root, CreateOptions::default()).unwrap();

        let level = &report.levels[0];
        prop_assert_eq!(level.original, 0);
        prop_assert_eq!(level.failed, 0);
        prop_assert_eq!(level.verified, tree.len());

        let check = fixity.check(root).unwrap();
        prop_assert_eq!(check.histories[0].1, 2);

        let diff = fixity.diff(root).unwrap();
        prop_assert_eq!(diff.changes().count(), 0);
    }

    #[test]
    fn prop_parallelism_does_not_change_records(tree in tree_strategy()) {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut records = Vec::new();
        for workers in [1, 4] {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path().join("card");
            fs::create_dir(&root).unwrap();
            prop_assume!(write_tree(&root, &tree));

            let mut creator = CreatorInfo::current();
            creator.host = "host".to_string();
            let registry = HashRegistry::with_defaults();
            let codec = JsonRecordCodec;
            let options = CreateOptions {
                formats: vec![HashFormat::new("xxh64"), HashFormat::new("md5")],
                timestamp: Some(timestamp),
                ..Default::default()
            };
            let report = GenerationBuilder::new(&registry, &codec)
                .with_creator(creator)
                .with_workers(workers)
                .create(&root, &options)
                .unwrap();
            let store = HistoryStore::new(&root);
            records.push(fs::read(store.record_path(&report.levels[0].record)).unwrap());
        }
        prop_assert_eq!(&records[0], &records[1]);
    }
}
