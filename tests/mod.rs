//! Main test module for fixity
//!
//! This module includes all test suites:
//! - Integration tests for nested histories and renames
//! - Chaos tests for tampered and removed stores
//! - Property-based tests for record and chain invariants

pub mod integration;
pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::fixity::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixity() -> Fixity {
        FixityBuilder::new().parallel_workers(2).build().unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let fixity = fixity();

        let report = fixity.create(temp_dir.path(), CreateOptions::default()).unwrap();
        assert_eq!(report.files_hashed, 0);
        assert_eq!(report.levels.len(), 1);

        let diff = fixity.diff(temp_dir.path()).unwrap();
        assert!(diff.records.is_empty());
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let names = [
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.multiple.dots.txt",
            "ファイル.txt",
            "emoji_🎉.txt",
        ];
        for name in names {
            fs::write(temp_dir.path().join(name), name).unwrap();
        }

        let fixity = fixity();
        fixity.create(temp_dir.path(), CreateOptions::default()).unwrap();
        let report = fixity.create(temp_dir.path(), CreateOptions::default()).unwrap();
        let level = &report.levels[0];
        assert_eq!(level.verified, names.len());
        assert_eq!(level.original, 0);
    }

    #[test]
    fn test_directory_with_spaces_names_records() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("Card 01");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("clip.mov"), "frames").unwrap();

        let report = fixity().create(&root, CreateOptions::default()).unwrap();
        assert!(report.levels[0].record.starts_with("0001_Card_01_"));
        assert!(report.levels[0].record.ends_with("Z.json"));
    }

    #[test]
    fn test_empty_files_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("empty.bin"), "").unwrap();
        fs::create_dir_all(root.join("nested/empty_dir")).unwrap();

        let fixity = fixity();
        fixity.create(root, CreateOptions::default()).unwrap();
        fs::remove_dir(root.join("nested/empty_dir")).unwrap();

        let diff = fixity.diff(root).unwrap();
        let canonical = root.canonicalize().unwrap();
        let removed = diff.get(&canonical.join("nested/empty_dir")).unwrap();
        assert_eq!(removed.status, FileStatus::Missing);
        assert_eq!(
            diff.get(&canonical.join("empty.bin")).unwrap().status,
            FileStatus::Available
        );
    }

    #[test]
    fn test_unknown_format_is_rejected_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();

        let options = CreateOptions {
            formats: vec![HashFormat::new("crc99")],
            ..Default::default()
        };
        let err = fixity().create(temp_dir.path(), options).unwrap_err();
        assert!(matches!(err, FixityError::UnknownHashFormat(_)));
        assert!(!temp_dir.path().join(".fixity").exists());
    }
}
