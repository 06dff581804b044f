//! Creation of new generations ("create")
//!
//! [`GenerationBuilder`] hashes the current state of a directory tree and
//! appends a generation to every history that needs one.
//!
//! ## Process
//!
//! 1. Load and verify the invocation root's history, then build the
//!    effective ignore rules from it
//! 2. Walk the tree and load/verify every nested history; any failure aborts
//!    before anything is written
//! 3. Hash files in parallel, each in the formats its owner needs
//! 4. Assemble generations bottom-up so parents see their children's new
//!    records, skipping nested histories without changes
//! 5. Publish all records and chains in one [`Transaction`]
//!
//! ## Actions
//!
//! Per file and format the action follows one state machine:
//!
//! | Before                              | Now                      | Action     |
//! |-------------------------------------|--------------------------|------------|
//! | path never recorded                 | any                      | `original` |
//! | recorded, never hashed (ignored)    | any                      | `new`      |
//! | trusted digest in this format       | equal                    | `verified` |
//! | trusted digest in this format       | different                | `failed`   |
//! | other formats only                  | all other formats verify | `verified` |
//! | other formats only                  | any other format failed  | `original` |
//!
//! A failed digest never becomes the new baseline; later runs keep comparing
//! against the last trusted one.

use crate::codec::RecordCodec;
use crate::error::{FixityError, Result};
use crate::file_tracking::{FileTracker, IgnoreRules, Snapshot, DEFAULT_IGNORE_PATTERNS};
use crate::generation::Generation;
use crate::hashing::{HashFormat, HashRegistry};
use crate::history::History;
use crate::storage::{HistoryStore, Transaction};
use crate::tree::{HistoryTree, Inconsistency};
use crate::types::{CreatorInfo, DirectoryRecord, FileRecord, HashAction, HashEntry};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Progress of the hashing phase
#[derive(Debug, Clone)]
pub struct CreateProgress {
    /// Files hashed so far
    pub hashed: usize,
    /// Files to hash in total
    pub total: usize,
    /// Path of the file just hashed, relative to the invocation root
    pub path: String,
}

/// Callback receiving hashing progress
pub type ProgressCallback = Arc<dyn Fn(CreateProgress) + Send + Sync>;

/// Options for one create run
///
/// # Examples
///
/// ```rust
/// use fixity::builder::CreateOptions;
/// use fixity::hashing::HashFormat;
///
/// let options = CreateOptions {
///     formats: vec![HashFormat::new("xxh64"), HashFormat::new("md5")],
///     ignore_patterns: vec!["*.tmp".to_string()],
///     detect_renaming: true,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Default)]
pub struct CreateOptions {
    /// Formats to hash in; empty means the configured defaults
    pub formats: Vec<HashFormat>,
    /// Extra ignore patterns (gitignore syntax)
    pub ignore_patterns: Vec<String>,
    /// File with further ignore patterns, one per line
    pub ignore_spec: Option<PathBuf>,
    /// Record `previous_path` for files that uniquely match a missing file
    pub detect_renaming: bool,
    /// Allow starting a history below a directory that already has one
    pub new_root: bool,
    /// Fixed creation time instead of the current time
    pub timestamp: Option<DateTime<Utc>>,
    /// Comment stored in the creator info of every new generation
    pub comment: Option<String>,
    /// Hashing progress callback
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for CreateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateOptions")
            .field("formats", &self.formats)
            .field("ignore_patterns", &self.ignore_patterns)
            .field("ignore_spec", &self.ignore_spec)
            .field("detect_renaming", &self.detect_renaming)
            .field("new_root", &self.new_root)
            .field("timestamp", &self.timestamp)
            .field("comment", &self.comment)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// What happened to one history during create
#[derive(Debug, Clone, Default)]
pub struct LevelReport {
    /// History directory
    pub path: PathBuf,
    /// Sequence number of the new generation
    pub sequence: u32,
    /// Record file name of the new generation
    pub record: String,
    /// Whether the history was started by this run
    pub new_history: bool,
    /// Files hashed for the first time
    pub original: usize,
    /// Files whose digests all matched
    pub verified: usize,
    /// Files with at least one failed digest
    pub failed: usize,
    /// Previously ignored files hashed for the first time
    pub new: usize,
    /// Ignored files
    pub ignored: usize,
    /// Paths (relative to the history) with a failed digest
    pub failures: Vec<String>,
    /// Paths (relative to the history) recorded before but absent now
    pub missing: Vec<String>,
    /// Detected renames as `(old, new)`
    pub renamed: Vec<(String, String)>,
}

/// Result of a create run
#[derive(Debug, Clone)]
pub struct CreateReport {
    /// Invocation root
    pub root: PathBuf,
    /// Histories that received a new generation, children first
    pub levels: Vec<LevelReport>,
    /// Nested histories left unchanged
    pub unchanged: Vec<PathBuf>,
    /// Reconciliation problems found (and resolved) along the way
    pub inconsistencies: Vec<Inconsistency>,
    /// Number of files hashed
    pub files_hashed: usize,
    /// Wall-clock duration
    pub duration: Duration,
}

impl CreateReport {
    /// Report for the history at `path`, if it was written
    pub fn level(&self, path: &Path) -> Option<&LevelReport> {
        self.levels.iter().find(|level| level.path == path)
    }

    /// Whether any file failed verification
    pub fn has_failures(&self) -> bool {
        self.levels.iter().any(|level| level.failed > 0)
    }
}

struct HashJob {
    path: String,
    formats: Vec<HashFormat>,
}

/// Digests computed this run, by path relative to the invocation root
type DigestMap = BTreeMap<String, BTreeMap<HashFormat, String>>;

/// Appends generations across a tree of histories
pub struct GenerationBuilder<'a> {
    registry: &'a HashRegistry,
    codec: &'a dyn RecordCodec,
    chain_format: HashFormat,
    creator: CreatorInfo,
    workers: usize,
}

impl<'a> GenerationBuilder<'a> {
    /// Create a builder with sha256 chain hashes and one worker per CPU
    pub fn new(registry: &'a HashRegistry, codec: &'a dyn RecordCodec) -> Self {
        Self {
            registry,
            codec,
            chain_format: HashFormat::new("sha256"),
            creator: CreatorInfo::current(),
            workers: num_cpus::get(),
        }
    }

    /// Algorithm used for chain record hashes
    pub fn with_chain_format(mut self, format: HashFormat) -> Self {
        self.chain_format = format;
        self
    }

    /// Creator info written into new generations
    pub fn with_creator(mut self, creator: CreatorInfo) -> Self {
        self.creator = creator;
        self
    }

    /// Number of hashing threads
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Hash `root` and append generations where due
    ///
    /// # Arguments
    ///
    /// * `root` - Absolute invocation directory
    /// * `options` - Formats, ignore rules and flags for this run
    ///
    /// # Errors
    ///
    /// - [`FixityError::NestedHistory`] if `root` has no history, an
    ///   ancestor has one and `new_root` is not set
    /// - any verification error of any history in the tree
    /// - I/O errors while hashing or writing
    ///
    /// On error nothing is written.
    pub fn create(&self, root: &Path, options: &CreateOptions) -> Result<CreateReport> {
        let start = Instant::now();
        if options.formats.is_empty() {
            return Err(FixityError::InvalidConfiguration("no hash format requested".to_string()));
        }
        self.registry.ensure_supported(&options.formats)?;
        self.registry.ensure_supported([&self.chain_format])?;

        let root_store = HistoryStore::new(root);
        let root_history = if root_store.exists() {
            root_store.load(self.registry, self.codec)?
        } else {
            if let Some(owner) = root.parent().and_then(HistoryStore::find_owner) {
                if !options.new_root {
                    return Err(FixityError::NestedHistory {
                        path: root.to_path_buf(),
                        owner,
                    });
                }
                info!("Starting a new history at {:?} below {:?}", root, owner);
            }
            History::new(root)
        };

        let rules = self.ignore_rules(root, &root_history, options)?;
        let snapshot = FileTracker::new(root, rules.clone()).scan()?;

        let mut tree = HistoryTree::new(root);
        tree.insert("", root_history);
        tree.load(&snapshot, self.registry, self.codec)?;
        let inconsistencies = tree.check_references()?;

        let missing = missing_files(&tree, &snapshot, &rules);
        let jobs = self.plan(&tree, &snapshot, &missing, options);
        let digests = self.hash_all(&snapshot, jobs, options)?;
        let files_hashed = digests.len();

        let created = options.timestamp.unwrap_or_else(Utc::now);
        let mut creator = self.creator.clone();
        if options.comment.is_some() {
            creator.comment = options.comment.clone();
        }

        let mut tx = Transaction::new();
        let mut levels = Vec::new();
        let mut unchanged = Vec::new();
        for dir in tree.bottom_up_order() {
            let history = tree
                .get(&dir)
                .ok_or_else(|| FixityError::internal(format!("history {:?} vanished from the tree", dir)))?;
            let (generation, mut level) = self.assemble(
                &tree,
                history,
                &dir,
                &snapshot,
                &digests,
                missing.get(&dir).map(Vec::as_slice).unwrap_or(&[]),
                &rules,
                options,
                created,
                creator.clone(),
            )?;

            if !dir.is_empty() && !is_due(history, &generation, &level) {
                debug!("History {:?} unchanged", history.path());
                unchanged.push(history.path().to_path_buf());
                continue;
            }

            let bytes = self.codec.encode(&generation)?;
            let name = generation.record_file_name(history.path(), self.codec.extension());
            let record_hash = self.registry.hash_bytes(&self.chain_format, &bytes)?;
            let entry = history.chain().next_entry(name.clone(), self.chain_format.clone(), record_hash);
            let store = HistoryStore::new(history.path());

            level.sequence = generation.sequence;
            level.record = name.clone();
            level.new_history = history.is_empty();

            let history = tree
                .get_mut(&dir)
                .ok_or_else(|| FixityError::internal(format!("history {:?} vanished from the tree", dir)))?;
            history.append(generation, entry)?;
            tx.stage_record(&store, &name, &bytes)?;
            tx.stage_chain(&store, history.chain())?;
            info!("Generation {} staged for {:?}", level.sequence, level.path);
            levels.push(level);
        }

        tx.commit()?;
        Ok(CreateReport {
            root: root.to_path_buf(),
            levels,
            unchanged,
            inconsistencies,
            files_hashed,
            duration: start.elapsed(),
        })
    }

    fn ignore_rules(&self, root: &Path, root_history: &History, options: &CreateOptions) -> Result<IgnoreRules> {
        let mut patterns: Vec<String> = DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect();
        patterns.extend(options.ignore_patterns.iter().cloned());
        if let Some(spec) = &options.ignore_spec {
            patterns.extend(IgnoreRules::read_spec_file(spec)?);
        }
        if let Some(latest) = root_history.latest() {
            patterns.extend(latest.ignore_patterns.iter().cloned());
        }
        IgnoreRules::new(root, patterns)
    }

    /// Decide which formats every non-ignored file is hashed in
    fn plan(
        &self,
        tree: &HistoryTree,
        snapshot: &Snapshot,
        missing: &BTreeMap<String, Vec<FileRecord>>,
        options: &CreateOptions,
    ) -> Vec<HashJob> {
        let requested: BTreeSet<HashFormat> = options.formats.iter().cloned().collect();
        let mut jobs = Vec::new();

        for entry in snapshot.files().filter(|entry| !entry.ignored) {
            let Some((owner, local)) = tree.locate(&entry.path) else {
                continue;
            };
            let Some(history) = tree.get(owner) else {
                continue;
            };

            let recorded = history.recorded_formats(local);
            let mut formats = requested.clone();
            if !requested.is_subset(&recorded) {
                formats.extend(recorded);
            }
            if options.detect_renaming && !history.has_record(local) {
                for candidate in missing.get(owner).into_iter().flatten() {
                    if candidate.size == entry.size {
                        formats.extend(candidate.hashes.iter().map(|h| h.format.clone()));
                    }
                }
            }
            let (formats, unsupported): (Vec<HashFormat>, Vec<HashFormat>) =
                formats.into_iter().partition(|f| self.registry.supports(f));
            for format in unsupported {
                warn!(
                    "Cannot re-verify {:?} in unregistered format {}",
                    snapshot.absolute(&entry.path),
                    format
                );
            }
            jobs.push(HashJob {
                path: entry.path.clone(),
                formats,
            });
        }
        jobs
    }

    fn hash_all(&self, snapshot: &Snapshot, jobs: Vec<HashJob>, options: &CreateOptions) -> Result<DigestMap> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| FixityError::internal(format!("failed to start hashing threads: {}", e)))?;

        let total = jobs.len();
        let hashed = AtomicUsize::new(0);
        let mut results = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let digests = self.registry.hash_file_multi(&snapshot.absolute(&job.path), &job.formats)?;
                    let done = hashed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = &options.progress {
                        progress(CreateProgress {
                            hashed: done,
                            total,
                            path: job.path.clone(),
                        });
                    }
                    Ok((job.path.clone(), digests))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        // Completion order must not leak into generations
        results.sort_by(|a, b| a.0.cmp(&b.0));
        debug!("Hashed {} file(s) with {} worker(s)", results.len(), self.workers);
        Ok(results
            .into_iter()
            .map(|(path, digests)| (path, digests.into_iter().collect()))
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        tree: &HistoryTree,
        history: &History,
        dir: &str,
        snapshot: &Snapshot,
        digests: &DigestMap,
        missing: &[FileRecord],
        rules: &IgnoreRules,
        options: &CreateOptions,
        created: DateTime<Utc>,
        creator: CreatorInfo,
    ) -> Result<(Generation, LevelReport)> {
        let mut generation = Generation::new(history.next_sequence(), created, creator);
        generation.ignore_patterns = rules.patterns().to_vec();
        let mut level = LevelReport {
            path: history.path().to_path_buf(),
            ..Default::default()
        };

        for entry in snapshot.files() {
            let Some((owner, local)) = tree.locate(&entry.path) else {
                continue;
            };
            if owner != dir {
                continue;
            }
            if entry.ignored {
                level.ignored += 1;
                generation.files.push(FileRecord::ignored(local, entry.size));
                continue;
            }

            let computed = digests.get(&entry.path).ok_or_else(|| {
                FixityError::internal(format!("no digest computed for {:?}", entry.path))
            })?;
            let hashes = derive_entries(history, local, computed, options);
            match summarize(&hashes) {
                HashAction::Original => level.original += 1,
                HashAction::Verified => level.verified += 1,
                HashAction::New => level.new += 1,
                HashAction::Failed => {
                    level.failed += 1;
                    level.failures.push(local.to_string());
                    warn!("Verification failed for {:?}", snapshot.absolute(&entry.path));
                }
            }
            generation.files.push(FileRecord::hashed(local, entry.size, hashes));
        }

        if options.detect_renaming {
            level.renamed = detect_renames(history, dir, &mut generation.files, missing, digests);
        }
        level.missing = missing
            .iter()
            .map(|record| record.path.clone())
            .filter(|path| !level.renamed.iter().any(|(old, _)| old == path))
            .collect();

        for entry in snapshot.directories() {
            if tree.get(&entry.path).is_some() || tree.owner_of(&entry.path) != Some(dir) {
                continue;
            }
            if let Some(local) = crate::utils::strip_dir_prefix(&entry.path, dir) {
                generation.directories.push(DirectoryRecord::new(local));
            }
        }

        for child in tree.children_of(dir) {
            if let Some(reference) = tree.reference_to(dir, child) {
                generation.children.push(reference);
            }
        }

        generation.canonicalize();
        Ok((generation, level))
    }
}

/// Apply the per-format action state machine to one file
fn derive_entries(
    history: &History,
    path: &str,
    computed: &BTreeMap<HashFormat, String>,
    options: &CreateOptions,
) -> Vec<HashEntry> {
    // Formats hashed only to look for rename candidates are not recorded
    let recorded = history.recorded_formats(path);
    let keep = |format: &HashFormat| options.formats.contains(format) || recorded.contains(format);

    if !history.has_record(path) {
        return computed
            .iter()
            .filter(|(format, _)| keep(format))
            .map(|(format, digest)| HashEntry::new(format.clone(), digest.clone(), HashAction::Original))
            .collect();
    }
    if recorded.is_empty() {
        return computed
            .iter()
            .filter(|(format, _)| keep(format))
            .map(|(format, digest)| HashEntry::new(format.clone(), digest.clone(), HashAction::New))
            .collect();
    }

    let mut entries = Vec::with_capacity(computed.len());
    // A cross-check needs at least one recorded format computed again
    let mut cross_check_ok = computed.keys().any(|format| recorded.contains(format));
    for (format, digest) in computed.iter().filter(|(format, _)| recorded.contains(*format)) {
        let action = match history.trusted_digest(path, format) {
            Some(trusted) if trusted == digest => HashAction::Verified,
            Some(_) => HashAction::Failed,
            None => HashAction::Original,
        };
        if action != HashAction::Verified {
            cross_check_ok = false;
        }
        entries.push(HashEntry::new(format.clone(), digest.clone(), action));
    }
    for (format, digest) in computed.iter().filter(|(format, _)| !recorded.contains(*format) && keep(format)) {
        let action = if cross_check_ok {
            HashAction::Verified
        } else {
            HashAction::Original
        };
        entries.push(HashEntry::new(format.clone(), digest.clone(), action));
    }
    entries
}

/// Most significant action of a file: failed > new > original > verified
fn summarize(entries: &[HashEntry]) -> HashAction {
    let actions: BTreeSet<HashAction> = entries.iter().map(|entry| entry.action).collect();
    [HashAction::Failed, HashAction::New, HashAction::Original]
        .into_iter()
        .find(|action| actions.contains(action))
        .unwrap_or(HashAction::Verified)
}

/// Files each history still expects that are gone now
///
/// Looks past the latest generation: a file stays missing until it comes
/// back, is renamed away, becomes ignored or moves into a nested history.
fn missing_files(tree: &HistoryTree, snapshot: &Snapshot, rules: &IgnoreRules) -> BTreeMap<String, Vec<FileRecord>> {
    let mut missing = BTreeMap::new();
    for (dir, history) in tree.iter() {
        let gone: Vec<FileRecord> = history
            .expected_records()
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| {
                let full = crate::utils::concat_relative(dir, &record.path);
                !snapshot.has_file(&full)
                    && !rules.is_ignored(&full, false)
                    && tree.owner_of(crate::utils::parent_dir(&full)) == Some(dir)
            })
            .cloned()
            .collect();
        if !gone.is_empty() {
            missing.insert(dir.to_string(), gone);
        }
    }
    missing
}

/// Link unseen files to missing ones when both sides match uniquely
///
/// Matching uses every digest computed this run, including formats hashed
/// only because a missing file was recorded in them.
fn detect_renames(
    history: &History,
    dir: &str,
    files: &mut [FileRecord],
    missing: &[FileRecord],
    digests: &DigestMap,
) -> Vec<(String, String)> {
    let unseen: Vec<usize> = files
        .iter()
        .enumerate()
        .filter(|(_, record)| !record.ignored && !history.has_record(&record.path))
        .map(|(idx, _)| idx)
        .collect();

    let mut pairs: Vec<(usize, &FileRecord)> = Vec::new();
    for old in missing {
        for &idx in &unseen {
            let Some(computed) = digests.get(&crate::utils::concat_relative(dir, &files[idx].path)) else {
                continue;
            };
            let same_content = old
                .hashes
                .iter()
                .any(|entry| computed.get(&entry.format) == Some(&entry.digest));
            if files[idx].size == old.size && same_content {
                pairs.push((idx, old));
            }
        }
    }

    let mut renamed = Vec::new();
    for &(idx, old) in &pairs {
        let new_matches = pairs.iter().filter(|(i, _)| *i == idx).count();
        let old_matches = pairs.iter().filter(|(_, o)| o.path == old.path).count();
        if new_matches == 1 && old_matches == 1 {
            files[idx].previous_path = Some(old.path.clone());
            debug!("Detected rename {:?} -> {:?}", old.path, files[idx].path);
            renamed.push((old.path.clone(), files[idx].path.clone()));
        }
    }
    renamed
}

/// Whether a nested history needs the assembled generation
fn is_due(history: &History, generation: &Generation, level: &LevelReport) -> bool {
    let Some(latest) = history.latest() else {
        return true;
    };
    // Files gone since the latest generation show up in its shape below
    if level.original + level.failed + level.new > 0 || !level.renamed.is_empty() {
        return true;
    }
    let shape = |files: &[FileRecord]| -> Vec<(String, u64, bool)> {
        files.iter().map(|r| (r.path.clone(), r.size, r.ignored)).collect()
    };
    shape(&latest.files) != shape(&generation.files)
        || latest.directories != generation.directories
        || latest.children != generation.children
        || latest.ignore_patterns != generation.ignore_patterns
}
