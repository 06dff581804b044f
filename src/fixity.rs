//! Main fixity entry point
//!
//! [`Fixity`] ties the engines together behind one configured handle:
//!
//! - [`Fixity::create`] appends generations ([`GenerationBuilder`])
//! - [`Fixity::diff`] reconciles the tree without writing ([`DiffEngine`])
//! - [`Fixity::info`], [`Fixity::file_info`] and [`Fixity::check`] report on
//!   verified histories
//! - [`Fixity::dump`] decodes a single record or chain for debugging
//!
//! Every read path verifies every chain it touches before answering.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use fixity::{CreateOptions, FixityBuilder};
//! use std::path::Path;
//!
//! # fn main() -> fixity::Result<()> {
//! let fixity = FixityBuilder::new()
//!     .formats(vec!["xxh64".into(), "md5".into()])
//!     .ignore_patterns(vec!["*.tmp".to_string()])
//!     .build()?;
//!
//! let report = fixity.create(Path::new("./footage"), CreateOptions::default())?;
//! println!("{} file(s) hashed", report.files_hashed);
//!
//! let diff = fixity.diff(Path::new("./footage"))?;
//! for record in diff.changes() {
//!     println!("{}", record.to_line());
//! }
//! # Ok(())
//! # }
//! ```

use crate::builder::{CreateOptions, CreateReport, GenerationBuilder};
use crate::chain::Chain;
use crate::codec::{JsonRecordCodec, RecordCodec};
use crate::diff::{DiffEngine, DiffReport};
use crate::error::{FixityError, Result};
use crate::file_tracking::{FileTracker, IgnoreRules, Snapshot, DEFAULT_IGNORE_PATTERNS};
use crate::hashing::{Digester, HashFormat, HashRegistry};
use crate::info::{CheckReport, FileInfo, TreeInfo};
use crate::storage::{HistoryStore, CHAIN_FILE_NAME, STORE_DIR_NAME};
use crate::tree::{HistoryTree, Inconsistency};
use crate::types::CreatorInfo;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Configuration shared by every operation of a [`Fixity`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixityConfig {
    /// Formats used by create when none are requested
    pub formats: Vec<HashFormat>,
    /// Algorithm hashing record files into the chain
    pub chain_format: HashFormat,
    /// Ignore patterns applied on top of the built-in defaults
    pub ignore_patterns: Vec<String>,
    /// Hashing threads
    pub parallel_workers: usize,
    /// Operator name stored in creator info
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Default comment stored in creator info
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for FixityConfig {
    fn default() -> Self {
        Self {
            formats: vec![HashFormat::new("xxh64")],
            chain_format: HashFormat::new("sha256"),
            ignore_patterns: Vec::new(),
            parallel_workers: num_cpus::get(),
            author: None,
            comment: None,
        }
    }
}

/// A tree whose histories were all verified
#[derive(Debug, Clone)]
pub struct LoadedTree {
    /// Every history below the root
    pub tree: HistoryTree,
    /// Filesystem state at load time
    pub snapshot: Snapshot,
    /// Ignore rules the snapshot was taken with
    pub rules: IgnoreRules,
    /// Reference problems between histories
    pub inconsistencies: Vec<Inconsistency>,
}

/// Configured handle for all fixity operations
pub struct Fixity {
    config: FixityConfig,
    registry: HashRegistry,
    codec: Box<dyn RecordCodec>,
}

impl std::fmt::Debug for Fixity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixity")
            .field("config", &self.config)
            .field("formats", &self.registry.formats().collect::<Vec<_>>())
            .field("codec", &self.codec.extension())
            .finish()
    }
}

impl Fixity {
    /// Handle with the default configuration
    pub fn new() -> Result<Self> {
        FixityBuilder::new().build()
    }

    /// Active configuration
    pub fn config(&self) -> &FixityConfig {
        &self.config
    }

    /// Registered digest functions
    pub fn registry(&self) -> &HashRegistry {
        &self.registry
    }

    /// Append a generation to `dir` and every nested history that is due
    ///
    /// Empty option fields fall back to the configuration: formats, ignore
    /// patterns (prepended) and comment.
    ///
    /// # Errors
    ///
    /// See [`GenerationBuilder::create`]. Nothing is written on error.
    #[instrument(skip(self, options), fields(formats = ?options.formats))]
    pub fn create(&self, dir: &Path, mut options: CreateOptions) -> Result<CreateReport> {
        let root = canonical_dir(dir)?;
        if options.formats.is_empty() {
            options.formats = self.config.formats.clone();
        }
        let mut patterns = self.config.ignore_patterns.clone();
        patterns.append(&mut options.ignore_patterns);
        options.ignore_patterns = patterns;
        if options.comment.is_none() {
            options.comment = self.config.comment.clone();
        }

        let mut creator = CreatorInfo::current();
        creator.author = self.config.author.clone();

        let report = GenerationBuilder::new(&self.registry, self.codec.as_ref())
            .with_chain_format(self.config.chain_format.clone())
            .with_creator(creator)
            .with_workers(self.config.parallel_workers)
            .create(&root, &options)?;
        info!(
            "Created {} generation(s) below {:?} in {:?}",
            report.levels.len(),
            root,
            report.duration
        );
        Ok(report)
    }

    /// Load and verify every history below `dir`
    ///
    /// # Errors
    ///
    /// - [`FixityError::HistoryNotFound`] if `dir` has no history
    /// - [`FixityError::HistoryStoreMissing`] if a referenced child store is gone
    /// - the first verification failure of any history
    #[instrument(skip(self))]
    pub fn load_tree(&self, dir: &Path) -> Result<LoadedTree> {
        let root = canonical_dir(dir)?;
        let store = HistoryStore::new(&root);
        if !store.exists() {
            return Err(FixityError::HistoryNotFound(root));
        }
        let root_history = store.load(&self.registry, self.codec.as_ref())?;

        let mut patterns: Vec<String> = DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect();
        patterns.extend(self.config.ignore_patterns.iter().cloned());
        if let Some(latest) = root_history.latest() {
            patterns.extend(latest.ignore_patterns.iter().cloned());
        }
        let rules = IgnoreRules::new(&root, patterns)?;
        let snapshot = FileTracker::new(&root, rules.clone()).scan()?;

        let mut tree = HistoryTree::new(&root);
        tree.insert("", root_history);
        tree.load(&snapshot, &self.registry, self.codec.as_ref())?;
        let inconsistencies = tree.check_references()?;
        debug!("Loaded {} history(ies) below {:?}", tree.len(), root);

        Ok(LoadedTree {
            tree,
            snapshot,
            rules,
            inconsistencies,
        })
    }

    /// Compare `dir` with its latest recorded state
    ///
    /// Blocking inconsistencies are returned inside the report so that the
    /// caller can print what was determined before failing with
    /// [`DiffReport::check`].
    #[instrument(skip(self))]
    pub fn diff(&self, dir: &Path) -> Result<DiffReport> {
        let loaded = self.load_tree(dir)?;
        DiffEngine::new(&self.registry).diff(
            &loaded.tree,
            &loaded.snapshot,
            &loaded.rules,
            loaded.inconsistencies,
        )
    }

    /// Generations of every history below `dir`
    pub fn info(&self, dir: &Path) -> Result<TreeInfo> {
        let loaded = self.load_tree(dir)?;
        Ok(TreeInfo::from_tree(&loaded.tree))
    }

    /// Timeline of one file in its nearest-owning history
    ///
    /// The file itself need not exist any more.
    ///
    /// # Errors
    ///
    /// - [`FixityError::HistoryNotFound`] if no directory above it has a history
    /// - [`FixityError::FileNotTracked`] if the history never recorded it
    /// - any verification error of the owning history
    #[instrument(skip(self))]
    pub fn file_info(&self, file: &Path) -> Result<FileInfo> {
        let path = absolute_file(file)?;
        let parent = path.parent().unwrap_or(&path).to_path_buf();
        let owner = HistoryStore::find_owner(&parent).ok_or_else(|| FixityError::HistoryNotFound(parent.clone()))?;
        let history = HistoryStore::new(&owner).load(&self.registry, self.codec.as_ref())?;
        let local = utils::relative_string(&path, &owner)?;
        FileInfo::from_history(&history, &local)
    }

    /// Verify every chain below `dir`
    #[instrument(skip(self))]
    pub fn check(&self, dir: &Path) -> Result<CheckReport> {
        let loaded = self.load_tree(dir)?;
        Ok(CheckReport::new(&loaded.tree, loaded.inconsistencies))
    }

    /// Decode a record file, or list a chain, as pretty JSON
    ///
    /// `path` may be a record file, a chain file, a store directory or a
    /// directory owning a store. Nothing is verified.
    pub fn dump(&self, path: &Path) -> Result<String> {
        let target = if path.join(STORE_DIR_NAME).is_dir() {
            path.join(STORE_DIR_NAME).join(CHAIN_FILE_NAME)
        } else if path.is_dir() {
            path.join(CHAIN_FILE_NAME)
        } else {
            path.to_path_buf()
        };

        let bytes = fs::read(&target)?;
        if target.file_name().is_some_and(|name| name == CHAIN_FILE_NAME) {
            let chain: Chain = serde_json::from_slice(&bytes)
                .map_err(|e| FixityError::invalid_chain(&target, e.to_string()))?;
            Ok(serde_json::to_string_pretty(&chain)?)
        } else {
            let generation = self
                .codec
                .decode(&bytes)
                .map_err(|e| FixityError::invalid_record(&target, e.to_string()))?;
            Ok(serde_json::to_string_pretty(&generation)?)
        }
    }
}

fn canonical_dir(dir: &Path) -> Result<PathBuf> {
    let root = dir.canonicalize()?;
    if !root.is_dir() {
        return Err(FixityError::InvalidConfiguration(format!("{:?} is not a directory", dir)));
    }
    Ok(root)
}

/// Absolute path of a file that may no longer exist
fn absolute_file(file: &Path) -> Result<PathBuf> {
    if let Ok(path) = file.canonicalize() {
        return Ok(path);
    }
    let name = file
        .file_name()
        .ok_or_else(|| FixityError::InvalidConfiguration(format!("{:?} does not name a file", file)))?;
    let parent = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.canonicalize()?,
        _ => std::env::current_dir()?,
    };
    Ok(parent.join(name))
}

/// Builder for configuring a [`Fixity`]
///
/// # Default Values
///
/// - `formats`: `xxh64`
/// - `chain_format`: `sha256`
/// - `ignore_patterns`: empty (`.DS_Store` and the store are always ignored)
/// - `parallel_workers`: number of CPU cores
/// - `codec`: [`JsonRecordCodec`]
///
/// # Examples
///
/// ```rust
/// use fixity::FixityBuilder;
///
/// let fixity = FixityBuilder::new()
///     .formats(vec!["xxh128".into()])
///     .parallel_workers(2)
///     .author("archivist")
///     .build()
///     .unwrap();
/// assert_eq!(fixity.config().parallel_workers, 2);
/// ```
pub struct FixityBuilder {
    config: FixityConfig,
    registry: HashRegistry,
    codec: Box<dyn RecordCodec>,
}

impl FixityBuilder {
    /// Builder with default settings and the default hash formats
    pub fn new() -> Self {
        Self {
            config: FixityConfig::default(),
            registry: HashRegistry::with_defaults(),
            codec: Box::new(JsonRecordCodec),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: FixityConfig) -> Self {
        self.config = config;
        self
    }

    /// Default formats for create
    pub fn formats(mut self, formats: Vec<HashFormat>) -> Self {
        self.config.formats = formats;
        self
    }

    /// Algorithm for chain record hashes
    pub fn chain_format(mut self, format: HashFormat) -> Self {
        self.config.chain_format = format;
        self
    }

    /// Extra ignore patterns (gitignore syntax)
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.ignore_patterns = patterns;
        self
    }

    /// Number of hashing threads (minimum 1)
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.config.parallel_workers = count.max(1);
        self
    }

    /// Operator name stored in new generations
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.config.author = Some(author.into());
        self
    }

    /// Default comment stored in new generations
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.config.comment = Some(comment.into());
        self
    }

    /// Register an additional hash format
    pub fn register_format<F>(mut self, format: impl AsRef<str>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Digester> + Send + Sync + 'static,
    {
        self.registry.register(format, factory);
        self
    }

    /// Use a different record codec
    pub fn codec(mut self, codec: Box<dyn RecordCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Build the handle
    ///
    /// # Errors
    ///
    /// - [`FixityError::InvalidConfiguration`] if no default format is set
    /// - [`FixityError::UnknownHashFormat`] for a format without digest function
    pub fn build(self) -> Result<Fixity> {
        if self.config.formats.is_empty() {
            return Err(FixityError::InvalidConfiguration("no default hash format".to_string()));
        }
        self.registry.ensure_supported(&self.config.formats)?;
        self.registry.ensure_supported([&self.config.chain_format])?;
        IgnoreRules::new(Path::new(""), &self.config.ignore_patterns)?;

        Ok(Fixity {
            config: self.config,
            registry: self.registry,
            codec: self.codec,
        })
    }
}

impl Default for FixityBuilder {
    fn default() -> Self {
        Self::new()
    }
}
