//! Read-only reports over verified histories
//!
//! - [`TreeInfo`]: generations of every history in a tree
//! - [`FileInfo`]: the timeline of one file across generations and names
//! - [`CheckReport`]: outcome of verifying every chain in a tree

use crate::error::{FixityError, Result};
use crate::history::History;
use crate::tree::{HistoryTree, Inconsistency};
use crate::types::{CreatorInfo, FileRecord, ProcessInfo};
use crate::utils;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Metadata of one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSummary {
    /// Sequence number
    pub sequence: u32,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Who wrote it
    pub creator: CreatorInfo,
    /// How it was written
    pub process: ProcessInfo,
}

impl GenerationSummary {
    fn header(&self) -> String {
        format!(
            "  Generation {} ({})",
            self.sequence,
            utils::format_timestamp(&self.created)
        )
    }

    fn provenance(&self) -> [String; 2] {
        [
            format!("     CreatorInfo: {}", self.creator),
            format!("     ProcessInfo: {}", self.process),
        ]
    }
}

/// Generations of one history
#[derive(Debug, Clone)]
pub struct HistoryInfo {
    /// History directory
    pub path: PathBuf,
    /// Generations, oldest first
    pub generations: Vec<GenerationSummary>,
}

impl HistoryInfo {
    fn from_history(history: &History) -> Self {
        Self {
            path: history.path().to_path_buf(),
            generations: history
                .generations()
                .iter()
                .map(|g| GenerationSummary {
                    sequence: g.sequence,
                    created: g.created,
                    creator: g.creator.clone(),
                    process: g.process.clone(),
                })
                .collect(),
        }
    }
}

/// Overview of every history in a tree
#[derive(Debug, Clone)]
pub struct TreeInfo {
    /// Invocation root history first, nested histories ordered by path
    pub histories: Vec<HistoryInfo>,
}

impl TreeInfo {
    /// Summarize every history of `tree`
    pub fn from_tree(tree: &HistoryTree) -> Self {
        Self {
            histories: tree.iter().map(|(_, history)| HistoryInfo::from_history(history)).collect(),
        }
    }

    /// Render as printed by `info`
    ///
    /// ```text
    /// Info with history at path: /data
    ///   Generation 1 (2020-01-15T13:00:00+00:00)
    ///
    /// Child History at /data/A/AA:
    ///   Generation 1 (2020-01-15T13:00:00+00:00)
    /// ```
    pub fn render(&self, verbose: bool) -> Vec<String> {
        let mut lines = Vec::new();
        for (idx, history) in self.histories.iter().enumerate() {
            if idx == 0 {
                lines.push(format!("Info with history at path: {}", history.path.display()));
            } else {
                lines.push(String::new());
                lines.push(format!("Child History at {}:", history.path.display()));
            }
            for generation in &history.generations {
                lines.push(generation.header());
                if verbose {
                    lines.extend(generation.provenance());
                }
            }
        }
        lines
    }

    /// `<abs dir> | <generation> | <created>` rows, one per generation
    pub fn list_rows(&self) -> Vec<String> {
        self.histories
            .iter()
            .flat_map(|history| {
                history.generations.iter().map(move |generation| {
                    format!(
                        "{} | {} | {}",
                        history.path.display(),
                        generation.sequence,
                        utils::format_timestamp(&generation.created)
                    )
                })
            })
            .collect()
    }
}

/// One generation of a file
#[derive(Debug, Clone)]
pub struct FileGeneration {
    /// Generation metadata
    pub generation: GenerationSummary,
    /// What was recorded for the file
    pub record: FileRecord,
}

/// All generations of a file under one of its names
#[derive(Debug, Clone)]
pub struct NameBlock {
    /// Path relative to the owning history
    pub path: String,
    /// Absolute path
    pub absolute: PathBuf,
    /// Generations containing this name, oldest first
    pub generations: Vec<FileGeneration>,
}

/// Timeline of a single file
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Directory of the owning history
    pub owner: PathBuf,
    /// One block per name, oldest name first, current name last
    pub blocks: Vec<NameBlock>,
}

impl FileInfo {
    /// Collect the timeline of `path` (relative to `history`)
    ///
    /// Earlier names are found through the rename chain.
    ///
    /// # Errors
    ///
    /// Returns [`FixityError::FileNotTracked`] if no generation contains `path`.
    pub fn from_history(history: &History, path: &str) -> Result<Self> {
        if !history.has_record(path) {
            return Err(FixityError::FileNotTracked {
                path: utils::join_relative(history.path(), path),
                owner: history.path().to_path_buf(),
            });
        }

        let mut names = history.prior_names(path);
        names.reverse();
        names.push(path.to_string());

        let blocks = names
            .into_iter()
            .map(|name| {
                let generations = history
                    .file_timeline(&name)
                    .filter_map(|(sequence, record)| {
                        let g = history.generation(sequence)?;
                        Some(FileGeneration {
                            generation: GenerationSummary {
                                sequence,
                                created: g.created,
                                creator: g.creator.clone(),
                                process: g.process.clone(),
                            },
                            record: record.clone(),
                        })
                    })
                    .collect();
                NameBlock {
                    absolute: utils::join_relative(history.path(), &name),
                    path: name,
                    generations,
                }
            })
            .collect();

        Ok(Self {
            owner: history.path().to_path_buf(),
            blocks,
        })
    }

    /// Block of the current name
    pub fn current(&self) -> Option<&NameBlock> {
        self.blocks.last()
    }

    /// Render as printed by `info --single-file`
    ///
    /// Without `verbose` only the current name is shown.
    pub fn render(&self, verbose: bool) -> Vec<String> {
        let blocks: &[NameBlock] = if verbose {
            &self.blocks
        } else {
            match self.blocks.split_last() {
                Some((last, _)) => std::slice::from_ref(last),
                None => &[],
            }
        };

        let mut lines = Vec::new();
        for block in blocks {
            lines.push(format!("Info with history at path: {}", self.owner.display()));
            lines.push(format!("{}:", block.path));
            for entry in &block.generations {
                let mut line = entry.generation.header();
                if entry.record.ignored {
                    line.push_str(" (ignored)");
                }
                for hash in &entry.record.hashes {
                    line.push_str(&format!(" {}: {} ({})", hash.format, hash.digest, hash.action));
                }
                lines.push(line);
                if verbose {
                    lines.push(format!("    {}", block.absolute.display()));
                    lines.extend(entry.generation.provenance());
                }
            }
        }
        lines
    }

    /// `|`-delimited rows, one per generation and format
    ///
    /// `<abs path> | <generation> | <format> | <digest> | <action>`; ignored
    /// records yield a single row with `None` for format and digest.
    pub fn list_rows(&self) -> Vec<String> {
        let mut rows = Vec::new();
        for block in &self.blocks {
            for entry in &block.generations {
                let sequence = entry.generation.sequence;
                if entry.record.hashes.is_empty() {
                    rows.push(format!(
                        "{} | {} | None | None | {}",
                        block.absolute.display(),
                        sequence,
                        if entry.record.ignored { "ignored" } else { "None" }
                    ));
                }
                for hash in &entry.record.hashes {
                    rows.push(format!(
                        "{} | {} | {} | {} | {}",
                        block.absolute.display(),
                        sequence,
                        hash.format,
                        hash.digest,
                        hash.action
                    ));
                }
            }
        }
        rows
    }
}

/// Result of verifying every chain of a tree
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Verified histories with their generation counts, root first
    pub histories: Vec<(PathBuf, usize)>,
    /// Reference problems between histories
    pub inconsistencies: Vec<Inconsistency>,
}

impl CheckReport {
    /// Summarize a verified tree
    pub fn new(tree: &HistoryTree, inconsistencies: Vec<Inconsistency>) -> Self {
        Self {
            histories: tree
                .iter()
                .map(|(_, history)| (history.path().to_path_buf(), history.len()))
                .collect(),
            inconsistencies,
        }
    }

    /// `<dir>: <n> generations verified` per history
    pub fn render(&self) -> Vec<String> {
        self.histories
            .iter()
            .map(|(path, count)| format!("{}: {} generations verified", path.display(), count))
            .collect()
    }
}
