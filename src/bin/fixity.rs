//! # Fixity CLI - Integrity histories for directory trees
//!
//! ## Usage
//! ```bash
//! # Record (or verify and extend) the history of a directory
//! fixity create /Volumes/card01 -h xxh64 -h md5
//!
//! # What changed since the last generation?
//! fixity diff /Volumes/card01
//!
//! # Timeline of a single file
//! fixity info --single-file /Volumes/card01/clip.mov -v
//!
//! # Verify every chain without hashing any content
//! fixity check /Volumes/card01
//! ```
//!
//! ## Exit codes
//! - `0` success
//! - `30` history store missing
//! - `31` record altered
//! - `32` chain missing or broken
//! - `33` record missing
//! - `34` nested histories cannot be reconciled
//! - `1` anything else

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use fixity::{CreateOptions, CreateProgress, CreateReport, Fixity, FixityBuilder, FixityError, HashFormat};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Fixity CLI - tamper-evident hash histories for directory trees
#[derive(Parser)]
#[command(name = "fixity")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbose output and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash a directory tree and append a generation to its histories
    #[command(disable_help_flag = true)]
    Create {
        /// Directory to record
        root: PathBuf,

        /// Hash format (repeatable)
        #[arg(short = 'h', long = "hash-format")]
        hash_format: Vec<String>,

        /// Ignore pattern in gitignore syntax (repeatable)
        #[arg(short, long)]
        ignore: Vec<String>,

        /// File with one ignore pattern per line
        #[arg(long)]
        ignore_spec: Option<PathBuf>,

        /// Record renames of files that uniquely match a missing file
        #[arg(short, long)]
        detect_renaming: bool,

        /// Start a separate history below an existing one
        #[arg(long)]
        new_root: bool,

        /// Comment stored with the new generations
        #[arg(long)]
        comment: Option<String>,

        /// Show progress
        #[arg(long)]
        progress: bool,

        /// Print help
        #[arg(long, action = ArgAction::Help)]
        help: Option<bool>,
    },

    /// Show generations of a tree or the timeline of single files
    Info {
        /// Directory with a history
        #[arg(required_unless_present = "single_file")]
        root: Option<PathBuf>,

        /// Show the timeline of these files instead
        #[arg(short, long, num_args = 1..)]
        single_file: Vec<PathBuf>,

        /// Tabular `|`-delimited output
        #[arg(short, long)]
        list: bool,
    },

    /// Compare a tree with its latest generations without writing
    Diff {
        /// Directory with a history
        root: PathBuf,

        /// Print every path as a `|`-delimited row
        #[arg(short, long)]
        list: bool,
    },

    /// Verify every chain and record below a directory
    Check {
        /// Directory with a history
        root: PathBuf,
    },

    /// Print a decoded record or chain
    Dump {
        /// Record file, chain file, store or history directory
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    if let Err(err) = run(cli) {
        let code = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<FixityError>())
            .map(|fixity_err| {
                eprintln!("{}: {}", "Error".red().bold(), fixity_err.user_message());
                fixity_err.exit_code()
            })
            .unwrap_or_else(|| {
                eprintln!("{}: {:#}", "Error".red().bold(), err);
                fixity::error::EXIT_GENERAL
            });
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let fixity = FixityBuilder::new().build()?;
    let verbose = cli.verbose;

    match cli.command {
        Commands::Create {
            root,
            hash_format,
            ignore,
            ignore_spec,
            detect_renaming,
            new_root,
            comment,
            progress,
            help: _,
        } => {
            let formats = hash_format
                .iter()
                .map(|name| name.parse::<HashFormat>())
                .collect::<fixity::Result<Vec<_>>>()?;
            let options = CreateOptions {
                formats,
                ignore_patterns: ignore,
                ignore_spec,
                detect_renaming,
                new_root,
                comment,
                ..Default::default()
            };
            cmd_create(&fixity, root, options, progress, verbose)
        }
        Commands::Info { root, single_file, list } => {
            if single_file.is_empty() {
                let root = root.context("a directory or --single-file is required")?;
                cmd_info(&fixity, root, verbose, list)
            } else {
                cmd_file_info(&fixity, single_file, verbose, list)
            }
        }
        Commands::Diff { root, list } => cmd_diff(&fixity, root, list),
        Commands::Check { root } => cmd_check(&fixity, root),
        Commands::Dump { path } => {
            let dumped = fixity
                .dump(&path)
                .with_context(|| format!("cannot dump {}", path.display()))?;
            println!("{}", dumped);
            Ok(())
        }
    }
}

fn cmd_create(
    fixity: &Fixity,
    root: PathBuf,
    mut options: CreateOptions,
    show_progress: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let bar = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Scanning files...");
        let handle = pb.clone();
        options.progress = Some(Arc::new(move |progress: CreateProgress| {
            handle.set_message(format!("[{}/{}] {}", progress.hashed, progress.total, progress.path));
        }));
        Some(pb)
    } else {
        None
    };

    let result = fixity.create(&root, options);
    if let Some(pb) = bar {
        pb.finish_and_clear();
    }
    let report = result?;
    print_create_report(&report, verbose);
    Ok(())
}

fn print_create_report(report: &CreateReport, verbose: bool) {
    for inconsistency in &report.inconsistencies {
        eprintln!("{}: {}", "Warning".yellow().bold(), inconsistency);
    }

    for level in &report.levels {
        println!(
            "{} Generation {} for {}",
            "✓".green().bold(),
            level.sequence.to_string().yellow().bold(),
            level.path.display().to_string().cyan()
        );
        if verbose {
            println!("  Record: {}", level.record);
        }
        println!(
            "  {} original, {} verified, {} new, {} ignored",
            level.original, level.verified, level.new, level.ignored
        );
        for path in &level.failures {
            println!("  {}: {}", "Failed".red().bold(), path);
        }
        for path in &level.missing {
            println!("  {}: {}", "Missing".yellow(), path);
        }
        for (old, new) in &level.renamed {
            println!("  {}: {} (previously: {})", "Renamed".blue(), new, old);
        }
    }
    if verbose {
        for path in &report.unchanged {
            println!("  Unchanged: {}", path.display());
        }
    }
    println!(
        "  Hashed {} file(s) in {}",
        report.files_hashed.to_string().cyan(),
        format_duration(Duration::from_millis(report.duration.as_millis() as u64))
    );

    if report.has_failures() {
        eprintln!("{}: some files failed verification", "Warning".yellow().bold());
    }
}

fn cmd_info(fixity: &Fixity, root: PathBuf, verbose: bool, list: bool) -> anyhow::Result<()> {
    let info = fixity.info(&root)?;
    let lines = if list { info.list_rows() } else { info.render(verbose) };
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn cmd_file_info(fixity: &Fixity, files: Vec<PathBuf>, verbose: bool, list: bool) -> anyhow::Result<()> {
    for file in files {
        let info = fixity.file_info(&file)?;
        let lines = if list { info.list_rows() } else { info.render(verbose) };
        for line in lines {
            println!("{}", line);
        }
    }
    Ok(())
}

fn cmd_diff(fixity: &Fixity, root: PathBuf, list: bool) -> anyhow::Result<()> {
    let report = fixity.diff(&root)?;
    if list {
        for record in &report.records {
            println!("{}", record.to_row());
        }
    } else {
        for record in report.changes() {
            println!("{}", record.to_line());
        }
    }
    for inconsistency in &report.inconsistencies {
        eprintln!("{}: {}", "Warning".yellow().bold(), inconsistency);
    }
    report.check()?;
    Ok(())
}

fn cmd_check(fixity: &Fixity, root: PathBuf) -> anyhow::Result<()> {
    let report = fixity.check(&root)?;
    for line in report.render() {
        println!("{}", line);
    }
    for inconsistency in &report.inconsistencies {
        eprintln!("{}: {}", "Warning".yellow().bold(), inconsistency);
    }
    Ok(())
}
