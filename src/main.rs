//! `blcppc`: the thin CLI shell around `blcspp`. Argument parsing, directory
//! walking, and the change-watcher live here rather than in the library, so
//! the library stays a pure pipeline while this binary makes the crate
//! runnable end-to-end.

use anyhow::{Context, Result};
use blcspp::Preprocessor;
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// `usage: path [-h] [-d] (-w | -X) [-q] [-e]`.
#[derive(Parser, Debug)]
#[clap(name = "blcppc", version, about = "Lowers BLCS macro and file-inclusion directives into plain scripting source")]
struct Args {
    /// Entry file, or entry directory when `-d` is given.
    path: PathBuf,

    /// Treat `path` as a directory and preprocess every matching file under it.
    #[clap(short = 'd', long = "directory")]
    directory: bool,

    /// Run once and exit.
    #[clap(short = 'X', long = "cli", conflicts_with = "watch", required_unless_present = "watch")]
    cli: bool,

    /// Poll for changes and re-run on every modification.
    #[clap(short = 'w', long = "watch", conflicts_with = "cli", required_unless_present = "cli")]
    watch: bool,

    /// Suppress informational logging.
    #[clap(short = 'q', long = "quiet")]
    quiet: bool,

    /// Write output files even when their token stream is empty.
    #[clap(short = 'e', long = "output-empty")]
    output_empty: bool,
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEBOUNCE: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.quiet { "error" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut preprocessor = Preprocessor::new();
    preprocessor.set_output_empty(args.output_empty);

    if args.watch {
        watch(&preprocessor, &args.path, args.directory)
    } else {
        run_once(&preprocessor, &args.path, args.directory)
    }
}

/// Entry files reachable from `path`: just `path` itself, or every file
/// under it matching `.blcs` when `-d` is given.
fn entry_files(path: &Path, directory: bool) -> Vec<PathBuf> {
    if !directory {
        return vec![path.to_path_buf()];
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("blcs"))
        .map(|entry| entry.into_path())
        .collect()
}

fn run_once(preprocessor: &Preprocessor, path: &Path, directory: bool) -> Result<()> {
    let mut failed = false;
    for entry in entry_files(path, directory) {
        if let Err(e) = process_one(preprocessor, &entry) {
            log::error!("{}: {e}", entry.display());
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn process_one(preprocessor: &Preprocessor, entry: &Path) -> Result<()> {
    let outputs = preprocessor
        .process(entry)
        .with_context(|| format!("failed to preprocess {}", entry.display()))?;
    for output in outputs {
        log::info!("writing {}", output.path.display());
        std::fs::write(&output.path, output.text)
            .with_context(|| format!("failed to write {}", output.path.display()))?;
    }
    Ok(())
}

/// Polls mtimes of every candidate file and re-runs the job for any file
/// whose mtime changed since it was last seen, debounced against the
/// wall-clock time of the last *acceptance*: a burst of mtime changes
/// within 100ms of a prior run is collapsed into one job.
fn watch(preprocessor: &Preprocessor, path: &Path, directory: bool) -> Result<()> {
    let mut last_mtime: HashMap<PathBuf, SystemTime> = HashMap::new();
    let mut last_accepted: HashMap<PathBuf, SystemTime> = HashMap::new();
    log::info!("watching {} (poll every {:?})", path.display(), POLL_INTERVAL);
    loop {
        let now = SystemTime::now();
        for entry in entry_files(path, directory) {
            let modified = match std::fs::metadata(&entry).and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("{}: could not read metadata: {e}", entry.display());
                    continue;
                }
            };
            if last_mtime.get(&entry) == Some(&modified) {
                continue;
            }
            last_mtime.insert(entry.clone(), modified);

            let debounced = last_accepted
                .get(&entry)
                .and_then(|prev| now.duration_since(*prev).ok())
                .map(|elapsed| elapsed < DEBOUNCE)
                .unwrap_or(false);
            if debounced {
                continue;
            }
            last_accepted.insert(entry.clone(), now);
            if let Err(e) = process_one(preprocessor, &entry) {
                log::error!("{}: {e}", entry.display());
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
