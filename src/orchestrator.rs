//! The file orchestrator, plus the source reader it drives.
//!
//! BFS across `##use` imports starting from one top-level entry file,
//! merging each visited file's macro table into a single monotonic map.
//! `##use` paths are resolved relative to the *entry* file's directory,
//! not the including file's.

use crate::error::{Error, Result};
use crate::lexer::{lex, Token};
use crate::parser::{parse, Macro};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};

/// One file's token stream as produced by the lexer, kept alongside its
/// path so the processor/emitter can be run per file after the merge
/// completes.
pub struct ParsedFile {
    pub path: PathBuf,
    pub tokens: Vec<Token>,
}

/// Everything the processor needs once the BFS has drained: every visited
/// file's raw tokens (for later expansion) plus the merged macro table.
pub struct Orchestration {
    pub files: Vec<ParsedFile>,
    pub macros: HashMap<String, Macro>,
}

/// Reads `path` as UTF-8 text. This platform's default `File::open` already
/// permits concurrent readers, satisfying the shared-read requirement
/// without any extra flags.
fn read_source(path: &Path) -> Result<String> {
    log::debug!("reading {}", path.display());
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound { path: path.to_path_buf() }
        } else {
            Error::Io(e)
        }
    })
}

fn check_extension(path: &Path, expected: &str) -> Result<()> {
    let actual = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if actual != expected {
        return Err(Error::FileExtension {
            path: path.to_path_buf(),
            expected: expected.to_string(),
        });
    }
    Ok(())
}

/// Lexically collapses `.` and `..` components without touching the
/// filesystem, for paths that don't exist yet (so `canonicalize` can't
/// resolve them) but still need a stable dedup key.
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Normalizes a path for use as a `visited`/queue dedup key: canonicalizes
/// when the path exists (resolving symlinks and `.`/`..`), falling back to
/// a lexical normalization when it doesn't (the orchestrator still needs a
/// stable key to enqueue a not-yet-checked path before reporting
/// `FileNotFound`).
fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| lexically_normalize(path))
}

/// Runs the full BFS starting from `entry`, whose directory becomes the
/// base for every `##use` resolution.
pub fn orchestrate(entry: &Path, source_extension: &str) -> Result<Orchestration> {
    let entry = normalize_path(entry);
    let base_dir = entry.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(entry);

    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut merged_macros: HashMap<String, Macro> = HashMap::new();
    let mut files: Vec<ParsedFile> = Vec::new();

    while let Some(path) = queue.pop_front() {
        if visited.contains(&path) {
            continue;
        }
        check_extension(&path, source_extension)?;
        if !path.exists() {
            return Err(Error::FileNotFound { path });
        }
        visited.insert(path.clone());

        let text = read_source(&path)?;
        let tokens = lex(&text)?;
        let data = parse(&tokens)?;
        log::info!("parsed {} ({} macro(s), {} import(s))", path.display(), data.macros.len(), data.files.len());

        for imported in &data.files {
            queue.push_back(normalize_path(&base_dir.join(imported)));
        }
        for (name, m) in data.macros {
            if let Some(existing) = merged_macros.get(&name) {
                log::warn!("duplicate macro '{name}' (first defined at line {})", existing.line);
                return Err(Error::MultipleDefinitions { line: m.line, name });
            }
            merged_macros.insert(name, m);
        }

        files.push(ParsedFile { path, tokens });
    }

    Ok(Orchestration { files, macros: merged_macros })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_dir() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("blcspp-orchestrator-test-{}-{n}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn single_file_with_no_imports() {
        let dir = scratch_dir();
        let entry = dir.join("main.blcs");
        fs::write(&entry, "##blcs\n##define MAX 9\n").unwrap();

        let result = orchestrate(&entry, "blcs").unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.macros.contains_key("MAX"));
    }

    #[test]
    fn cross_file_import_is_merged() {
        let dir = scratch_dir();
        let entry = dir.join("main.blcs");
        let lib = dir.join("lib.blcs");
        fs::write(&entry, "##blcs\n##use \"lib.blcs\"\n#GREET\n").unwrap();
        fs::write(&lib, "##blcs\n##define GREET \"hello\"\n").unwrap();

        let result = orchestrate(&entry, "blcs").unwrap();
        assert_eq!(result.files.len(), 2);
        assert!(result.macros.contains_key("GREET"));
    }

    #[test]
    fn use_paths_resolve_against_the_entry_directory() {
        let dir = scratch_dir();
        let sub = dir.join("sub");
        fs::create_dir_all(&sub).unwrap();
        let entry = sub.join("main.blcs");
        // `lib.blcs` sits next to the entry file, not next to any includer.
        let lib = sub.join("lib.blcs");
        fs::write(&entry, "##blcs\n##use \"lib.blcs\"\n#GREET\n").unwrap();
        fs::write(&lib, "##blcs\n##define GREET \"hi\"\n").unwrap();

        let result = orchestrate(&entry, "blcs").unwrap();
        assert!(result.macros.contains_key("GREET"));
    }

    #[test]
    fn duplicate_macro_across_files_is_rejected() {
        let dir = scratch_dir();
        let entry = dir.join("main.blcs");
        let lib = dir.join("lib.blcs");
        fs::write(&entry, "##blcs\n##use \"lib.blcs\"\n##define X 1\n").unwrap();
        fs::write(&lib, "##blcs\n##define X 2\n").unwrap();

        let err = orchestrate(&entry, "blcs").unwrap_err();
        assert!(matches!(err, Error::MultipleDefinitions { name, .. } if name == "X"));
    }

    #[test]
    fn wrong_extension_is_rejected() {
        let dir = scratch_dir();
        let entry = dir.join("main.txt");
        fs::write(&entry, "##blcs\n").unwrap();

        let err = orchestrate(&entry, "blcs").unwrap_err();
        assert!(matches!(err, Error::FileExtension { .. }));
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = scratch_dir();
        let entry = dir.join("missing.blcs");
        let err = orchestrate(&entry, "blcs").unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }
}
