//! `blcspp` lowers BLCS macro and file-inclusion directives into plain
//! scripting-language source. The pipeline is:
//!
//! `orchestrator` (BFS + source reading) → `lexer` → `parser` → `processor`
//! (three-pass expansion) → `emitter`.
//!
//! [`Preprocessor`] wires the five stages together behind a small
//! builder-style facade.

pub mod emitter;
pub mod error;
pub mod lexer;
pub mod orchestrator;
pub mod parser;
pub mod processor;
pub mod tests;

pub use error::{Error, Result};
pub use lexer::{Token, TokenType};
pub use parser::{DirectiveData, Macro};

use std::path::{Path, PathBuf};

/// One top-level job's result: the output path it would be written to and
/// the reconstructed source text.
pub struct Output {
    pub path: PathBuf,
    pub text: String,
}

/// Preprocessor configuration (spec.md §6, SPEC_FULL.md "Configuration").
/// All fields have sensible defaults; callers override what they need with
/// the setter methods before calling [`Preprocessor::process`].
pub struct Preprocessor {
    source_extension: String,
    output_extension: String,
    output_empty: bool,
    top_comment: String,
    bottom_comment: String,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            source_extension: "blcs".to_string(),
            output_extension: "cs".to_string(),
            output_empty: false,
            top_comment: String::new(),
            bottom_comment: String::new(),
        }
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source_extension(&mut self, ext: impl Into<String>) -> &mut Self {
        self.source_extension = ext.into();
        self
    }

    pub fn set_output_extension(&mut self, ext: impl Into<String>) -> &mut Self {
        self.output_extension = ext.into();
        self
    }

    pub fn set_output_empty(&mut self, output_empty: bool) -> &mut Self {
        self.output_empty = output_empty;
        self
    }

    pub fn set_top_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.top_comment = comment.into();
        self
    }

    pub fn set_bottom_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.bottom_comment = comment.into();
        self
    }

    /// The `.{output_extension}` sibling of `source_path` in the same
    /// directory (spec.md §6).
    pub fn output_path_for(&self, source_path: &Path) -> PathBuf {
        source_path.with_extension(&self.output_extension)
    }

    /// Wraps reconstructed token text in the configured top/bottom comment
    /// banners (spec.md §6: `FILE_TOP_COMMENT\n` + tokens + `\n\nFILE_BOTTOM_COMMENT`).
    fn wrap(&self, body: &str) -> String {
        format!("{}\n{}\n\n{}", self.top_comment, body, self.bottom_comment)
    }

    /// Runs the full pipeline for a single top-level job: orchestrates
    /// every file reachable from `entry` via `##use`, expands macros
    /// against the merged table, and emits one [`Output`] per visited
    /// file. Outputs whose token stream is empty are omitted unless
    /// `output_empty` is set.
    pub fn process(&self, entry: &Path) -> Result<Vec<Output>> {
        log::info!("processing {}", entry.display());
        let orchestration = orchestrator::orchestrate(entry, &self.source_extension)?;
        let mut outputs = Vec::with_capacity(orchestration.files.len());

        for file in orchestration.files {
            log::debug!("expanding {}", file.path.display());
            let expanded = processor::process(file.tokens, &orchestration.macros)?;
            if expanded.is_empty() && !self.output_empty {
                log::debug!("suppressing empty output for {}", file.path.display());
                continue;
            }
            let text = self.wrap(&emitter::emit(&expanded));
            outputs.push(Output {
                path: self.output_path_for(&file.path),
                text,
            });
        }
        Ok(outputs)
    }
}
