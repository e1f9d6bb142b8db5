//! The preprocessor's error taxonomy (spec section 7).
//!
//! Every variant carries at least a line number (or a path, for I/O errors)
//! so a caller can build a `path:line: message` diagnostic without having to
//! re-derive position information from the token stream.

use std::path::PathBuf;

/// Errors produced while lexing, parsing directives, orchestrating file
/// inclusion, or expanding macros.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A character or token could not be classified by the lexer, or a
    /// preprocessor token appeared somewhere it is not allowed.
    #[error("{line}: unexpected token {found:?}")]
    UnexpectedToken { line: usize, found: String },

    /// A string literal, or a directive expecting more tokens, ran off the
    /// end of its line.
    #[error("{line}: unexpected end of line")]
    UnexpectedEndOfLine { line: usize },

    /// A string literal was never closed before the end of the file.
    #[error("{line}: unterminated string literal")]
    UnterminatedString { line: usize },

    /// A `/* ... */` comment was never closed before the end of the file.
    #[error("{line}: unterminated comment")]
    UnterminatedComment { line: usize },

    /// A macro body, directive argument list, or macro invocation ran off
    /// the end of the token stream before it was complete.
    #[error("{line}: unexpected end of code")]
    UnexpectedEndOfCode { line: usize },

    /// A catch-all structural violation: duplicate/misplaced `##blcs`,
    /// a variadic parameter that isn't last, direct self-invocation, a
    /// misplaced `#{`, an unknown directive or macro keyword, and similar.
    #[error("{line}: {message}")]
    Syntax { line: usize, message: String },

    /// A `#name` invocation (or a macro body reference) names a macro that
    /// does not exist in the merged macro table.
    #[error("{line}: undefined macro '{name}'")]
    UndefinedMacro { line: usize, name: String },

    /// A `#%name` token inside a macro body names a parameter that was not
    /// declared in that macro's argument list.
    #[error("{line}: undefined macro parameter '{name}'")]
    UndefinedMacroParameter { line: usize, name: String },

    /// Two files (or one file twice) define a macro with the same name.
    #[error("{line}: macro '{name}' is already defined")]
    MultipleDefinitions { line: usize, name: String },

    /// The macro reference graph contains a cycle; `path` is the cycle
    /// formatted as `'A' -> 'B'`.
    #[error("infinite macro recursion: {path}")]
    InfiniteMacroRecursion { path: String },

    /// The seed or an imported path does not have the configured source
    /// extension.
    #[error("{path}: expected a '.{expected}' file")]
    FileExtension { path: PathBuf, expected: String },

    /// The seed or an imported path does not exist.
    #[error("{path}: file not found")]
    FileNotFound { path: PathBuf },

    /// Propagated filesystem failure (permission, transient I/O, etc).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// This crate's specific `Result` type.
pub type Result<T> = std::result::Result<T, Error>;
