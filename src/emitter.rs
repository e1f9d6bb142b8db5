//! The emitter.
//!
//! Pure text reconstruction: no validation, no macro knowledge. It trusts
//! that the processor has already produced a directive-free token list
//! whose `line` and `whitespace_before` fields are the only inputs it
//! needs to reproduce the original line gaps and indentation.

use crate::lexer::Token;

/// Reconstructs source text from a processed token list, starting at
/// logical line 1 and inserting one newline per line advanced between
/// consecutive tokens.
pub fn emit(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut line = 1usize;
    for tok in tokens {
        let gap = tok.line.saturating_sub(line);
        for _ in 0..gap {
            out.push('\n');
        }
        out.push_str(&tok.whitespace_before);
        out.push_str(&tok.value);
        line = tok.line;
    }
    out
}
