//! The lexer.
//!
//! Scans source one character at a time, tracking the current line and a
//! run of pending whitespace, and dispatches on the leading character of
//! each lexeme. Whitespace is recovered as a first-class token field
//! (`whitespace_before`) so the emitter can reconstruct the original
//! column layout; newlines reset it and advance the line counter instead
//! of being carried as a token themselves.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// The tag half of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Identifier,
    String,
    Number,
    Punctuation,
    ParenLeft,
    ParenRight,
    Comma,
    Directive,
    DirectiveCurlyLeft,
    DirectiveCurlyRight,
    Macro,
    MacroVarArgs,
    MacroParameter,
    MacroConcat,
    MacroKeyword,
}

impl TokenType {
    /// Every preprocessor token type except [`TokenType::Macro`] itself is
    /// forbidden outside a macro definition.
    pub fn is_body_only_preprocessor(self) -> bool {
        matches!(
            self,
            TokenType::Directive
                | TokenType::DirectiveCurlyLeft
                | TokenType::DirectiveCurlyRight
                | TokenType::MacroVarArgs
                | TokenType::MacroParameter
                | TokenType::MacroConcat
                | TokenType::MacroKeyword
        )
    }

    /// True for any token type produced only within the `#` sigil family.
    pub fn is_preprocessor(self) -> bool {
        self.is_body_only_preprocessor() || matches!(self, TokenType::Macro)
    }
}

/// A single lexeme, immutable except for `whitespace_before` (mutated by
/// the processor during concatenation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenType,
    pub value: String,
    pub line: usize,
    pub whitespace_before: String,
}

impl Token {
    pub fn new(
        kind: TokenType,
        value: impl Into<String>,
        line: usize,
        whitespace_before: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            line,
            whitespace_before: whitespace_before.into(),
        }
    }

    /// `t.value[1..]` for a `Macro` token (strips the leading `#`).
    pub fn macro_name(&self) -> &str {
        debug_assert_eq!(self.kind, TokenType::Macro);
        &self.value[1..]
    }

    /// `t.value[2..]` for a `MacroParameter` token (strips the leading `#%`).
    pub fn parameter_name(&self) -> &str {
        debug_assert_eq!(self.kind, TokenType::MacroParameter);
        &self.value[2..]
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Single-character operator/delimiter set, excluding `(`, `)`, `,` (which
/// get their own token types) and `#` (the directive sigil, handled
/// separately). Kept as a lazily-built set rather than a linear scan over a
/// slice since the lexer consults it for every non-identifier, non-digit
/// character in the source.
static PUNCTUATION: Lazy<HashSet<char>> = Lazy::new(|| {
    "{}[]?:;+-*/<>=|&^@~!$%".chars().collect()
});

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    whitespace: String,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            whitespace: String::new(),
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.pos];
        self.pos += 1;
        c
    }

    fn take_whitespace(&mut self) -> String {
        std::mem::take(&mut self.whitespace)
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while !self.is_eof() {
            let c = self.peek().unwrap();
            match c {
                ' ' | '\t' => {
                    self.whitespace.push(c);
                    self.advance();
                }
                '\r' => {
                    self.advance();
                    if self.peek() == Some('\n') {
                        self.advance();
                    }
                    self.line += 1;
                    self.whitespace.clear();
                }
                '\n' => {
                    self.advance();
                    self.line += 1;
                    self.whitespace.clear();
                }
                '#' => tokens.push(self.lex_directive_family()?),
                '(' => {
                    let ws = self.take_whitespace();
                    let line = self.line;
                    self.advance();
                    tokens.push(Token::new(TokenType::ParenLeft, "(", line, ws));
                }
                ')' => {
                    let ws = self.take_whitespace();
                    let line = self.line;
                    self.advance();
                    tokens.push(Token::new(TokenType::ParenRight, ")", line, ws));
                }
                ',' => {
                    let ws = self.take_whitespace();
                    let line = self.line;
                    self.advance();
                    tokens.push(Token::new(TokenType::Comma, ",", line, ws));
                }
                '\'' | '"' => tokens.push(self.lex_string(c)?),
                '.' => tokens.push(self.lex_dot()),
                '/' => {
                    if let Some(tok) = self.lex_slash()? {
                        tokens.push(tok);
                    }
                }
                c if c.is_ascii_digit() => tokens.push(self.lex_number()),
                c if is_ident_start(c) => tokens.push(self.lex_identifier()),
                c if PUNCTUATION.contains(&c) => {
                    let ws = self.take_whitespace();
                    let line = self.line;
                    self.advance();
                    tokens.push(Token::new(TokenType::Punctuation, c.to_string(), line, ws));
                }
                other => {
                    return Err(Error::UnexpectedToken {
                        line: self.line,
                        found: other.to_string(),
                    });
                }
            }
        }
        Ok(tokens)
    }

    /// Lexes the `#` sigil family: `##`, `#{`, `#}`, `#%`, `#@`, `#!`, and
    /// plain `#name` macro invocations.
    fn lex_directive_family(&mut self) -> Result<Token> {
        let line = self.line;
        let ws = self.take_whitespace();
        self.advance(); // consume '#'
        match self.peek() {
            Some(c2) if c2 == '#' || c2 == '%' || c2 == '!' => {
                self.advance();
                match self.peek() {
                    Some(c3) if is_ident_start(c3) => {}
                    _ => {
                        return Err(Error::UnexpectedToken {
                            line,
                            found: format!("#{c2}"),
                        })
                    }
                }
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if is_ident_continue(c) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let ident: String = self.chars[start..self.pos].iter().collect();
                let kind = match c2 {
                    '#' => TokenType::Directive,
                    '%' => TokenType::MacroParameter,
                    '!' => TokenType::MacroKeyword,
                    _ => unreachable!(),
                };
                Ok(Token::new(kind, format!("#{c2}{ident}"), line, ws))
            }
            Some('{') => {
                self.advance();
                Ok(Token::new(TokenType::DirectiveCurlyLeft, "#{", line, ws))
            }
            Some('}') => {
                self.advance();
                Ok(Token::new(TokenType::DirectiveCurlyRight, "#}", line, ws))
            }
            Some('@') => {
                self.advance();
                Ok(Token::new(TokenType::MacroConcat, "#@", line, ws))
            }
            Some(c3) if is_ident_start(c3) => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if is_ident_continue(c) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let ident: String = self.chars[start..self.pos].iter().collect();
                Ok(Token::new(TokenType::Macro, format!("#{ident}"), line, ws))
            }
            _ => Err(Error::UnexpectedToken {
                line,
                found: "#".to_string(),
            }),
        }
    }

    /// String scan with the even/odd trailing-backslash escape rule: a
    /// quote only terminates the literal when the number of consecutive
    /// backslashes directly preceding it is even.
    fn lex_string(&mut self, quote: char) -> Result<Token> {
        let line = self.line;
        let ws = self.take_whitespace();
        let mut value = String::new();
        value.push(self.advance());
        let mut escapes = 0u32;
        loop {
            match self.peek() {
                None => return Err(Error::UnterminatedString { line }),
                Some('\r') | Some('\n') => return Err(Error::UnexpectedEndOfLine { line }),
                Some(c) => {
                    self.advance();
                    value.push(c);
                    if c == '\\' {
                        escapes += 1;
                    } else if c == quote && escapes % 2 == 0 {
                        break;
                    } else {
                        escapes = 0;
                    }
                }
            }
        }
        Ok(Token::new(TokenType::String, value, line, ws))
    }

    /// `.` is `MacroVarArgs` (`"..."`) only when exactly three dots appear
    /// in a row; otherwise it is ordinary `Punctuation`.
    fn lex_dot(&mut self) -> Token {
        let line = self.line;
        let ws = self.take_whitespace();
        self.advance();
        if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
            self.advance();
            self.advance();
            Token::new(TokenType::MacroVarArgs, "...", line, ws)
        } else {
            Token::new(TokenType::Punctuation, ".", line, ws)
        }
    }

    /// `/` dispatches to a line comment, a nestable block comment, or the
    /// plain `/` punctuation token.
    fn lex_slash(&mut self) -> Result<Option<Token>> {
        let line = self.line;
        if self.peek_at(1) == Some('/') {
            self.advance();
            self.advance();
            while let Some(c) = self.peek() {
                if c == '\n' || c == '\r' {
                    break;
                }
                self.advance();
            }
            Ok(None)
        } else if self.peek_at(1) == Some('*') {
            self.advance();
            self.advance();
            let mut depth = 1u32;
            loop {
                match self.peek() {
                    None => return Err(Error::UnterminatedComment { line }),
                    Some('\n') => {
                        self.advance();
                        self.line += 1;
                        self.whitespace.clear();
                    }
                    Some('\r') => {
                        self.advance();
                        if self.peek() == Some('\n') {
                            self.advance();
                        }
                        self.line += 1;
                        self.whitespace.clear();
                    }
                    Some('/') if self.peek_at(1) == Some('*') => {
                        self.advance();
                        self.advance();
                        depth += 1;
                    }
                    Some('*') if self.peek_at(1) == Some('/') => {
                        self.advance();
                        self.advance();
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    Some(_) => {
                        self.advance();
                    }
                }
            }
            Ok(None)
        } else {
            let ws = self.take_whitespace();
            self.advance();
            Ok(Some(Token::new(TokenType::Punctuation, "/", line, ws)))
        }
    }

    fn lex_number(&mut self) -> Token {
        let line = self.line;
        let ws = self.take_whitespace();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }
        let value: String = self.chars[start..self.pos].iter().collect();
        Token::new(TokenType::Number, value, line, ws)
    }

    /// Identifiers additionally swallow `::`-continuations (`Pkg::Sub::fn`
    /// lexes as a single token).
    fn lex_identifier(&mut self) -> Token {
        let line = self.line;
        let ws = self.take_whitespace();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.advance();
            } else {
                break;
            }
        }
        loop {
            let continues = self.peek() == Some(':')
                && self.peek_at(1) == Some(':')
                && self.peek_at(2).is_some_and(is_ident_start);
            if !continues {
                break;
            }
            self.advance();
            self.advance();
            while let Some(c) = self.peek() {
                if is_ident_continue(c) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let value: String = self.chars[start..self.pos].iter().collect();
        Token::new(TokenType::Identifier, value, line, ws)
    }
}

/// Tokenizes a complete source file (component B's public entry point).
pub fn lex(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenType> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn directive_family_dispatch() {
        let tokens = lex("##blcs\n##define\n#{\n#}\n#%param\n#!line\n#@\n#macroname").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenType::Directive,
                TokenType::Directive,
                TokenType::DirectiveCurlyLeft,
                TokenType::DirectiveCurlyRight,
                TokenType::MacroParameter,
                TokenType::MacroKeyword,
                TokenType::MacroConcat,
                TokenType::Macro,
            ]
        );
        assert_eq!(tokens[4].value, "#%param");
        assert_eq!(tokens[4].parameter_name(), "param");
        assert_eq!(tokens[7].value, "#macroname");
        assert_eq!(tokens[7].macro_name(), "macroname");
    }

    #[test]
    fn bare_hash_without_identifier_is_an_error() {
        assert!(lex("# 1").is_err());
    }

    #[test]
    fn vararg_sentinel_requires_three_dots() {
        let tokens = lex("a .. b ...").unwrap();
        assert_eq!(tokens[1].kind, TokenType::Punctuation);
        assert_eq!(tokens[1].value, ".");
        assert_eq!(tokens[2].kind, TokenType::Punctuation);
        assert_eq!(tokens[2].value, ".");
        assert_eq!(tokens.last().unwrap().kind, TokenType::MacroVarArgs);
    }

    #[test]
    fn string_escapes_and_even_odd_rule() {
        let tokens = lex(r#""a\"b" "c\\""#).unwrap();
        assert_eq!(tokens[0].value, r#""a\"b""#);
        assert_eq!(tokens[1].value, r#""c\\""#);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(lex("\"abc").is_err());
    }

    #[test]
    fn string_cannot_span_a_newline() {
        assert!(lex("\"abc\ndef\"").is_err());
    }

    #[test]
    fn nested_block_comments() {
        let tokens = lex("/* outer /* inner */ still outer */ x").unwrap();
        assert_eq!(kinds(&tokens), vec![TokenType::Identifier]);
        assert_eq!(tokens[0].value, "x");
    }

    #[test]
    fn unterminated_block_comment_is_an_error() {
        assert!(lex("/* never closed").is_err());
    }

    #[test]
    fn whitespace_and_line_tracking() {
        let tokens = lex("a  b\nc").unwrap();
        assert_eq!(tokens[1].whitespace_before, "  ");
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[2].line, 2);
        assert_eq!(tokens[2].whitespace_before, "");
    }

    #[test]
    fn namespace_continuation_identifiers() {
        let tokens = lex("Pkg::Sub::fn").unwrap();
        assert_eq!(kinds(&tokens), vec![TokenType::Identifier]);
        assert_eq!(tokens[0].value, "Pkg::Sub::fn");
    }

    #[test]
    fn dollar_and_percent_are_plain_punctuation() {
        let tokens = lex("$Global %Local").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenType::Punctuation,
                TokenType::Identifier,
                TokenType::Punctuation,
                TokenType::Identifier,
            ]
        );
    }
}
