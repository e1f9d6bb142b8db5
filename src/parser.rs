//! The directive parser.
//!
//! Reads one file's token list linearly (single-token lookahead, no
//! backtracking) and produces a [`DirectiveData`]: the macros this file
//! defines and the relative paths it `##use`s. Structural validation that
//! can be decided from a single file's tokens happens here; validation
//! that needs the merged, cross-file macro table (existence of a
//! referenced macro, cycle detection) is deferred to the processor's first
//! pass.

use crate::error::{Error, Result};
use crate::lexer::{Token, TokenType};
use std::collections::{HashMap, HashSet};

/// A macro definition, read-only once the parser has inserted it into a
/// [`DirectiveData`].
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub line: usize,
    pub arguments: Vec<String>,
    pub body: Vec<Token>,
    /// Names of macros referenced from the body, in first-reference order
    /// (used for cycle detection by the processor's validation pass).
    pub macros: Vec<String>,
    pub is_variadic: bool,
}

impl Macro {
    pub fn fixed_argument_count(&self) -> usize {
        self.arguments.len() - usize::from(self.is_variadic)
    }
}

/// Per-file output of the parser.
#[derive(Debug, Default)]
pub struct DirectiveData {
    pub macros: HashMap<String, Macro>,
    pub files: HashSet<String>,
}

/// Strips the surrounding quote characters from a string token's lexeme.
fn strip_quotes(value: &str) -> &str {
    &value[1..value.len() - 1]
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    data: DirectiveData,
    directive_count: usize,
    has_blcs: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            data: DirectiveData::default(),
            directive_count: 0,
            has_blcs: false,
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        self.pos += 1;
        t
    }

    fn run(mut self) -> Result<DirectiveData> {
        while !self.is_eof() {
            let tok = self.advance();
            if tok.kind == TokenType::Directive {
                self.directive_count += 1;
                self.parse_top_directive(&tok)?;
            } else if tok.kind.is_body_only_preprocessor() {
                return Err(Error::UnexpectedToken {
                    line: tok.line,
                    found: format!("{} (only valid in a macro definition)", tok.value),
                });
            }
            // `Macro` tokens and ordinary source tokens pass through
            // untouched; the processor expands or copies them later.
        }
        if !self.has_blcs {
            return Err(Error::Syntax {
                line: 1,
                message: "file is missing the required '##blcs' directive".into(),
            });
        }
        Ok(self.data)
    }

    fn parse_top_directive(&mut self, directive: &Token) -> Result<()> {
        match directive.value.as_str() {
            "##blcs" => self.parse_blcs(directive),
            "##define" => self.parse_define(directive),
            "##use" => self.parse_use(directive),
            other => Err(Error::Syntax {
                line: directive.line,
                message: format!("unknown directive '{other}'"),
            }),
        }
    }

    fn parse_blcs(&mut self, directive: &Token) -> Result<()> {
        if self.directive_count != 1 {
            return Err(Error::Syntax {
                line: directive.line,
                message: "'##blcs' must be the first directive and appear exactly once".into(),
            });
        }
        if let Some(next) = self.peek() {
            if next.line == directive.line {
                return Err(Error::Syntax {
                    line: directive.line,
                    message: "'##blcs' must be the only token on its line".into(),
                });
            }
        }
        self.has_blcs = true;
        Ok(())
    }

    fn parse_use(&mut self, directive: &Token) -> Result<()> {
        let tok = self
            .peek()
            .cloned()
            .ok_or(Error::UnexpectedEndOfLine { line: directive.line })?;
        if tok.kind != TokenType::String || tok.line != directive.line {
            return Err(Error::UnexpectedEndOfLine { line: directive.line });
        }
        self.advance();
        if let Some(next) = self.peek() {
            if next.line == directive.line {
                return Err(Error::Syntax {
                    line: directive.line,
                    message: "'##use' takes a single string argument".into(),
                });
            }
        }
        self.data.files.insert(strip_quotes(&tok.value).to_string());
        Ok(())
    }

    fn parse_define(&mut self, directive: &Token) -> Result<()> {
        let name_tok = self
            .peek()
            .cloned()
            .ok_or(Error::UnexpectedEndOfLine { line: directive.line })?;
        if name_tok.kind != TokenType::Identifier || name_tok.line != directive.line {
            return Err(Error::UnexpectedToken {
                line: directive.line,
                found: name_tok.value,
            });
        }
        self.advance();
        let name = name_tok.value.clone();
        if self.data.macros.contains_key(&name) {
            return Err(Error::MultipleDefinitions {
                line: directive.line,
                name,
            });
        }

        let mut arguments = Vec::new();
        let mut is_variadic = false;
        if let Some(next) = self.peek() {
            if next.kind == TokenType::ParenLeft && next.line == name_tok.line {
                self.advance();
                self.parse_define_args(directive, &mut arguments, &mut is_variadic)?;
            }
        }

        let mut brackets = false;
        if let Some(next) = self.peek() {
            if next.kind == TokenType::DirectiveCurlyLeft {
                if next.line != directive.line && next.line != directive.line + 1 {
                    return Err(Error::Syntax {
                        line: directive.line,
                        message: "'#{' must be on the '##define' line or the next".into(),
                    });
                }
                brackets = true;
            }
        }

        let mut body = self.parse_define_body(directive, &name, &arguments, is_variadic, brackets)?;
        if !brackets && body.is_empty() {
            return Err(Error::UnexpectedEndOfLine { line: directive.line });
        }
        if body.first().is_some_and(|t| t.kind == TokenType::MacroConcat) {
            return Err(Error::Syntax {
                line: directive.line,
                message: "macro body cannot begin with '#@'".into(),
            });
        }
        if body.last().is_some_and(|t| t.kind == TokenType::MacroConcat) {
            return Err(Error::Syntax {
                line: directive.line,
                message: "macro body cannot end with '#@'".into(),
            });
        }
        if let Some(first) = body.first_mut() {
            first.whitespace_before.clear();
        }

        let mut macros = Vec::new();
        for tok in &body {
            if tok.kind == TokenType::Macro {
                let referenced = tok.macro_name().to_string();
                if !macros.contains(&referenced) {
                    macros.push(referenced);
                }
            }
        }

        self.data.macros.insert(
            name.clone(),
            Macro {
                name,
                line: directive.line,
                arguments,
                body,
                macros,
                is_variadic,
            },
        );
        Ok(())
    }

    fn parse_define_args(
        &mut self,
        directive: &Token,
        arguments: &mut Vec<String>,
        is_variadic: &mut bool,
    ) -> Result<()> {
        let mut prev_line = directive.line;
        loop {
            let tok = self
                .peek()
                .cloned()
                .ok_or(Error::UnexpectedEndOfCode { line: directive.line })?;
            if tok.line != prev_line {
                return Err(Error::Syntax {
                    line: directive.line,
                    message: "macro parameter list must stay on one line".into(),
                });
            }
            match tok.kind {
                TokenType::Identifier | TokenType::MacroVarArgs => {
                    arguments.push(tok.value.clone());
                    self.advance();
                }
                _ => {
                    return Err(Error::UnexpectedToken {
                        line: tok.line,
                        found: tok.value,
                    })
                }
            }
            prev_line = tok.line;

            let sep = self
                .peek()
                .cloned()
                .ok_or(Error::UnexpectedEndOfCode { line: directive.line })?;
            if sep.line != prev_line {
                return Err(Error::Syntax {
                    line: directive.line,
                    message: "macro parameter list must stay on one line".into(),
                });
            }
            match sep.kind {
                TokenType::Comma => {
                    self.advance();
                }
                TokenType::ParenRight => {
                    self.advance();
                    break;
                }
                _ => {
                    return Err(Error::UnexpectedToken {
                        line: sep.line,
                        found: sep.value,
                    })
                }
            }
        }

        if let Some(pos) = arguments.iter().position(|a| a == "...") {
            *is_variadic = true;
            if pos != arguments.len() - 1 {
                return Err(Error::Syntax {
                    line: directive.line,
                    message: "variadic parameters must be last".into(),
                });
            }
        }
        Ok(())
    }

    fn parse_define_body(
        &mut self,
        directive: &Token,
        macro_name: &str,
        arguments: &[String],
        is_variadic: bool,
        brackets: bool,
    ) -> Result<Vec<Token>> {
        if brackets {
            self.advance(); // consume '#{'
        }
        let mut body = Vec::new();
        loop {
            let tok = match self.peek() {
                Some(t) => t.clone(),
                None => {
                    if brackets {
                        return Err(Error::UnexpectedEndOfCode { line: directive.line });
                    }
                    break;
                }
            };
            if brackets {
                if tok.kind == TokenType::DirectiveCurlyRight {
                    self.advance();
                    break;
                }
            } else if tok.line != directive.line {
                break;
            }
            self.advance();
            self.validate_body_token(&tok, macro_name, arguments, is_variadic)?;
            body.push(tok);
        }
        Ok(body)
    }

    /// Structural checks on a macro body token decidable from this file
    /// alone. Cross-file macro existence is checked later by the processor
    /// against the merged table.
    fn validate_body_token(
        &self,
        tok: &Token,
        macro_name: &str,
        arguments: &[String],
        is_variadic: bool,
    ) -> Result<()> {
        match tok.kind {
            TokenType::Macro => {
                if tok.macro_name() == macro_name {
                    return Err(Error::Syntax {
                        line: tok.line,
                        message: format!("macro '{macro_name}' cannot reference itself"),
                    });
                }
            }
            TokenType::MacroParameter => {
                if !arguments.iter().any(|a| a == tok.parameter_name()) {
                    return Err(Error::UndefinedMacroParameter {
                        line: tok.line,
                        name: tok.parameter_name().to_string(),
                    });
                }
            }
            TokenType::MacroKeyword => match tok.value.as_str() {
                "#!line" => {}
                "#!vargc" | "#!vargs" | "#!vargsp" => {
                    if !is_variadic {
                        return Err(Error::Syntax {
                            line: tok.line,
                            message: format!("'{}' requires a variadic macro", tok.value),
                        });
                    }
                }
                _ => {
                    return Err(Error::Syntax {
                        line: tok.line,
                        message: format!("unknown macro keyword '{}'", tok.value),
                    })
                }
            },
            TokenType::Directive
            | TokenType::DirectiveCurlyLeft
            | TokenType::DirectiveCurlyRight
            | TokenType::MacroVarArgs => {
                return Err(Error::UnexpectedToken {
                    line: tok.line,
                    found: tok.value.clone(),
                });
            }
            _ => {}
        }
        Ok(())
    }
}

/// Parses one file's token list into its macro/import table.
pub fn parse(tokens: &[Token]) -> Result<DirectiveData> {
    Parser::new(tokens.to_vec()).run()
}
