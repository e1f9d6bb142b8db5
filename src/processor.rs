//! The directive processor.
//!
//! Operates on a mutable token stream using a `(peek, read, remove, insert,
//! seek)` cursor protocol: recursive macro expansion is achieved by
//! rewinding the cursor after an insertion, never by native recursion over
//! the host language's call stack. Three passes run in order: validate the
//! merged macro table (existence + cycles), expand macro invocations and
//! strip directive lines, then resolve `#@` concatenation.

use crate::error::{Error, Result};
use crate::lexer::{Token, TokenType};
use crate::parser::Macro;
use std::collections::{HashMap, HashSet};

/// A growable token vector with an explicit integer cursor. Intentionally
/// not an iterator: the processor needs to remove and insert spans of the
/// very sequence it is walking.
struct TokenStream {
    tokens: Vec<Token>,
    index: usize,
}

impl TokenStream {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    fn is_eof(&self) -> bool {
        self.index >= self.tokens.len()
    }

    fn index(&self) -> usize {
        self.index
    }

    fn peek(&self, offset: isize) -> Option<&Token> {
        let idx = self.index as isize + offset;
        if idx < 0 {
            return None;
        }
        self.tokens.get(idx as usize)
    }

    fn read(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.index).cloned();
        if tok.is_some() {
            self.index += 1;
        }
        tok
    }

    fn remove(&mut self, start: usize, count: usize) {
        self.tokens.drain(start..start + count);
    }

    fn insert(&mut self, start: usize, new_tokens: Vec<Token>) {
        self.tokens.splice(start..start, new_tokens);
    }

    fn seek(&mut self, index: usize) {
        self.index = index;
    }

    fn set_value(&mut self, index: usize, value: String) {
        self.tokens[index].value = value;
    }

    fn clear_whitespace(&mut self, index: usize) {
        if let Some(t) = self.tokens.get_mut(index) {
            t.whitespace_before.clear();
        }
    }

    fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }
}

/// Runs all three passes against the merged macro table, returning the
/// fully expanded, directive-free token list for one file.
pub fn process(tokens: Vec<Token>, macros: &HashMap<String, Macro>) -> Result<Vec<Token>> {
    validate_macros(macros)?;
    let mut stream = TokenStream::new(tokens);
    expand_and_strip(&mut stream, macros)?;
    concatenate(&mut stream)?;
    Ok(stream.into_tokens())
}

/// Pass 1: cross-file macro/parameter existence plus cycle detection over
/// the merged table.
fn validate_macros(macros: &HashMap<String, Macro>) -> Result<()> {
    for m in macros.values() {
        for tok in &m.body {
            match tok.kind {
                TokenType::Macro => {
                    let target = tok.macro_name();
                    if target == m.name {
                        return Err(Error::Syntax {
                            line: tok.line,
                            message: format!("macro '{}' cannot reference itself", m.name),
                        });
                    }
                    if !macros.contains_key(target) {
                        return Err(Error::UndefinedMacro {
                            line: tok.line,
                            name: target.to_string(),
                        });
                    }
                }
                TokenType::MacroParameter => {
                    if !m.arguments.iter().any(|a| a == tok.parameter_name()) {
                        return Err(Error::UndefinedMacroParameter {
                            line: tok.line,
                            name: tok.parameter_name().to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
    }
    detect_cycles(macros)
}

fn detect_cycles(macros: &HashMap<String, Macro>) -> Result<()> {
    // Sorted rather than hash order: keeps the reported cycle path
    // deterministic across runs instead of depending on HashMap iteration.
    let mut names: Vec<&str> = macros.keys().map(String::as_str).collect();
    names.sort_unstable();
    let mut visited: HashSet<&str> = HashSet::new();
    for start in names {
        let mut path: Vec<&str> = Vec::new();
        dfs(start, macros, &mut visited, &mut path)?;
    }
    Ok(())
}

fn dfs<'a>(
    name: &'a str,
    macros: &'a HashMap<String, Macro>,
    visited: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    if visited.contains(name) {
        return Ok(());
    }
    path.push(name);
    if let Some(m) = macros.get(name) {
        for referenced in &m.macros {
            if path.contains(&referenced.as_str()) {
                let joined = path
                    .iter()
                    .map(|n| format!("'{n}'"))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(Error::InfiniteMacroRecursion { path: joined });
            }
            dfs(referenced, macros, visited, path)?;
        }
    }
    path.pop();
    visited.insert(name);
    Ok(())
}

/// Pass 2: a single forward walk that expands every `Macro` invocation and
/// strips every directive line.
fn expand_and_strip(stream: &mut TokenStream, macros: &HashMap<String, Macro>) -> Result<()> {
    while !stream.is_eof() {
        let tok = stream.read().unwrap();
        match tok.kind {
            TokenType::Macro => expand_macro(stream, macros, &tok)?,
            TokenType::Directive => strip_directive(stream, macros, &tok)?,
            _ => {}
        }
    }
    Ok(())
}

/// Replaces a macro invocation (and its argument list, if any) with the
/// macro's materialized body, then rewinds the cursor to the insertion
/// point so a body that itself invokes further macros gets re-examined on
/// the next loop iteration.
fn expand_macro(stream: &mut TokenStream, macros: &HashMap<String, Macro>, macro_tok: &Token) -> Result<()> {
    let start = stream.index() - 1;
    let name = macro_tok.macro_name();
    let m = macros.get(name).ok_or_else(|| Error::UndefinedMacro {
        line: macro_tok.line,
        name: name.to_string(),
    })?;
    let line = macro_tok.line;
    let args = collect_arguments(stream, m, line)?;
    let mut body = materialize_body(m, &args, line)?;
    // The macro body's first token had its own `whitespace_before` cleared
    // at parse time (src/parser.rs); the invocation site's leading gap
    // belongs to the expansion's first emitted token instead.
    if let Some(first) = body.first_mut() {
        first.whitespace_before = macro_tok.whitespace_before.clone();
    }
    let removed = stream.index() - start;
    stream.remove(start, removed);
    stream.insert(start, body);
    stream.seek(start);
    Ok(())
}

/// A token-level scan that balances parentheses at depth one; commas at
/// nested depth greater than one never split arguments.
fn collect_arguments(stream: &mut TokenStream, m: &Macro, line: usize) -> Result<Vec<Vec<Token>>> {
    if m.arguments.is_empty() {
        return Ok(Vec::new());
    }
    let has_paren = matches!(stream.peek(0), Some(t) if t.kind == TokenType::ParenLeft);
    if !has_paren {
        if m.fixed_argument_count() > 0 {
            return Err(Error::Syntax {
                line,
                message: format!("macro '{}' requires arguments", m.name),
            });
        }
        return Ok(Vec::new());
    }
    stream.read(); // consume '('

    let mut depth = 1usize;
    let mut arg_index = 0usize;
    let mut args: Vec<Vec<Token>> = Vec::new();

    loop {
        let peeked = match stream.peek(0) {
            Some(t) => t.kind,
            None => return Err(Error::UnexpectedEndOfCode { line }),
        };
        match peeked {
            TokenType::ParenLeft => depth += 1,
            TokenType::ParenRight => depth -= 1,
            _ => {}
        }
        if depth == 0 {
            stream.read();
            break;
        }
        let tok = stream.read().unwrap();
        if depth == 1 && tok.kind == TokenType::Comma {
            arg_index += 1;
        } else {
            while args.len() <= arg_index {
                args.push(Vec::new());
            }
            let mut copy = tok;
            copy.line = line;
            args[arg_index].push(copy);
        }
    }

    if args.len() < m.fixed_argument_count() {
        return Err(Error::Syntax {
            line,
            message: format!("macro '{}': not enough arguments", m.name),
        });
    }
    if args.len() > m.fixed_argument_count() && !m.is_variadic {
        return Err(Error::Syntax {
            line,
            message: format!("macro '{}': too many arguments", m.name),
        });
    }
    Ok(args)
}

/// Substitutes parameters and built-in keywords, rebinding every emitted
/// token's `line` to the invocation line.
fn materialize_body(m: &Macro, args: &[Vec<Token>], line: usize) -> Result<Vec<Token>> {
    let fixed = m.fixed_argument_count();
    let mut out = Vec::with_capacity(m.body.len());

    for tok in &m.body {
        match tok.kind {
            TokenType::MacroParameter => {
                let pname = tok.parameter_name();
                let idx = m
                    .arguments
                    .iter()
                    .position(|a| a == pname)
                    .expect("parser already validated this parameter reference");
                for a in &args[idx] {
                    let mut copy = a.clone();
                    copy.line = line;
                    out.push(copy);
                }
            }
            TokenType::MacroKeyword => match tok.value.as_str() {
                "#!line" => out.push(Token::new(
                    TokenType::Number,
                    line.to_string(),
                    line,
                    tok.whitespace_before.clone(),
                )),
                "#!vargc" => {
                    // Non-positive when extra variadic arguments are present,
                    // despite the "count" name; reproduces the documented
                    // formula verbatim rather than the actual extra-arg count.
                    let count = fixed as i64 - args.len() as i64;
                    out.push(Token::new(
                        TokenType::Number,
                        count.to_string(),
                        line,
                        tok.whitespace_before.clone(),
                    ));
                }
                "#!vargs" | "#!vargsp" => {
                    if args.len() > fixed {
                        let prepend_comma = tok.value == "#!vargsp";
                        if prepend_comma {
                            out.push(Token::new(TokenType::Comma, ",", line, tok.whitespace_before.clone()));
                        }
                        for i in fixed..args.len() {
                            let mut group: Vec<Token> = args[i].clone();
                            if i == fixed {
                                if let Some(first) = group.first_mut() {
                                    first.whitespace_before = if prepend_comma {
                                        " ".to_string()
                                    } else {
                                        tok.whitespace_before.clone()
                                    };
                                }
                            }
                            for a in &group {
                                let mut copy = a.clone();
                                copy.line = line;
                                out.push(copy);
                            }
                            if i + 1 < args.len() {
                                out.push(Token::new(TokenType::Comma, ",", line, ""));
                            }
                        }
                    }
                }
                other => {
                    return Err(Error::Syntax {
                        line: tok.line,
                        message: format!("unknown macro keyword '{other}'"),
                    })
                }
            },
            TokenType::Macro => {
                // Left for the caller: once spliced back in, the rewind in
                // `expand_macro` lets the outer loop re-expand it.
                let mut copy = tok.clone();
                copy.line = line;
                out.push(copy);
            }
            TokenType::Directive | TokenType::DirectiveCurlyLeft | TokenType::DirectiveCurlyRight | TokenType::MacroVarArgs => {
                // The parser already rejects these inside a body; reaching
                // here would mean that check regressed.
                return Err(Error::UnexpectedToken {
                    line: tok.line,
                    found: tok.value.clone(),
                });
            }
            _ => {
                let mut copy = tok.clone();
                copy.line = line;
                out.push(copy);
            }
        }
    }
    Ok(out)
}

/// Removes the directive line itself (`##blcs`, `##use "..."`, or an
/// entire `##define`, bracketed or not).
fn strip_directive(stream: &mut TokenStream, macros: &HashMap<String, Macro>, directive_tok: &Token) -> Result<()> {
    let start = stream.index() - 1;
    match directive_tok.value.as_str() {
        "##use" => {
            stream.read().ok_or(Error::UnexpectedEndOfCode { line: directive_tok.line })?;
        }
        "##define" => {
            let name_tok = stream
                .read()
                .ok_or(Error::UnexpectedEndOfCode { line: directive_tok.line })?;
            let m = macros.get(&name_tok.value).ok_or_else(|| Error::UndefinedMacro {
                line: directive_tok.line,
                name: name_tok.value.clone(),
            })?;
            if !m.arguments.is_empty() {
                loop {
                    match stream.read() {
                        Some(t) if t.kind == TokenType::ParenRight => break,
                        Some(_) => {}
                        None => return Err(Error::UnexpectedEndOfCode { line: directive_tok.line }),
                    }
                }
            }
            if let Some(next) = stream.peek(0) {
                if next.kind == TokenType::DirectiveCurlyLeft {
                    stream.read();
                    loop {
                        match stream.read() {
                            Some(t) if t.kind == TokenType::DirectiveCurlyRight => break,
                            Some(_) => {}
                            None => return Err(Error::UnexpectedEndOfCode { line: directive_tok.line }),
                        }
                    }
                } else {
                    while let Some(t) = stream.peek(0) {
                        if t.line == directive_tok.line {
                            stream.read();
                        } else {
                            break;
                        }
                    }
                }
            }
        }
        "##blcs" => {}
        other => {
            return Err(Error::Syntax {
                line: directive_tok.line,
                message: format!("unknown directive '{other}'"),
            })
        }
    }
    let count = stream.index() - start;
    stream.remove(start, count);
    stream.seek(start);
    Ok(())
}

/// Pass 3: `#@` concatenation, including string-literal merging when both
/// operands share the same quote character.
fn concatenate(stream: &mut TokenStream) -> Result<()> {
    stream.seek(0);
    while !stream.is_eof() {
        let tok = stream.read().unwrap();
        if tok.kind != TokenType::MacroConcat {
            continue;
        }
        let concat_index = stream.index() - 1;
        let left = stream.peek(-2).cloned();
        let right = stream.peek(0).cloned();
        match (left, right) {
            (Some(l), Some(r)) if l.kind == TokenType::String && r.kind == TokenType::String && same_quote(&l.value, &r.value) => {
                let quote = l.value.chars().next().unwrap();
                let merged = format!("{quote}{}{}{quote}", inner(&l.value), inner(&r.value));
                let left_index = concat_index - 1;
                stream.set_value(left_index, merged);
                stream.remove(concat_index, 2);
                stream.seek(concat_index - 1);
            }
            (Some(_), Some(_)) => {
                let right_index = concat_index + 1;
                stream.clear_whitespace(right_index);
                stream.remove(concat_index, 1);
                stream.seek(concat_index);
            }
            _ => {
                return Err(Error::UnexpectedEndOfCode { line: tok.line });
            }
        }
    }
    Ok(())
}

fn same_quote(a: &str, b: &str) -> bool {
    a.chars().next() == b.chars().next()
}

fn inner(value: &str) -> &str {
    &value[1..value.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;
    use std::collections::HashMap;

    fn expand(source: &str) -> Result<Vec<Token>> {
        let tokens = lex(source).unwrap();
        let data = parse(&tokens).unwrap();
        process(tokens, &data.macros)
    }

    fn values(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.value.as_str()).collect()
    }

    #[test]
    fn simple_macro_expansion() {
        let out = expand("##blcs\n##define MAX 9\nreturn #MAX;\n").unwrap();
        assert_eq!(values(&out), vec!["return", "9", ";"]);
        assert!(out.iter().all(|t| t.line == 3));
    }

    #[test]
    fn macro_invocation_site_whitespace_survives_expansion() {
        // The space before `#MAX` belongs to the expansion's first token,
        // not to the macro body's own (cleared-at-parse-time) leading
        // whitespace; reconstructed text must keep `return 9;`, not fuse
        // into `return9;`.
        let out = expand("##blcs\n##define MAX 9\nreturn #MAX;\n").unwrap();
        assert_eq!(crate::emitter::emit(&out), "return 9;");
    }

    #[test]
    fn parameterized_macro_expansion() {
        let out = expand("##blcs\n##define add(a, b) #%a + #%b\nreturn #add(1, 2);\n").unwrap();
        assert_eq!(values(&out), vec!["return", "1", "+", "2", ";"]);
    }

    #[test]
    fn nested_parens_do_not_split_arguments() {
        let out = expand("##blcs\n##define id(a) #%a\n#id(f(a, g(b, c), d));\n").unwrap();
        // The single argument should pass through with its internal commas intact.
        assert_eq!(values(&out)[0..11], vec!["f", "(", "a", ",", "g", "(", "b", ",", "c", ")", ","]);
    }

    #[test]
    fn variadic_vargsp_prepends_comma() {
        let out = expand(
            "##blcs\n##define err(code, ...)\n#{\n$LastError = #%code;\nerror(\"e\" #!vargsp);\n#}\n#err(1, \"a\", \"b\");\n",
        )
        .unwrap();
        assert_eq!(
            values(&out),
            vec![
                "$LastError", "=", "1", ";", "error", "(", "\"e\"", ",", "\"a\"", ",", "\"b\"", ")", ";"
            ]
        );
    }

    #[test]
    fn vargs_without_prepend_has_no_leading_comma() {
        let out = expand(
            "##blcs\n##define f(a, ...)\n#{\ncall(#%a #!vargs);\n#}\n#f(1, 2, 3);\n",
        )
        .unwrap();
        assert_eq!(values(&out), vec!["call", "(", "1", "2", ",", "3", ")", ";"]);
    }

    #[test]
    fn vargc_uses_literal_formula() {
        let out = expand(
            "##blcs\n##define f(a, ...)\n#{\n#!vargc\n#}\n#f(1, 2, 3);\n",
        )
        .unwrap();
        // fixed_argument_count(1) - len(args)(3) == -2
        assert_eq!(values(&out), vec!["-2", ";"]);
    }

    #[test]
    fn line_keyword_reflects_invocation_line() {
        let out = expand("##blcs\n##define f #!line\nx();\n#f;\n").unwrap();
        let line_tok = out.iter().find(|t| t.value == "4").unwrap();
        assert_eq!(line_tok.line, 4);
    }

    #[test]
    fn matching_quote_strings_merge_on_concat() {
        let out = expand("##blcs\n##define cat(x,y) #%x #@ #%y\necho(#cat(\"hi \", \"there\"));\n").unwrap();
        assert_eq!(values(&out), vec!["echo", "(", "\"hi there\"", ")", ";"]);
    }

    #[test]
    fn mismatched_quote_strings_do_not_merge() {
        let out = expand("##blcs\n##define cat(x,y) #%x #@ #%y\necho(#cat(\"a\", 'b'));\n").unwrap();
        assert_eq!(values(&out), vec!["echo", "(", "\"a\"", "'b'", ")", ";"]);
        let right = out.iter().find(|t| t.value == "'b'").unwrap();
        assert_eq!(right.whitespace_before, "");
    }

    #[test]
    fn direct_cycle_is_rejected() {
        let err = expand("##blcs\n##define A #B\n##define B #A\n#A\n").unwrap_err();
        match err {
            Error::InfiniteMacroRecursion { path } => assert_eq!(path, "'A' -> 'B'"),
            other => panic!("expected InfiniteMacroRecursion, got {other:?}"),
        }
    }

    #[test]
    fn cross_reference_to_missing_macro_is_rejected() {
        let err = expand("##blcs\n##define A #Missing\n#A\n").unwrap_err();
        assert!(matches!(err, Error::UndefinedMacro { name, .. } if name == "Missing"));
    }

    #[test]
    fn directives_are_fully_stripped() {
        let out = expand("##blcs\n##define X 1\n#X\n").unwrap();
        assert_eq!(values(&out), vec!["1"]);
    }

    #[test]
    fn too_many_arguments_without_variadic_is_rejected() {
        let err = expand("##blcs\n##define f(a) #%a\n#f(1, 2);\n").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }
}
