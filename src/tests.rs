//! End-to-end pipeline tests exercising spec.md §8's named scenarios,
//! kept separate from the per-module unit tests that live alongside each
//! component.

#[cfg(test)]
mod tests {
    use super::super::*;
    use indoc::indoc;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_dir() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("blcspp-e2e-test-{}-{n}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Runs the full pipeline over a single in-memory source, returning the
    /// reconstructed token values in order (whitespace and banners are not
    /// interesting here; token-level assertions read cleaner).
    fn process_tokens(source: &str) -> Result<Vec<Token>> {
        let dir = scratch_dir();
        let entry = dir.join("main.blcs");
        fs::write(&entry, source).unwrap();
        let orchestration = orchestrator::orchestrate(&entry, "blcs")?;
        assert_eq!(orchestration.files.len(), 1);
        let file = orchestration.files.into_iter().next().unwrap();
        processor::process(file.tokens, &orchestration.macros)
    }

    fn values(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.value.as_str()).collect()
    }

    fn lines(tokens: &[Token]) -> Vec<usize> {
        tokens.iter().map(|t| t.line).collect()
    }

    #[test]
    fn scenario_1_simple_expansion() {
        let tokens = process_tokens(indoc! {"
            ##blcs
            ##define MAX 9
            return #MAX;
        "})
        .unwrap();
        assert_eq!(values(&tokens), vec!["return", "9", ";"]);
        assert_eq!(lines(&tokens), vec![3, 3, 3]);
    }

    #[test]
    fn scenario_2_parameterized() {
        let tokens = process_tokens(indoc! {"
            ##blcs
            ##define add(a, b) #%a + #%b
            return #add(1, 2);
        "})
        .unwrap();
        assert_eq!(values(&tokens), vec!["return", "1", "+", "2", ";"]);
        assert!(tokens.iter().all(|t| t.line == 3));
    }

    #[test]
    fn scenario_3_variadic_with_prepend() {
        let tokens = process_tokens(indoc! {r#"
            ##blcs
            ##define err(code, ...)
            #{
            $LastError = #%code;
            error("e" #!vargsp);
            #}
            #err(1, "a", "b");
        "#})
        .unwrap();
        assert_eq!(
            values(&tokens),
            vec!["$LastError", "=", "1", ";", "error", "(", "\"e\"", ",", "\"a\"", ",", "\"b\"", ")", ";"]
        );
        assert!(tokens.iter().all(|t| t.line == 7));
    }

    #[test]
    fn scenario_4_string_concat() {
        let tokens = process_tokens(indoc! {r#"
            ##blcs
            ##define cat(x,y) #%x #@ #%y
            echo(#cat("hi ", "there"));
        "#})
        .unwrap();
        assert_eq!(values(&tokens), vec!["echo", "(", "\"hi there\"", ")", ";"]);
    }

    #[test]
    fn scenario_5_cycle() {
        let err = process_tokens(indoc! {"
            ##blcs
            ##define A #B
            ##define B #A
            #A
        "})
        .unwrap_err();
        match err {
            Error::InfiniteMacroRecursion { path } => assert_eq!(path, "'A' -> 'B'"),
            other => panic!("expected InfiniteMacroRecursion, got {other:?}"),
        }
    }

    #[test]
    fn scenario_6_cross_file() {
        let dir = scratch_dir();
        let entry = dir.join("main.blcs");
        let lib = dir.join("lib.blcs");
        fs::write(&entry, "##blcs\n##use \"lib.blcs\"\n#GREET\n").unwrap();
        fs::write(&lib, "##blcs\n##define GREET \"hello\"\n").unwrap();

        let mut pp = Preprocessor::new();
        pp.set_output_empty(true);
        let outputs = pp.process(&entry).unwrap();

        let main_output = outputs.iter().find(|o| o.path == entry.with_extension("cs")).unwrap();
        assert!(main_output.text.contains("\"hello\""));
    }

    #[test]
    fn whitespace_identity_on_plain_files() {
        let dir = scratch_dir();
        let entry = dir.join("plain.blcs");
        let source = "##blcs\nfunction main() {\n    return 0;\n}\n";
        fs::write(&entry, source).unwrap();

        let mut pp = Preprocessor::new();
        let outputs = pp.process(&entry).unwrap();
        assert_eq!(outputs.len(), 1);
        // Only the `##blcs` line (and its trailing newline) is stripped; every
        // other byte is preserved verbatim since there are no more directives.
        let body = outputs[0].text.trim_start_matches('\n').trim_end_matches('\n');
        assert_eq!(body, "function main() {\n    return 0;\n}");
    }

    #[test]
    fn duplicate_macro_across_files_is_rejected() {
        let dir = scratch_dir();
        let entry = dir.join("main.blcs");
        let lib = dir.join("lib.blcs");
        fs::write(&entry, "##blcs\n##use \"lib.blcs\"\n##define X 1\n#X\n").unwrap();
        fs::write(&lib, "##blcs\n##define X 2\n").unwrap();

        let mut pp = Preprocessor::new();
        let err = pp.process(&entry).unwrap_err();
        assert!(matches!(err, Error::MultipleDefinitions { name, .. } if name == "X"));
    }

    #[test]
    fn recursive_macro_expansion_terminates_when_acyclic() {
        let tokens = process_tokens(indoc! {"
            ##blcs
            ##define INNER 1
            ##define OUTER #INNER + #INNER
            return #OUTER;
        "})
        .unwrap();
        assert_eq!(values(&tokens), vec!["return", "1", "+", "1", ";"]);
    }

    #[test]
    fn nested_parens_do_not_split_arguments_end_to_end() {
        let tokens = process_tokens(indoc! {"
            ##blcs
            ##define first(a, b) #%a
            x = #first(f(1, 2), 3);
        "})
        .unwrap();
        assert_eq!(values(&tokens), vec!["x", "=", "f", "(", "1", ",", "2", ")", ";"]);
    }
}
