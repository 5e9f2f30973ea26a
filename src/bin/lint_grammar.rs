//! Lint grammar files: validate YAML record-stream grammars and report
//! errors and warnings.
//!
//! Usage:
//!   lint_grammar [FILE.yaml ...]
//!   lint_grammar < grammar.yaml
//!
//! If no files are given, reads from stdin. Exit code 1 if any file fails
//! validation.

use bingram::lint_grammar;
use std::io::Read;

fn lint_one(path: &str, text: &str) -> bool {
    let outcome = lint_grammar(text);
    for error in &outcome.errors {
        println!("{path}: error: {error}");
    }
    for warning in &outcome.warnings {
        println!("{path}: warning: {warning}");
    }
    if outcome.is_valid() {
        if let Some(grammar) = &outcome.grammar {
            eprintln!(
                "{path}: ok ({} type(s), {} registry entr(ies))",
                grammar.types.len(),
                grammar.registry.len()
            );
        }
    }
    outcome.is_valid()
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut has_error = false;

    if args.is_empty() {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        if !lint_one("<stdin>", &text) {
            has_error = true;
        }
    } else {
        for path in &args {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("{path}: {e}");
                    has_error = true;
                    continue;
                }
            };
            if !lint_one(path, &text) {
                has_error = true;
            }
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}
