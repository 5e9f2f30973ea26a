//! Lint fuzz target: feed arbitrary text to the grammar linter.
//! The linter must not panic; it returns a LintOutcome for any input.
//! Build with: cargo fuzz run lint_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let _ = bingram::lint_grammar(s);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run lint_fuzz");
}
