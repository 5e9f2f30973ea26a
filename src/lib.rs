//! # bingram: grammar workbench for binary record streams
//!
//! A toolkit for iteratively reverse-engineering unknown binary formats:
//! write a declarative YAML grammar for a record stream, run it against a
//! binary, inspect where parsing succeeds and fails, patch the grammar, and
//! compare runs.
//!
//! ## Grammar
//!
//! The text form is YAML with `format`, `endian`, `framing`, `types`,
//! `record`, and `registry` sections:
//!
//! ```yaml
//! format: record_stream
//! endian: little
//! framing: {repeat: until_eof}
//! types:
//!   R:
//!     fields:
//!       - {name: t, type: u16}
//!       - {name: n, type: u8}
//!       - {name: p, type: bytes, length: n}
//! record: {use: R}
//! ```
//!
//! ## The loop
//!
//! 1. [`lint_grammar`] validates text into a [`Grammar`].
//! 2. [`SpecStore::create_initial`] freezes it as a version.
//! 3. [`parse_binary`] decodes a byte stream into a [`ParseResult`].
//! 4. [`analyze_coverage`], [`generate_spans`], [`query_records`], and
//!    [`decode_field`] turn the result into analyzable views.
//! 5. [`create_run_artifact`] freezes the run with anomaly flags.
//! 6. A [`Patch`] applies atomically via [`SpecStore::apply_patch`];
//!    [`diff_runs`] and [`score_run`] compare the re-parse to the baseline.
//!
//! Every tool is a pure function over immutable inputs; [`SpecStore`] is the
//! single stateful component and is single-writer.

mod clock;

pub mod coverage;
pub mod decode;
pub mod expr;
pub mod grammar;
pub mod lint;
pub mod parse;
pub mod patch;
pub mod query;
pub mod reader;
pub mod run;
pub mod score;
pub mod spans;
pub mod store;

pub use coverage::{analyze_coverage, CoverageReport};
pub use decode::{decode_field, DecodedValue};
pub use expr::{evaluate, Expr, ExprError};
pub use grammar::{
    normalize_color, normalize_hex_literal, DecoderKind, Dispatch, Endian, FieldDef, FieldType,
    Format, Framing, Grammar, LengthSpec, RegistryEntry, TypeDef, ValidateRule,
};
pub use lint::{lint_grammar, LintError, LintOutcome, LintWarning};
pub use parse::{
    parse_binary, FieldError, FieldValue, ParseOptions, ParseResult, ParsedField, ParsedRecord,
    RecordParser,
};
pub use patch::{path_to_string, Patch, PatchError, PatchOp, PathSeg};
pub use query::{query_records, RecordFilter, RecordSet};
pub use reader::{ByteRead, MmapReader, SliceReader};
pub use run::{
    create_run_artifact, detect_anomalies, Anomaly, AnomalyKind, RunArtifact, RunStats, Severity,
};
pub use score::{diff_runs, find_best_run, rank_runs, score_run, RunDiff, ScoreBreakdown};
pub use spans::{generate_spans, Span, SpanCache, SpanGroup, SpanIndex, SpanSet};
pub use store::{PatchResult, SpecDiff, SpecStore, SpecVersion};
