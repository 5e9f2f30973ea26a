//! Run artifacts: a frozen parse run with statistics and anomaly flags.
//!
//! Anomaly detection is heuristic but deterministic: the primary signal for
//! "this integer is a length" is that some `length_field` in the grammar
//! references it; the name-shape heuristic is a fallback for grammars that
//! have not wired the reference yet.

use std::collections::HashSet;

use tracing::debug;

use crate::clock::monotonic_millis;
use crate::coverage::analyze_coverage;
use crate::grammar::{Grammar, LengthSpec};
use crate::parse::{FieldValue, ParseResult, ParsedField, ParsedRecord};

/// A length value at or above `min(file_size, ABSURD_LENGTH_CAP)` is flagged
/// high severity. Rule of thumb, tunable.
pub const ABSURD_LENGTH_CAP: u64 = 1 << 20;

/// Kind of detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    ParseError,
    RecordError,
    AbsurdLength,
    FieldOverflow,
    BoundaryMismatch,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::ParseError => "parse_error",
            AnomalyKind::RecordError => "record_error",
            AnomalyKind::AbsurdLength => "absurd_length",
            AnomalyKind::FieldOverflow => "field_overflow",
            AnomalyKind::BoundaryMismatch => "boundary_mismatch",
        }
    }
}

/// Severity, ordered so `High` sorts above `Medium` above `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One detected anomaly, attributed to a record offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub record_offset: u64,
    pub field_name: Option<String>,
    pub message: String,
    pub value: Option<i64>,
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub record_count: usize,
    pub total_bytes_parsed: u64,
    pub parse_stopped_at: u64,
    pub file_size: u64,
    pub coverage_percentage: f64,
    pub error_count: usize,
    pub anomaly_count: usize,
    pub high_severity_anomalies: usize,
}

/// Frozen artifact of one parse run, tied to a grammar version.
#[derive(Debug, Clone)]
pub struct RunArtifact {
    pub run_id: String,
    pub spec_version_id: String,
    pub created_at_ms: u64,
    pub parse_result: ParseResult,
    pub file_path: String,
    pub file_size: u64,
    /// Sorted by `(record_offset, severity descending)`.
    pub anomalies: Vec<Anomaly>,
    pub stats: RunStats,
}

/// Build the artifact: detect anomalies, compute stats, freeze.
///
/// `run_id` defaults to a content-addressed stable hash. The grammar, when
/// available, sharpens the length-field heuristic.
pub fn create_run_artifact(
    run_id: Option<String>,
    spec_version_id: &str,
    parse_result: ParseResult,
    file_path: &str,
    file_size: u64,
    grammar: Option<&Grammar>,
) -> RunArtifact {
    let anomalies = detect_anomalies(&parse_result, grammar, file_size);
    let stats = compute_stats(&parse_result, file_size, &anomalies);
    let created_at_ms = monotonic_millis();
    let run_id = run_id.unwrap_or_else(|| {
        stable_run_id(spec_version_id, file_path, file_size, created_at_ms)
    });
    debug!(
        run_id = %run_id,
        records = stats.record_count,
        anomalies = stats.anomaly_count,
        "run artifact created"
    );
    RunArtifact {
        run_id,
        spec_version_id: spec_version_id.to_string(),
        created_at_ms,
        parse_result,
        file_path: file_path.to_string(),
        file_size,
        anomalies,
        stats,
    }
}

pub fn compute_stats(
    parse_result: &ParseResult,
    file_size: u64,
    anomalies: &[Anomaly],
) -> RunStats {
    let coverage = analyze_coverage(parse_result, file_size);
    RunStats {
        record_count: parse_result.record_count,
        total_bytes_parsed: parse_result.total_bytes_parsed,
        parse_stopped_at: parse_result.parse_stopped_at,
        file_size,
        coverage_percentage: coverage.coverage_percentage,
        error_count: parse_result.errors.len(),
        anomaly_count: anomalies.len(),
        high_severity_anomalies: anomalies
            .iter()
            .filter(|a| a.severity == Severity::High)
            .count(),
    }
}

/// Scan a parse result for anomalies. Deterministic; results are sorted by
/// `(record_offset, severity descending)`.
pub fn detect_anomalies(
    parse_result: &ParseResult,
    grammar: Option<&Grammar>,
    file_size: u64,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let length_targets = grammar.map(length_target_names).unwrap_or_default();
    let absurd_at = file_size.min(ABSURD_LENGTH_CAP);

    for error in &parse_result.errors {
        anomalies.push(Anomaly {
            kind: AnomalyKind::ParseError,
            severity: Severity::High,
            record_offset: parse_result.parse_stopped_at,
            field_name: None,
            message: error.clone(),
            value: None,
        });
    }

    for record in &parse_result.records {
        if let Some(error) = &record.error {
            anomalies.push(Anomaly {
                kind: AnomalyKind::RecordError,
                severity: Severity::High,
                record_offset: record.offset,
                field_name: None,
                message: error.clone(),
                value: None,
            });
            continue;
        }

        if record.offset + record.size > file_size {
            anomalies.push(Anomaly {
                kind: AnomalyKind::FieldOverflow,
                severity: Severity::High,
                record_offset: record.offset,
                field_name: None,
                message: format!(
                    "record size {} exceeds the {} bytes left in the file",
                    record.size,
                    file_size.saturating_sub(record.offset)
                ),
                value: Some(record.size as i64),
            });
        }

        let top_level_sum: u64 = record.fields.iter().map(|f| f.size).sum();
        if top_level_sum != record.size {
            anomalies.push(Anomaly {
                kind: AnomalyKind::BoundaryMismatch,
                severity: Severity::Medium,
                record_offset: record.offset,
                field_name: None,
                message: format!(
                    "field sizes sum to {top_level_sum} but the record spans {}",
                    record.size
                ),
                value: Some(top_level_sum as i64),
            });
        }

        check_length_fields(record, &record.fields, &length_targets, absurd_at, &mut anomalies);
    }

    anomalies.sort_by(|a, b| {
        a.record_offset
            .cmp(&b.record_offset)
            .then(b.severity.cmp(&a.severity))
    });
    anomalies
}

/// Integer fields that look like lengths: flagged high when at or past the
/// absurd cap, medium when larger than the bytes remaining in the record.
fn check_length_fields(
    record: &ParsedRecord,
    fields: &[ParsedField],
    length_targets: &HashSet<String>,
    absurd_at: u64,
    anomalies: &mut Vec<Anomaly>,
) {
    for field in fields {
        match &field.value {
            FieldValue::Record(nested) => {
                check_length_fields(record, nested, length_targets, absurd_at, anomalies);
            }
            FieldValue::Int(value) => {
                if !is_length_field(&field.name, length_targets) {
                    continue;
                }
                let remaining_after = record
                    .end()
                    .saturating_sub(field.offset + field.size);
                if *value >= absurd_at {
                    anomalies.push(Anomaly {
                        kind: AnomalyKind::AbsurdLength,
                        severity: Severity::High,
                        record_offset: record.offset,
                        field_name: Some(field.name.clone()),
                        message: format!(
                            "length field `{}` is {value}, past the plausibility cap {absurd_at}",
                            field.name
                        ),
                        value: Some(*value as i64),
                    });
                } else if *value > remaining_after {
                    anomalies.push(Anomaly {
                        kind: AnomalyKind::AbsurdLength,
                        severity: Severity::Medium,
                        record_offset: record.offset,
                        field_name: Some(field.name.clone()),
                        message: format!(
                            "length field `{}` is {value} with only {remaining_after} bytes left in the record",
                            field.name
                        ),
                        value: Some(*value as i64),
                    });
                }
            }
            _ => {}
        }
    }
}

fn is_length_field(name: &str, length_targets: &HashSet<String>) -> bool {
    if length_targets.contains(name) {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    lower.ends_with("_len") || lower.starts_with("length") || lower.starts_with("len_")
}

/// Field names referenced as lengths anywhere in the grammar: every
/// `length_field` target plus every `length_expr` identifier.
fn length_target_names(grammar: &Grammar) -> HashSet<String> {
    let mut targets = HashSet::new();
    for type_def in grammar.types.values() {
        for field in &type_def.fields {
            match &field.length {
                LengthSpec::Field(target) => {
                    targets.insert(target.clone());
                }
                LengthSpec::Expr(src) => {
                    if let Ok(expr) = crate::expr::Expr::parse(src) {
                        targets.extend(expr.idents().map(str::to_string));
                    }
                }
                _ => {}
            }
        }
    }
    targets
}

// FNV-1a, 64-bit. Stable across processes, not cryptographic: run ids only
// need to be deterministic and collision-unlikely.
const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x0000_0100_0000_01B3;

fn fnv1a64(hash: u64, bytes: &[u8]) -> u64 {
    bytes.iter().fold(hash, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(FNV1A_PRIME)
    })
}

/// Content-addressed run id: stable hash of the identifying inputs.
pub fn stable_run_id(
    spec_version_id: &str,
    file_path: &str,
    file_size: u64,
    created_at_ms: u64,
) -> String {
    let mut hash = FNV1A_OFFSET;
    hash = fnv1a64(hash, spec_version_id.as_bytes());
    hash = fnv1a64(hash, file_path.as_bytes());
    hash = fnv1a64(hash, &file_size.to_le_bytes());
    hash = fnv1a64(hash, &created_at_ms.to_le_bytes());
    format!("run-{hash:016x}")
}
