//! Coverage reports, anomaly detection, run diffing, scoring, and ranking.

use bingram::{
    analyze_coverage, create_run_artifact, detect_anomalies, diff_runs, find_best_run,
    lint_grammar, parse_binary, rank_runs, score_run, AnomalyKind, Grammar, ParseOptions,
    ParseResult, ParsedRecord, RunArtifact, RunStats, Severity, SliceReader,
};

fn grammar(text: &str) -> Grammar {
    let outcome = lint_grammar(text);
    assert!(outcome.is_valid(), "lint errors: {:?}", outcome.errors);
    outcome.grammar.expect("valid grammar has an AST")
}

fn record(offset: u64, size: u64) -> ParsedRecord {
    ParsedRecord {
        offset,
        size,
        type_name: "R".to_string(),
        fields: Vec::new(),
        type_discriminator: None,
        error: None,
    }
}

fn result_with(records: Vec<ParsedRecord>) -> ParseResult {
    let record_count = records.iter().filter(|r| r.error.is_none()).count();
    ParseResult {
        records,
        errors: Vec::new(),
        file_path: "test.bin".to_string(),
        grammar_format: "record_stream".to_string(),
        total_bytes_parsed: 0,
        parse_stopped_at: 0,
        timestamp_ms: 0,
        record_count,
    }
}

fn stats_artifact(
    run_id: &str,
    coverage: f64,
    errors: usize,
    anomalies: usize,
    high: usize,
    created_at_ms: u64,
) -> RunArtifact {
    RunArtifact {
        run_id: run_id.to_string(),
        spec_version_id: "v0".to_string(),
        created_at_ms,
        parse_result: result_with(Vec::new()),
        file_path: "test.bin".to_string(),
        file_size: 100,
        anomalies: Vec::new(),
        stats: RunStats {
            record_count: 1,
            total_bytes_parsed: 50,
            parse_stopped_at: 50,
            file_size: 100,
            coverage_percentage: coverage,
            error_count: errors,
            anomaly_count: anomalies,
            high_severity_anomalies: high,
        },
    }
}

// Coverage.

#[test]
fn coverage_with_gaps() {
    let result = result_with(vec![record(0, 4), record(10, 6)]);
    let report = analyze_coverage(&result, 20);
    assert_eq!(report.bytes_covered, 10);
    assert_eq!(report.bytes_uncovered, 10);
    assert_eq!(report.coverage_percentage, 50.0);
    assert_eq!(report.gaps, vec![(4, 10), (16, 20)]);
    assert_eq!(report.largest_gap, Some((4, 10)));
    assert_eq!(report.record_count, 2);
}

#[test]
fn coverage_largest_gap_tie_breaks_toward_smaller_start() {
    let result = result_with(vec![record(5, 5)]);
    let report = analyze_coverage(&result, 15);
    assert_eq!(report.gaps, vec![(0, 5), (10, 15)]);
    assert_eq!(report.largest_gap, Some((0, 5)));
}

#[test]
fn coverage_no_records_is_one_big_gap() {
    let result = result_with(Vec::new());
    let report = analyze_coverage(&result, 12);
    assert_eq!(report.coverage_percentage, 0.0);
    assert_eq!(report.gaps, vec![(0, 12)]);
}

#[test]
fn coverage_errored_records_are_excluded() {
    let mut bad = record(0, 4);
    bad.error = Some("short read".to_string());
    let result = result_with(vec![bad, record(4, 4)]);
    let report = analyze_coverage(&result, 8);
    assert_eq!(report.bytes_covered, 4);
    assert_eq!(report.gaps, vec![(0, 4)]);
    assert_eq!(report.record_count, 1);
}

// Anomaly detection.

#[test]
fn absurd_length_flags_by_name_heuristic() {
    let text = r#"
format: record_stream
endian: little
types:
  R:
    fields:
      - {name: data_len, type: u16}
      - {name: p, type: bytes, length: 2}
record: {use: R}
"#;
    let g = grammar(text);
    // data_len claims 60000 in a 4-byte file.
    let bytes = [0x60, 0xEA, 0xAA, 0xBB];
    let result = parse_binary(
        &g,
        &SliceReader::new(&bytes),
        "test.bin",
        &ParseOptions::default(),
    );
    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    let anomalies = detect_anomalies(&result, Some(&g), 4);
    let absurd: Vec<_> = anomalies
        .iter()
        .filter(|a| a.kind == AnomalyKind::AbsurdLength)
        .collect();
    assert_eq!(absurd.len(), 1);
    assert_eq!(absurd[0].severity, Severity::High);
    assert_eq!(absurd[0].field_name.as_deref(), Some("data_len"));
    assert_eq!(absurd[0].value, Some(0xEA60));
}

#[test]
fn absurd_length_medium_when_exceeding_record_remainder() {
    let text = r#"
format: record_stream
endian: little
types:
  R:
    fields:
      - {name: data_len, type: u16}
      - {name: p, type: bytes, length: 2}
record: {use: R}
"#;
    let g = grammar(text);
    // data_len = 3: below the file-size cap of 4 but past the 2 bytes left.
    let bytes = [0x03, 0x00, 0xAA, 0xBB];
    let result = parse_binary(
        &g,
        &SliceReader::new(&bytes),
        "test.bin",
        &ParseOptions::default(),
    );
    let anomalies = detect_anomalies(&result, Some(&g), 4);
    let absurd: Vec<_> = anomalies
        .iter()
        .filter(|a| a.kind == AnomalyKind::AbsurdLength)
        .collect();
    assert_eq!(absurd.len(), 1);
    assert_eq!(absurd[0].severity, Severity::Medium);
}

#[test]
fn grammar_length_references_trump_the_name_heuristic() {
    // `total` has no length-ish name; it is flagged because the grammar's
    // length expression references it.
    let text = r#"
format: record_stream
endian: little
types:
  R:
    fields:
      - {name: total, type: u16}
      - {name: text, type: bytes, length: "total - 4"}
record: {use: R}
"#;
    let g = grammar(text);
    let bytes = [0x0A, 0x00, b'a', b'b', b'c', b'd', b'e', b'f'];
    let result = parse_binary(
        &g,
        &SliceReader::new(&bytes),
        "test.bin",
        &ParseOptions::default(),
    );
    assert!(result.errors.is_empty());
    let anomalies = detect_anomalies(&result, Some(&g), 8);
    assert!(anomalies
        .iter()
        .any(|a| a.kind == AnomalyKind::AbsurdLength
            && a.field_name.as_deref() == Some("total")
            && a.severity == Severity::Medium));

    // Without the grammar the name heuristic alone says nothing.
    let anomalies = detect_anomalies(&result, None, 8);
    assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::AbsurdLength));
}

#[test]
fn field_overflow_past_declared_file_size() {
    let result = result_with(vec![record(0, 6), record(6, 3)]);
    let anomalies = detect_anomalies(&result, None, 8);
    let overflow: Vec<_> = anomalies
        .iter()
        .filter(|a| a.kind == AnomalyKind::FieldOverflow)
        .collect();
    assert_eq!(overflow.len(), 1);
    assert_eq!(overflow[0].record_offset, 6);
    assert_eq!(overflow[0].severity, Severity::High);
}

#[test]
fn parse_and_record_errors_are_high_severity() {
    let mut bad = record(6, 0);
    bad.error = Some("short read for field `n`: need 1 bytes, got 0".to_string());
    let mut result = result_with(vec![record(0, 6), bad]);
    result.errors = vec!["parse error at 0x6: short read".to_string()];
    result.parse_stopped_at = 6;

    let anomalies = detect_anomalies(&result, None, 9);
    assert!(anomalies
        .iter()
        .any(|a| a.kind == AnomalyKind::ParseError && a.severity == Severity::High));
    assert!(anomalies
        .iter()
        .any(|a| a.kind == AnomalyKind::RecordError && a.record_offset == 6));
}

#[test]
fn boundary_mismatch_when_fields_do_not_tile() {
    let mut broken = record(0, 10);
    broken.fields = vec![bingram::ParsedField {
        name: "a".to_string(),
        value: bingram::FieldValue::Int(1),
        offset: 0,
        size: 4,
        raw_bytes: vec![0; 4],
        color: None,
    }];
    let result = result_with(vec![broken]);
    let anomalies = detect_anomalies(&result, None, 10);
    assert!(anomalies
        .iter()
        .any(|a| a.kind == AnomalyKind::BoundaryMismatch && a.severity == Severity::Medium));
}

#[test]
fn anomalies_sort_by_offset_then_severity() {
    let mut far_bad = record(20, 0);
    far_bad.error = Some("boom".to_string());
    let mut near = record(0, 30);
    near.fields = vec![bingram::ParsedField {
        name: "a".to_string(),
        value: bingram::FieldValue::Int(1),
        offset: 0,
        size: 2,
        raw_bytes: vec![0; 2],
        color: None,
    }];
    let result = result_with(vec![near, far_bad]);
    // Record 0 trips field_overflow (high) and boundary_mismatch (medium).
    let anomalies = detect_anomalies(&result, None, 25);
    let keys: Vec<(u64, Severity)> = anomalies
        .iter()
        .map(|a| (a.record_offset, a.severity))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    assert_eq!(keys, sorted);
    assert_eq!(anomalies[0].record_offset, 0);
    assert_eq!(anomalies[0].severity, Severity::High);
}

#[test]
fn run_artifact_freezes_stats() {
    let text = r#"
format: record_stream
endian: little
types:
  R:
    fields:
      - {name: t, type: u16}
      - {name: n, type: u8}
      - {name: p, type: bytes, length: n}
record: {use: R}
"#;
    let g = grammar(text);
    let bytes = [0x01, 0x00, 0x03, 0x41, 0x42, 0x43, 0x02, 0x00, 0x00];
    let result = parse_binary(
        &g,
        &SliceReader::new(&bytes),
        "test.bin",
        &ParseOptions::default(),
    );
    let artifact = create_run_artifact(None, "v0", result, "test.bin", 9, Some(&g));
    assert_eq!(artifact.stats.record_count, 2);
    assert_eq!(artifact.stats.coverage_percentage, 100.0);
    assert_eq!(artifact.stats.error_count, 0);
    assert_eq!(artifact.stats.high_severity_anomalies, 0);
    assert!(artifact.run_id.starts_with("run-"));

    let explicit = create_run_artifact(
        Some("run-explicit".to_string()),
        "v0",
        artifact.parse_result.clone(),
        "test.bin",
        9,
        Some(&g),
    );
    assert_eq!(explicit.run_id, "run-explicit");
}

#[test]
fn stable_run_ids_are_deterministic() {
    let a = bingram::run::stable_run_id("v0", "a.bin", 64, 1000);
    let b = bingram::run::stable_run_id("v0", "a.bin", 64, 1000);
    let c = bingram::run::stable_run_id("v0", "a.bin", 64, 1001);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

// Diffing and scoring.

#[test]
fn diff_and_score_against_baseline() {
    let baseline = stats_artifact("run-a", 50.0, 2, 0, 0, 1);
    let candidate = stats_artifact("run-b", 80.0, 0, 1, 0, 2);

    let diff = diff_runs(&baseline, &candidate);
    assert_eq!(diff.coverage_delta, 30.0);
    assert_eq!(diff.error_delta, -2);
    assert_eq!(diff.anomaly_delta, 1);
    assert!(diff.is_improvement);

    let score = score_run(&candidate, Some(&baseline));
    assert!(score.passed_hard_gates);
    assert!((score.coverage_score - 56.0).abs() < 1e-9);
    assert_eq!(score.quality_score, 29.0);
    assert_eq!(score.total_score, 85.0);
    assert_eq!(score.soft_metrics.get("coverage_delta"), Some(&30.0));
}

#[test]
fn diff_of_a_run_with_itself_is_an_improvement() {
    let run = stats_artifact("run-a", 42.0, 1, 2, 0, 1);
    let diff = diff_runs(&run, &run);
    assert_eq!(diff.coverage_delta, 0.0);
    assert_eq!(diff.error_delta, 0);
    assert!(diff.is_improvement);
}

#[test]
fn regressions_are_not_improvements() {
    let baseline = stats_artifact("run-a", 50.0, 0, 0, 0, 1);
    let worse_coverage = stats_artifact("run-b", 40.0, 0, 0, 0, 2);
    assert!(!diff_runs(&baseline, &worse_coverage).is_improvement);

    let more_errors = stats_artifact("run-c", 50.0, 3, 0, 0, 3);
    assert!(!diff_runs(&baseline, &more_errors).is_improvement);

    let more_high = stats_artifact("run-d", 60.0, 0, 1, 1, 4);
    assert!(!diff_runs(&baseline, &more_high).is_improvement);
}

#[test]
fn hard_gates_zero_the_score() {
    let mut stalled = stats_artifact("run-a", 0.0, 1, 0, 0, 1);
    stalled.stats.record_count = 0;
    stalled.stats.parse_stopped_at = 0;
    let score = score_run(&stalled, None);
    assert!(!score.passed_hard_gates);
    assert_eq!(score.total_score, 0.0);
    assert_eq!(score.failed_gates, vec!["parse_advanced".to_string()]);

    let unsafe_run = stats_artifact("run-b", 90.0, 0, 1, 1, 2);
    let score = score_run(&unsafe_run, None);
    assert_eq!(score.total_score, 0.0);
    assert_eq!(score.failed_gates, vec!["no_safety_violations".to_string()]);
}

#[test]
fn score_is_bounded() {
    let perfect = stats_artifact("run-a", 100.0, 0, 0, 0, 1);
    assert_eq!(score_run(&perfect, None).total_score, 100.0);

    let noisy = stats_artifact("run-b", 10.0, 20, 50, 0, 2);
    let score = score_run(&noisy, None);
    assert_eq!(score.quality_score, 0.0);
    assert!((0.0..=100.0).contains(&score.total_score));
}

#[test]
fn rank_runs_orders_by_score_then_tie_breaks() {
    let best = stats_artifact("run-best", 80.0, 0, 0, 0, 5);
    let close = stats_artifact("run-close", 80.0, 0, 1, 0, 1);
    let weak = stats_artifact("run-weak", 90.0, 5, 0, 0, 2);
    let runs = vec![weak, close, best];

    let ranked = rank_runs(&runs);
    let ids: Vec<&str> = ranked.iter().map(|(run, _)| run.run_id.as_str()).collect();
    assert_eq!(ids, vec!["run-best", "run-close", "run-weak"]);

    // Exact stat ties resolve by earlier creation.
    let early = stats_artifact("run-early", 80.0, 0, 0, 0, 1);
    let late = stats_artifact("run-late", 80.0, 0, 0, 0, 9);
    let runs = [late, early];
    let ranked = rank_runs(&runs);
    assert_eq!(ranked[0].0.run_id, "run-early");
}

#[test]
fn find_best_run_wants_the_largest_improvement() {
    let baseline = stats_artifact("run-base", 50.0, 1, 0, 0, 1);
    let small = stats_artifact("run-small", 55.0, 1, 0, 0, 2);
    let big = stats_artifact("run-big", 70.0, 0, 0, 0, 3);
    let regression = stats_artifact("run-reg", 40.0, 0, 0, 0, 4);
    let candidates = vec![small, big, regression];

    let (best, diff) = find_best_run(&baseline, &candidates).expect("an improvement exists");
    assert_eq!(best.run_id, "run-big");
    assert_eq!(diff.coverage_delta, 20.0);

    let only_regressions = vec![stats_artifact("run-reg2", 10.0, 5, 0, 0, 5)];
    assert!(find_best_run(&baseline, &only_regressions).is_none());
}
