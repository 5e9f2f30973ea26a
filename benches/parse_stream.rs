//! Benchmark: parse a synthetic record stream, then generate spans and
//! coverage for it. Measures records/s for the dispatch path (header preamble
//! + length-prefixed payload), plus the derived views over the same result.

use bingram::{
    analyze_coverage, generate_spans, lint_grammar, parse_binary, Grammar, ParseOptions,
    SliceReader,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const GRAMMAR: &str = r#"
format: record_stream
endian: little
framing: {repeat: until_eof}
types:
  Hdr:
    fields:
      - {name: type_raw, type: u16}
      - {name: seq, type: u16}
  Rec:
    fields:
      - {name: header, type: Hdr}
      - {name: len, type: u8}
      - {name: payload, type: bytes, length: len}
record:
  switch:
    expr: Hdr.type_raw
    cases: {"0x0065": Rec}
    default: Rec
"#;

/// Lay out `count` records end to end: u16 type, u16 seq, u8 len, payload.
fn synthesize_stream(count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count * 24);
    for i in 0..count {
        let payload_len = (i % 17) as u8;
        out.extend_from_slice(&0x0065u16.to_le_bytes());
        out.extend_from_slice(&(i as u16).to_le_bytes());
        out.push(payload_len);
        out.extend((0..payload_len).map(|b| b.wrapping_mul(7)));
    }
    out
}

fn validated_grammar() -> Grammar {
    let outcome = lint_grammar(GRAMMAR);
    assert!(outcome.is_valid(), "lint errors: {:?}", outcome.errors);
    outcome.grammar.expect("valid grammar")
}

fn bench_parse_stream(c: &mut Criterion) {
    let grammar = validated_grammar();
    let bytes = synthesize_stream(10_000);
    let reader = SliceReader::new(&bytes);
    let opts = ParseOptions::default();

    let warmup = parse_binary(&grammar, &reader, "bench.bin", &opts);
    assert_eq!(warmup.record_count, 10_000);
    assert!(warmup.errors.is_empty());
    eprintln!(
        "parse_stream: {} records, {} bytes",
        warmup.record_count, warmup.total_bytes_parsed
    );

    c.bench_function("parse_10k_records", |b| {
        b.iter(|| {
            let result = parse_binary(
                &grammar,
                black_box(&reader),
                "bench.bin",
                black_box(&opts),
            );
            black_box(result.record_count)
        });
    });

    c.bench_function("lint_grammar", |b| {
        b.iter(|| black_box(lint_grammar(black_box(GRAMMAR)).is_valid()));
    });

    let result = parse_binary(&grammar, &reader, "bench.bin", &opts);
    let file_size = bytes.len() as u64;

    c.bench_function("spans_4k_viewport", |b| {
        b.iter(|| {
            let set = generate_spans(black_box(&result), 0, 4096);
            black_box(set.spans().len())
        });
    });

    c.bench_function("coverage_10k_records", |b| {
        b.iter(|| {
            let report = analyze_coverage(black_box(&result), file_size);
            black_box(report.coverage_percentage)
        });
    });
}

criterion_group!(benches, bench_parse_stream);
criterion_main!(benches);
