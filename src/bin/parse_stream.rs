//! Parse a binary with a grammar and print a run summary: records, errors,
//! coverage, anomalies, and the run score.
//!
//! Usage:
//!   parse_stream GRAMMAR.yaml BINARY [--records N] [--bytes N] [--verbose]

use anyhow::{bail, Context};
use bingram::{
    analyze_coverage, create_run_artifact, lint_grammar, parse_binary, score_run, ByteRead,
    FieldValue, MmapReader, ParseOptions, ParsedField,
};

fn print_field(field: &ParsedField, indent: usize) {
    let pad = "  ".repeat(indent);
    match &field.value {
        FieldValue::Int(v) => println!("{pad}{}: {v} ({:#x})", field.name, v),
        FieldValue::Text(s) => println!("{pad}{}: {s:?}", field.name),
        FieldValue::Bytes(b) => {
            let hex: String = b.iter().take(16).map(|x| format!("{x:02x} ")).collect();
            let ellipsis = if b.len() > 16 { "..." } else { "" };
            println!("{pad}{}: {} byte(s) {hex}{ellipsis}", field.name, b.len());
        }
        FieldValue::Record(nested) => {
            println!("{pad}{}:", field.name);
            for child in nested {
                print_field(child, indent + 1);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = if let Some(pos) = args.iter().position(|a| a == "--verbose" || a == "-v") {
        args.remove(pos);
        true
    } else {
        false
    };
    let record_limit = take_flag_value(&mut args, "--records")?;
    let byte_limit = take_flag_value(&mut args, "--bytes")?;

    let [grammar_path, binary_path] = args.as_slice() else {
        bail!("usage: parse_stream GRAMMAR.yaml BINARY [--records N] [--bytes N] [--verbose]");
    };

    let text = std::fs::read_to_string(grammar_path)
        .with_context(|| format!("read {grammar_path}"))?;
    let outcome = lint_grammar(&text);
    for warning in &outcome.warnings {
        eprintln!("{grammar_path}: warning: {warning}");
    }
    let Some(grammar) = outcome.grammar else {
        for error in &outcome.errors {
            eprintln!("{grammar_path}: error: {error}");
        }
        bail!("grammar is not valid");
    };

    let reader = MmapReader::open(binary_path).with_context(|| format!("open {binary_path}"))?;
    let file_size = reader.size();
    let opts = ParseOptions {
        offset: 0,
        byte_limit,
        record_limit: record_limit.map(|n| n as usize),
    };
    let result = parse_binary(&grammar, &reader, binary_path, &opts);

    println!(
        "{binary_path}: {} record(s), {} error(s), stopped at {:#x} of {:#x}",
        result.record_count,
        result.errors.len(),
        result.parse_stopped_at,
        file_size
    );
    if verbose {
        for record in &result.records {
            match &record.error {
                None => {
                    println!(
                        "record {} @ {:#x} ({} bytes){}",
                        record.type_name,
                        record.offset,
                        record.size,
                        record
                            .type_discriminator
                            .as_deref()
                            .map(|d| format!(" disc={d}"))
                            .unwrap_or_default()
                    );
                    for field in &record.fields {
                        print_field(field, 1);
                    }
                }
                Some(error) => println!("record @ {:#x}: error: {error}", record.offset),
            }
        }
    }
    for error in &result.errors {
        println!("error: {error}");
    }

    let coverage = analyze_coverage(&result, file_size);
    println!(
        "coverage: {:.1}% ({} of {} bytes), {} gap(s)",
        coverage.coverage_percentage,
        coverage.bytes_covered,
        coverage.file_size,
        coverage.gaps.len()
    );
    if let Some((start, end)) = coverage.largest_gap {
        println!("largest gap: [{start:#x}, {end:#x})");
    }

    let artifact = create_run_artifact(None, "cli", result, binary_path, file_size, Some(&grammar));
    for anomaly in &artifact.anomalies {
        println!(
            "anomaly [{:?}] {} @ {:#x}: {}",
            anomaly.severity,
            anomaly.kind.as_str(),
            anomaly.record_offset,
            anomaly.message
        );
    }
    let score = score_run(&artifact, None);
    println!("score: {:.1} ({})", score.total_score, score.summary);

    Ok(())
}

fn take_flag_value(args: &mut Vec<String>, flag: &str) -> anyhow::Result<Option<u64>> {
    let Some(pos) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{flag} needs a value");
    }
    args.remove(pos);
    let value = args.remove(pos);
    let parsed = value
        .parse::<u64>()
        .with_context(|| format!("{flag} value `{value}`"))?;
    Ok(Some(parsed))
}
