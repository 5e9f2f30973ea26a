//! Record queries: pure filters over a parse result.
//!
//! A query never fails; invalid filter values produce an empty set whose
//! `filter_applied` explains the rejection.

use crate::parse::{ParseResult, ParsedRecord};

/// Filter to apply over the records of a parse result.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordFilter {
    /// Identity.
    All,
    /// Exact `type_name` match.
    Type(String),
    /// Records overlapping the half-open range.
    OffsetRange(u64, u64),
    /// Field name present at the record's top level (not nested).
    HasField(String),
}

/// Frozen query result. `original_count` is preserved for proportion
/// reporting.
#[derive(Debug, Clone)]
pub struct RecordSet {
    pub records: Vec<ParsedRecord>,
    pub filter_applied: String,
    pub total_count: usize,
    pub original_count: usize,
}

/// Filter records. Pure and total: this never raises.
pub fn query_records(result: &ParseResult, filter: &RecordFilter) -> RecordSet {
    let original_count = result.records.len();
    let rejected = |description: String| RecordSet {
        records: Vec::new(),
        filter_applied: description,
        total_count: 0,
        original_count,
    };

    let (records, filter_applied): (Vec<ParsedRecord>, String) = match filter {
        RecordFilter::All => (result.records.clone(), "all records".to_string()),
        RecordFilter::Type(name) => (
            result
                .records
                .iter()
                .filter(|r| r.type_name == *name)
                .cloned()
                .collect(),
            format!("type={name}"),
        ),
        RecordFilter::OffsetRange(start, end) => {
            if start > end {
                return rejected(format!(
                    "offset_range=({start:#x}, {end:#x}) (invalid: start > end)"
                ));
            }
            (
                result
                    .records
                    .iter()
                    .filter(|r| r.offset < *end && r.end() > *start)
                    .cloned()
                    .collect(),
                format!("offset_range=({start:#x}, {end:#x})"),
            )
        }
        RecordFilter::HasField(name) => (
            result
                .records
                .iter()
                .filter(|r| r.field(name).is_some())
                .cloned()
                .collect(),
            format!("has_field={name}"),
        ),
    };

    RecordSet {
        total_count: records.len(),
        records,
        filter_applied,
        original_count,
    }
}
