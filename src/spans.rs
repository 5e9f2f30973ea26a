//! Viewport-scoped span generation: byte offset to owning leaf field.
//!
//! Spans are leaf-level only; the leaves of a clean record tile its byte
//! range without gaps or overlaps. Generation is scoped to a half-open
//! viewport so large files only pay for what is visible.

use crate::parse::{FieldValue, ParseResult, ParsedField, ParsedRecord};

/// Display group of a leaf span, classified from the field's value variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanGroup {
    Int,
    String,
    Bytes,
    Float,
    Unknown,
}

impl SpanGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanGroup::Int => "int",
            SpanGroup::String => "string",
            SpanGroup::Bytes => "bytes",
            SpanGroup::Float => "float",
            SpanGroup::Unknown => "unknown",
        }
    }
}

/// A leaf field interval `[offset, offset+length)` with its dotted path.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub offset: u64,
    pub length: u64,
    /// Dotted path rooted at the record type, e.g. `Rec.header.magic`.
    pub path: String,
    pub group: SpanGroup,
    pub color_override: Option<String>,
}

impl Span {
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.offset + self.length
    }
}

/// Offset-sorted spans with binary-search lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanIndex {
    spans: Vec<Span>,
}

impl SpanIndex {
    fn new(mut spans: Vec<Span>) -> Self {
        spans.sort_by_key(|s| s.offset);
        SpanIndex { spans }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// The span owning `offset`, if any. O(log n).
    pub fn find(&self, offset: u64) -> Option<&Span> {
        let idx = self.spans.partition_point(|s| s.offset <= offset);
        if idx == 0 {
            return None;
        }
        let span = &self.spans[idx - 1];
        span.contains(offset).then_some(span)
    }
}

/// Immutable span set for one viewport.
#[derive(Debug, Clone)]
pub struct SpanSet {
    pub viewport_start: u64,
    pub viewport_end: u64,
    /// Number of records that contributed spans.
    pub record_count: usize,
    index: SpanIndex,
}

impl SpanSet {
    pub fn spans(&self) -> &[Span] {
        self.index.spans()
    }

    pub fn find(&self, offset: u64) -> Option<&Span> {
        self.index.find(offset)
    }

    pub fn index(&self) -> &SpanIndex {
        &self.index
    }
}

/// Generate leaf spans for every clean record overlapping the viewport.
pub fn generate_spans(result: &ParseResult, viewport_start: u64, viewport_end: u64) -> SpanSet {
    let offsets = record_offsets(result);
    let indices = records_in_viewport(&offsets, viewport_start, viewport_end);
    let mut spans = Vec::new();
    for &idx in &indices {
        emit_record_spans(&result.records[idx], &mut spans);
    }
    SpanSet {
        viewport_start,
        viewport_end,
        record_count: indices.len(),
        index: SpanIndex::new(spans),
    }
}

/// Lightweight record location, indexed once per parse result.
#[derive(Debug, Clone, Copy)]
struct RecordOffset {
    offset: u64,
    size: u64,
    record_index: usize,
}

fn record_offsets(result: &ParseResult) -> Vec<RecordOffset> {
    result
        .records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.error.is_none())
        .map(|(i, r)| RecordOffset {
            offset: r.offset,
            size: r.size,
            record_index: i,
        })
        .collect()
}

/// Record indices overlapping `[start, end)`. Predecessor binary search on
/// the monotonic offsets, then a forward scan.
fn records_in_viewport(offsets: &[RecordOffset], start: u64, end: u64) -> Vec<usize> {
    if offsets.is_empty() || start >= end {
        return Vec::new();
    }
    let first = offsets.partition_point(|r| r.offset <= start).saturating_sub(1);
    let mut overlapping = Vec::new();
    for rec in &offsets[first..] {
        if rec.offset >= end {
            break;
        }
        if rec.offset + rec.size > start {
            overlapping.push(rec.record_index);
        }
    }
    overlapping
}

fn emit_record_spans(record: &ParsedRecord, out: &mut Vec<Span>) {
    for field in &record.fields {
        emit_field_spans(field, &record.type_name, out);
    }
}

fn emit_field_spans(field: &ParsedField, prefix: &str, out: &mut Vec<Span>) {
    let path = format!("{prefix}.{}", field.name);
    match &field.value {
        FieldValue::Record(nested) => {
            for child in nested {
                emit_field_spans(child, &path, out);
            }
        }
        leaf => {
            let group = match leaf {
                FieldValue::Int(_) => SpanGroup::Int,
                FieldValue::Text(_) => SpanGroup::String,
                FieldValue::Bytes(_) => SpanGroup::Bytes,
                FieldValue::Record(_) => SpanGroup::Unknown,
            };
            out.push(Span {
                offset: field.offset,
                length: field.size,
                path,
                group,
                color_override: field.color.clone(),
            });
        }
    }
}

/// Viewport span manager with single-entry caching: repeating the previous
/// viewport returns the cached index without regenerating. Borrowing the
/// parse result keeps the cache valid for its lifetime.
pub struct SpanCache<'a> {
    result: &'a ParseResult,
    offsets: Vec<RecordOffset>,
    viewport: Option<(u64, u64)>,
    cached: SpanIndex,
}

impl<'a> SpanCache<'a> {
    pub fn new(result: &'a ParseResult) -> Self {
        SpanCache {
            offsets: record_offsets(result),
            result,
            viewport: None,
            cached: SpanIndex::default(),
        }
    }

    /// Spans for `[start, end)`, regenerating only when the viewport moved.
    pub fn update_viewport(&mut self, start: u64, end: u64) -> &SpanIndex {
        if self.viewport != Some((start, end)) {
            let mut spans = Vec::new();
            for &idx in &records_in_viewport(&self.offsets, start, end) {
                emit_record_spans(&self.result.records[idx], &mut spans);
            }
            self.cached = SpanIndex::new(spans);
            self.viewport = Some((start, end));
        }
        &self.cached
    }

    pub fn span_index(&self) -> &SpanIndex {
        &self.cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(offset: u64, length: u64, path: &str) -> Span {
        Span {
            offset,
            length,
            path: path.to_string(),
            group: SpanGroup::Int,
            color_override: None,
        }
    }

    #[test]
    fn find_hits_owning_span_only() {
        let index = SpanIndex::new(vec![span(4, 2, "R.b"), span(0, 4, "R.a"), span(6, 3, "R.c")]);
        assert_eq!(index.find(0).map(|s| s.path.as_str()), Some("R.a"));
        assert_eq!(index.find(3).map(|s| s.path.as_str()), Some("R.a"));
        assert_eq!(index.find(4).map(|s| s.path.as_str()), Some("R.b"));
        assert_eq!(index.find(8).map(|s| s.path.as_str()), Some("R.c"));
        assert!(index.find(9).is_none());
    }

    #[test]
    fn find_in_gap_returns_none() {
        let index = SpanIndex::new(vec![span(0, 2, "R.a"), span(10, 2, "R.b")]);
        assert!(index.find(5).is_none());
        assert_eq!(index.find(10).map(|s| s.path.as_str()), Some("R.b"));
    }

    #[test]
    fn empty_index() {
        let index = SpanIndex::default();
        assert!(index.find(0).is_none());
        assert!(index.is_empty());
    }
}
