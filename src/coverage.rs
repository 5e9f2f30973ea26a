//! Coverage analysis: which bytes of the input are claimed by clean records.
//!
//! Records with errors are excluded. Gaps are the complement of the merged
//! covered ranges within `[0, file_size)`, including leading and trailing
//! gaps.

use crate::parse::ParseResult;

/// Immutable coverage report over one parse result.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub file_size: u64,
    pub bytes_covered: u64,
    pub bytes_uncovered: u64,
    /// Percentage in `[0, 100]`; zero for an empty file.
    pub coverage_percentage: f64,
    /// Uncovered half-open ranges, in offset order.
    pub gaps: Vec<(u64, u64)>,
    /// Number of error-free records.
    pub record_count: usize,
    /// Widest gap; ties break toward the smaller start.
    pub largest_gap: Option<(u64, u64)>,
}

/// Analyze parse coverage against the input size.
pub fn analyze_coverage(result: &ParseResult, file_size: u64) -> CoverageReport {
    let mut ranges: Vec<(u64, u64)> = result
        .clean_records()
        .map(|r| (r.offset, r.end().min(file_size)))
        .filter(|(start, end)| end > start)
        .collect();
    ranges.sort_unstable();
    let merged = merge_ranges(ranges);

    let bytes_covered: u64 = merged.iter().map(|(start, end)| end - start).sum();
    let bytes_uncovered = file_size.saturating_sub(bytes_covered);
    let gaps = find_gaps(&merged, file_size);
    let largest_gap = gaps
        .iter()
        .copied()
        .reduce(|best, gap| if gap.1 - gap.0 > best.1 - best.0 { gap } else { best });
    let coverage_percentage = if file_size > 0 {
        bytes_covered as f64 / file_size as f64 * 100.0
    } else {
        0.0
    };

    CoverageReport {
        file_size,
        bytes_covered,
        bytes_uncovered,
        coverage_percentage,
        gaps,
        record_count: result.record_count,
        largest_gap,
    }
}

/// Merge overlapping or adjacent sorted ranges in one linear pass.
fn merge_ranges(ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn find_gaps(covered: &[(u64, u64)], file_size: u64) -> Vec<(u64, u64)> {
    if file_size == 0 {
        return Vec::new();
    }
    if covered.is_empty() {
        return vec![(0, file_size)];
    }
    let mut gaps = Vec::new();
    let mut cursor = 0u64;
    for &(start, end) in covered {
        if start > cursor {
            gaps.push((cursor, start));
        }
        cursor = cursor.max(end);
    }
    if cursor < file_size {
        gaps.push((cursor, file_size));
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overlapping_and_adjacent() {
        assert_eq!(
            merge_ranges(vec![(0, 4), (4, 8), (10, 12), (11, 14)]),
            vec![(0, 8), (10, 14)]
        );
    }

    #[test]
    fn gaps_include_leading_and_trailing() {
        assert_eq!(find_gaps(&[(4, 10), (12, 16)], 20), vec![(0, 4), (10, 12), (16, 20)]);
        assert_eq!(find_gaps(&[], 8), vec![(0, 8)]);
        assert_eq!(find_gaps(&[(0, 8)], 8), Vec::<(u64, u64)>::new());
    }

    #[test]
    fn empty_file_has_no_gaps() {
        assert_eq!(find_gaps(&[], 0), Vec::<(u64, u64)>::new());
    }
}
