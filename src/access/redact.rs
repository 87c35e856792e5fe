//! Redactor — substitutes protected byte ranges with a literal marker.
//!
//! Takes a set of byte ranges from a scanner and rewrites them in a single
//! left-to-right sweep rather than repeatedly splicing the string.

use std::ops::Range;

use crate::access::segments::merge_ranges;

/// The literal text every redacted span is replaced with.
pub const REDACTION_MARKER: &str = "[REDACTED: Security Protected]";

/// Replace every byte range in `ranges` with [`REDACTION_MARKER`].
///
/// Overlapping or touching ranges are merged first, so a run of content
/// covered by more than one range collapses to a single marker rather than
/// several concatenated ones — exactly one marker per protected span.
///
/// Ranges are interpreted as byte offsets into `content`. A range whose
/// bounds do not fall on a UTF-8 character boundary is clamped outward to
/// the nearest boundary so the substitution never panics or produces
/// invalid UTF-8.
#[must_use]
pub fn redact(content: &str, ranges: &[Range<usize>]) -> String {
    if ranges.is_empty() {
        return content.to_string();
    }
    let merged = merge_ranges(ranges.to_vec());
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0usize;
    for range in merged {
        let start = floor_char_boundary(content, range.start.min(content.len()));
        let end = ceil_char_boundary(content, range.end.min(content.len()));
        if start < cursor {
            continue;
        }
        out.push_str(&content[cursor..start]);
        out.push_str(REDACTION_MARKER);
        cursor = end;
    }
    out.push_str(&content[cursor.min(content.len())..]);
    out
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::segments::scan_segments;
    use crate::config::{Operation, SegmentRule};

    #[test]
    fn s2_redacts_marker_pair_span() {
        let content = "public\n// @security-start\nsecret-key\n// @security-end\nmore public\n";
        let rule = SegmentRule {
            start: "// @security-start".to_string(),
            end: "// @security-end".to_string(),
            denied_operations: [Operation::Llm].into_iter().collect(),
            allowed_roles: Default::default(),
        };
        let matches = scan_segments(content, &[rule]);
        let ranges: Vec<_> = matches.iter().map(|m| m.range.clone()).collect();
        let redacted = redact(content, &ranges);
        assert_eq!(
            redacted,
            format!("public\n{REDACTION_MARKER}\nmore public\n")
        );
    }

    #[test]
    fn empty_ranges_returns_content_unchanged() {
        assert_eq!(redact("hello world", &[]), "hello world");
    }

    #[test]
    fn overlapping_ranges_produce_single_marker() {
        let content = "0123456789";
        let redacted = redact(content, &[2..6, 4..8]);
        assert_eq!(redacted, format!("01{REDACTION_MARKER}89"));
    }

    #[test]
    fn adjacent_ranges_merge_into_one_marker() {
        let content = "0123456789";
        let redacted = redact(content, &[2..5, 5..8]);
        assert_eq!(redacted, format!("01{REDACTION_MARKER}89"));
    }

    #[test]
    fn disjoint_ranges_each_get_own_marker() {
        let content = "0123456789";
        let redacted = redact(content, &[1..3, 6..8]);
        assert_eq!(
            redacted,
            format!("0{REDACTION_MARKER}345{REDACTION_MARKER}89")
        );
    }

    #[test]
    fn invariant_marker_count_matches_merged_range_count() {
        let content = "a secret b secret2 c";
        let ranges = vec![2..8, 11..18];
        let merged = merge_ranges(ranges.clone());
        let redacted = redact(content, &ranges);
        assert_eq!(redacted.matches(REDACTION_MARKER).count(), merged.len());
    }
}
