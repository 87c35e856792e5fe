//! Segment Scanner — finds marker-delimited (and, optionally,
//! pattern-matched) protected regions inside file content.
//!
//! The primary rule table is the project's configured marker pairs,
//! producing byte ranges over the scanned string. An optional
//! pattern-based scanner, gated behind a feature flag and a runtime
//! environment variable, supplements it with a heuristic scan for
//! sensitive-operation declarations.

use std::ops::Range;

use crate::config::{Operation, SegmentRule};

/// A protected region found by the scanner, carrying the deny/allow policy
/// inherited from the [`SegmentRule`] that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMatch {
    /// Byte range within the scanned content.
    pub range: Range<usize>,
    /// Operations denied for this segment.
    pub denied_operations: Vec<Operation>,
    /// Roles that override the denial for this segment.
    pub allowed_roles: Vec<String>,
}

/// Scan `content` for every marker-delimited segment described by
/// `segments`.
///
/// For each `{start, end}` pair: find every occurrence of `start` and pair
/// it with the next occurrence of `end` following it. An unpaired `start`
/// (no following `end`) extends to the end of the file. Overlapping and
/// adjacent matches from different marker pairs are returned as separate
/// entries — use [`merge_ranges`] before redacting if a byte-faithful,
/// overlap-free substitution is required.
#[must_use]
pub fn scan_segments(content: &str, segments: &[SegmentRule]) -> Vec<SegmentMatch> {
    let mut matches = Vec::new();
    for rule in segments {
        if rule.start.is_empty() {
            continue;
        }
        let mut search_from = 0usize;
        while let Some(start_rel) = content[search_from..].find(rule.start.as_str()) {
            let start = search_from + start_rel;
            let after_start = start + rule.start.len();
            let end = if rule.end.is_empty() {
                content.len()
            } else {
                match content[after_start..].find(rule.end.as_str()) {
                    Some(end_rel) => after_start + end_rel + rule.end.len(),
                    None => content.len(),
                }
            };
            matches.push(SegmentMatch {
                range: start..end,
                denied_operations: rule.denied_operations.iter().copied().collect(),
                allowed_roles: rule.allowed_roles.iter().cloned().collect(),
            });
            if end <= after_start {
                search_from = after_start;
            } else {
                search_from = end;
            }
            if search_from >= content.len() {
                break;
            }
        }
    }
    matches.extend(additional_pattern_matches(content));
    matches
}

/// Environment variable gating the experimental pattern scanner —
/// disabled by default even when the `heuristics` feature is compiled in.
const AST_GREP_ENV_VAR: &str = "OPENCODE_EXPERIMENTAL_AST_GREP";

#[cfg(feature = "heuristics")]
fn pattern_scanner_enabled() -> bool {
    std::env::var(AST_GREP_ENV_VAR).is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
}

#[cfg(feature = "heuristics")]
fn sensitive_keyword_filter() -> &'static aho_corasick::AhoCorasick {
    static AC: std::sync::OnceLock<aho_corasick::AhoCorasick> = std::sync::OnceLock::new();
    AC.get_or_init(|| {
        aho_corasick::AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(["encrypt", "decrypt", "sign", "verify"])
            .expect("fixed keyword set is a valid Aho-Corasick automaton")
    })
}

#[cfg(feature = "heuristics")]
fn declaration_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"(?i)\b(?:pub\s+)?(?:async\s+)?(?:fn|function|const|let)\s+\w*(?:encrypt|decrypt|sign|verify)\w*\s*(?:=\s*)?(?:async\s*)?\([^)]*\)[^{;]*\{",
        )
        .expect("fixed declaration pattern is a valid regex")
    })
}

/// Find the byte offset one past the `}` that closes the brace already
/// consumed at the end of a [`declaration_regex`] match, by brace-depth
/// counting. This is a heuristic, not a parser: it does not understand
/// strings, comments, or template literals that might contain unbalanced
/// braces, which is why the scanner stays behind [`AST_GREP_ENV_VAR`].
#[cfg(feature = "heuristics")]
fn brace_matched_end(content: &str, after_open_brace: usize) -> usize {
    let mut depth = 1i32;
    for (idx, ch) in content[after_open_brace..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return after_open_brace + idx + ch.len_utf8();
                }
            }
            _ => {}
        }
    }
    content.len()
}

/// Pattern scanner: an AST/regex-rules option scoped to function-like
/// declarations whose name contains a sensitive-operation keyword
/// (`encrypt`, `decrypt`, `sign`, `verify`). Disabled unless both the
/// `heuristics` feature is compiled in and [`AST_GREP_ENV_VAR`] is set to a
/// truthy value — off by default in minimal configs.
#[cfg(feature = "heuristics")]
#[must_use]
pub fn scan_patterns(content: &str) -> Vec<SegmentMatch> {
    if !pattern_scanner_enabled() {
        return Vec::new();
    }
    // Cheap Aho-Corasick prefilter avoids the regex pass entirely on
    // content with no sensitive keyword at all.
    if sensitive_keyword_filter().find(content).is_none() {
        return Vec::new();
    }
    declaration_regex()
        .find_iter(content)
        .map(|m| SegmentMatch {
            range: m.start()..brace_matched_end(content, m.end()),
            denied_operations: vec![Operation::Llm],
            allowed_roles: Vec::new(),
        })
        .collect()
}

#[cfg(feature = "heuristics")]
fn additional_pattern_matches(content: &str) -> Vec<SegmentMatch> {
    scan_patterns(content)
}

#[cfg(not(feature = "heuristics"))]
fn additional_pattern_matches(_content: &str) -> Vec<SegmentMatch> {
    Vec::new()
}

/// Merge overlapping (or touching) ranges into a minimal, sorted,
/// non-overlapping set. Required before [`crate::access::redact::redact`]
/// so that exactly one marker is produced per merged range.
#[must_use]
pub fn merge_ranges(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    ranges.retain(|r| r.start < r.end);
    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Restrict `matches` to those whose `denied_operations` contains `llm`
/// (or any `operation`) and whose `allowed_roles` does not include `role`.
///
/// When a caller wants to send file content to an LLM, it asks the
/// Redactor to strip any segment whose denied operations include `llm` and
/// whose allowed roles do not include the current role.
#[must_use]
pub fn segments_denied_for(
    matches: &[SegmentMatch],
    operation: Operation,
    role: &str,
) -> Vec<Range<usize>> {
    matches
        .iter()
        .filter(|m| {
            m.denied_operations.contains(&operation)
                && !m.allowed_roles.iter().any(|r| r == role)
        })
        .map(|m| m.range.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentRule;

    fn marker(start: &str, end: &str, denied: &[Operation]) -> SegmentRule {
        SegmentRule {
            start: start.to_string(),
            end: end.to_string(),
            denied_operations: denied.iter().copied().collect(),
            allowed_roles: Default::default(),
        }
    }

    #[test]
    fn s2_pairs_markers_and_covers_full_span() {
        let content = "# Agents\nPublic content here.\n// @security-start\nsuper-secret-api-key-12345\n// @security-end\nMore public content.\n";
        let segments = vec![marker("// @security-start", "// @security-end", &[Operation::Llm])];
        let matches = scan_segments(content, &segments);
        assert_eq!(matches.len(), 1);
        let start = content.find("// @security-start").unwrap();
        let end = content.find("// @security-end").unwrap() + "// @security-end".len();
        assert_eq!(matches[0].range, start..end);
    }

    #[test]
    fn unpaired_start_extends_to_end_of_file() {
        let content = "before START secret with no terminator";
        let segments = vec![marker("START", "END", &[Operation::Llm])];
        let matches = scan_segments(content, &segments);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].range.end, content.len());
    }

    #[test]
    fn multiple_occurrences_pair_sequentially() {
        let content = "A START one END B START two END C";
        let segments = vec![marker("START", "END", &[Operation::Llm])];
        let matches = scan_segments(content, &segments);
        assert_eq!(matches.len(), 2);
        assert!(matches[0].range.end < matches[1].range.start);
    }

    #[test]
    fn merge_overlapping_ranges() {
        let ranges = vec![0..10, 5..15, 20..30];
        let merged = merge_ranges(ranges);
        assert_eq!(merged, vec![0..15, 20..30]);
    }

    #[test]
    fn segments_denied_for_respects_role_override() {
        let mut rule = marker("S", "E", &[Operation::Llm]);
        rule.allowed_roles = ["admin".to_string()].into_iter().collect();
        let matches = scan_segments("S x E", &[rule]);
        assert!(segments_denied_for(&matches, Operation::Llm, "viewer").len() == 1);
        assert!(segments_denied_for(&matches, Operation::Llm, "admin").is_empty());
    }

    #[cfg(feature = "heuristics")]
    #[test]
    fn pattern_scanner_is_off_by_default_and_opt_in_via_env_var() {
        let content = "function signData(payload) {\n  return hmac(payload);\n}\n";

        std::env::remove_var(AST_GREP_ENV_VAR);
        assert!(scan_patterns(content).is_empty(), "scanner must be off without the env var");

        std::env::set_var(AST_GREP_ENV_VAR, "true");
        let matches = scan_patterns(content);
        assert_eq!(matches.len(), 1);
        assert_eq!(&content[matches[0].range.clone()], content.trim_end());
        assert_eq!(matches[0].denied_operations, vec![Operation::Llm]);
        std::env::remove_var(AST_GREP_ENV_VAR);
    }

    #[cfg(feature = "heuristics")]
    #[test]
    fn pattern_scanner_ignores_content_with_no_sensitive_keyword() {
        std::env::set_var(AST_GREP_ENV_VAR, "1");
        let matches = scan_patterns("function add(a, b) {\n  return a + b;\n}\n");
        assert!(matches.is_empty());
        std::env::remove_var(AST_GREP_ENV_VAR);
    }

    #[cfg(feature = "heuristics")]
    #[test]
    fn scan_segments_merges_marker_and_pattern_results_when_enabled() {
        std::env::set_var(AST_GREP_ENV_VAR, "1");
        let content = "# doc\nfunction verifyToken(t) {\n  return check(t);\n}\n";
        let matches = scan_segments(content, &[]);
        assert_eq!(matches.len(), 1);
        std::env::remove_var(AST_GREP_ENV_VAR);
    }
}
