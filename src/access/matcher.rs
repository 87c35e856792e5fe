//! Path Matcher — evaluates glob/file/directory rules against a path for an
//! `(operation, role)` pair, and `PathMatcher`, which layers an audit-log
//! side effect on top of the pure decision function.
//!
//! The pure function [`evaluate`] is deterministic for a given `(path,
//! operation, role, config)` tuple: no I/O, no mutation.
//! [`PathMatcher::check_access`] is the component callers actually use; it
//! evaluates and then appends an [`crate::audit::AuditRecord`]. The decision
//! logic is kept as a thin, independently testable wrapper separate from the
//! component that performs I/O and recording.

use std::path::{Path, PathBuf};

use crate::audit::AuditLog;
use crate::config::{Operation, PathRule, RuleType, SecurityConfig, CONFIG_FILE_NAME};

pub use crate::config::Operation;

/// The verdict [`evaluate`] (and `PathMatcher::check_access`) returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether the operation is permitted.
    pub allowed: bool,
    /// Human-readable reason, always present on denial.
    pub reason: Option<String>,
    /// The pattern of the rule that decided this outcome, if any rule
    /// mentioned the operation at all.
    pub rule_pattern: Option<String>,
}

impl AccessDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            rule_pattern: None,
        }
    }

    fn allow_by_rule(pattern: &str) -> Self {
        Self {
            allowed: true,
            reason: None,
            rule_pattern: Some(pattern.to_string()),
        }
    }

    fn deny(reason: impl Into<String>, pattern: Option<&str>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            rule_pattern: pattern.map(str::to_string),
        }
    }
}

/// The fixed filename for the audit log that every project carries
/// implicit `write` protection for, independent of `config.logging.path`.
///
/// The implicit protection binds to this fixed name rather than consulting
/// the loaded config, avoiding a circular lookup: a config that redirects
/// the log elsewhere should not be able to talk its way out of the
/// protection. See `DESIGN.md` for the rationale.
const IMPLICIT_AUDIT_LOG_NAME: &str = crate::config::DEFAULT_AUDIT_LOG_NAME;

/// Evaluate access for `path`/`operation`/`role` against `config`, relative
/// to `project_root`. Pure and deterministic — no I/O, no audit side
/// effect.
#[must_use]
pub fn evaluate(
    path: &Path,
    operation: Operation,
    role: &str,
    config: &SecurityConfig,
    project_root: &Path,
) -> AccessDecision {
    if operation == Operation::Write && is_implicitly_protected(path, project_root) {
        return AccessDecision::deny("implicit protection: security config and audit log may not be written", None);
    }

    let normalized = normalize(path, project_root);

    let mut best: Option<(u32, bool, &PathRule)> = None; // (specificity, would_allow, rule)
    for rule in &config.rules {
        if !rule.denied_operations.contains(&operation) {
            continue;
        }
        if !matches_rule(rule, &normalized) {
            continue;
        }
        let specificity = rule_specificity(&rule.pattern);
        let would_allow = rule.allowed_roles.contains(role);
        let replace = match &best {
            None => true,
            Some((best_spec, best_allow, _)) => {
                specificity > *best_spec || (specificity == *best_spec && *best_allow && !would_allow)
            }
        };
        if replace {
            best = Some((specificity, would_allow, rule));
        }
    }

    match best {
        None => AccessDecision::allow(),
        Some((_, true, rule)) => AccessDecision::allow_by_rule(&rule.pattern),
        Some((_, false, rule)) => AccessDecision::deny(
            format!(
                "security policy denied {:?} access: role '{role}' is not permitted by rule '{}'",
                operation, rule.pattern
            ),
            Some(&rule.pattern),
        ),
    }
}

fn is_implicitly_protected(path: &Path, project_root: &Path) -> bool {
    let normalized = normalize(path, project_root);
    normalized == CONFIG_FILE_NAME || normalized == IMPLICIT_AUDIT_LOG_NAME
}

/// Normalize `path` to a `/`-separated string relative to `project_root`
/// when possible, otherwise the path's own string form. No filesystem
/// access — purely lexical, to keep [`evaluate`] side-effect free.
fn normalize(path: &Path, project_root: &Path) -> String {
    let relative = path.strip_prefix(project_root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

fn matches_rule(rule: &PathRule, normalized_path: &str) -> bool {
    match rule.rule_type {
        RuleType::File => glob_match(&rule.pattern, normalized_path),
        RuleType::Directory => {
            let base = rule.pattern.trim_end_matches('/');
            if glob_match(base, normalized_path) {
                return true;
            }
            let descendant_pattern = format!("{base}/**");
            glob_match(&descendant_pattern, normalized_path)
        }
    }
}

/// Glob matching where `**` spans any number of path segments (including
/// zero) and `*` matches any run of characters within a single segment
/// (standard shell/gitignore-style globbing, e.g. `*.env` matches one
/// filename) — see `DESIGN.md` open question (a).
#[must_use]
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern_segs: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments_match(&pattern_segs, &path_segs)
}

fn segments_match(pattern: &[&str], path: &[&str]) -> bool {
    match pattern {
        [] => path.is_empty(),
        [seg, rest @ ..] if *seg == "**" => {
            segments_match(rest, path)
                || (!path.is_empty() && segments_match(pattern, &path[1..]))
        }
        [seg, rest @ ..] => {
            if path.is_empty() {
                return false;
            }
            segment_glob_match(seg, path[0]) && segments_match(rest, &path[1..])
        }
    }
}

/// Match a single path component against a single pattern component
/// containing zero or more `*` wildcards (no `/`).
fn segment_glob_match(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }

    let mut remaining = value;

    if let Some(first) = parts.first() {
        if !remaining.starts_with(first) {
            return false;
        }
        remaining = &remaining[first.len()..];
    }
    if let Some(last) = parts.last() {
        if !remaining.ends_with(last) || remaining.len() < last.len() {
            return false;
        }
        remaining = &remaining[..remaining.len() - last.len()];
    }

    for middle in &parts[1..parts.len().saturating_sub(1)] {
        if middle.is_empty() {
            continue;
        }
        match remaining.find(middle) {
            Some(idx) => remaining = &remaining[idx + middle.len()..],
            None => return false,
        }
    }
    true
}

/// Specificity used for rule tie-breaking: the length (in bytes) of the
/// pattern's literal prefix before its first wildcard segment. A pattern
/// that starts with `**` has specificity zero.
fn rule_specificity(pattern: &str) -> u32 {
    let mut prefix_len = 0u32;
    for seg in pattern.split('/') {
        if seg.is_empty() {
            continue;
        }
        if seg == "**" {
            break;
        }
        if let Some(star_idx) = seg.find('*') {
            prefix_len += star_idx as u32;
            break;
        }
        prefix_len += seg.len() as u32 + 1; // +1 for the separator
    }
    prefix_len
}

/// Layers the audit-log side effect on top of [`evaluate`].
pub struct PathMatcher<'a> {
    project_root: PathBuf,
    audit_log: &'a AuditLog,
}

impl<'a> PathMatcher<'a> {
    /// Create a matcher rooted at `project_root`, auditing through
    /// `audit_log`.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>, audit_log: &'a AuditLog) -> Self {
        Self {
            project_root: project_root.into(),
            audit_log,
        }
    }

    /// Evaluate access and append an audit record: every denial is logged;
    /// an allow is logged only in verbose mode.
    pub fn check_access(
        &self,
        path: &Path,
        operation: Operation,
        role: &str,
        config: &SecurityConfig,
        content: Option<&[u8]>,
    ) -> AccessDecision {
        let decision = evaluate(path, operation, role, config, &self.project_root);
        self.audit_log.record_decision(
            role,
            operation,
            path,
            &decision,
            config.logging.level,
            content,
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PathRule, RuleType};
    use std::collections::HashSet;

    fn rule(
        pattern: &str,
        rule_type: RuleType,
        denied: &[Operation],
        allowed_roles: &[&str],
    ) -> PathRule {
        PathRule {
            pattern: pattern.to_string(),
            rule_type,
            denied_operations: denied.iter().copied().collect(),
            allowed_roles: allowed_roles.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn s1_deny_write_on_security_config() {
        let mut config = SecurityConfig::empty();
        config.rules.push(rule(
            "*.txt",
            RuleType::File,
            &[Operation::Read],
            &[],
        ));
        let root = Path::new("/project");
        let decision = evaluate(
            &root.join(CONFIG_FILE_NAME),
            Operation::Write,
            "viewer",
            &config,
            root,
        );
        assert!(!decision.allowed);
    }

    #[test]
    fn implicit_protection_allows_read() {
        let config = SecurityConfig::empty();
        let root = Path::new("/project");
        let decision = evaluate(
            &root.join(CONFIG_FILE_NAME),
            Operation::Read,
            "viewer",
            &config,
            root,
        );
        assert!(decision.allowed);
    }

    #[test]
    fn empty_config_denies_nothing_else() {
        let config = SecurityConfig::empty();
        let root = Path::new("/project");
        let decision = evaluate(
            &root.join("secrets.env"),
            Operation::Read,
            "viewer",
            &config,
            root,
        );
        assert!(decision.allowed);
    }

    #[test]
    fn directory_rule_denies_descendants() {
        let mut config = SecurityConfig::empty();
        config.rules.push(rule(
            "secrets",
            RuleType::Directory,
            &[Operation::Read, Operation::Llm],
            &[],
        ));
        let root = Path::new("/project");
        let denied = evaluate(
            &root.join("secrets/api_keys.env"),
            Operation::Read,
            "viewer",
            &config,
            root,
        );
        assert!(!denied.allowed);

        let unrelated = evaluate(&root.join("src/main.rs"), Operation::Read, "viewer", &config, root);
        assert!(unrelated.allowed);
    }

    #[test]
    fn allowed_role_overrides_denial() {
        let mut config = SecurityConfig::empty();
        config.rules.push(rule(
            "secrets",
            RuleType::Directory,
            &[Operation::Read],
            &["admin"],
        ));
        let root = Path::new("/project");
        let viewer = evaluate(&root.join("secrets/x"), Operation::Read, "viewer", &config, root);
        assert!(!viewer.allowed);
        let admin = evaluate(&root.join("secrets/x"), Operation::Read, "admin", &config, root);
        assert!(admin.allowed);
    }

    #[test]
    fn most_specific_rule_wins_tie_break_deny() {
        let mut config = SecurityConfig::empty();
        // Broad allow-everyone rule.
        config.rules.push(rule(
            "**",
            RuleType::File,
            &[Operation::Read],
            &["viewer"],
        ));
        // Narrower rule for the same path and operation, denying viewer.
        config.rules.push(rule(
            "secrets/key.txt",
            RuleType::File,
            &[Operation::Read],
            &[],
        ));
        let root = Path::new("/project");
        let decision = evaluate(
            &root.join("secrets/key.txt"),
            Operation::Read,
            "viewer",
            &config,
            root,
        );
        assert!(!decision.allowed, "more specific deny rule should win");
    }

    #[test]
    fn equal_specificity_deny_wins_over_allow() {
        let mut config = SecurityConfig::empty();
        config.rules.push(rule(
            "secrets/key.txt",
            RuleType::File,
            &[Operation::Read],
            &["admin"],
        ));
        config.rules.push(rule(
            "secrets/key.txt",
            RuleType::File,
            &[Operation::Read],
            &[],
        ));
        let root = Path::new("/project");
        let decision = evaluate(
            &root.join("secrets/key.txt"),
            Operation::Read,
            "admin",
            &config,
            root,
        );
        assert!(!decision.allowed, "equal specificity: deny must win over allow");
    }

    #[test]
    fn glob_star_matches_within_segment_only() {
        assert!(glob_match("*.env", ".env"));
        assert!(glob_match("*.env", "secrets.env"));
        assert!(!glob_match("*.env", "a/b.env"));
        assert!(glob_match("**/*.env", "a/b/c.env"));
        assert!(glob_match("**", "anything/at/all"));
    }

    #[test]
    fn determinism_same_inputs_same_output() {
        let config = SecurityConfig::empty();
        let root = Path::new("/project");
        let path = root.join("a/b.txt");
        let d1 = evaluate(&path, Operation::Read, "viewer", &config, root);
        let d2 = evaluate(&path, Operation::Read, "viewer", &config, root);
        assert_eq!(d1, d2);
    }
}
