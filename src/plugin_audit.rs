//! Plugin Auditor — offline static scan of a candidate plugin source tree
//! for dangerous API patterns.
//!
//! Scans source text against a fixed rule table of `(needle, severity,
//! description)` tuples and groups findings by severity tier.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors surfaced by the plugin auditor.
#[derive(Debug, Error)]
pub enum PluginAuditError {
    /// The target directory does not exist or could not be read.
    #[error("cannot read plugin directory {path}: {source}")]
    UnreadableTarget {
        /// The directory that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Severity tiers for a plugin-audit finding, ordered most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Remote-code-execution-capable constructs.
    Critical,
    /// Sensitive filesystem access or non-literal dynamic imports.
    High,
    /// Direct filesystem/network/process APIs.
    Medium,
    /// Reserved for forward-compatible, non-actionable observations.
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{label}")
    }
}

/// One matched rule: a literal needle and the severity it denotes.
struct Rule {
    needle: &'static str,
    severity: Severity,
    description: &'static str,
}

/// The fixed rule table this auditor scans for. Order does not matter —
/// findings are grouped by severity at format time, not scan time.
const RULES: &[Rule] = &[
    Rule {
        needle: "eval(",
        severity: Severity::Critical,
        description: "calls eval(), allowing arbitrary code execution",
    },
    Rule {
        needle: "new Function(",
        severity: Severity::Critical,
        description: "constructs a Function from a string, allowing arbitrary code execution",
    },
    Rule {
        needle: "Function(\"return this\"",
        severity: Severity::Critical,
        description: "uses the Function(\"return this\") sandbox-escape idiom",
    },
    Rule {
        needle: "globalThis.constructor.constructor",
        severity: Severity::Critical,
        description: "walks the constructor chain to reach the Function constructor, a known sandbox escape",
    },
    Rule {
        needle: "/etc/",
        severity: Severity::High,
        description: "references a hardcoded system configuration path",
    },
    Rule {
        needle: "~/.ssh/",
        severity: Severity::High,
        description: "references a hardcoded SSH credential path",
    },
    Rule {
        needle: ".env",
        severity: Severity::High,
        description: "references a hardcoded environment-file path",
    },
    Rule {
        needle: "require(`",
        severity: Severity::High,
        description: "uses require() with a non-literal (template) argument",
    },
    Rule {
        needle: "import(`",
        severity: Severity::High,
        description: "uses dynamic import() with a non-literal (template) argument",
    },
    Rule {
        needle: "fs.readFileSync",
        severity: Severity::Medium,
        description: "reads from the filesystem directly",
    },
    Rule {
        needle: "fs.writeFileSync",
        severity: Severity::Medium,
        description: "writes to the filesystem directly",
    },
    Rule {
        needle: "child_process",
        severity: Severity::Medium,
        description: "spawns a child process",
    },
    Rule {
        needle: "net.connect",
        severity: Severity::Medium,
        description: "opens a raw network connection",
    },
    Rule {
        needle: "fetch(",
        severity: Severity::Medium,
        description: "makes an outbound network request",
    },
];

/// Source file extensions the auditor scans.
const SCANNED_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];

/// One matched dangerous construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// File the construct was found in, relative to the scanned target.
    pub file: PathBuf,
    /// 1-based line number.
    pub line: usize,
    /// Severity tier.
    pub severity: Severity,
    /// Human-readable description of the risk.
    pub description: String,
}

/// The outcome of auditing one plugin source tree.
#[derive(Debug, Clone)]
pub struct AuditReport {
    /// Every finding, in scan order.
    pub findings: Vec<Finding>,
}

impl AuditReport {
    /// Whether any finding reached [`Severity::Critical`].
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Critical)
    }

    /// Count of findings per severity tier.
    #[must_use]
    pub fn summary(&self) -> Vec<(Severity, usize)> {
        let tiers = [Severity::Critical, Severity::High, Severity::Medium, Severity::Low];
        tiers
            .into_iter()
            .map(|tier| (tier, self.findings.iter().filter(|f| f.severity == tier).count()))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Render findings grouped by severity, most severe first, each with
    /// `file:line` and description — the format the audit CLI prints.
    #[must_use]
    pub fn format_report(&self) -> String {
        let mut out = String::new();
        for tier in [Severity::Critical, Severity::High, Severity::Medium, Severity::Low] {
            let tier_findings: Vec<&Finding> = self.findings.iter().filter(|f| f.severity == tier).collect();
            if tier_findings.is_empty() {
                continue;
            }
            out.push_str(&format!("[{tier}] ({} finding(s))\n", tier_findings.len()));
            for finding in tier_findings {
                out.push_str(&format!(
                    "  {}:{} — {}\n",
                    finding.file.display(),
                    finding.line,
                    finding.description
                ));
            }
        }
        if out.is_empty() {
            out.push_str("No findings.\n");
        }
        out
    }
}

/// Scan `target` for dangerous API patterns in every source file under it
/// whose extension is one of [`SCANNED_EXTENSIONS`], skipping any
/// `node_modules` subtree. Walks and scans serially; see
/// [`audit_concurrent`] for the bounded-parallel variant the CLI uses.
pub fn audit(target: &Path) -> Result<AuditReport, PluginAuditError> {
    let files = collect_files(target)?;
    let mut findings = Vec::new();
    for path in files {
        if let Ok(content) = std::fs::read_to_string(&path) {
            scan_file(target, &path, &content, &mut findings);
        }
    }
    Ok(AuditReport { findings })
}

/// Scan `target` the same way [`audit`] does, but read and scan matched
/// files concurrently through `pool` — the directory walk itself (cheap,
/// metadata-only) stays serial; only the per-file read-and-scan work is
/// parallelized over a bounded worker pool.
pub async fn audit_concurrent(
    target: &Path,
    pool: &crate::concurrency::BoundedPool,
) -> Result<AuditReport, PluginAuditError> {
    let files = collect_files(target)?;
    let root = target.to_path_buf();
    let results = pool
        .run_all(files, move |path| {
            let root = root.clone();
            async move {
                let mut local = Vec::new();
                if let Ok(content) = tokio::fs::read_to_string(&path).await {
                    scan_file(&root, &path, &content, &mut local);
                }
                local
            }
        })
        .await;
    let findings = results.into_iter().flatten().flatten().collect();
    Ok(AuditReport { findings })
}

fn collect_files(target: &Path) -> Result<Vec<PathBuf>, PluginAuditError> {
    let mut files = Vec::new();
    walk(target, target, &mut files)?;
    Ok(files)
}

fn walk(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), PluginAuditError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PluginAuditError::UnreadableTarget {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "node_modules") {
                continue;
            }
            walk(root, &path, files)?;
            continue;
        }
        let is_scanned = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SCANNED_EXTENSIONS.contains(&ext));
        if is_scanned {
            files.push(path);
        }
    }
    Ok(())
}

fn scan_file(root: &Path, path: &Path, content: &str, findings: &mut Vec<Finding>) {
    let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    for (line_idx, line) in content.lines().enumerate() {
        for rule in RULES {
            if line.contains(rule.needle) {
                findings.push(Finding {
                    file: relative.clone(),
                    line: line_idx + 1,
                    severity: rule.severity,
                    description: rule.description.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_eval_as_critical() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), "function run(x) { return eval(x); }").unwrap();
        let report = audit(dir.path()).unwrap();
        assert!(report.has_critical());
    }

    #[test]
    fn skips_node_modules() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "eval('bad')").unwrap();
        let report = audit(dir.path()).unwrap();
        assert!(report.findings.is_empty());
    }

    #[test]
    fn non_scanned_extensions_are_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "eval(something)").unwrap();
        let report = audit(dir.path()).unwrap();
        assert!(report.findings.is_empty());
    }

    #[test]
    fn high_and_medium_findings_classified_correctly() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("plugin.ts"),
            "const key = readFile('~/.ssh/id_rsa');\nfs.readFileSync('/etc/passwd');",
        )
        .unwrap();
        let report = audit(dir.path()).unwrap();
        assert!(!report.has_critical());
        let severities: Vec<_> = report.findings.iter().map(|f| f.severity).collect();
        assert!(severities.contains(&Severity::High));
        assert!(severities.contains(&Severity::Medium));
    }

    #[test]
    fn format_report_groups_by_severity_descending() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("plugin.js"),
            "eval('x');\nfs.writeFileSync('y', 'z');",
        )
        .unwrap();
        let report = audit(dir.path()).unwrap();
        let text = report.format_report();
        assert!(text.find("[critical]").unwrap() < text.find("[medium]").unwrap());
    }

    #[test]
    fn clean_tree_has_no_findings() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), "export function add(a, b) { return a + b; }").unwrap();
        let report = audit(dir.path()).unwrap();
        assert!(report.findings.is_empty());
        assert!(!report.has_critical());
    }
}
