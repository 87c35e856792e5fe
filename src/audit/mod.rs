//! Audit Log — append-only JSON-lines record of allow/deny decisions.
//!
//! A failed write is logged (`tracing::warn!`) rather than propagated to
//! the caller: recording an access decision should never itself block the
//! decision from taking effect.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::access::matcher::AccessDecision;
use crate::config::{LogLevel, Operation};

/// Errors surfaced by the audit log. These are logged and discarded by
/// [`AuditLog::record_decision`] — they only escape through
/// [`AuditLog::read_records`], which a compliance-tooling caller uses
/// explicitly.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The log file could not be opened for appending.
    #[error("failed to open audit log at {path}: {source}")]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The log file could not be read.
    #[error("failed to read audit log at {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// The result of an access decision, as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    /// The operation was allowed.
    Allowed,
    /// The operation was denied.
    Denied,
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// ISO-8601 timestamp of the decision.
    pub timestamp: String,
    /// The role the decision was evaluated under.
    pub role: String,
    /// The operation attempted.
    pub operation: Operation,
    /// The path the operation targeted.
    pub path: String,
    /// The decision outcome.
    pub result: AuditResult,
    /// Human-readable reason, present on denial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The pattern of the rule that triggered the decision, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_triggered: Option<String>,
    /// First 16 hex characters of the SHA-256 of associated content, when
    /// the caller supplied content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Compute the first 16 hex characters of the SHA-256 digest of `content`.
#[must_use]
pub fn content_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..16].to_string()
}

/// Single-producer, append-only audit log.
///
/// Writes are fire-and-forget from the hot path: a failed write is logged
/// once via `tracing::warn!` and discarded, never raised to the caller.
/// The log is single-producer within one process; the internal `Mutex`
/// exists only to serialize concurrent
/// in-process callers (e.g. two tool invocations audited from different
/// async tasks), not to coordinate across processes.
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<()>,
}

impl AuditLog {
    /// Open (or prepare to create) an audit log at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    /// Record an access decision. Verbose logging level records every
    /// decision; normal logging level records only denials. Never raises an
    /// error to the caller.
    pub fn record_decision(
        &self,
        role: &str,
        operation: Operation,
        path: &Path,
        decision: &AccessDecision,
        level: LogLevel,
        content: Option<&[u8]>,
    ) {
        let should_log = match level {
            LogLevel::Verbose => true,
            LogLevel::Normal => !decision.allowed,
        };
        if !should_log {
            return;
        }

        let record = AuditRecord {
            timestamp: Utc::now().to_rfc3339(),
            role: role.to_string(),
            operation,
            path: path.to_string_lossy().to_string(),
            result: if decision.allowed {
                AuditResult::Allowed
            } else {
                AuditResult::Denied
            },
            reason: decision.reason.clone(),
            rule_triggered: decision.rule_pattern.clone(),
            content_hash: content.map(content_hash),
        };

        if let Err(err) = self.append(&record) {
            tracing::warn!(error = %err, "failed to write audit record; discarding");
        }
    }

    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| AuditError::Open {
                path: self.path.clone(),
                source,
            })?;
        let line = serde_json::to_string(record).unwrap_or_default();
        writeln!(file, "{line}").map_err(|source| AuditError::Open {
            path: self.path.clone(),
            source,
        })
    }

    /// Read all well-formed records from the log, skipping any partial or
    /// corrupt trailing line (the log's single writer may be mid-append).
    pub fn read_records(&self) -> Result<Vec<AuditRecord>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| AuditError::Read {
            path: self.path.clone(),
            source,
        })?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unparsable audit log line");
                }
            }
        }
        Ok(records)
    }
}
