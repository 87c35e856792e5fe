//! Security configuration — the Policy Store.
//!
//! Loads, validates, and caches the declarative security configuration that
//! governs access control for the whole process: load from file, validate,
//! degrade to a safe default on any failure.
//!
//! ## Degradation contract
//!
//! `load` never propagates an I/O or parse error to the caller. A missing
//! file, malformed JSON, or failed validation all degrade to
//! [`SecurityConfig::empty`] and are logged once at `warn`. Degradation is
//! never silent — every degradation path is a `tracing::warn!` call naming
//! the reason.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

pub mod settings;
pub use settings::{CoreSettings, SettingsBuilder, SettingsError, CORE_SETTINGS_FILE_NAME};

/// The fixed filename for the security configuration, resolved relative to
/// the project root.
pub const CONFIG_FILE_NAME: &str = ".opencode-security.json";

/// The fixed default filename for the audit log, resolved relative to the
/// project root, used when `logging.path` is absent.
pub const DEFAULT_AUDIT_LOG_NAME: &str = ".opencode-security-audit.log";

/// Errors that can occur while loading or querying the Policy Store.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as JSON.
    #[error("failed to parse security config as JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The configuration failed schema validation.
    #[error("security config failed validation: {0}")]
    Validation(String),
}

/// An operation a caller may intend to perform on a path or its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Reading file contents.
    Read,
    /// Writing file contents.
    Write,
    /// Sending content to an LLM.
    Llm,
}

/// A named authority level; higher `level` means greater privilege.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name, e.g. `"viewer"`, `"admin"`.
    pub name: String,
    /// Total order over roles — higher is more privileged.
    pub level: i64,
}

/// Which path-rule type a rule's pattern should be interpreted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// A single file (exact path or single-file glob).
    File,
    /// A directory (pattern plus implicit `/**` descendant semantics).
    Directory,
}

/// A declarative record binding a pattern, path-type, and denied operations,
/// with a list of roles that override the denial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRule {
    /// Absolute path or double-star glob.
    pub pattern: String,
    /// Whether `pattern` denotes a file or directory.
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Operations this rule denies by default.
    #[serde(default)]
    pub denied_operations: HashSet<Operation>,
    /// Roles that override the denial for this rule.
    #[serde(default)]
    pub allowed_roles: HashSet<String>,
}

/// A marker pair delimiting a protected segment inside file content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRule {
    /// Literal substring that opens the segment.
    pub start: String,
    /// Literal substring that closes the segment.
    pub end: String,
    /// Operations this segment denies by default.
    #[serde(default)]
    pub denied_operations: HashSet<Operation>,
    /// Roles that override the denial for this segment.
    #[serde(default)]
    pub allowed_roles: HashSet<String>,
}

/// How much guarding to apply when invoking an external MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpPolicy {
    /// Full policy enforcement.
    Enforced,
    /// Trust the server; skip enforcement.
    Trusted,
    /// Refuse to invoke the server at all.
    Blocked,
}

/// MCP server policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Policy applied to servers not named in `servers`.
    pub default_policy: Option<McpPolicy>,
    /// Per-server policy overrides.
    #[serde(default)]
    pub servers: HashMap<String, McpPolicy>,
}

/// Audit log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Log every access decision.
    Verbose,
    /// Log only denials.
    Normal,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Normal
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Path to the audit log file, relative to the project root.
    pub path: Option<PathBuf>,
    /// Verbosity level.
    #[serde(default)]
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            level: LogLevel::Normal,
        }
    }
}

/// Authentication configuration. Its absence disables role authentication
/// entirely (every caller is the default role).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    /// PEM-encoded RSA public key used to verify role tokens.
    pub public_key: String,
    /// Revoked token `jti` claims.
    #[serde(default)]
    pub revoked_tokens: HashSet<String>,
}

/// The security configuration loaded once per project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Version tag, informational.
    pub version: String,
    /// Ordered list of known roles.
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Optional role-token authentication.
    pub authentication: Option<AuthenticationConfig>,
    /// Path access rules.
    #[serde(default)]
    pub rules: Vec<PathRule>,
    /// In-file protected segments.
    #[serde(default)]
    pub segments: Vec<SegmentRule>,
    /// MCP server policy.
    #[serde(default)]
    pub mcp: Option<McpConfig>,
    /// Audit log configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SecurityConfig {
    /// The empty configuration: denies nothing except the two implicit
    /// protections on the config file and audit log (see
    /// [`crate::access::matcher`]).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: "1.0".to_string(),
            roles: Vec::new(),
            authentication: None,
            rules: Vec::new(),
            segments: Vec::new(),
            mcp: None,
            logging: LoggingConfig::default(),
        }
    }

    /// The role with the lowest `level`, or `"viewer"` if no roles are
    /// configured.
    #[must_use]
    pub fn default_role(&self) -> String {
        self.roles
            .iter()
            .min_by_key(|r| r.level)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| "viewer".to_string())
    }

    /// Whether `name` is a known role.
    #[must_use]
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name == name)
    }

    /// Resolve the effective MCP policy for `server_name`.
    ///
    /// Explicit server policy wins; else `default_policy`; else `trusted`
    /// iff no `mcp` block exists at all; else (an `mcp` block exists but
    /// specifies neither) `enforced`.
    #[must_use]
    pub fn mcp_policy(&self, server_name: &str) -> McpPolicy {
        match &self.mcp {
            None => McpPolicy::Trusted,
            Some(mcp) => {
                if let Some(policy) = mcp.servers.get(server_name) {
                    return *policy;
                }
                mcp.default_policy.unwrap_or(McpPolicy::Enforced)
            }
        }
    }

    /// Resolve the audit log path relative to `project_root`.
    #[must_use]
    pub fn audit_log_path(&self, project_root: &Path) -> PathBuf {
        match &self.logging.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => project_root.join(p),
            None => project_root.join(DEFAULT_AUDIT_LOG_NAME),
        }
    }
}

fn validate(config: &SecurityConfig) -> Result<(), ConfigError> {
    if config.version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "version must not be empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for role in &config.roles {
        if !seen.insert(role.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate role name: {}",
                role.name
            )));
        }
    }
    Ok(())
}

/// Loads, validates, and caches the active [`SecurityConfig`] for one
/// project root.
///
/// A single `PolicyStore` instance is owned by the host for the lifetime of
/// the process (or test). `reset()` drops the cache for config reload or
/// test isolation.
#[derive(Debug, Default)]
pub struct PolicyStore {
    cache: OnceLock<SecurityConfig>,
}

impl PolicyStore {
    /// Create an empty, unloaded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the configuration file from `<project_root>/.opencode-security.json`.
    ///
    /// Never fails: an absent file, parse failure, or validation failure all
    /// degrade to [`SecurityConfig::empty`] with a logged warning. Returns a
    /// reference to the now-cached active configuration.
    pub fn load(&self, project_root: &Path) -> &SecurityConfig {
        let config = self.read_and_validate(project_root).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "security config degraded to empty configuration");
            SecurityConfig::empty()
        });
        self.cache.get_or_init(|| config)
    }

    fn read_and_validate(&self, project_root: &Path) -> Result<SecurityConfig, ConfigError> {
        let path = project_root.join(CONFIG_FILE_NAME);
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
            path: path.clone(),
            source,
        })?;
        let config: SecurityConfig = serde_json::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }

    /// Return the active configuration, or [`SecurityConfig::empty`] with a
    /// logged warning if `load` was never called.
    #[must_use]
    pub fn get(&self) -> &SecurityConfig {
        self.cache.get_or_init(|| {
            tracing::warn!("PolicyStore::get() called before load(); using empty configuration");
            SecurityConfig::empty()
        })
    }

    /// Drop the cached configuration (test and config-reload use only).
    pub fn reset(&mut self) {
        self.cache = OnceLock::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_config_denies_nothing_by_default() {
        let config = SecurityConfig::empty();
        assert!(config.rules.is_empty());
        assert_eq!(config.default_role(), "viewer");
    }

    #[test]
    fn load_missing_file_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let store = PolicyStore::new();
        let config = store.load(dir.path());
        assert_eq!(config.version, "1.0");
        assert!(config.rules.is_empty());
    }

    #[test]
    fn load_malformed_json_degrades_to_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{not valid json").unwrap();
        let store = PolicyStore::new();
        let config = store.load(dir.path());
        assert!(config.rules.is_empty());
    }

    #[test]
    fn load_valid_config_is_cached() {
        let dir = tempdir().unwrap();
        let json = serde_json::json!({
            "version": "1.0",
            "roles": [{"name": "viewer", "level": 0}, {"name": "admin", "level": 10}],
            "rules": []
        });
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            serde_json::to_string(&json).unwrap(),
        )
        .unwrap();
        let store = PolicyStore::new();
        let first = store.load(dir.path()) as *const SecurityConfig;
        let second = store.get() as *const SecurityConfig;
        assert_eq!(first, second);
        assert_eq!(store.get().default_role(), "viewer");
    }

    #[test]
    fn mcp_policy_resolution() {
        let mut config = SecurityConfig::empty();
        assert_eq!(config.mcp_policy("anything"), McpPolicy::Trusted);

        config.mcp = Some(McpConfig {
            default_policy: None,
            servers: HashMap::new(),
        });
        assert_eq!(config.mcp_policy("anything"), McpPolicy::Enforced);

        config.mcp = Some(McpConfig {
            default_policy: Some(McpPolicy::Trusted),
            servers: [("github".to_string(), McpPolicy::Blocked)]
                .into_iter()
                .collect(),
        });
        assert_eq!(config.mcp_policy("github"), McpPolicy::Blocked);
        assert_eq!(config.mcp_policy("other"), McpPolicy::Trusted);
    }

    #[test]
    fn audit_log_path_defaults() {
        let config = SecurityConfig::empty();
        let root = Path::new("/proj");
        assert_eq!(
            config.audit_log_path(root),
            root.join(DEFAULT_AUDIT_LOG_NAME)
        );
    }

    #[test]
    fn duplicate_role_names_fail_validation() {
        let dir = tempdir().unwrap();
        let json = serde_json::json!({
            "version": "1.0",
            "roles": [{"name": "viewer", "level": 0}, {"name": "viewer", "level": 10}],
        });
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            serde_json::to_string(&json).unwrap(),
        )
        .unwrap();
        let store = PolicyStore::new();
        let config = store.load(dir.path());
        // Degrades to empty rather than keeping invalid roles.
        assert!(config.roles.is_empty());
    }
}
