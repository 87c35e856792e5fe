//! Operational configuration — `CoreSettings`.
//!
//! Distinct from the `.opencode-security.json` schema the rest of this
//! module loads: `CoreSettings` covers the crate's own tunables (truncation
//! budgets, heartbeat cadence, worker concurrency) and is loadable from a
//! `corewarden.toml`/`corewarden.yaml` file much like [`super::PolicyStore`]
//! loads the security config — file format dispatched by extension,
//! optional env-var overrides, validated on build.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Errors surfaced while loading or validating [`CoreSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file.
    #[error("failed to read settings file at {path}: {source}")]
    FileRead {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file extension isn't one this loader understands.
    #[error("unsupported settings file format: must be .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Failed to parse the settings file in its detected format.
    #[error("failed to parse settings as {format}: {source}")]
    Parse {
        /// The format that failed to parse (`"TOML"`, `"YAML"`, `"JSON"`).
        format: &'static str,
        /// Underlying parse error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An environment-variable override could not be parsed.
    #[error("invalid value for {key}: {message}")]
    EnvOverride {
        /// The environment variable name.
        key: &'static str,
        /// Why the value was rejected.
        message: String,
    },

    /// A field failed range validation.
    #[error("settings failed validation: {0}")]
    Validation(String),
}

/// Operational tunables for the runtime safety core. Every field has a
/// conservative default matching the constants used when no settings file
/// is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CoreSettings {
    /// Byte budget a single tool output is truncated to. Defaults to
    /// [`crate::hooks::output::DEFAULT_TRUNCATION_BUDGET`].
    #[validate(range(min = 1))]
    pub truncation_budget: usize,
    /// Byte size above which tool output is treated as a stream and
    /// truncated without attempting a full in-memory scan. Defaults to
    /// [`crate::hooks::output::STREAM_THRESHOLD`].
    #[validate(range(min = 1))]
    pub stream_threshold: usize,
    /// How often a session writes its liveness heartbeat.
    #[validate(range(min = 1))]
    pub heartbeat_interval_secs: u64,
    /// Maximum concurrent workers for bounded-pool operations (plugin audit
    /// directory scans, batched hook execution).
    #[validate(range(min = 1))]
    pub max_concurrent_workers: usize,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            truncation_budget: crate::hooks::output::DEFAULT_TRUNCATION_BUDGET,
            stream_threshold: crate::hooks::output::STREAM_THRESHOLD,
            heartbeat_interval_secs: 30,
            max_concurrent_workers: 4,
        }
    }
}

impl CoreSettings {
    /// Per-field range checks run through [`validator`]'s derived
    /// `Validate` impl; the one cross-field rule (`stream_threshold` must
    /// not be smaller than `truncation_budget`) is checked separately since
    /// it spans two fields.
    fn validate_settings(&self) -> Result<(), SettingsError> {
        Validate::validate(self).map_err(|e| SettingsError::Validation(e.to_string()))?;
        if self.stream_threshold < self.truncation_budget {
            return Err(SettingsError::Validation(
                "stream_threshold must be >= truncation_budget".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`CoreSettings`], mirroring [`super::PolicyStore`]'s
/// file-then-env-then-validate pipeline.
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    base: CoreSettings,
    use_env: bool,
}

impl SettingsBuilder {
    /// Start from [`CoreSettings::default`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: CoreSettings::default(),
            use_env: false,
        }
    }

    /// Load settings from a `corewarden.toml`/`.yaml`/`.yml`/`.json` file,
    /// dispatched by extension. Missing optional files are the caller's
    /// concern — this always attempts to read `path`.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: CoreSettings = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| SettingsError::Parse {
                format: "TOML",
                source: Box::new(e),
            })?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content).map_err(|e| SettingsError::Parse {
                format: "YAML",
                source: Box::new(e),
            })?,
            Some("json") => serde_json::from_str(&content).map_err(|e| SettingsError::Parse {
                format: "JSON",
                source: Box::new(e),
            })?,
            _ => return Err(SettingsError::UnsupportedFormat),
        };

        self.base = settings;
        Ok(self)
    }

    /// Read `corewarden.toml` from `project_root` if it exists, leaving the
    /// default settings untouched when it doesn't.
    pub fn with_project_file_if_present(self, project_root: &Path) -> Result<Self, SettingsError> {
        let path = project_root.join(CORE_SETTINGS_FILE_NAME);
        if path.exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Apply `COREWARDEN_*` environment-variable overrides.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Validate and produce the final [`CoreSettings`].
    pub fn build(mut self) -> Result<CoreSettings, SettingsError> {
        if self.use_env {
            dotenvy::dotenv().ok();

            if let Ok(raw) = std::env::var("COREWARDEN_TRUNCATION_BUDGET") {
                self.base.truncation_budget = raw.parse().map_err(|_| SettingsError::EnvOverride {
                    key: "COREWARDEN_TRUNCATION_BUDGET",
                    message: "must be a positive integer".to_string(),
                })?;
            }
            if let Ok(raw) = std::env::var("COREWARDEN_HEARTBEAT_INTERVAL_SECS") {
                self.base.heartbeat_interval_secs = raw.parse().map_err(|_| SettingsError::EnvOverride {
                    key: "COREWARDEN_HEARTBEAT_INTERVAL_SECS",
                    message: "must be a positive integer".to_string(),
                })?;
            }
            if let Ok(raw) = std::env::var("COREWARDEN_MAX_CONCURRENT_WORKERS") {
                self.base.max_concurrent_workers = raw.parse().map_err(|_| SettingsError::EnvOverride {
                    key: "COREWARDEN_MAX_CONCURRENT_WORKERS",
                    message: "must be a positive integer".to_string(),
                })?;
            }
        }

        self.base.validate_settings()?;
        Ok(self.base)
    }
}

/// Fixed filename for the crate's operational settings, resolved relative
/// to the project root — distinct from [`super::CONFIG_FILE_NAME`].
pub const CORE_SETTINGS_FILE_NAME: &str = "corewarden.toml";

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_hardcoded_constants() {
        let settings = CoreSettings::default();
        assert_eq!(settings.truncation_budget, crate::hooks::output::DEFAULT_TRUNCATION_BUDGET);
        assert_eq!(settings.stream_threshold, crate::hooks::output::STREAM_THRESHOLD);
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corewarden.toml");
        std::fs::write(&path, "truncation_budget = 1024\nstream_threshold = 2048\nheartbeat_interval_secs = 10\nmax_concurrent_workers = 2\n").unwrap();
        let settings = SettingsBuilder::new().with_file(&path).unwrap().build().unwrap();
        assert_eq!(settings.truncation_budget, 1024);
        assert_eq!(settings.max_concurrent_workers, 2);
    }

    #[test]
    fn loads_from_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corewarden.yaml");
        std::fs::write(&path, "truncation_budget: 4096\nstream_threshold: 8192\n").unwrap();
        let settings = SettingsBuilder::new().with_file(&path).unwrap().build().unwrap();
        assert_eq!(settings.truncation_budget, 4096);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corewarden.ini");
        std::fs::write(&path, "truncation_budget = 1").unwrap();
        let err = SettingsBuilder::new().with_file(&path).unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedFormat));
    }

    #[test]
    fn missing_project_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let settings = SettingsBuilder::new().with_project_file_if_present(dir.path()).unwrap().build().unwrap();
        assert_eq!(settings, CoreSettings::default());
    }

    #[test]
    fn stream_threshold_below_truncation_budget_fails_validation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corewarden.toml");
        std::fs::write(&path, "truncation_budget = 4096\nstream_threshold = 1024\nheartbeat_interval_secs = 10\nmax_concurrent_workers = 2\n").unwrap();
        let err = SettingsBuilder::new().with_file(&path).unwrap().build().unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)));
    }

    #[test]
    fn env_override_applies_when_enabled() {
        std::env::set_var("COREWARDEN_MAX_CONCURRENT_WORKERS", "7");
        let settings = SettingsBuilder::new().with_env().build().unwrap();
        assert_eq!(settings.max_concurrent_workers, 7);
        std::env::remove_var("COREWARDEN_MAX_CONCURRENT_WORKERS");
    }
}
