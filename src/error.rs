//! Crate-level error aggregation.
//!
//! Individual modules define their own `thiserror` enums
//! ([`crate::config::ConfigError`], [`crate::auth::TokenError`],
//! [`crate::access::AccessError`], [`crate::audit::AuditError`],
//! [`crate::hooks::HookError`], [`crate::plugin_audit::PluginAuditError`],
//! [`crate::heartbeat::HeartbeatError`]). [`CoreError`] exists for call
//! sites — chiefly the CLI binary — that want a single propagation type.

use thiserror::Error;

/// Aggregated error type for callers that do not need per-module detail.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration error.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// A plugin-audit error.
    #[error(transparent)]
    PluginAudit(#[from] crate::plugin_audit::PluginAuditError),

    /// A heartbeat error.
    #[error(transparent)]
    Heartbeat(#[from] crate::heartbeat::HeartbeatError),

    /// An audit-log error.
    #[error(transparent)]
    Audit(#[from] crate::audit::AuditError),
}
