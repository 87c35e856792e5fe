//! ```text
//! SecurityConfig ─┬─► PolicyStore ─► Active Configuration
//!                 │                     │
//!                 │                     ├─► PathMatcher ──► Access Decision ──► AuditLog
//!                 │                     ├─► SegmentScanner ──► Redactor
//!                 │                     └─► RoleResolver ◄── RoleToken
//!                 │
//!                 └─► HookRegistry ─► HookExecutor ─┬─► pre-llm chain
//!                                                    ├─► pre-tool chain
//!                                                    ├─► post-tool chain
//!                                                    └─► session-lifecycle chain
//! ```
//!
//! # corewarden
//!
//! **Runtime safety core for an agentic coding assistant.**
//!
//! `corewarden` governs what a model-driven agent may read, write, execute,
//! and expose to a language model, and composes the middleware that every
//! LLM call and tool call flows through. Two subsystems make up the crate:
//!
//! - [`config`], [`auth`], [`access`], [`audit`] — policy-enforced access
//!   control: a declarative ruleset that classifies filesystem paths and
//!   in-file segments as permitted or denied per operation and role, redacts
//!   matched segments, and writes a tamper-resistant audit log.
//! - [`hooks`] — a registry of prioritized interceptors organized into four
//!   chains (`pre-llm`, `pre-tool`, `post-tool`, `session-lifecycle`) that
//!   perform context injection, output truncation, error-recovery prompt
//!   synthesis, repetition detection, and notification dispatch.
//!
//! Supporting modules: [`plugin_audit`] (offline static scan of candidate
//! plugin source trees) and [`heartbeat`] (per-session liveness records and
//! crashed-session recovery).
//!
//! This crate does not provide the AI model, sandbox child processes, or
//! coordinate across machines — it runs within a single host process and
//! exposes the seams that process controls.

#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod audit;
pub mod auth;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod hooks;
pub mod plugin_audit;
pub mod telemetry;

/// Re-exports for convenient access to the core types.
pub mod prelude {
    pub use crate::access::matcher::{AccessDecision, Operation, PathMatcher};
    pub use crate::access::redact::{redact, REDACTION_MARKER};
    pub use crate::access::segments::{scan_segments, SegmentMatch};
    pub use crate::audit::{AuditLog, AuditRecord};
    pub use crate::auth::{RoleResolver, RoleToken};
    pub use crate::config::{CoreSettings, PolicyStore, SecurityConfig};
    pub use crate::error::CoreError;
    pub use crate::hooks::executor::HookExecutor;
    pub use crate::hooks::registry::HookRegistry;
    pub use crate::hooks::{ChainContext, ChainType};
}
