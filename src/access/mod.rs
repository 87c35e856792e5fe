//! Policy-enforced access control — Path Matcher, Segment Scanner, and
//! Redactor.
//!
//! [`matcher::AccessDecision`] is a typed terminal verdict carrying a
//! human-readable reason; [`segments`]/[`redact`] are a fixed rule table
//! producing byte ranges, consumed by a separate substitution pass.

use thiserror::Error;

pub mod matcher;
pub mod redact;
pub mod segments;

/// Errors surfaced by the access-control layer.
///
/// A denied access is an authoritative result carried in
/// [`matcher::AccessDecision`], not an error — `AccessError` covers only
/// the small set of failures that prevent a decision from being computed at
/// all (none currently exist; the type is kept for forward compatibility
/// and for consistency with this crate's per-module error convention).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AccessError {
    /// The supplied path could not be resolved relative to the project root.
    #[error("could not resolve path {path} relative to project root: {reason}")]
    UnresolvablePath {
        /// The path that failed to resolve.
        path: String,
        /// Why resolution failed.
        reason: String,
    },
}
