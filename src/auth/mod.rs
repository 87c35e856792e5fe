//! Role Resolver — verifies a signed role token and selects the active role.
//!
//! Resolves a secret from one of several on-disk locations and never panics
//! on a missing one, falling back to the lowest-privilege configured role
//! instead. RS256 verification uses `jsonwebtoken` rather than hand-rolled
//! base64 and RSA.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::config::SecurityConfig;

/// Errors in role-token verification. None of these are fatal to the
/// caller — [`RoleResolver::current_role`] always falls back to the
/// configuration's default role.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token file does not exist.
    #[error("token file not found: {0}")]
    NotFound(PathBuf),

    /// The token file is empty.
    #[error("token file is empty: {0}")]
    Empty(PathBuf),

    /// The token is not three dot-separated segments.
    #[error("malformed token: expected 3 dot-separated segments, got {0}")]
    Malformed(usize),

    /// The token's header declared an unsupported algorithm.
    #[error("unsupported algorithm: expected RS256, got {0}")]
    UnsupportedAlgorithm(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    InvalidSignature(#[from] jsonwebtoken::errors::Error),

    /// The token has expired.
    #[error("token expired")]
    Expired,

    /// The token's `jti` claim is on the revocation list.
    #[error("token revoked (jti={0})")]
    Revoked(String),

    /// The token's `role` claim is missing or unknown to the configuration.
    #[error("token role claim missing or unknown: {0:?}")]
    UnknownRole(Option<String>),

    /// No public key is configured — authentication is disabled.
    #[error("role authentication is disabled (no public key configured)")]
    AuthenticationDisabled,
}

/// The payload of a verified role token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleClaims {
    /// The asserted role name.
    pub role: String,
    /// Expiry, Unix seconds.
    pub exp: Option<i64>,
    /// Issued-at, Unix seconds.
    pub iat: Option<i64>,
    /// JWT ID, used for revocation.
    pub jti: Option<String>,
}

/// The result of verifying a role token.
#[derive(Debug, Clone)]
pub struct RoleToken {
    /// Whether verification succeeded.
    pub valid: bool,
    /// The verified role, if `valid`.
    pub role: Option<String>,
    /// The failure reason, if not `valid`.
    pub error: Option<String>,
}

/// Verify a role token file at `path` against `public_key_pem` and
/// `revoked_tokens`.
///
/// Fails (returns `valid: false`) if: the file is missing or empty, not 3
/// dot-separated segments, the header's `alg` is not `RS256`, the signature
/// does not verify, `exp <= now`, `jti` is revoked, or the `role` claim is
/// missing.
#[must_use]
pub fn verify(path: &Path, public_key_pem: &str, revoked_tokens: &HashSet<String>) -> RoleToken {
    match verify_inner(path, public_key_pem, revoked_tokens) {
        Ok(claims) => RoleToken {
            valid: true,
            role: Some(claims.role),
            error: None,
        },
        Err(err) => RoleToken {
            valid: false,
            role: None,
            error: Some(err.to_string()),
        },
    }
}

fn verify_inner(
    path: &Path,
    public_key_pem: &str,
    revoked_tokens: &HashSet<String>,
) -> Result<RoleClaims, TokenError> {
    if !path.exists() {
        return Err(TokenError::NotFound(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path).map_err(|_| TokenError::NotFound(path.to_path_buf()))?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TokenError::Empty(path.to_path_buf()));
    }

    let segment_count = raw.split('.').count();
    if segment_count != 3 {
        return Err(TokenError::Malformed(segment_count));
    }

    let header = jsonwebtoken::decode_header(raw).map_err(TokenError::InvalidSignature)?;
    if header.alg != Algorithm::RS256 {
        return Err(TokenError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
    }

    let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
        .map_err(TokenError::InvalidSignature)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false; // verified manually below for a precise error variant
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<RoleClaims>(raw, &decoding_key, &validation)
        .map_err(TokenError::InvalidSignature)?;
    let claims = data.claims;

    if let Some(exp) = claims.exp {
        let now = chrono::Utc::now().timestamp();
        if exp <= now {
            return Err(TokenError::Expired);
        }
    }

    if let Some(jti) = &claims.jti {
        if revoked_tokens.contains(jti) {
            return Err(TokenError::Revoked(jti.clone()));
        }
    }

    if claims.role.trim().is_empty() {
        return Err(TokenError::UnknownRole(None));
    }

    Ok(claims)
}

/// Candidate token file locations, in lookup order.
fn token_file_candidates(project_root: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![project_root.join(".opencode-role.token")];
    if let Some(home) = dirs_home() {
        candidates.push(home.join(".config").join("opencode").join("role.token"));
    }
    candidates
}

/// Resolve the user's home directory without pulling in a dependency whose
/// only job is that one lookup — `HOME` (Unix) / `USERPROFILE` (Windows).
fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Session-cached role resolution.
///
/// One `RoleResolver` instance corresponds to one session: the host
/// constructs one per session and calls
/// [`current_role`](Self::current_role) as often as it likes without
/// re-reading or re-verifying the token file.
#[derive(Debug, Default)]
pub struct RoleResolver {
    cache: OnceLock<String>,
}

impl RoleResolver {
    /// Create a fresh, unresolved resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and cache the active role for this session.
    ///
    /// Lookup order: `<project_root>/.opencode-role.token`, then
    /// `<home>/.config/opencode/role.token`. The first candidate whose
    /// token verifies against `config.authentication.public_key` and whose
    /// `role` claim names a role in `config.roles` wins. Falls back to
    /// `config.default_role()` if `config.authentication` is absent, no
    /// candidate verifies, or the verified role is unknown to `config`.
    pub fn current_role(&self, project_root: &Path, config: &SecurityConfig) -> &str {
        self.cache.get_or_init(|| self.resolve(project_root, config))
    }

    fn resolve(&self, project_root: &Path, config: &SecurityConfig) -> String {
        let Some(auth) = &config.authentication else {
            tracing::debug!("role authentication disabled; using default role");
            return config.default_role();
        };

        for candidate in token_file_candidates(project_root) {
            if !candidate.exists() {
                continue;
            }
            let result = verify(&candidate, &auth.public_key, &auth.revoked_tokens);
            if !result.valid {
                tracing::debug!(
                    path = %candidate.display(),
                    error = ?result.error,
                    "role token rejected"
                );
                continue;
            }
            let role = result.role.expect("valid token token carries a role");
            if config.has_role(&role) {
                return role;
            }
            tracing::debug!(role = %role, "role token names a role unknown to this project");
        }

        config.default_role()
    }

    /// Clear the cached role (test and session-reset use only).
    pub fn reset(&mut self) {
        self.cache = OnceLock::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tempfile::tempdir;

    // A throwaway 2048-bit RSA test keypair (PKCS#8 / PKCS#1 PEM), generated
    // solely for these unit tests. Not used anywhere outside this module.
    const TEST_PRIVATE_KEY: &str = include_str!("test_fixtures/test_rsa_private.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("test_fixtures/test_rsa_public.pem");

    #[derive(Serialize)]
    struct Claims {
        role: String,
        exp: i64,
        jti: String,
    }

    fn sign_token(role: &str, exp_offset_secs: i64, jti: &str) -> String {
        let claims = Claims {
            role: role.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
            jti: jti.to_string(),
        };
        let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY.as_bytes()).unwrap();
        encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap()
    }

    fn config_with_auth() -> SecurityConfig {
        let mut config = SecurityConfig::empty();
        config.roles = vec![
            Role {
                name: "viewer".into(),
                level: 0,
            },
            Role {
                name: "admin".into(),
                level: 10,
            },
        ];
        config.authentication = Some(crate::config::AuthenticationConfig {
            public_key: TEST_PUBLIC_KEY.to_string(),
            revoked_tokens: HashSet::new(),
        });
        config
    }

    #[test]
    fn no_authentication_block_falls_back_to_default_role() {
        let dir = tempdir().unwrap();
        let mut config = SecurityConfig::empty();
        config.roles = vec![Role {
            name: "admin".into(),
            level: 5,
        }];
        let resolver = RoleResolver::new();
        assert_eq!(resolver.current_role(dir.path(), &config), "admin");
    }

    #[test]
    fn valid_unexpired_unrevoked_known_role_verifies() {
        let dir = tempdir().unwrap();
        let token = sign_token("admin", 3600, "tok-1");
        std::fs::write(dir.path().join(".opencode-role.token"), token).unwrap();

        let config = config_with_auth();
        let resolver = RoleResolver::new();
        assert_eq!(resolver.current_role(dir.path(), &config), "admin");
    }

    #[test]
    fn expired_token_falls_back() {
        let dir = tempdir().unwrap();
        let token = sign_token("admin", -10, "tok-2");
        std::fs::write(dir.path().join(".opencode-role.token"), token).unwrap();

        let config = config_with_auth();
        let resolver = RoleResolver::new();
        assert_eq!(resolver.current_role(dir.path(), &config), "viewer");
    }

    #[test]
    fn revoked_jti_falls_back() {
        let dir = tempdir().unwrap();
        let token = sign_token("admin", 3600, "tok-revoked");
        std::fs::write(dir.path().join(".opencode-role.token"), token).unwrap();

        let mut config = config_with_auth();
        config.authentication.as_mut().unwrap().revoked_tokens =
            ["tok-revoked".to_string()].into_iter().collect();
        let resolver = RoleResolver::new();
        assert_eq!(resolver.current_role(dir.path(), &config), "viewer");
    }

    #[test]
    fn unknown_role_claim_falls_back() {
        let dir = tempdir().unwrap();
        let token = sign_token("superuser", 3600, "tok-3");
        std::fs::write(dir.path().join(".opencode-role.token"), token).unwrap();

        let config = config_with_auth();
        let resolver = RoleResolver::new();
        assert_eq!(resolver.current_role(dir.path(), &config), "viewer");
    }

    #[test]
    fn missing_token_file_falls_back() {
        let dir = tempdir().unwrap();
        let config = config_with_auth();
        let resolver = RoleResolver::new();
        assert_eq!(resolver.current_role(dir.path(), &config), "viewer");
    }

    #[test]
    fn resolution_is_cached_across_calls() {
        let dir = tempdir().unwrap();
        let token = sign_token("admin", 3600, "tok-4");
        std::fs::write(dir.path().join(".opencode-role.token"), token).unwrap();
        let config = config_with_auth();
        let resolver = RoleResolver::new();
        assert_eq!(resolver.current_role(dir.path(), &config), "admin");

        // Even after deleting the file, the cached resolution still holds.
        std::fs::remove_file(dir.path().join(".opencode-role.token")).unwrap();
        assert_eq!(resolver.current_role(dir.path(), &config), "admin");
    }

    #[test]
    fn malformed_token_falls_back() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".opencode-role.token"), "not.a.validtoken").unwrap();
        let config = config_with_auth();
        let resolver = RoleResolver::new();
        assert_eq!(resolver.current_role(dir.path(), &config), "viewer");
    }
}
