//! Context Injection hooks — pre-llm and session-lifecycle hooks that
//! inject project prompt files, rule files, and compaction-preserved
//! state into the outgoing request.
//!
//! Each injector reads a fixed set of project files and routes every read
//! through [`crate::access::matcher::evaluate`] and the Redactor before
//! folding the content into the outgoing prompt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::Regex;

use crate::access::matcher::evaluate;
use crate::access::redact::redact;
use crate::access::segments::{scan_segments, segments_denied_for};
use crate::audit::AuditLog;
use crate::auth::RoleResolver;
use crate::config::{Operation, PolicyStore};
use crate::hooks::{ChainContext, ChainType, Hook, HookError, SessionEvent};

/// Shared access-control wiring every context-injection hook needs: where
/// the project lives, what the active policy and role are, and where to
/// record the read/llm checks each injection performs.
pub struct AccessGate {
    project_root: PathBuf,
    policy_store: Arc<PolicyStore>,
    role_resolver: Arc<RoleResolver>,
    audit_log: Arc<AuditLog>,
}

impl AccessGate {
    /// Wire a gate rooted at `project_root`.
    #[must_use]
    pub fn new(
        project_root: impl Into<PathBuf>,
        policy_store: Arc<PolicyStore>,
        role_resolver: Arc<RoleResolver>,
        audit_log: Arc<AuditLog>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            policy_store,
            role_resolver,
            audit_log,
        }
    }

    /// Read `rel_path` (relative to the project root) iff both `read` and
    /// `llm` access are allowed for the current role, redacting any
    /// segment denied for `llm`. Returns `None` on any denial or missing
    /// file — injection hooks treat both the same way: skip silently.
    fn gated_read_for_llm(&self, rel_path: &Path) -> Option<String> {
        let config = self.policy_store.get();
        let role = self.role_resolver.current_role(&self.project_root, config);
        let abs = self.project_root.join(rel_path);

        let read_decision = evaluate(&abs, Operation::Read, role, config, &self.project_root);
        self.audit_log.record_decision(
            role,
            Operation::Read,
            &abs,
            &read_decision,
            config.logging.level,
            None,
        );
        if !read_decision.allowed {
            return None;
        }

        let llm_decision = evaluate(&abs, Operation::Llm, role, config, &self.project_root);
        self.audit_log.record_decision(
            role,
            Operation::Llm,
            &abs,
            &llm_decision,
            config.logging.level,
            None,
        );
        if !llm_decision.allowed {
            return None;
        }

        let content = std::fs::read_to_string(&abs).ok()?;
        let matches = scan_segments(&content, &config.segments);
        let denied_ranges = segments_denied_for(&matches, Operation::Llm, role);
        Some(redact(&content, &denied_ranges))
    }
}

/// Reads `<root>/AGENTS.md` or `<root>/.opencode/AGENTS.md` (first found),
/// gates it through policy, and injects it into `ctx.system`. Caches the
/// injection string (or absence of one) per session so repeat calls within
/// the same session short-circuit.
pub struct DirectoryAgentsInjector {
    gate: AccessGate,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl DirectoryAgentsInjector {
    /// Build the injector over `gate`.
    #[must_use]
    pub fn new(gate: AccessGate) -> Self {
        Self {
            gate,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every per-session cache entry.
    pub fn reset_caches(&self) {
        self.cache.lock().unwrap().clear();
    }

    fn load(&self) -> Option<String> {
        for candidate in ["AGENTS.md", ".opencode/AGENTS.md"] {
            if let Some(content) = self.gate.gated_read_for_llm(Path::new(candidate)) {
                return Some(format!(
                    "Instructions from AGENTS.md ({candidate}):\n{content}"
                ));
            }
        }
        None
    }
}

#[async_trait]
impl Hook for DirectoryAgentsInjector {
    fn name(&self) -> &str {
        "directory-agents-injector"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PreLlm
    }
    fn priority(&self) -> i32 {
        100
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(pre_llm) = ctx.as_pre_llm_mut() else {
            return Ok(());
        };
        let session_id = pre_llm.session_id.clone();
        let mut cache = self.cache.lock().unwrap();
        let injection = cache
            .entry(session_id)
            .or_insert_with(|| self.load())
            .clone();
        drop(cache);
        if let Some(text) = injection {
            pre_llm.system.push(text);
        }
        Ok(())
    }
}

/// Injects `<root>/README.md` the same way `DirectoryAgentsInjector`
/// injects `AGENTS.md`, but only when the session's cached working
/// directory differs from the current one — re-reading and re-injecting on
/// every call would duplicate the README for every request in a session
/// that never changes directory.
pub struct DirectoryReadmeInjector {
    gate: AccessGate,
    cache: Mutex<HashMap<String, (PathBuf, Option<String>)>>,
}

impl DirectoryReadmeInjector {
    /// Build the injector over `gate`.
    #[must_use]
    pub fn new(gate: AccessGate) -> Self {
        Self {
            gate,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every per-session cache entry.
    pub fn reset_caches(&self) {
        self.cache.lock().unwrap().clear();
    }
}

#[async_trait]
impl Hook for DirectoryReadmeInjector {
    fn name(&self) -> &str {
        "directory-readme-injector"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PreLlm
    }
    fn priority(&self) -> i32 {
        110
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(pre_llm) = ctx.as_pre_llm_mut() else {
            return Ok(());
        };
        let current_dir = self.gate.project_root.clone();
        let session_id = pre_llm.session_id.clone();

        let mut cache = self.cache.lock().unwrap();
        let needs_reload = match cache.get(&session_id) {
            Some((cached_dir, _)) => *cached_dir != current_dir,
            None => true,
        };
        if needs_reload {
            let content = self.gate.gated_read_for_llm(Path::new("README.md"));
            cache.insert(session_id.clone(), (current_dir, content));
        }
        let injection = if needs_reload {
            cache.get(&session_id).and_then(|(_, c)| c.clone())
        } else {
            None
        };
        drop(cache);
        if let Some(text) = injection {
            pre_llm.system.push(format!("Instructions from README.md:\n{text}"));
        }
        Ok(())
    }
}

/// Injects the union of `<root>/.opencode/rules/*.md` and
/// `<root>/.claude/rules/*.md`, gated and redacted the same way, cached as
/// a list per session.
pub struct RulesInjector {
    gate: AccessGate,
    cache: Mutex<HashMap<String, Vec<String>>>,
}

impl RulesInjector {
    /// Build the injector over `gate`.
    #[must_use]
    pub fn new(gate: AccessGate) -> Self {
        Self {
            gate,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every per-session cache entry.
    pub fn reset_caches(&self) {
        self.cache.lock().unwrap().clear();
    }

    fn load(&self) -> Vec<String> {
        let mut rules = Vec::new();
        for dir in [".opencode/rules", ".claude/rules"] {
            let abs_dir = self.gate.project_root.join(dir);
            let Ok(entries) = std::fs::read_dir(&abs_dir) else {
                continue;
            };
            let mut paths: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
                .collect();
            paths.sort();
            for path in paths {
                let rel = path.strip_prefix(&self.gate.project_root).unwrap_or(&path);
                if let Some(content) = self.gate.gated_read_for_llm(rel) {
                    rules.push(content);
                }
            }
        }
        rules
    }
}

#[async_trait]
impl Hook for RulesInjector {
    fn name(&self) -> &str {
        "rules-injector"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PreLlm
    }
    fn priority(&self) -> i32 {
        120
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(pre_llm) = ctx.as_pre_llm_mut() else {
            return Ok(());
        };
        let session_id = pre_llm.session_id.clone();
        let mut cache = self.cache.lock().unwrap();
        let rules = cache.entry(session_id).or_insert_with(|| self.load()).clone();
        drop(cache);
        pre_llm.system.extend(rules);
        Ok(())
    }
}

fn file_reference_regex() -> Regex {
    Regex::new(r"(?i)\b(?:working on|editing|modified|created|changed)\b[^\n]*?([./\w-]+\.[A-Za-z0-9]{1,8})")
        .expect("static regex is valid")
}

fn decision_line_regex() -> Regex {
    Regex::new(r"(?i)decision:\s*.+").expect("static regex is valid")
}

/// On `session.compacting`, scans the supplied message history for file
/// references and "decision:" lines so they survive history compaction; on
/// `session.created`, re-injects whatever was preserved for that session.
pub struct CompactionContextInjector {
    preserved: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for CompactionContextInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactionContextInjector {
    /// Construct an injector with no preserved state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            preserved: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every per-session preserved-context entry.
    pub fn reset_caches(&self) {
        self.preserved.lock().unwrap().clear();
    }
}

#[async_trait]
impl Hook for CompactionContextInjector {
    fn name(&self) -> &str {
        "compaction-context-injector"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::SessionLifecycle
    }
    fn priority(&self) -> i32 {
        100
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(lifecycle) = ctx.as_session_lifecycle_mut() else {
            return Ok(());
        };
        match lifecycle.event {
            SessionEvent::SessionCompacting => {
                let history = lifecycle
                    .data
                    .as_array()
                    .map(|messages| {
                        messages
                            .iter()
                            .filter_map(|m| m.get("content")?.as_str())
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .unwrap_or_default();

                let file_re = file_reference_regex();
                let decision_re = decision_line_regex();
                let mut found: Vec<String> = Vec::new();
                for cap in file_re.captures_iter(&history) {
                    found.push(cap[1].to_string());
                }
                for line in history.lines() {
                    if decision_re.is_match(line) {
                        found.push(line.trim().to_string());
                    }
                }
                found.sort();
                found.dedup();

                self.preserved
                    .lock()
                    .unwrap()
                    .insert(lifecycle.session_id.clone(), found.clone());
                lifecycle
                    .annotations
                    .insert("context".to_string(), serde_json::json!(found));
            }
            SessionEvent::SessionCreated => {
                if let Some(preserved) = self.preserved.lock().unwrap().get(&lifecycle.session_id) {
                    lifecycle.annotations.insert(
                        "preservedContext".to_string(),
                        serde_json::json!(preserved),
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn todo_item_regex() -> Regex {
    Regex::new(r"(?im)^\s*(?:-\s*\[\s*\]|TODO:|FIXME:).*$|(?i)\b(?:still need to|remaining|incomplete|pending):.*$")
        .expect("static regex is valid")
}

/// On `session.compacting`, extracts incomplete-work markers (`- [ ] ...`,
/// `TODO:`, `FIXME:`, and natural-language "still need to" phrasing) from
/// the message history so they survive compaction.
pub struct CompactionTodoPreserver {
    preserved: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for CompactionTodoPreserver {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactionTodoPreserver {
    /// Construct a preserver with no preserved state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            preserved: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every per-session preserved-todo entry.
    pub fn reset_caches(&self) {
        self.preserved.lock().unwrap().clear();
    }
}

#[async_trait]
impl Hook for CompactionTodoPreserver {
    fn name(&self) -> &str {
        "compaction-todo-preserver"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::SessionLifecycle
    }
    fn priority(&self) -> i32 {
        110
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(lifecycle) = ctx.as_session_lifecycle_mut() else {
            return Ok(());
        };
        match lifecycle.event {
            SessionEvent::SessionCompacting => {
                let history = lifecycle
                    .data
                    .as_array()
                    .map(|messages| {
                        messages
                            .iter()
                            .filter_map(|m| m.get("content")?.as_str())
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .unwrap_or_default();
                let re = todo_item_regex();
                let mut items: Vec<String> = re
                    .find_iter(&history)
                    .map(|m| m.as_str().trim().to_string())
                    .collect();
                items.sort();
                items.dedup();
                self.preserved
                    .lock()
                    .unwrap()
                    .insert(lifecycle.session_id.clone(), items.clone());
                lifecycle
                    .annotations
                    .insert("preservedTodos".to_string(), serde_json::json!(items));
            }
            SessionEvent::SessionCreated => {
                if let Some(items) = self.preserved.lock().unwrap().get(&lifecycle.session_id) {
                    lifecycle
                        .annotations
                        .insert("restoredTodos".to_string(), serde_json::json!(items));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gate(project_root: &Path) -> AccessGate {
        AccessGate::new(
            project_root,
            Arc::new(PolicyStore::new()),
            Arc::new(RoleResolver::new()),
            Arc::new(AuditLog::new(project_root.join("audit.log"))),
        )
    }

    #[tokio::test]
    async fn injects_agents_md_when_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "Follow the style guide.").unwrap();
        let gate = gate(dir.path());
        gate.policy_store.load(dir.path());
        let injector = DirectoryAgentsInjector::new(gate);
        let mut ctx = ChainContext::PreLlm(crate::hooks::PreLlmContext::new(
            "s1", "primary", "claude-sonnet-4",
        ));
        injector.handle(&mut ctx).await.unwrap();
        let system = &ctx.as_pre_llm().unwrap().system;
        assert_eq!(system.len(), 1);
        assert!(system[0].contains("Follow the style guide."));
    }

    #[tokio::test]
    async fn skips_silently_when_file_missing() {
        let dir = tempdir().unwrap();
        let gate = gate(dir.path());
        gate.policy_store.load(dir.path());
        let injector = DirectoryAgentsInjector::new(gate);
        let mut ctx = ChainContext::PreLlm(crate::hooks::PreLlmContext::new(
            "s1", "primary", "claude-sonnet-4",
        ));
        injector.handle(&mut ctx).await.unwrap();
        assert!(ctx.as_pre_llm().unwrap().system.is_empty());
    }

    #[tokio::test]
    async fn denied_read_access_skips_injection() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "secret").unwrap();
        let json = serde_json::json!({
            "version": "1.0",
            "rules": [{"pattern": "AGENTS.md", "type": "file", "deniedOperations": ["read"], "allowedRoles": []}]
        });
        std::fs::write(
            dir.path().join(crate::config::CONFIG_FILE_NAME),
            serde_json::to_string(&json).unwrap(),
        )
        .unwrap();
        let gate = gate(dir.path());
        gate.policy_store.load(dir.path());
        let injector = DirectoryAgentsInjector::new(gate);
        let mut ctx = ChainContext::PreLlm(crate::hooks::PreLlmContext::new(
            "s1", "primary", "claude-sonnet-4",
        ));
        injector.handle(&mut ctx).await.unwrap();
        assert!(ctx.as_pre_llm().unwrap().system.is_empty());
    }

    #[tokio::test]
    async fn readme_injector_does_not_duplicate_across_calls_in_same_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "Project overview.").unwrap();
        let gate = gate(dir.path());
        gate.policy_store.load(dir.path());
        let injector = DirectoryReadmeInjector::new(gate);

        let mut first = ChainContext::PreLlm(crate::hooks::PreLlmContext::new(
            "s1", "primary", "claude-sonnet-4",
        ));
        injector.handle(&mut first).await.unwrap();
        assert_eq!(first.as_pre_llm().unwrap().system.len(), 1);

        let mut second = ChainContext::PreLlm(crate::hooks::PreLlmContext::new(
            "s1", "primary", "claude-sonnet-4",
        ));
        injector.handle(&mut second).await.unwrap();
        assert!(second.as_pre_llm().unwrap().system.is_empty());
    }

    #[tokio::test]
    async fn compaction_round_trips_preserved_context() {
        let injector = CompactionContextInjector::new();
        let mut compacting = ChainContext::SessionLifecycle(crate::hooks::SessionLifecycleContext::new(
            "s1",
            SessionEvent::SessionCompacting,
        ));
        if let Some(lc) = compacting.as_session_lifecycle_mut() {
            lc.data = serde_json::json!([
                {"content": "working on src/main.rs today"},
                {"content": "decision: use tokio for async IO"},
            ]);
        }
        injector.handle(&mut compacting).await.unwrap();
        let annotations = &compacting.as_session_lifecycle().unwrap().annotations;
        assert!(annotations.contains_key("context"));

        let mut created = ChainContext::SessionLifecycle(crate::hooks::SessionLifecycleContext::new(
            "s1",
            SessionEvent::SessionCreated,
        ));
        injector.handle(&mut created).await.unwrap();
        assert!(created
            .as_session_lifecycle()
            .unwrap()
            .annotations
            .contains_key("preservedContext"));
    }
}
