//! Session Lifecycle hooks and the LLM Parameter & Detection hooks —
//! notification dispatch, stuck-session detection, agent-failure
//! tracking, and keyword-driven variant/provider-option selection.
//!
//! Failure-streak and continuation-guard hooks key a per-session counter;
//! `subagent-question-blocker` communicates through the typed
//! [`crate::hooks::ToolCallDecision`] rather than a free-form field.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::hooks::{
    ChainContext, ChainType, EffortLevel, Hook, HookError, ProviderOptions, SessionEvent,
    ThinkingOption,
};

/// Session states another session may be in, as seen by
/// [`SessionRecovery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Idle, not currently processing a request.
    Idle,
    /// Actively processing a request.
    Busy,
}

/// A minimal view of the session-status registry `SessionRecovery`
/// consults — owned by the host, not this crate, in the real system; here
/// it is a simple shared map so the hook is independently testable.
#[derive(Default)]
pub struct SessionRegistry {
    statuses: Mutex<HashMap<String, SessionStatus>>,
}

impl SessionRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `session_id`'s current status.
    pub fn set_status(&self, session_id: impl Into<String>, status: SessionStatus) {
        self.statuses.lock().unwrap().insert(session_id.into(), status);
    }

    fn busy_sessions_other_than(&self, session_id: &str) -> Vec<String> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, status)| id.as_str() != session_id && **status == SessionStatus::Busy)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// On `session.created`, lists every *other* session currently `busy` and
/// attaches an advisory message.
pub struct SessionRecovery {
    registry: std::sync::Arc<SessionRegistry>,
}

impl SessionRecovery {
    /// Build the hook over a shared `registry`.
    #[must_use]
    pub fn new(registry: std::sync::Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Hook for SessionRecovery {
    fn name(&self) -> &str {
        "session-recovery"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::SessionLifecycle
    }
    fn priority(&self) -> i32 {
        10
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(lifecycle) = ctx.as_session_lifecycle_mut() else {
            return Ok(());
        };
        if lifecycle.event != SessionEvent::SessionCreated {
            return Ok(());
        }
        let busy = self.registry.busy_sessions_other_than(&lifecycle.session_id);
        if !busy.is_empty() {
            lifecycle.annotations.insert(
                "otherBusySessions".to_string(),
                serde_json::json!(busy.clone()),
            );
            lifecycle.annotations.insert(
                "advisory".to_string(),
                serde_json::json!(format!(
                    "{} other session(s) are currently busy: {}",
                    busy.len(),
                    busy.join(", ")
                )),
            );
        }
        Ok(())
    }
}

/// One dispatched notification, recorded for test inspection regardless of
/// which platform branch (or no-op) actually fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedNotification {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
}

/// Whether notification dispatch is active, and whether it should play a
/// sound — configured at runtime by the host.
#[derive(Debug, Clone, Copy)]
pub struct NotificationSettings {
    /// Whether to dispatch notifications at all.
    pub enabled: bool,
    /// Whether to play a sound alongside the notification.
    pub sound: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sound: false,
        }
    }
}

/// Emits a platform-native notification when an agent finishes running.
/// macOS and Linux each get a native dispatch path; every other target is
/// a no-op. Every attempt — dispatched or not — is recorded in an internal
/// log for test inspection.
pub struct SessionNotification {
    settings: NotificationSettings,
    log: Mutex<Vec<DispatchedNotification>>,
}

impl Default for SessionNotification {
    fn default() -> Self {
        Self::new(NotificationSettings::default())
    }
}

impl SessionNotification {
    /// Build a notifier with the given settings.
    #[must_use]
    pub fn new(settings: NotificationSettings) -> Self {
        Self {
            settings,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Every notification recorded so far, dispatched or not.
    #[must_use]
    pub fn log(&self) -> Vec<DispatchedNotification> {
        self.log.lock().unwrap().clone()
    }

    fn dispatch(&self, notification: &DispatchedNotification) {
        if !self.settings.enabled {
            return;
        }
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("osascript")
                .arg("-e")
                .arg(format!(
                    "display notification \"{}\" with title \"{}\"{}",
                    notification.body,
                    notification.title,
                    if self.settings.sound { " sound name \"default\"" } else { "" }
                ))
                .status();
        }
        #[cfg(all(target_os = "linux", not(target_os = "macos")))]
        {
            let _ = std::process::Command::new("notify-send")
                .arg(&notification.title)
                .arg(&notification.body)
                .status();
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = notification;
        }
    }
}

#[async_trait]
impl Hook for SessionNotification {
    fn name(&self) -> &str {
        "session-notification"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::SessionLifecycle
    }
    fn priority(&self) -> i32 {
        300
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(lifecycle) = ctx.as_session_lifecycle_mut() else {
            return Ok(());
        };
        if lifecycle.event != SessionEvent::AgentStopped {
            return Ok(());
        }
        let agent_name = lifecycle.agent.clone().unwrap_or_else(|| "agent".to_string());
        let notification = DispatchedNotification {
            title: "OpenCode".to_string(),
            body: format!("Agent `{agent_name}` has completed its task"),
        };
        self.dispatch(&notification);
        self.log.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Tracks a per-`(sessionID, agent)` failure counter. `agent.error`
/// increments it; at three or more, appends diagnostic guidance.
/// `agent.stopped` resets that agent's counter to zero — counters are
/// independent per agent within a session.
pub struct UnstableAgentBabysitter {
    counts: Mutex<HashMap<(String, String), u32>>,
}

impl Default for UnstableAgentBabysitter {
    fn default() -> Self {
        Self::new()
    }
}

impl UnstableAgentBabysitter {
    /// Construct a babysitter with no tracked failures.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every tracked failure counter.
    pub fn reset_caches(&self) {
        self.counts.lock().unwrap().clear();
    }
}

#[async_trait]
impl Hook for UnstableAgentBabysitter {
    fn name(&self) -> &str {
        "unstable-agent-babysitter"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::SessionLifecycle
    }
    fn priority(&self) -> i32 {
        250
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(lifecycle) = ctx.as_session_lifecycle_mut() else {
            return Ok(());
        };
        let Some(agent) = lifecycle.agent.clone() else {
            return Ok(());
        };
        let key = (lifecycle.session_id.clone(), agent.clone());

        match lifecycle.event {
            SessionEvent::AgentError => {
                let count = {
                    let mut counts = self.counts.lock().unwrap();
                    let entry = counts.entry(key).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if count >= 3 {
                    lifecycle.annotations.insert(
                        "diagnostic".to_string(),
                        serde_json::json!(format!(
                            "Agent `{agent}` has failed {count} times this session. Consider a different approach or delegating to another agent."
                        )),
                    );
                }
            }
            SessionEvent::AgentStopped => {
                self.counts.lock().unwrap().insert(key, 0);
            }
            _ => {}
        }
        Ok(())
    }
}

/// A todo item, as tracked by the host's todo list.
#[derive(Debug, Clone)]
pub struct TodoItem {
    /// Item text.
    pub text: String,
    /// Current status.
    pub status: TodoStatus,
}

/// A todo item's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoStatus {
    /// Not yet started.
    Pending,
    /// Currently being worked on.
    InProgress,
    /// Finished.
    Completed,
    /// Abandoned.
    Cancelled,
}

/// Flag set by [`StopContinuationGuard`] (priority 190) so
/// [`TodoContinuationEnforcer`] (priority 200) can see that the user
/// explicitly asked the agent to stop and skip its own continuation
/// prompt.
#[derive(Default)]
pub struct StopSignal {
    stopped: Mutex<std::collections::HashSet<String>>,
}

impl StopSignal {
    /// Construct an empty stop-signal tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `session_id` has a recorded user stop.
    #[must_use]
    pub fn was_stopped(&self, session_id: &str) -> bool {
        self.stopped.lock().unwrap().contains(session_id)
    }

    /// Clear every recorded stop signal.
    pub fn reset_caches(&self) {
        self.stopped.lock().unwrap().clear();
    }
}

/// Records a `userStop` flag when the session-lifecycle event's payload
/// carries `{"userStop": true}`, so [`TodoContinuationEnforcer`] sees it
/// and skips its continuation prompt. Runs at priority 190, strictly
/// before the enforcer's 200.
pub struct StopContinuationGuard {
    signal: std::sync::Arc<StopSignal>,
}

impl StopContinuationGuard {
    /// Build the guard over a shared `signal`.
    #[must_use]
    pub fn new(signal: std::sync::Arc<StopSignal>) -> Self {
        Self { signal }
    }
}

#[async_trait]
impl Hook for StopContinuationGuard {
    fn name(&self) -> &str {
        "stop-continuation-guard"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::SessionLifecycle
    }
    fn priority(&self) -> i32 {
        190
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(lifecycle) = ctx.as_session_lifecycle_mut() else {
            return Ok(());
        };
        if lifecycle.event != SessionEvent::AgentStopped {
            return Ok(());
        }
        let user_stop = lifecycle
            .data
            .get("userStop")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if user_stop {
            self.signal.stopped.lock().unwrap().insert(lifecycle.session_id.clone());
        }
        Ok(())
    }
}

/// On `agent.stopped`, attaches a continuation prompt listing every
/// incomplete todo (status not `completed`/`cancelled`) — unless
/// [`StopContinuationGuard`] recorded a user stop for this session.
pub struct TodoContinuationEnforcer {
    signal: std::sync::Arc<StopSignal>,
    todos: std::sync::Arc<dyn Fn(&str) -> Vec<TodoItem> + Send + Sync>,
}

impl TodoContinuationEnforcer {
    /// Build the enforcer, looking up todos for a session via `todos`.
    pub fn new(
        signal: std::sync::Arc<StopSignal>,
        todos: impl Fn(&str) -> Vec<TodoItem> + Send + Sync + 'static,
    ) -> Self {
        Self {
            signal,
            todos: std::sync::Arc::new(todos),
        }
    }
}

#[async_trait]
impl Hook for TodoContinuationEnforcer {
    fn name(&self) -> &str {
        "todo-continuation-enforcer"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::SessionLifecycle
    }
    fn priority(&self) -> i32 {
        200
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(lifecycle) = ctx.as_session_lifecycle_mut() else {
            return Ok(());
        };
        if lifecycle.event != SessionEvent::AgentStopped {
            return Ok(());
        }
        if self.signal.was_stopped(&lifecycle.session_id) {
            return Ok(());
        }
        let incomplete: Vec<String> = (self.todos)(&lifecycle.session_id)
            .into_iter()
            .filter(|t| !matches!(t.status, TodoStatus::Completed | TodoStatus::Cancelled))
            .map(|t| t.text)
            .collect();
        if !incomplete.is_empty() {
            lifecycle.annotations.insert(
                "continuationPrompt".to_string(),
                serde_json::json!(format!(
                    "You stopped with incomplete todos:\n{}\nContinue working on these unless the user says otherwise.",
                    incomplete.iter().map(|t| format!("- {t}")).collect::<Vec<_>>().join("\n")
                )),
            );
        }
        Ok(())
    }
}

/// The fixed message short-circuited `question` tool calls resolve to.
pub const PROCEED_AUTONOMOUSLY_MESSAGE: &str = "Proceed autonomously without asking the user a question; subagents cannot block on user input.";

/// If the current agent is a subagent and the tool being invoked is
/// `question`, blocks the call and attaches the fixed advisory message.
pub struct SubagentQuestionBlocker;

#[async_trait]
impl Hook for SubagentQuestionBlocker {
    fn name(&self) -> &str {
        "subagent-question-blocker"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PreTool
    }
    fn priority(&self) -> i32 {
        100
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(pre_tool) = ctx.as_pre_tool_mut() else {
            return Ok(());
        };
        if pre_tool.is_subagent() && pre_tool.tool_name == "question" {
            pre_tool.decision.blocked = true;
            pre_tool.decision.warning = Some(PROCEED_AUTONOMOUSLY_MESSAGE.to_string());
        }
        Ok(())
    }
}

/// Scans the last user message for trigger keywords and sets
/// `ctx.variant` accordingly: `[ultrawork]`/`ulw` → `max`,
/// `[analyze-mode]` → `analyze`, `[review-mode]` → `review`.
pub struct KeywordDetector;

#[async_trait]
impl Hook for KeywordDetector {
    fn name(&self) -> &str {
        "keyword-detector"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PreLlm
    }
    fn priority(&self) -> i32 {
        200
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(pre_llm) = ctx.as_pre_llm_mut() else {
            return Ok(());
        };
        let Some(message) = pre_llm.last_user_message() else {
            return Ok(());
        };
        let lower = message.to_lowercase();
        if lower.contains("[ultrawork]") || lower.split_whitespace().any(|w| w == "ulw") {
            pre_llm.variant = Some("max".to_string());
        } else if lower.contains("[analyze-mode]") {
            pre_llm.variant = Some("analyze".to_string());
        } else if lower.contains("[review-mode]") {
            pre_llm.variant = Some("review".to_string());
        }
        Ok(())
    }
}

fn thinking_for_variant(variant: &str) -> ThinkingOption {
    match variant {
        "max" => ThinkingOption::Enabled { budget_tokens: 32_000 },
        "quick" => ThinkingOption::Disabled,
        _ => ThinkingOption::Enabled { budget_tokens: 16_000 },
    }
}

/// Translates `ctx.variant` into an Anthropic extended-thinking budget.
/// Claude-models-only; a no-op for every other model family.
pub struct ThinkMode;

#[async_trait]
impl Hook for ThinkMode {
    fn name(&self) -> &str {
        "think-mode"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PreLlm
    }
    fn priority(&self) -> i32 {
        50
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(pre_llm) = ctx.as_pre_llm_mut() else {
            return Ok(());
        };
        if !pre_llm.is_claude_model() {
            return Ok(());
        }
        let variant = pre_llm.variant.clone().unwrap_or_else(|| "default".to_string());
        pre_llm.provider_options.thinking = Some(thinking_for_variant(&variant));
        Ok(())
    }
}

fn effort_for_variant(variant: &str) -> EffortLevel {
    match variant {
        "max" => EffortLevel::High,
        "quick" => EffortLevel::Low,
        _ => EffortLevel::Medium,
    }
}

/// Translates `ctx.variant` into an Anthropic reasoning-effort level.
/// Claude-models-only; a no-op for every other model family.
pub struct AnthropicEffort;

#[async_trait]
impl Hook for AnthropicEffort {
    fn name(&self) -> &str {
        "anthropic-effort"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PreLlm
    }
    fn priority(&self) -> i32 {
        60
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(pre_llm) = ctx.as_pre_llm_mut() else {
            return Ok(());
        };
        if !pre_llm.is_claude_model() {
            return Ok(());
        }
        let variant = pre_llm.variant.clone().unwrap_or_else(|| "default".to_string());
        pre_llm.provider_options.effort = Some(effort_for_variant(&variant));
        Ok(())
    }
}
