//! Hook Chain Middleware — a registry of prioritized interceptors organized
//! into four chains that every LLM call and tool call flows through.
//!
//! A [`Hook`] is a named, prioritized unit with a fallible async handler;
//! [`ChainContext`] is a closed sum type threaded through a sequence of
//! hooks and mutated in place.
//!
//! Block/warning state that hooks communicate to their caller is modeled as
//! the typed [`ToolCallDecision`] side-channel on [`PreToolContext`], rather
//! than as free-form entries smuggled through the tool-call args map.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod context_injection;
pub mod error_recovery;
pub mod executor;
pub mod output;
pub mod registry;
pub mod session_lifecycle;

/// The four ordered pipelines a hook may be registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainType {
    /// Runs before every LLM request.
    PreLlm,
    /// Runs before a tool call's body executes.
    PreTool,
    /// Runs after a tool call's body executes.
    PostTool,
    /// Runs on session lifecycle events.
    SessionLifecycle,
}

/// A chat message as seen by the pre-llm chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

/// Author of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Sent by the end user.
    User,
    /// Sent by the assistant.
    Assistant,
    /// A system-level instruction.
    System,
}

/// How hard the model should "think", and at what inferred effort — the
/// provider-options translation of a [`PreLlmContext::variant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    /// Maximum reasoning effort.
    High,
    /// Default reasoning effort.
    Medium,
    /// Minimal reasoning effort.
    Low,
}

/// Anthropic extended-thinking configuration, translated from `variant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThinkingOption {
    /// Extended thinking is enabled with the given token budget.
    Enabled {
        /// Token budget allotted to the thinking pass.
        #[serde(rename = "budgetTokens")]
        budget_tokens: u32,
    },
    /// Extended thinking is disabled.
    Disabled,
}

/// Provider-specific request parameters derived from `variant` by the
/// think-mode and anthropic-effort hooks. Only populated for Claude models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Extended-thinking configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingOption>,
    /// Reasoning effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<EffortLevel>,
}

/// Chain context flowing through the pre-llm chain.
#[derive(Debug, Clone)]
pub struct PreLlmContext {
    /// The session this request belongs to.
    pub session_id: String,
    /// Accumulated system-prompt lines, appended to in priority order.
    pub system: Vec<String>,
    /// The active agent name.
    pub agent: String,
    /// The target model identifier, e.g. `"claude-sonnet-4"`.
    pub model: String,
    /// The selected variant, if any hook has set one.
    pub variant: Option<String>,
    /// The conversation so far.
    pub messages: Vec<Message>,
    /// Provider-specific parameters accumulated by later hooks.
    pub provider_options: ProviderOptions,
}

impl PreLlmContext {
    /// Construct a fresh context for one LLM request.
    #[must_use]
    pub fn new(session_id: impl Into<String>, agent: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            system: Vec::new(),
            agent: agent.into(),
            model: model.into(),
            variant: None,
            messages: Vec::new(),
            provider_options: ProviderOptions::default(),
        }
    }

    /// The most recent user message, if any.
    #[must_use]
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// Whether `model` names a Claude model.
    #[must_use]
    pub fn is_claude_model(&self) -> bool {
        self.model.to_lowercase().contains("claude")
    }
}

/// A typed replacement for the untyped `args._blocked` / `args._warning`
/// fields the original system threads through free-form maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDecision {
    /// Set by a hook to short-circuit the tool call entirely. Tool
    /// implementations must check this before running.
    pub blocked: bool,
    /// A user-visible advisory attached to the tool call, independent of
    /// whether it was blocked.
    pub warning: Option<String>,
}

/// Chain context flowing through the pre-tool chain.
#[derive(Debug, Clone)]
pub struct PreToolContext {
    /// The session this call belongs to.
    pub session_id: String,
    /// The tool being invoked.
    pub tool_name: String,
    /// Tool arguments as supplied by the model.
    pub args: serde_json::Value,
    /// The agent making the call — `"primary"` or a subagent name.
    pub agent: String,
    /// Short-circuit/advisory decision accumulated by hooks.
    pub decision: ToolCallDecision,
}

impl PreToolContext {
    /// Whether `agent` names a subagent (anything other than the primary
    /// agent).
    #[must_use]
    pub fn is_subagent(&self) -> bool {
        self.agent != "primary"
    }
}

/// The result a tool call produced, as seen by the post-tool chain.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Raw tool output.
    pub output: String,
    /// Optional short title summarizing the result.
    pub title: Option<String>,
    /// Free-form structured metadata a tool attaches to its result.
    pub metadata: serde_json::Value,
}

/// Chain context flowing through the post-tool chain.
#[derive(Debug, Clone)]
pub struct PostToolContext {
    /// The session this call belongs to.
    pub session_id: String,
    /// The tool that was invoked.
    pub tool_name: String,
    /// The arguments the tool was invoked with.
    pub args: serde_json::Value,
    /// The tool's result, mutated in place by truncation/recovery hooks.
    pub result: ToolResult,
    /// The agent that invoked the tool.
    pub agent: String,
}

/// Session lifecycle events that drive the session-lifecycle chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new session began.
    SessionCreated,
    /// A session's state changed.
    SessionUpdated,
    /// A session is about to compact its history.
    SessionCompacting,
    /// A session encountered an error.
    SessionError,
    /// A session was deleted.
    SessionDeleted,
    /// An agent stopped running (successfully or not).
    AgentStopped,
    /// An agent raised an error.
    AgentError,
}

/// Chain context flowing through the session-lifecycle chain.
#[derive(Debug, Clone)]
pub struct SessionLifecycleContext {
    /// The session the event concerns.
    pub session_id: String,
    /// The event that fired.
    pub event: SessionEvent,
    /// Free-form, event-specific payload (e.g. the error for
    /// `session.error`, the message history for `session.compacting`).
    pub data: serde_json::Value,
    /// The agent the event concerns, when applicable.
    pub agent: Option<String>,
    /// Side-channel populated by hooks for downstream consumption —
    /// plays the role `ctx.data` mutation plays in the source system, kept
    /// as a typed map instead of free-form nesting inside `data`.
    pub annotations: HashMap<String, serde_json::Value>,
}

impl SessionLifecycleContext {
    /// Construct a context for `event` on `session_id`.
    #[must_use]
    pub fn new(session_id: impl Into<String>, event: SessionEvent) -> Self {
        Self {
            session_id: session_id.into(),
            event,
            data: serde_json::Value::Null,
            agent: None,
            annotations: HashMap::new(),
        }
    }
}

/// The context threaded through one chain execution. A closed sum indexed
/// by [`ChainType`], one tagged variant per chain.
#[derive(Debug, Clone)]
pub enum ChainContext {
    /// Pre-LLM chain context.
    PreLlm(PreLlmContext),
    /// Pre-tool chain context.
    PreTool(PreToolContext),
    /// Post-tool chain context.
    PostTool(PostToolContext),
    /// Session-lifecycle chain context.
    SessionLifecycle(SessionLifecycleContext),
}

impl ChainContext {
    /// The chain this context belongs to.
    #[must_use]
    pub fn chain_type(&self) -> ChainType {
        match self {
            Self::PreLlm(_) => ChainType::PreLlm,
            Self::PreTool(_) => ChainType::PreTool,
            Self::PostTool(_) => ChainType::PostTool,
            Self::SessionLifecycle(_) => ChainType::SessionLifecycle,
        }
    }

    /// Borrow the pre-llm context, if this is one.
    #[must_use]
    pub fn as_pre_llm(&self) -> Option<&PreLlmContext> {
        match self {
            Self::PreLlm(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Mutably borrow the pre-llm context, if this is one.
    pub fn as_pre_llm_mut(&mut self) -> Option<&mut PreLlmContext> {
        match self {
            Self::PreLlm(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Borrow the pre-tool context, if this is one.
    #[must_use]
    pub fn as_pre_tool(&self) -> Option<&PreToolContext> {
        match self {
            Self::PreTool(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Mutably borrow the pre-tool context, if this is one.
    pub fn as_pre_tool_mut(&mut self) -> Option<&mut PreToolContext> {
        match self {
            Self::PreTool(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Borrow the post-tool context, if this is one.
    #[must_use]
    pub fn as_post_tool(&self) -> Option<&PostToolContext> {
        match self {
            Self::PostTool(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Mutably borrow the post-tool context, if this is one.
    pub fn as_post_tool_mut(&mut self) -> Option<&mut PostToolContext> {
        match self {
            Self::PostTool(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Borrow the session-lifecycle context, if this is one.
    #[must_use]
    pub fn as_session_lifecycle(&self) -> Option<&SessionLifecycleContext> {
        match self {
            Self::SessionLifecycle(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Mutably borrow the session-lifecycle context, if this is one.
    pub fn as_session_lifecycle_mut(&mut self) -> Option<&mut SessionLifecycleContext> {
        match self {
            Self::SessionLifecycle(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// Errors a hook handler may raise. Always caught, logged, and swallowed by
/// [`executor::HookExecutor`] — a faulting handler never aborts a chain.
#[derive(Debug, Error)]
#[error("hook failed: {0}")]
pub struct HookError(pub String);

impl HookError {
    /// Construct a hook error with message `msg`.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A single prioritized interceptor registered against one [`ChainType`].
///
/// `name`/`priority` are immutable identity; `handle` is the fallible,
/// async unit of work.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Unique name, used for registry lookups, enable/disable, and error
    /// log attribution.
    fn name(&self) -> &str;

    /// Which chain this hook runs in.
    fn chain_type(&self) -> ChainType;

    /// Execution order within its chain — lower runs first.
    fn priority(&self) -> i32;

    /// Mutate `ctx` in place. Returning `Err` is caught and logged by the
    /// executor; it never aborts the chain.
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError>;
}
