//! Output Management hooks — truncate tool output and monitor/react to
//! context-window pressure.
//!
//! Truncation cuts to a byte budget, appends a deterministic footer, and
//! stays idempotent: a second pass over already-truncated output is a
//! no-op.

use async_trait::async_trait;

use crate::access::redact::REDACTION_MARKER;
use crate::hooks::{ChainContext, ChainType, Hook, HookError, ProviderOptions};

/// Budget enforced by [`TruncateOptions::default`] and the
/// `tool-output-truncator` hook: the first 50 KiB of any tool output.
pub const DEFAULT_TRUNCATION_BUDGET: usize = 50 * 1024;

/// Output at or above this size gets a "stream" tail note rather than a
/// plain truncation footer, signaling the cut content was large enough
/// that the caller likely wants to re-fetch via a streaming interface.
pub const STREAM_THRESHOLD: usize = 10 * 1024 * 1024;

/// Truncate `content` to at most `budget` bytes, preserving every
/// [`REDACTION_MARKER`] occurrence that falls beyond the cut point and
/// appending a deterministic footer. Idempotent: truncating
/// already-truncated output that is within budget is a no-op (testable
/// property 3).
#[must_use]
pub fn truncate(content: &str, budget: usize) -> String {
    if content.len() <= budget {
        return content.to_string();
    }

    let cut = floor_char_boundary(content, budget);
    let head = &content[..cut];
    let tail = &content[cut..];

    let preserved_markers = tail.matches(REDACTION_MARKER).count();
    let original_len = content.len();

    let mut out = String::with_capacity(cut + preserved_markers * REDACTION_MARKER.len() + 64);
    out.push_str(head);
    for _ in 0..preserved_markers {
        out.push_str(REDACTION_MARKER);
    }

    if original_len >= STREAM_THRESHOLD {
        out.push_str(&format!(
            "\n[stream: {original_len} bytes total, showing first {cut} bytes — re-fetch via streaming interface for the rest]"
        ));
    } else {
        out.push_str(&format!(
            "\n[truncated: {original_len} bytes total, showing first {cut} bytes]"
        ));
    }
    out
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Caps any tool output at [`DEFAULT_TRUNCATION_BUDGET`], preserving
/// redaction markers beyond the cut and appending a footer.
pub struct ToolOutputTruncator {
    budget: usize,
}

impl Default for ToolOutputTruncator {
    fn default() -> Self {
        Self::new(DEFAULT_TRUNCATION_BUDGET)
    }
}

impl ToolOutputTruncator {
    /// Build a truncator enforcing `budget` bytes.
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }
}

#[async_trait]
impl Hook for ToolOutputTruncator {
    fn name(&self) -> &str {
        "tool-output-truncator"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PostTool
    }
    fn priority(&self) -> i32 {
        50
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(post_tool) = ctx.as_post_tool_mut() else {
            return Ok(());
        };
        post_tool.result.output = truncate(&post_tool.result.output, self.budget);
        Ok(())
    }
}

/// For `grep`/`ripgrep` tool calls, caps non-empty output lines at 50 and
/// appends a `[showing 50 of N matches]` footer.
pub struct GrepOutputTruncator {
    max_lines: usize,
}

impl Default for GrepOutputTruncator {
    fn default() -> Self {
        Self { max_lines: 50 }
    }
}

#[async_trait]
impl Hook for GrepOutputTruncator {
    fn name(&self) -> &str {
        "grep-output-truncator"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PostTool
    }
    fn priority(&self) -> i32 {
        60
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(post_tool) = ctx.as_post_tool_mut() else {
            return Ok(());
        };
        if post_tool.tool_name != "grep" && post_tool.tool_name != "ripgrep" {
            return Ok(());
        }
        let lines: Vec<&str> = post_tool
            .result
            .output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        if lines.len() > self.max_lines {
            let total = lines.len();
            let shown = lines[..self.max_lines].join("\n");
            post_tool.result.output = format!("{shown}\n[showing {} of {total} matches]", self.max_lines);
        }
        Ok(())
    }
}

/// Truncates an overlong `result.title` to 200 characters plus an
/// ellipsis.
pub struct QuestionLabelTruncator;

#[async_trait]
impl Hook for QuestionLabelTruncator {
    fn name(&self) -> &str {
        "question-label-truncator"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PostTool
    }
    fn priority(&self) -> i32 {
        70
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(post_tool) = ctx.as_post_tool_mut() else {
            return Ok(());
        };
        if let Some(title) = &post_tool.result.title {
            if title.chars().count() > 200 {
                let truncated: String = title.chars().take(200).collect();
                post_tool.result.title = Some(format!("{truncated}…"));
            }
        }
        Ok(())
    }
}

/// A model's advertised context window, in tokens.
#[must_use]
pub fn model_context_window(model: &str) -> u64 {
    let model = model.to_lowercase();
    if model.contains("claude") {
        200_000
    } else if model.contains("gpt-4") {
        128_000
    } else if model.contains("gemini") {
        1_000_000
    } else {
        128_000
    }
}

/// Estimate a request's token count the same way both
/// [`ContextWindowMonitor`] and [`PreemptiveCompaction`] do: a single
/// `ceil(len / 4)` estimator over the system prompt joined
/// with the JSON-serialized message list, so the two hooks never disagree
/// about where the request stands relative to the window.
#[must_use]
pub fn estimate_tokens(system: &[String], messages: &[crate::hooks::Message]) -> u64 {
    let system_len: usize = system.iter().map(String::len).sum();
    let messages_json = serde_json::to_string(messages).unwrap_or_default();
    let total = system_len + messages_json.len();
    total.div_ceil(4) as u64
}

const WARNING_THRESHOLD: f64 = 0.8;
const COMPACTION_THRESHOLD: f64 = 0.9;

/// Warns (via a system line) once estimated token usage crosses
/// [`WARNING_THRESHOLD`] of the model's context window but stays below
/// [`COMPACTION_THRESHOLD`].
pub struct ContextWindowMonitor;

#[async_trait]
impl Hook for ContextWindowMonitor {
    fn name(&self) -> &str {
        "context-window-monitor"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PreLlm
    }
    fn priority(&self) -> i32 {
        900
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(pre_llm) = ctx.as_pre_llm_mut() else {
            return Ok(());
        };
        let window = model_context_window(&pre_llm.model);
        let estimated = estimate_tokens(&pre_llm.system, &pre_llm.messages);
        let ratio = estimated as f64 / window as f64;
        if ratio >= WARNING_THRESHOLD && ratio < COMPACTION_THRESHOLD {
            pre_llm.system.push(format!(
                "Warning: this request uses an estimated {estimated}/{window} tokens ({:.0}% of the context window).",
                ratio * 100.0
            ));
        }
        Ok(())
    }
}

/// Forces a compaction variant and a CRITICAL system line once estimated
/// token usage reaches [`COMPACTION_THRESHOLD`] of the model's context
/// window.
pub struct PreemptiveCompaction;

#[async_trait]
impl Hook for PreemptiveCompaction {
    fn name(&self) -> &str {
        "preemptive-compaction"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PreLlm
    }
    fn priority(&self) -> i32 {
        910
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(pre_llm) = ctx.as_pre_llm_mut() else {
            return Ok(());
        };
        let window = model_context_window(&pre_llm.model);
        let estimated = estimate_tokens(&pre_llm.system, &pre_llm.messages);
        let ratio = estimated as f64 / window as f64;
        if ratio >= COMPACTION_THRESHOLD {
            pre_llm.variant = Some("compact".to_string());
            pre_llm.provider_options = ProviderOptions::default();
            pre_llm.system.push(format!(
                "CRITICAL: context window nearly exhausted ({estimated}/{window} tokens) — compacting before this request proceeds."
            ));
        }
        Ok(())
    }
}
