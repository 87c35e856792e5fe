//! Error Recovery hooks — pattern-detect tool failures, append recovery
//! guidance, and detect repetition loops.
//!
//! Each recognizable error signature is matched against a static table and
//! mapped to a fixed guidance response; a per-session counter on the
//! normalized signature escalates to a loop-break warning once the same
//! failure repeats.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::hooks::{ChainContext, ChainType, Hook, HookError, SessionEvent};

const EDIT_ERROR_SIGNATURES: &[(&str, &str)] = &[
    (
        "oldString not found",
        "The text you tried to replace was not found. Re-read the file to get its exact current contents before retrying the edit.",
    ),
    (
        "Found multiple matches",
        "Your oldString matched more than once. Include more surrounding context so the match is unique.",
    ),
    (
        "oldString and newString must be different",
        "The replacement text is identical to the original. Either make a real change or skip this edit.",
    ),
];

/// On `edit` tool failures, appends the fixed recovery guidance for the
/// matched error signature to the tool's output.
pub struct EditErrorRecovery;

#[async_trait]
impl Hook for EditErrorRecovery {
    fn name(&self) -> &str {
        "edit-error-recovery"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PostTool
    }
    fn priority(&self) -> i32 {
        100
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(post_tool) = ctx.as_post_tool_mut() else {
            return Ok(());
        };
        if post_tool.tool_name != "edit" {
            return Ok(());
        }
        for (signature, guidance) in EDIT_ERROR_SIGNATURES {
            if post_tool.result.output.contains(signature) {
                post_tool.result.output.push_str("\n\n");
                post_tool.result.output.push_str(guidance);
                break;
            }
        }
        Ok(())
    }
}

/// On a `session.error` whose payload names `APIError` and whose message
/// contains `context_window_exceeded`, annotates the context for the
/// compaction-recovery path to act on.
pub struct ContextWindowLimitRecovery;

#[async_trait]
impl Hook for ContextWindowLimitRecovery {
    fn name(&self) -> &str {
        "context-window-limit-recovery"
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
        if lifecycle.event != SessionEvent::SessionError {
            return Ok(());
        }
        let name = lifecycle.data.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        let message = lifecycle
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if name == "APIError" && message.contains("context_window_exceeded") {
            lifecycle
                .annotations
                .insert("recovery".to_string(), serde_json::json!("compact"));
        }
        Ok(())
    }
}

const RETRYABLE_TOOLS: &[&str] = &["delegate_task", "task"];
const RETRY_ERROR_LEXICON: &[&str] = &["timed out", "connection reset", "rate limit", "temporarily unavailable"];

/// Retries `delegate_task`/`task` failures up to twice with exponential
/// backoff guidance (`1000 * 2^retryCount` ms), then appends an exhaustion
/// note instead of further retry guidance.
pub struct DelegateTaskRetry;

#[async_trait]
impl Hook for DelegateTaskRetry {
    fn name(&self) -> &str {
        "delegate-task-retry"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PostTool
    }
    fn priority(&self) -> i32 {
        200
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(post_tool) = ctx.as_post_tool_mut() else {
            return Ok(());
        };
        if !RETRYABLE_TOOLS.contains(&post_tool.tool_name.as_str()) {
            return Ok(());
        }
        let output_lower = post_tool.result.output.to_lowercase();
        if !RETRY_ERROR_LEXICON.iter().any(|sig| output_lower.contains(sig)) {
            return Ok(());
        }

        let retry_count = post_tool
            .result
            .metadata
            .get("retryCount")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);

        if retry_count >= 2 {
            post_tool
                .result
                .output
                .push_str("\n\nRetry attempts exhausted after 2 attempts; this task will not be retried automatically.");
        } else {
            let delay = 1000u64 * 2u64.pow(retry_count as u32);
            post_tool
                .result
                .output
                .push_str(&format!("\n\nThis call failed transiently; retrying in {delay}ms."));
            let next_count = retry_count + 1;
            if let Some(map) = post_tool.result.metadata.as_object_mut() {
                map.insert("retryCount".to_string(), serde_json::json!(next_count));
            } else {
                post_tool.result.metadata = serde_json::json!({ "retryCount": next_count });
            }
        }
        Ok(())
    }
}

fn normalize_signature(output: &str) -> String {
    let first_line = output.lines().next().unwrap_or("");
    first_line.trim().chars().take(200).collect()
}

/// Tracks per-session counts of normalized error signatures (the trimmed
/// first line of a tool's output, capped at 200 chars). At three or more
/// occurrences of the same signature, appends a loop-break warning.
pub struct IterativeErrorRecovery {
    counts: Mutex<HashMap<(String, String), u32>>,
}

impl Default for IterativeErrorRecovery {
    fn default() -> Self {
        Self::new()
    }
}

impl IterativeErrorRecovery {
    /// Construct a recovery hook with no tracked error history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every tracked per-session error signature count.
    pub fn reset_caches(&self) {
        self.counts.lock().unwrap().clear();
    }
}

#[async_trait]
impl Hook for IterativeErrorRecovery {
    fn name(&self) -> &str {
        "iterative-error-recovery"
    }
    fn chain_type(&self) -> ChainType {
        ChainType::PostTool
    }
    fn priority(&self) -> i32 {
        300
    }
    async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
        let Some(post_tool) = ctx.as_post_tool_mut() else {
            return Ok(());
        };
        if !post_tool.result.output.to_lowercase().contains("error") {
            return Ok(());
        }
        let signature = normalize_signature(&post_tool.result.output);
        let key = (post_tool.session_id.clone(), signature);

        let count = {
            let mut counts = self.counts.lock().unwrap();
            let entry = counts.entry(key).or_insert(0);
            *entry += 1;
            *entry
        };

        if count >= 3 {
            post_tool.result.output.push_str(&format!(
                "\n\nThis same error has occurred {count} times. Re-read the relevant file and change strategy instead of repeating the same action."
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{PostToolContext, ToolResult};

    fn post_tool_ctx(session_id: &str, tool_name: &str, output: &str) -> ChainContext {
        ChainContext::PostTool(PostToolContext {
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            args: serde_json::Value::Null,
            result: ToolResult {
                output: output.to_string(),
                title: None,
                metadata: serde_json::Value::Null,
            },
            agent: "primary".to_string(),
        })
    }

    #[tokio::test]
    async fn edit_error_recovery_appends_matched_guidance() {
        let mut ctx = post_tool_ctx("s1", "edit", "Error: oldString not found in file");
        EditErrorRecovery.handle(&mut ctx).await.unwrap();
        let output = &ctx.as_post_tool().unwrap().result.output;
        assert!(output.contains("Re-read the file"));
    }

    #[tokio::test]
    async fn s4_iterative_loop_detection_fires_on_third_occurrence() {
        let hook = IterativeErrorRecovery::new();
        for i in 1..=3 {
            let mut ctx = post_tool_ctx("s1", "edit", "Error: oldString not found");
            hook.handle(&mut ctx).await.unwrap();
            let output = &ctx.as_post_tool().unwrap().result.output;
            if i < 3 {
                assert!(!output.contains("This same error has occurred"));
            } else {
                assert!(output.contains("This same error has occurred 3 times"));
            }
        }
    }

    #[tokio::test]
    async fn delegate_task_retry_backs_off_then_exhausts() {
        let mut ctx = post_tool_ctx("s1", "delegate_task", "Error: connection reset");
        DelegateTaskRetry.handle(&mut ctx).await.unwrap();
        let (output, metadata) = {
            let pt = ctx.as_post_tool().unwrap();
            (pt.result.output.clone(), pt.result.metadata.clone())
        };
        assert!(output.contains("retrying in 1000ms"));
        assert_eq!(metadata["retryCount"], 1);

        DelegateTaskRetry.handle(&mut ctx).await.unwrap();
        let (output, metadata) = {
            let pt = ctx.as_post_tool().unwrap();
            (pt.result.output.clone(), pt.result.metadata.clone())
        };
        assert!(output.contains("retrying in 2000ms"));
        assert_eq!(metadata["retryCount"], 2);

        DelegateTaskRetry.handle(&mut ctx).await.unwrap();
        let output = &ctx.as_post_tool().unwrap().result.output;
        assert!(output.contains("Retry attempts exhausted"));
    }

    #[tokio::test]
    async fn context_window_limit_recovery_annotates_on_match() {
        let mut ctx = ChainContext::SessionLifecycle(crate::hooks::SessionLifecycleContext::new(
            "s1",
            SessionEvent::SessionError,
        ));
        if let Some(lc) = ctx.as_session_lifecycle_mut() {
            lc.data = serde_json::json!({"name": "APIError", "message": "context_window_exceeded: too many tokens"});
        }
        ContextWindowLimitRecovery.handle(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.as_session_lifecycle().unwrap().annotations.get("recovery"),
            Some(&serde_json::json!("compact"))
        );
    }
}
