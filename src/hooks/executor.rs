//! Hook Executor — runs one chain with error isolation and context
//! propagation.
//!
//! Awaits each hook in priority order, logs what happened, and never lets
//! one hook's failure prevent the next from running: a faulting handler
//! still lets every later handler run exactly once.

use std::sync::Arc;

use crate::hooks::registry::HookRegistry;
use crate::hooks::{ChainContext, ChainType, Hook};

/// An optional external plugin-hook surface. A plugin layer may define its
/// own pre-llm / pre-tool / post-tool hooks; the executor runs them
/// *before* the internal chain and synchronizes their mutations back into
/// `ctx` first, then the internal chain runs and is synchronized back out —
/// "outer before inner" is contractual, and the contract is this trait's
/// single method.
#[async_trait::async_trait]
pub trait ExternalHooks: Send + Sync {
    /// Run every external hook registered for `chain_type` against `ctx`,
    /// mutating it in place. Implementations must apply the same
    /// error-isolation discipline the internal executor does.
    async fn run_external(&self, chain_type: ChainType, ctx: &mut ChainContext);
}

/// Drives one [`HookRegistry`]'s chains to completion.
pub struct HookExecutor {
    registry: HookRegistry,
    external: Option<Arc<dyn ExternalHooks>>,
}

impl HookExecutor {
    /// Wrap `registry` with no external plugin-hook surface.
    #[must_use]
    pub fn new(registry: HookRegistry) -> Self {
        Self {
            registry,
            external: None,
        }
    }

    /// Wrap `registry`, running `external`'s hooks before the internal
    /// chain on every `execute` call.
    #[must_use]
    pub fn with_external(registry: HookRegistry, external: Arc<dyn ExternalHooks>) -> Self {
        Self {
            registry,
            external: Some(external),
        }
    }

    /// Mutable access to the underlying registry, e.g. for `register` or
    /// `reload_config` calls between executions.
    pub fn registry_mut(&mut self) -> &mut HookRegistry {
        &mut self.registry
    }

    /// Lazily compile `ctx`'s chain, then run external hooks (if any)
    /// followed by every internal hook in priority order. A faulting
    /// handler is caught, logged by name, and swallowed; the next handler
    /// still runs against the same `ctx`.
    pub async fn execute(&mut self, mut ctx: ChainContext) -> ChainContext {
        let chain_type = ctx.chain_type();

        if let Some(external) = &self.external {
            external.run_external(chain_type, &mut ctx).await;
        }

        let compiled = self.registry.compiled(chain_type);
        for hook in &compiled {
            self.run_one(hook, &mut ctx).await;
        }

        ctx
    }

    async fn run_one(&self, hook: &Arc<dyn Hook>, ctx: &mut ChainContext) {
        if let Err(err) = hook.handle(ctx).await {
            tracing::warn!(hook = hook.name(), error = %err, "hook handler failed; continuing chain");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookError, PreLlmContext};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingHook {
        name: &'static str,
        priority: i32,
        fails: bool,
        ran: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Hook for RecordingHook {
        fn name(&self) -> &str {
            self.name
        }
        fn chain_type(&self) -> ChainType {
            ChainType::PreLlm
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        async fn handle(&self, ctx: &mut ChainContext) -> Result<(), HookError> {
            self.ran.fetch_add(1, Ordering::SeqCst);
            if let Some(pre_llm) = ctx.as_pre_llm_mut() {
                pre_llm.system.push(self.name.to_string());
            }
            if self.fails {
                return Err(HookError::new("boom"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn s5_chain_error_isolation() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(RecordingHook {
            name: "h100",
            priority: 100,
            fails: false,
            ran: ran.clone(),
        }));
        registry.register(Arc::new(RecordingHook {
            name: "h200",
            priority: 200,
            fails: true,
            ran: ran.clone(),
        }));
        registry.register(Arc::new(RecordingHook {
            name: "h300",
            priority: 300,
            fails: false,
            ran: ran.clone(),
        }));
        let mut executor = HookExecutor::new(registry);
        let ctx = ChainContext::PreLlm(PreLlmContext::new("s1", "primary", "claude-sonnet-4"));
        let ctx = executor.execute(ctx).await;

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        let system = &ctx.as_pre_llm().unwrap().system;
        assert_eq!(system, &vec!["h100".to_string(), "h200".to_string(), "h300".to_string()]);
    }

    #[tokio::test]
    async fn priority_ordering_is_respected() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(RecordingHook {
            name: "late",
            priority: 500,
            fails: false,
            ran: ran.clone(),
        }));
        registry.register(Arc::new(RecordingHook {
            name: "early",
            priority: 10,
            fails: false,
            ran: ran.clone(),
        }));
        let mut executor = HookExecutor::new(registry);
        let ctx = ChainContext::PreLlm(PreLlmContext::new("s1", "primary", "gpt-4"));
        let ctx = executor.execute(ctx).await;
        let system = &ctx.as_pre_llm().unwrap().system;
        assert_eq!(system, &vec!["early".to_string(), "late".to_string()]);
    }
}
