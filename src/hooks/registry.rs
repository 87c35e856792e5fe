//! Hook Registry — registration, enable/disable, priority-sorting, and
//! freezing of per-chain hook lists.
//!
//! An explicit compiled/uncompiled state machine: registration invalidates
//! a cached compiled array rather than each `execute` recomputing order
//! from scratch.

use std::collections::HashMap;
use std::sync::Arc;

use crate::hooks::{ChainType, Hook};

/// Registration state of one chain's hook list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    /// No hooks registered yet.
    Empty,
    /// At least one hook registered; compiled array stale or absent.
    Registered,
    /// Compiled array is current and ready to execute.
    Compiled,
}

struct ChainSlot {
    hooks: Vec<Arc<dyn Hook>>,
    enabled: HashMap<String, bool>,
    compiled: Vec<Arc<dyn Hook>>,
    state: ChainState,
}

impl ChainSlot {
    fn new() -> Self {
        Self {
            hooks: Vec::new(),
            enabled: HashMap::new(),
            compiled: Vec::new(),
            state: ChainState::Empty,
        }
    }
}

/// Registers hooks per [`ChainType`], tracks which are enabled, and
/// produces a frozen, priority-sorted array for the executor to iterate.
///
/// A single `HookRegistry` is owned by the host for the process lifetime
/// (or test). Registration and config reload invalidate the compiled
/// cache for the affected chain but never abort an execution already in
/// flight against the previous frozen array.
pub struct HookRegistry {
    chains: HashMap<ChainType, ChainSlot>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
        }
    }

    fn slot_mut(&mut self, chain_type: ChainType) -> &mut ChainSlot {
        self.chains.entry(chain_type).or_insert_with(ChainSlot::new)
    }

    /// Register `hook`. Invalidates the compiled array for its chain.
    /// Hooks default to enabled unless a prior `init`/`reload_config` call
    /// named them disabled.
    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        let chain_type = hook.chain_type();
        let slot = self.slot_mut(chain_type);
        slot.hooks.push(hook);
        slot.state = ChainState::Registered;
    }

    /// Merge `{name -> enabled}` overrides into every chain's enabled map.
    /// Unmentioned hooks default to enabled. Invalidates all compiled
    /// arrays. Used both for initial bootstrap configuration (`init`) and
    /// live config reload (`reload_config`) — the two share one
    /// implementation because both are "merge and invalidate".
    pub fn reload_config(&mut self, overrides: &HashMap<String, bool>) {
        for slot in self.chains.values_mut() {
            for (name, enabled) in overrides {
                slot.enabled.insert(name.clone(), *enabled);
            }
            if slot.state == ChainState::Compiled {
                slot.state = ChainState::Registered;
            }
        }
    }

    /// Alias for [`HookRegistry::reload_config`], used at bootstrap.
    pub fn init(&mut self, overrides: &HashMap<String, bool>) {
        self.reload_config(overrides);
    }

    fn is_enabled(slot: &ChainSlot, hook: &Arc<dyn Hook>) -> bool {
        slot.enabled.get(hook.name()).copied().unwrap_or(true)
    }

    /// Compile `chain_type`: filter to enabled hooks, stable-sort ascending
    /// by priority (ties broken by registration order, which a stable sort
    /// preserves), and freeze. A no-op if already compiled.
    pub fn compile(&mut self, chain_type: ChainType) {
        let slot = self.slot_mut(chain_type);
        if slot.state == ChainState::Compiled {
            return;
        }
        let mut compiled: Vec<Arc<dyn Hook>> = slot
            .hooks
            .iter()
            .filter(|h| Self::is_enabled(slot, h))
            .cloned()
            .collect();
        compiled.sort_by_key(|h| h.priority());
        slot.compiled = compiled;
        slot.state = ChainState::Compiled;
    }

    /// The frozen, priority-sorted array for `chain_type`, compiling first
    /// if necessary.
    pub fn compiled(&mut self, chain_type: ChainType) -> Vec<Arc<dyn Hook>> {
        self.compile(chain_type);
        self.chains
            .get(&chain_type)
            .map(|slot| slot.compiled.clone())
            .unwrap_or_default()
    }

    /// List every registered hook for `chain_type`, or every hook across
    /// all chains if `None`. Introspection only; does not compile.
    #[must_use]
    pub fn list_registered(&self, chain_type: Option<ChainType>) -> Vec<Arc<dyn Hook>> {
        match chain_type {
            Some(ct) => self
                .chains
                .get(&ct)
                .map(|slot| slot.hooks.clone())
                .unwrap_or_default(),
            None => self
                .chains
                .values()
                .flat_map(|slot| slot.hooks.clone())
                .collect(),
        }
    }

    /// Drop all registrations and return every chain to `Empty`. Test-only.
    pub fn reset(&mut self) {
        self.chains.clear();
    }
}
