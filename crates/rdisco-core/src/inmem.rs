//! In-memory collaborator implementations.
//!
//! Embeddable defaults for the [`crate::catalog`] traits, backing the
//! integration tests and the CLI. They are not meant to replace a real
//! store or cache; they implement just enough of the contracts to run the
//! pipeline end to end.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use regex::Regex;

use crate::catalog::{
    Catalog, ConditionRecord, ConfigCache, DiscoveryEvent, EventBus, ItemDiff, ItemInfo,
    MacroPathRecord, RuleRecord, RuleUpdate,
};
use crate::gate::RuleGate;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Catalog
// =============================================================================

/// Rule catalog held in process memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    rules: Mutex<HashMap<u64, RuleRecord>>,
    conditions: Mutex<HashMap<u64, Vec<ConditionRecord>>>,
    macro_paths: Mutex<HashMap<u64, Vec<MacroPathRecord>>>,
    updates: Mutex<Vec<RuleUpdate>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_rule(&self, rule_id: u64, rule: RuleRecord) {
        guard(&self.rules).insert(rule_id, rule);
    }

    pub fn insert_conditions(&self, rule_id: u64, conditions: Vec<ConditionRecord>) {
        guard(&self.conditions).insert(rule_id, conditions);
    }

    pub fn insert_macro_paths(&self, rule_id: u64, mut paths: Vec<MacroPathRecord>) {
        paths.sort_by(|a, b| a.macro_name.cmp(&b.macro_name));
        guard(&self.macro_paths).insert(rule_id, paths);
    }

    /// All rule-row updates applied so far, oldest first.
    pub fn updates(&self) -> Vec<RuleUpdate> {
        guard(&self.updates).clone()
    }
}

impl Catalog for MemoryCatalog {
    fn rule(&self, rule_id: u64) -> Option<RuleRecord> {
        guard(&self.rules).get(&rule_id).cloned()
    }

    fn conditions(&self, rule_id: u64) -> Vec<ConditionRecord> {
        guard(&self.conditions)
            .get(&rule_id)
            .cloned()
            .unwrap_or_default()
    }

    fn macro_paths(&self, rule_id: u64) -> Vec<MacroPathRecord> {
        guard(&self.macro_paths)
            .get(&rule_id)
            .cloned()
            .unwrap_or_default()
    }

    fn update_rule(&self, update: &RuleUpdate) {
        let mut rules = guard(&self.rules);
        if let Some(rule) = rules.get_mut(&update.rule_id) {
            if let Some(state) = update.state {
                rule.state = state;
            }
            if let Some(ref error) = update.error {
                rule.error = error.clone();
            }
        }
        drop(rules);

        guard(&self.updates).push(update.clone());
    }
}

// =============================================================================
// Configuration cache
// =============================================================================

/// Configuration cache held in process memory, including the rule gate.
#[derive(Debug, Default)]
pub struct MemoryConfigCache {
    gate: RuleGate,
    items: Mutex<HashMap<u64, ItemInfo>>,
    /// host id -> `{$NAME}` -> value
    user_macros: Mutex<HashMap<u64, HashMap<String, String>>>,
    expressions: Mutex<HashMap<String, Vec<Regex>>>,
    diffs: Mutex<Vec<ItemDiff>>,
}

impl MemoryConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_item(&self, rule_id: u64, item: ItemInfo) {
        guard(&self.items).insert(rule_id, item);
    }

    pub fn set_user_macro(&self, host_id: u64, name: &str, value: &str) {
        guard(&self.user_macros)
            .entry(host_id)
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// Register a named expression set, compiling its patterns.
    pub fn insert_expression(&self, name: &str, patterns: &[&str]) -> Result<(), regex::Error> {
        let compiled = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        guard(&self.expressions).insert(name.to_string(), compiled);
        Ok(())
    }

    /// All diffs applied so far, oldest first.
    pub fn applied_diffs(&self) -> Vec<ItemDiff> {
        guard(&self.diffs).clone()
    }
}

impl ConfigCache for MemoryConfigCache {
    fn try_lock_rule(&self, rule_id: u64) -> bool {
        self.gate.try_lock(rule_id)
    }

    fn unlock_rule(&self, rule_id: u64) {
        self.gate.unlock(rule_id)
    }

    fn item(&self, rule_id: u64) -> Option<ItemInfo> {
        guard(&self.items).get(&rule_id).cloned()
    }

    fn named_expressions(&self, name: &str) -> Vec<Regex> {
        guard(&self.expressions)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn expand_user_macros(&self, host_id: u64, text: &str) -> String {
        let macros = guard(&self.user_macros);
        let Some(host_macros) = macros.get(&host_id) else {
            return text.to_string();
        };

        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("{$") {
            out.push_str(&rest[..start]);
            match rest[start..].find('}') {
                Some(offset) => {
                    let token = &rest[start..start + offset + 1];
                    match host_macros.get(token) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(token),
                    }
                    rest = &rest[start + offset + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        out.push_str(rest);
        out
    }

    fn apply_diff(&self, diffs: &[ItemDiff]) {
        guard(&self.diffs).extend_from_slice(diffs);
    }
}

// =============================================================================
// Event bus
// =============================================================================

/// Event pipeline held in process memory.
#[derive(Debug, Default)]
pub struct MemoryEventBus {
    queued: Mutex<Vec<DiscoveryEvent>>,
    processed: Mutex<Vec<DiscoveryEvent>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events that went through a `process_events` flush.
    pub fn processed(&self) -> Vec<DiscoveryEvent> {
        guard(&self.processed).clone()
    }
}

impl EventBus for MemoryEventBus {
    fn add_event(&self, event: DiscoveryEvent) {
        guard(&self.queued).push(event);
    }

    fn process_events(&self) {
        let mut queued = guard(&self.queued);
        guard(&self.processed).append(&mut queued);
    }

    fn clean_events(&self) {
        guard(&self.queued).clear();
    }
}
