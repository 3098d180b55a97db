//! Collaborator interfaces and the records flowing through them.
//!
//! The processing core never talks to a database, configuration cache,
//! event pipeline or entity reconciler directly; it goes through the narrow
//! traits defined here. In-memory implementations live in [`crate::inmem`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::macro_path::MacroPathSet;
use crate::row::Row;

// =============================================================================
// Records
// =============================================================================

/// Rule state as persisted in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Normal,
    NotSupported,
}

/// How condition results compose into a filter result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalType {
    /// Conditions grouped by macro: disjunction within a group, conjunction
    /// across groups.
    #[default]
    AndOr,
    And,
    Or,
    /// A boolean formula over `{<condition id>}` placeholders.
    Expression,
}

/// Condition operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[default]
    #[serde(rename = "match")]
    Regexp,
    #[serde(rename = "not_match")]
    NotRegexp,
}

/// One rule row from the catalog.
#[derive(Debug, Clone)]
pub struct RuleRecord {
    pub host_id: u64,
    pub key: String,
    pub state: RuleState,
    pub evaltype: EvalType,
    pub formula: String,
    /// Last persisted error text; empty when the rule is healthy.
    pub error: String,
    /// Lost-resource lifetime, a time-suffix string with optional macros.
    pub lifetime: String,
}

/// One filter condition row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRecord {
    #[serde(default)]
    pub id: u64,
    #[serde(rename = "macro")]
    pub macro_name: String,
    /// Regex source, or `@name` referencing a named expression set.
    pub pattern: String,
    #[serde(rename = "operator", default)]
    pub op: ConditionOperator,
}

/// One `(macro, path)` projection row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroPathRecord {
    #[serde(rename = "macro")]
    pub macro_name: String,
    pub path: String,
}

/// Cached item metadata backing a discovery rule.
#[derive(Debug, Clone)]
pub struct ItemInfo {
    pub host_id: u64,
    pub key: String,
}

/// The single catalog write the pipeline performs: at most `state` and
/// `error` of the rule row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleUpdate {
    pub rule_id: u64,
    pub state: Option<RuleState>,
    pub error: Option<String>,
}

impl RuleUpdate {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.error.is_none()
    }
}

/// Configuration-cache counterpart of [`RuleUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDiff {
    pub item_id: u64,
    pub state: Option<RuleState>,
    pub error: Option<String>,
}

impl ItemDiff {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.error.is_none()
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventObject {
    DiscoveryRule,
}

/// An internal event emitted when a rule changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub source: EventSource,
    pub object: EventObject,
    pub object_id: u64,
    pub clock: DateTime<Utc>,
    pub state: RuleState,
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Read access to the rule catalog plus the single rule-row write.
pub trait Catalog {
    /// Fetch the rule row, `None` when the rule does not exist.
    fn rule(&self, rule_id: u64) -> Option<RuleRecord>;

    /// Fetch the rule's filter conditions in catalog (id) order.
    fn conditions(&self, rule_id: u64) -> Vec<ConditionRecord>;

    /// Fetch the rule's macro-path mappings, sorted by macro ascending.
    fn macro_paths(&self, rule_id: u64) -> Vec<MacroPathRecord>;

    /// Apply the writeback update to the rule row.
    fn update_rule(&self, update: &RuleUpdate);
}

/// Read-through configuration cache.
pub trait ConfigCache {
    /// Non-blocking claim on a rule; `false` means another worker holds it.
    fn try_lock_rule(&self, rule_id: u64) -> bool;

    /// Release a claim taken with [`ConfigCache::try_lock_rule`].
    fn unlock_rule(&self, rule_id: u64);

    /// Item metadata for the rule, used to scope macro substitution.
    fn item(&self, rule_id: u64) -> Option<ItemInfo>;

    /// Pre-compiled regexes registered under a global expression name.
    /// Empty when the name is unknown.
    fn named_expressions(&self, name: &str) -> Vec<Regex>;

    /// Interpolate `{$NAME}` user macros scoped to a host. Unknown macros
    /// are left untouched.
    fn expand_user_macros(&self, host_id: u64, text: &str) -> String;

    /// Apply item diffs produced by the writeback stage.
    fn apply_diff(&self, diffs: &[ItemDiff]);
}

/// Append-only event pipeline.
pub trait EventBus {
    fn add_event(&self, event: DiscoveryEvent);
    fn process_events(&self);
    fn clean_events(&self);
}

/// Reported by a reconciler when the parent host disappeared mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentHostGone;

/// Downstream reconciliation of derived entities from the surviving rows.
///
/// Invoked in fixed order: items, triggers, graphs, hosts. The item stage
/// populates each row's item links; stages may append diagnostics to
/// `error`. All methods default to no-ops so partial implementations and
/// [`NoopReconciler`] stay cheap.
#[allow(unused_variables)]
pub trait Reconciler {
    fn update_items(
        &self,
        host_id: u64,
        rule_id: u64,
        rows: &mut [Row<'_>],
        macro_paths: &MacroPathSet,
        error: &mut String,
        lifetime: i64,
        now: i64,
    ) -> Result<(), ParentHostGone> {
        Ok(())
    }

    fn update_triggers(
        &self,
        host_id: u64,
        rule_id: u64,
        rows: &mut [Row<'_>],
        macro_paths: &MacroPathSet,
        error: &mut String,
    ) -> Result<(), ParentHostGone> {
        Ok(())
    }

    fn update_graphs(
        &self,
        host_id: u64,
        rule_id: u64,
        rows: &mut [Row<'_>],
        macro_paths: &MacroPathSet,
        error: &mut String,
    ) -> Result<(), ParentHostGone> {
        Ok(())
    }

    fn update_hosts(
        &self,
        rule_id: u64,
        rows: &mut [Row<'_>],
        macro_paths: &MacroPathSet,
        error: &mut String,
        lifetime: i64,
        now: i64,
    ) {
    }
}

/// Reconciler that materializes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReconciler;

impl Reconciler for NoopReconciler {}

// Workers share collaborators behind `Arc`.

impl<T: Catalog + ?Sized> Catalog for Arc<T> {
    fn rule(&self, rule_id: u64) -> Option<RuleRecord> {
        (**self).rule(rule_id)
    }
    fn conditions(&self, rule_id: u64) -> Vec<ConditionRecord> {
        (**self).conditions(rule_id)
    }
    fn macro_paths(&self, rule_id: u64) -> Vec<MacroPathRecord> {
        (**self).macro_paths(rule_id)
    }
    fn update_rule(&self, update: &RuleUpdate) {
        (**self).update_rule(update)
    }
}

impl<T: ConfigCache + ?Sized> ConfigCache for Arc<T> {
    fn try_lock_rule(&self, rule_id: u64) -> bool {
        (**self).try_lock_rule(rule_id)
    }
    fn unlock_rule(&self, rule_id: u64) {
        (**self).unlock_rule(rule_id)
    }
    fn item(&self, rule_id: u64) -> Option<ItemInfo> {
        (**self).item(rule_id)
    }
    fn named_expressions(&self, name: &str) -> Vec<Regex> {
        (**self).named_expressions(name)
    }
    fn expand_user_macros(&self, host_id: u64, text: &str) -> String {
        (**self).expand_user_macros(host_id, text)
    }
    fn apply_diff(&self, diffs: &[ItemDiff]) {
        (**self).apply_diff(diffs)
    }
}

impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    fn add_event(&self, event: DiscoveryEvent) {
        (**self).add_event(event)
    }
    fn process_events(&self) {
        (**self).process_events()
    }
    fn clean_events(&self) {
        (**self).clean_events()
    }
}

impl<T: Reconciler + ?Sized> Reconciler for Arc<T> {
    fn update_items(
        &self,
        host_id: u64,
        rule_id: u64,
        rows: &mut [Row<'_>],
        macro_paths: &MacroPathSet,
        error: &mut String,
        lifetime: i64,
        now: i64,
    ) -> Result<(), ParentHostGone> {
        (**self).update_items(host_id, rule_id, rows, macro_paths, error, lifetime, now)
    }
    fn update_triggers(
        &self,
        host_id: u64,
        rule_id: u64,
        rows: &mut [Row<'_>],
        macro_paths: &MacroPathSet,
        error: &mut String,
    ) -> Result<(), ParentHostGone> {
        (**self).update_triggers(host_id, rule_id, rows, macro_paths, error)
    }
    fn update_graphs(
        &self,
        host_id: u64,
        rule_id: u64,
        rows: &mut [Row<'_>],
        macro_paths: &MacroPathSet,
        error: &mut String,
    ) -> Result<(), ParentHostGone> {
        (**self).update_graphs(host_id, rule_id, rows, macro_paths, error)
    }
    fn update_hosts(
        &self,
        rule_id: u64,
        rows: &mut [Row<'_>],
        macro_paths: &MacroPathSet,
        error: &mut String,
        lifetime: i64,
        now: i64,
    ) {
        (**self).update_hosts(rule_id, rows, macro_paths, error, lifetime, now)
    }
}
