//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rdisco_core::{
    Catalog, ConditionOperator, ConditionRecord, DiscoveryProcessor, EvalType, ItemInfo,
    ItemLink, MacroPathRecord, MacroPathSet, MemoryCatalog, MemoryConfigCache, MemoryEventBus,
    NoopReconciler, ParentHostGone, Reconciler, Row, RuleRecord, RuleState,
};

pub const RULE_ID: u64 = 4242;
pub const HOST_ID: u64 = 77;
pub const RULE_KEY: &str = "net.if.discovery";

/// One in-memory world: catalog, cache and event bus wired for `RULE_ID`.
pub struct Setup {
    pub catalog: Arc<MemoryCatalog>,
    pub cache: Arc<MemoryConfigCache>,
    pub events: Arc<MemoryEventBus>,
}

impl Setup {
    pub fn new(evaltype: EvalType, formula: &str) -> Self {
        let setup = Setup {
            catalog: Arc::new(MemoryCatalog::new()),
            cache: Arc::new(MemoryConfigCache::new()),
            events: Arc::new(MemoryEventBus::new()),
        };
        setup.set_rule(RuleState::Normal, "", evaltype, formula);
        setup.cache.insert_item(
            RULE_ID,
            ItemInfo {
                host_id: HOST_ID,
                key: RULE_KEY.to_string(),
            },
        );
        setup
    }

    /// (Re)insert the rule row with the given state and stored error.
    pub fn set_rule(&self, state: RuleState, error: &str, evaltype: EvalType, formula: &str) {
        self.catalog.insert_rule(
            RULE_ID,
            RuleRecord {
                host_id: HOST_ID,
                key: RULE_KEY.to_string(),
                state,
                evaltype,
                formula: formula.to_string(),
                error: error.to_string(),
                lifetime: "30d".to_string(),
            },
        );
    }

    pub fn conditions(&self, conditions: Vec<ConditionRecord>) {
        self.catalog.insert_conditions(RULE_ID, conditions);
    }

    pub fn macro_paths(&self, paths: Vec<MacroPathRecord>) {
        self.catalog.insert_macro_paths(RULE_ID, paths);
    }

    pub fn processor(
        &self,
    ) -> DiscoveryProcessor<Arc<MemoryCatalog>, Arc<MemoryConfigCache>, Arc<MemoryEventBus>, NoopReconciler>
    {
        self.processor_with(NoopReconciler)
    }

    pub fn processor_with<R: Reconciler>(
        &self,
        reconciler: R,
    ) -> DiscoveryProcessor<Arc<MemoryCatalog>, Arc<MemoryConfigCache>, Arc<MemoryEventBus>, R>
    {
        DiscoveryProcessor::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.cache),
            Arc::clone(&self.events),
            reconciler,
        )
    }

    /// The rule's currently persisted error text.
    pub fn stored_error(&self) -> String {
        self.catalog.rule(RULE_ID).unwrap().error
    }

    pub fn stored_state(&self) -> RuleState {
        self.catalog.rule(RULE_ID).unwrap().state
    }
}

pub fn cond(id: u64, macro_name: &str, pattern: &str) -> ConditionRecord {
    cond_op(id, macro_name, pattern, ConditionOperator::Regexp)
}

pub fn cond_op(
    id: u64,
    macro_name: &str,
    pattern: &str,
    op: ConditionOperator,
) -> ConditionRecord {
    ConditionRecord {
        id,
        macro_name: macro_name.to_string(),
        pattern: pattern.to_string(),
        op,
    }
}

pub fn macro_path(macro_name: &str, path: &str) -> MacroPathRecord {
    MacroPathRecord {
        macro_name: macro_name.to_string(),
        path: path.to_string(),
    }
}

/// Reconciler that records the fan-out for assertions.
#[derive(Default)]
pub struct RecordingReconciler {
    pub fail_items: bool,
    pub fail_triggers: bool,
    pub item_error: Option<String>,
    pub calls: Mutex<Vec<&'static str>>,
    pub row_counts: Mutex<Vec<usize>>,
    pub links_sorted_at_triggers: Mutex<Option<bool>>,
}

impl RecordingReconciler {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn row_counts(&self) -> Vec<usize> {
        self.row_counts.lock().unwrap().clone()
    }
}

impl Reconciler for RecordingReconciler {
    fn update_items(
        &self,
        _host_id: u64,
        _rule_id: u64,
        rows: &mut [Row<'_>],
        _macro_paths: &MacroPathSet,
        error: &mut String,
        _lifetime: i64,
        _now: i64,
    ) -> Result<(), ParentHostGone> {
        self.calls.lock().unwrap().push("items");
        self.row_counts.lock().unwrap().push(rows.len());

        if let Some(text) = &self.item_error {
            error.push_str(text);
        }

        // hand back links out of order so the pipeline's sort is observable
        for row in rows.iter_mut() {
            row.item_links.push(ItemLink {
                parent_item_id: 9,
                item_id: 90,
            });
            row.item_links.push(ItemLink {
                parent_item_id: 3,
                item_id: 30,
            });
        }

        if self.fail_items { Err(ParentHostGone) } else { Ok(()) }
    }

    fn update_triggers(
        &self,
        _host_id: u64,
        _rule_id: u64,
        rows: &mut [Row<'_>],
        _macro_paths: &MacroPathSet,
        _error: &mut String,
    ) -> Result<(), ParentHostGone> {
        self.calls.lock().unwrap().push("triggers");

        let sorted = rows.iter().all(|row| {
            row.item_links
                .windows(2)
                .all(|w| w[0].parent_item_id <= w[1].parent_item_id)
        });
        *self.links_sorted_at_triggers.lock().unwrap() = Some(sorted);

        if self.fail_triggers { Err(ParentHostGone) } else { Ok(()) }
    }

    fn update_graphs(
        &self,
        _host_id: u64,
        _rule_id: u64,
        _rows: &mut [Row<'_>],
        _macro_paths: &MacroPathSet,
        _error: &mut String,
    ) -> Result<(), ParentHostGone> {
        self.calls.lock().unwrap().push("graphs");
        Ok(())
    }

    fn update_hosts(
        &self,
        _rule_id: u64,
        _rows: &mut [Row<'_>],
        _macro_paths: &MacroPathSet,
        _error: &mut String,
        _lifetime: i64,
        _now: i64,
    ) {
        self.calls.lock().unwrap().push("hosts");
    }
}
