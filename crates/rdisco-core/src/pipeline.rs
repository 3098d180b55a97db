//! The discovery rule processing pipeline.
//!
//! One invocation takes a rule id, the raw payload and a timestamp, and
//! runs: gate claim, rule load, filter/macro-path load, row extraction,
//! reconciler fan-out, then a single writeback of state and error under the
//! claim. Collaborators are injected through the traits in
//! [`crate::catalog`].

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::catalog::{
    Catalog, ConfigCache, DiscoveryEvent, EventBus, EventObject, EventSource, ItemDiff,
    Reconciler, RuleRecord, RuleState, RuleUpdate,
};
use crate::error::DiscoveryError;
use crate::filter::Filter;
use crate::lifetime::{MAX_LIFETIME, parse_time_suffix};
use crate::macro_path::MacroPathSet;
use crate::row::{extract_rows, open_payload};

/// Length limit of the persisted error field.
const ERROR_FIELD_LEN: usize = 2048;

/// Terminal status of one `process` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The pipeline ran to writeback (possibly recording an error).
    Completed,
    /// Another worker holds the rule; the value was dropped.
    Locked,
    /// The rule row does not exist; nothing was touched.
    UnknownRule,
}

/// The pipeline orchestrator.
///
/// Stateless between invocations; all durable state lives behind the
/// collaborator traits, so one processor can serve many rules and workers
/// can share collaborators via `Arc`.
pub struct DiscoveryProcessor<C, K, E, R> {
    catalog: C,
    cache: K,
    events: E,
    reconciler: R,
}

impl<C, K, E, R> DiscoveryProcessor<C, K, E, R>
where
    C: Catalog,
    K: ConfigCache,
    E: EventBus,
    R: Reconciler,
{
    pub fn new(catalog: C, cache: K, events: E, reconciler: R) -> Self {
        DiscoveryProcessor {
            catalog,
            cache,
            events,
            reconciler,
        }
    }

    /// Process one discovery value for a rule.
    ///
    /// Exactly one invocation is active per rule id at any instant; a
    /// contending call drops the value and returns [`ProcessStatus::Locked`]
    /// without mutating anything.
    pub fn process(&self, rule_id: u64, value: &str, ts: DateTime<Utc>) -> ProcessStatus {
        debug!("processing value for discovery rule {rule_id}");

        if !self.cache.try_lock_rule(rule_id) {
            warn!("cannot process discovery rule [{rule_id}]: another value is being processed");
            return ProcessStatus::Locked;
        }

        let status = self.process_locked(rule_id, value, ts);
        self.cache.unlock_rule(rule_id);
        status
    }

    fn process_locked(&self, rule_id: u64, value: &str, ts: DateTime<Utc>) -> ProcessStatus {
        let Some(rule) = self.catalog.rule(rule_id) else {
            debug!("invalid discovery rule ID [{rule_id}]");
            return ProcessStatus::UnknownRule;
        };

        let lifetime = self.resolve_lifetime(&rule);

        let mut error = String::new();
        let mut info = String::new();
        let mut became_supported = false;

        match self.run_stages(rule_id, &rule, value, ts, lifetime, &mut error, &mut info) {
            Ok(()) => {
                if rule.state == RuleState::NotSupported {
                    warn!(
                        "discovery rule \"{}:{}\" became supported",
                        rule.host_id, rule.key
                    );
                    self.events.add_event(DiscoveryEvent {
                        source: EventSource::Internal,
                        object: EventObject::DiscoveryRule,
                        object_id: rule_id,
                        clock: ts,
                        state: RuleState::Normal,
                    });
                    self.events.process_events();
                    self.events.clean_events();
                    became_supported = true;
                }
            }
            Err(e) => error = e.to_string(),
        }

        // warnings about macros with no received value ride along with the
        // error text on both the success and the failure path
        error.push_str(&info);

        self.write_back(rule_id, &rule, became_supported, &error);

        ProcessStatus::Completed
    }

    /// Filter, macro paths, rows, then the reconciler fan-out.
    ///
    /// A load failure surfaces as `Err` and becomes the persisted error. A
    /// disappeared parent host ends the fan-out early but is not an error:
    /// writeback still runs with whatever the finished stages recorded.
    #[allow(clippy::too_many_arguments)]
    fn run_stages(
        &self,
        rule_id: u64,
        rule: &RuleRecord,
        value: &str,
        ts: DateTime<Utc>,
        lifetime: i64,
        error: &mut String,
        info: &mut String,
    ) -> Result<(), DiscoveryError> {
        let mut filter = Filter::new(rule.evaltype, rule.formula.as_str());
        filter.load_conditions(&self.catalog, &self.cache, rule_id)?;

        let macro_paths = MacroPathSet::load(&self.catalog, rule_id)?;

        let payload = open_payload(value)?;
        let mut rows = extract_rows(&payload, &filter, &macro_paths, info)?;

        let now = ts.timestamp();
        let r = &self.reconciler;

        if r.update_items(rule.host_id, rule_id, &mut rows, &macro_paths, error, lifetime, now)
            .is_err()
        {
            debug!("cannot update/add items because parent host was removed while processing discovery rule");
            return Ok(());
        }

        for row in &mut rows {
            row.sort_item_links();
        }

        if r.update_triggers(rule.host_id, rule_id, &mut rows, &macro_paths, error)
            .is_err()
        {
            debug!("cannot update/add triggers because parent host was removed while processing discovery rule");
            return Ok(());
        }

        if r.update_graphs(rule.host_id, rule_id, &mut rows, &macro_paths, error)
            .is_err()
        {
            debug!("cannot update/add graphs because parent host was removed while processing discovery rule");
            return Ok(());
        }

        r.update_hosts(rule_id, &mut rows, &macro_paths, error, lifetime, now);

        Ok(())
    }

    /// Expand macros in the lifetime string and parse it, clamping
    /// unparsable input to the 25-year maximum.
    fn resolve_lifetime(&self, rule: &RuleRecord) -> i64 {
        let expanded = self.cache.expand_user_macros(rule.host_id, &rule.lifetime);
        match parse_time_suffix(&expanded) {
            Some(seconds) => seconds,
            None => {
                warn!(
                    "cannot process lost resources for the discovery rule \"{}:{}\": \"{}\" is not a valid value",
                    rule.host_id, rule.key, expanded
                );
                MAX_LIFETIME
            }
        }
    }

    /// The single persistence point: update the rule row only when state or
    /// error actually changed, and mirror the same diff into the
    /// configuration cache.
    fn write_back(&self, rule_id: u64, rule: &RuleRecord, became_supported: bool, error: &str) {
        let error = truncate_error(error);

        let mut update = RuleUpdate {
            rule_id,
            ..RuleUpdate::default()
        };
        let mut diff = ItemDiff {
            item_id: rule_id,
            ..ItemDiff::default()
        };

        if became_supported {
            update.state = Some(RuleState::Normal);
            diff.state = Some(RuleState::Normal);
        }

        if error != rule.error {
            update.error = Some(error.to_string());
            diff.error = Some(error.to_string());
        }

        if !update.is_empty() {
            self.catalog.update_rule(&update);
        }
        if !diff.is_empty() {
            self.cache.apply_diff(std::slice::from_ref(&diff));
        }
    }
}

/// Truncate error text to the persisted field limit on a char boundary.
fn truncate_error(error: &str) -> &str {
    if error.len() <= ERROR_FIELD_LEN {
        return error;
    }

    let mut end = ERROR_FIELD_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    &error[..end]
}
