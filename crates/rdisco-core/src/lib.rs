//! # rdisco-core
//!
//! Low-level discovery (LLD) rule processing: take a semi-structured
//! payload reported by a monitored host, filter its rows against the rule's
//! conditions, project discovery macros onto each surviving row, and drive
//! reconciliation of derived entities against a catalog.
//!
//! ## Architecture
//!
//! - **Filter** ([`Filter`]): regex conditions over discovery macros,
//!   combined by one of four evaluation modes (`and`, `or`, grouped
//!   and/or, boolean formula over condition ids).
//! - **Macro paths** ([`MacroPathSet`]): optional JSONPath projections per
//!   macro, consulted before direct field lookup.
//! - **Rows** ([`Row`]): payload array elements surviving the filter,
//!   borrowed from the parsed payload for the invocation's lifetime.
//! - **Pipeline** ([`DiscoveryProcessor`]): per-rule exclusive gate, load
//!   stages, reconciler fan-out, state transition event and a single
//!   writeback of the rule's `state`/`error`.
//!
//! External collaborators (catalog, configuration cache, event bus,
//! reconcilers) are traits; [`inmem`] provides embeddable in-memory
//! implementations.
//!
//! ## Quick start
//!
//! ```rust
//! use chrono::Utc;
//! use rdisco_core::{
//!     ConditionOperator, ConditionRecord, DiscoveryProcessor, EvalType, ItemInfo,
//!     MemoryCatalog, MemoryConfigCache, MemoryEventBus, NoopReconciler, ProcessStatus,
//!     RuleRecord, RuleState,
//! };
//!
//! let catalog = MemoryCatalog::new();
//! catalog.insert_rule(1001, RuleRecord {
//!     host_id: 10,
//!     key: "net.if.discovery".into(),
//!     state: RuleState::Normal,
//!     evaltype: EvalType::AndOr,
//!     formula: String::new(),
//!     error: String::new(),
//!     lifetime: "30d".into(),
//! });
//! catalog.insert_conditions(1001, vec![ConditionRecord {
//!     id: 1,
//!     macro_name: "{#IFNAME}".into(),
//!     pattern: "^eth".into(),
//!     op: ConditionOperator::Regexp,
//! }]);
//!
//! let cache = MemoryConfigCache::new();
//! cache.insert_item(1001, ItemInfo { host_id: 10, key: "net.if.discovery".into() });
//!
//! let processor =
//!     DiscoveryProcessor::new(catalog, cache, MemoryEventBus::new(), NoopReconciler);
//! let status = processor.process(
//!     1001,
//!     r#"[{"{#IFNAME}": "eth0"}, {"{#IFNAME}": "lo"}]"#,
//!     Utc::now(),
//! );
//! assert_eq!(status, ProcessStatus::Completed);
//! ```

pub mod catalog;
pub mod error;
pub mod filter;
pub mod gate;
pub mod inmem;
pub mod lifetime;
pub mod macro_path;
pub mod matcher;
pub mod pipeline;
pub mod row;

// Re-export the most commonly used types at crate root
pub use catalog::{
    Catalog, ConditionOperator, ConditionRecord, ConfigCache, DiscoveryEvent, EvalType,
    EventBus, EventObject, EventSource, ItemDiff, ItemInfo, MacroPathRecord, NoopReconciler,
    ParentHostGone, Reconciler, RuleRecord, RuleState, RuleUpdate,
};
pub use error::{DiscoveryError, Result};
pub use filter::{Condition, Filter};
pub use gate::RuleGate;
pub use inmem::{MemoryCatalog, MemoryConfigCache, MemoryEventBus};
pub use lifetime::{MAX_LIFETIME, parse_time_suffix};
pub use macro_path::{MacroPath, MacroPathSet, macro_value};
pub use matcher::{MatchOutcome, RegexRef, regexp_match};
pub use pipeline::{DiscoveryProcessor, ProcessStatus};
pub use row::{ItemLink, Row, extract_rows, open_payload};
