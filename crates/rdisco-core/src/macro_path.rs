//! Macro-to-path projections.
//!
//! A rule may register a structured-document path for a discovery macro;
//! the macro's per-row value is then projected via the path instead of a
//! direct field lookup. The set is sorted by macro name and looked up by
//! binary search.

use serde_json::Value;
use serde_json_path::JsonPath;

use crate::catalog::Catalog;
use crate::error::{DiscoveryError, Result};

/// A validated `(macro, path)` mapping.
#[derive(Debug, Clone)]
pub struct MacroPath {
    pub macro_name: String,
    pub path: String,
    compiled: JsonPath,
}

impl MacroPath {
    /// Open `row` by this path, returning the first located subtree.
    pub fn query<'a>(&self, row: &'a Value) -> Option<&'a Value> {
        self.compiled.query(row).all().into_iter().next()
    }
}

/// The macro-path mappings of one rule, sorted by macro name.
#[derive(Debug, Clone, Default)]
pub struct MacroPathSet {
    paths: Vec<MacroPath>,
}

impl MacroPathSet {
    /// An empty set; every macro resolves by direct field lookup.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load and validate the rule's macro paths from the catalog.
    ///
    /// Validation failure aborts the whole load, naming the macro and the
    /// path diagnostic.
    pub fn load<C: Catalog + ?Sized>(catalog: &C, rule_id: u64) -> Result<Self> {
        let mut paths = Vec::new();

        for record in catalog.macro_paths(rule_id) {
            let compiled =
                JsonPath::parse(&record.path).map_err(|e| DiscoveryError::BadMacroPath {
                    macro_name: record.macro_name.clone(),
                    message: e.to_string(),
                })?;

            paths.push(MacroPath {
                macro_name: record.macro_name,
                path: record.path,
                compiled,
            });
        }

        paths.sort_by(|a, b| a.macro_name.cmp(&b.macro_name));

        Ok(MacroPathSet { paths })
    }

    /// Binary-search the set for a macro.
    pub fn get(&self, macro_name: &str) -> Option<&MacroPath> {
        self.paths
            .binary_search_by(|p| p.macro_name.as_str().cmp(macro_name))
            .ok()
            .map(|index| &self.paths[index])
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Resolve a macro's value in a row.
///
/// A registered path wins over a direct field of the same name; a macro
/// with a registered path never falls back to the direct field. String
/// values render unquoted, everything else as compact JSON.
pub fn macro_value(row: &Value, paths: &MacroPathSet, macro_name: &str) -> Option<String> {
    if let Some(mapped) = paths.get(macro_name) {
        return mapped.query(row).map(render_value);
    }

    row.as_object()?.get(macro_name).map(render_value)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
