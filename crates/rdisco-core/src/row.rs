//! Payload parsing and row extraction.
//!
//! A discovery payload is a JSON array of objects, or (deprecated) an
//! object wrapping such an array under `"data"`. Each object is a candidate
//! row: it is checked for the macros the filter references (producing
//! warnings, not rejections), run through the filter, and kept in payload
//! order when it passes.

use std::fmt::Write;

use log::debug;
use serde_json::Value;

use crate::error::{DiscoveryError, Result};
use crate::filter::Filter;
use crate::macro_path::MacroPathSet;

/// Key of the legacy payload envelope.
const DATA_TAG: &str = "data";

/// Link from a surviving row to an item it materialized.
///
/// Populated by the item reconciler; sorted before the trigger stage so
/// later stages can binary-search by prototype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemLink {
    pub parent_item_id: u64,
    pub item_id: u64,
}

/// One surviving payload row.
///
/// Borrows its subtree from the parsed payload, which the orchestrator
/// keeps alive for the whole invocation.
#[derive(Debug)]
pub struct Row<'a> {
    pub data: &'a Value,
    pub item_links: Vec<ItemLink>,
}

impl<'a> Row<'a> {
    fn new(data: &'a Value) -> Self {
        Row {
            data,
            item_links: Vec::new(),
        }
    }

    /// Sort the row's item links by prototype item id.
    pub fn sort_item_links(&mut self) {
        self.item_links.sort_by_key(|link| link.parent_item_id);
    }
}

/// Parse the wire value into a JSON document.
pub fn open_payload(value: &str) -> Result<Value> {
    serde_json::from_str(value).map_err(|_| DiscoveryError::PayloadNotArray)
}

/// Locate the row array inside the payload.
fn payload_rows(payload: &Value) -> Result<&Vec<Value>> {
    if let Some(rows) = payload.as_array() {
        return Ok(rows);
    }

    let Some(object) = payload.as_object() else {
        return Err(DiscoveryError::PayloadNotArray);
    };

    match object.get(DATA_TAG).and_then(Value::as_array) {
        Some(rows) => {
            debug!("payload uses the deprecated \"{DATA_TAG}\" envelope");
            Ok(rows)
        }
        None => Err(DiscoveryError::MissingDataArray),
    }
}

/// Warn about filter macros that have no value in this row.
///
/// The diagnostics accumulate in `info` and are appended to the persisted
/// error later; they never reject the row by themselves.
fn check_row_macros(filter: &Filter, row: &Value, paths: &MacroPathSet, info: &mut String) {
    for condition in &filter.conditions {
        if let Some(mapped) = paths.get(&condition.macro_name) {
            if mapped.query(row).is_none() {
                let _ = writeln!(
                    info,
                    "Cannot accurately apply filter: no value received for macro \"{}\" json path '{}'.",
                    mapped.macro_name, mapped.path
                );
            }
            continue;
        }

        let present = row
            .as_object()
            .is_some_and(|o| o.contains_key(&condition.macro_name));
        if !present {
            let _ = writeln!(
                info,
                "Cannot accurately apply filter: no value received for macro \"{}\".",
                condition.macro_name
            );
        }
    }
}

/// Enumerate payload rows, evaluate the filter, and collect survivors in
/// payload order. Non-object elements are skipped.
pub fn extract_rows<'a>(
    payload: &'a Value,
    filter: &Filter,
    paths: &MacroPathSet,
    info: &mut String,
) -> Result<Vec<Row<'a>>> {
    let mut rows = Vec::new();

    for element in payload_rows(payload)? {
        if !element.is_object() {
            continue;
        }

        check_row_macros(filter, element, paths, info);

        if !filter.evaluate(element, paths) {
            continue;
        }

        rows.push(Row::new(element));
    }

    Ok(rows)
}
