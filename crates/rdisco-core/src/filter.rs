//! Discovery rule filters: loading, normalization and evaluation.
//!
//! A filter is a set of regex conditions over discovery macros plus the
//! combinator (`evaltype`) that folds condition results into a per-row
//! verdict. Four combinators exist: conjunction, disjunction, grouped
//! and/or, and a user-supplied boolean formula over condition ids.

use log::debug;
use serde_json::Value;

use rdisco_expr::double_compare;

use crate::catalog::{Catalog, ConditionOperator, ConfigCache, EvalType};
use crate::error::{DiscoveryError, Result};
use crate::macro_path::{MacroPathSet, macro_value};
use crate::matcher::{MatchOutcome, RegexRef, regexp_match};

/// A loaded filter condition.
///
/// `regexps` holds the resolved regex alternatives: exactly one for a
/// literal pattern (after user-macro interpolation), one or more for a
/// named expression set. It is never empty after a successful load.
#[derive(Debug, Clone)]
pub struct Condition {
    pub id: u64,
    pub macro_name: String,
    pub pattern: String,
    pub op: ConditionOperator,
    pub regexps: Vec<RegexRef>,
}

impl Condition {
    /// Evaluate this condition against a row.
    ///
    /// An unresolvable macro fails the condition; a regex match error fails
    /// it regardless of operator.
    pub fn matches(&self, row: &Value, paths: &MacroPathSet) -> bool {
        let Some(value) = macro_value(row, paths, &self.macro_name) else {
            return false;
        };

        match regexp_match(&self.regexps, &value) {
            MatchOutcome::Matched => self.op == ConditionOperator::Regexp,
            MatchOutcome::NotMatched => self.op == ConditionOperator::NotRegexp,
            MatchOutcome::Error => false,
        }
    }
}

/// A discovery rule filter.
#[derive(Debug, Clone)]
pub struct Filter {
    pub evaltype: EvalType,
    pub formula: String,
    pub conditions: Vec<Condition>,
}

impl Filter {
    /// Create an empty filter; conditions are attached by
    /// [`Filter::load_conditions`].
    pub fn new(evaltype: EvalType, formula: impl Into<String>) -> Self {
        Filter {
            evaltype,
            formula: formula.into(),
            conditions: Vec::new(),
        }
    }

    /// Load the rule's conditions and resolve their regex alternatives.
    ///
    /// `@name` patterns resolve against the named expression registry and
    /// are never interpolated; literal patterns get host-scoped user macros
    /// interpolated before compilation. For the grouped and/or combinator
    /// the conditions are sorted by macro; the sort is stable, so catalog
    /// (condition id) order is the intra-group tiebreaker and group
    /// boundaries are deterministic across reloads.
    pub fn load_conditions<C, K>(&mut self, catalog: &C, cache: &K, rule_id: u64) -> Result<()>
    where
        C: Catalog + ?Sized,
        K: ConfigCache + ?Sized,
    {
        let item = cache
            .item(rule_id)
            .ok_or(DiscoveryError::RuleMissing(rule_id))?;

        for record in catalog.conditions(rule_id) {
            let mut condition = Condition {
                id: record.id,
                macro_name: record.macro_name,
                pattern: record.pattern,
                op: record.op,
                regexps: Vec::new(),
            };

            if let Some(name) = condition.pattern.strip_prefix('@') {
                condition.regexps = cache
                    .named_expressions(name)
                    .into_iter()
                    .map(RegexRef::Compiled)
                    .collect();

                if condition.regexps.is_empty() {
                    return Err(DiscoveryError::UnknownNamedExpression(name.to_string()));
                }
            } else {
                condition.pattern = cache.expand_user_macros(item.host_id, &condition.pattern);
                condition.regexps = vec![RegexRef::compile(&condition.pattern)];
            }

            self.conditions.push(condition);
        }

        if self.evaltype == EvalType::AndOr {
            self.conditions
                .sort_by(|a, b| a.macro_name.cmp(&b.macro_name));
        }

        Ok(())
    }

    /// Evaluate the filter against a row.
    pub fn evaluate(&self, row: &Value, paths: &MacroPathSet) -> bool {
        match self.evaltype {
            EvalType::AndOr => self.evaluate_and_or(row, paths),
            EvalType::And => self.evaluate_and(row, paths),
            EvalType::Or => self.evaluate_or(row, paths),
            EvalType::Expression => self.evaluate_expression(row, paths),
        }
    }

    /// Grouped and/or: conditions sharing a macro form a disjunctive group;
    /// group results are conjoined in macro-sorted scan order.
    fn evaluate_and_or(&self, row: &Value, paths: &MacroPathSet) -> bool {
        let mut result = true;
        let mut last_macro: Option<&str> = None;

        for condition in &self.conditions {
            let matched = condition.matches(row, paths);

            if last_macro != Some(condition.macro_name.as_str()) {
                // a new condition group has started
                if !result {
                    break;
                }
                result = matched;
            } else if matched {
                result = true;
            }

            last_macro = Some(&condition.macro_name);
        }

        result
    }

    fn evaluate_and(&self, row: &Value, paths: &MacroPathSet) -> bool {
        self.conditions.iter().all(|c| c.matches(row, paths))
    }

    fn evaluate_or(&self, row: &Value, paths: &MacroPathSet) -> bool {
        // an empty filter accepts every row, matching the and/or combinator
        self.conditions.is_empty() || self.conditions.iter().any(|c| c.matches(row, paths))
    }

    /// Expression mode: substitute every `{<id>}` placeholder with the
    /// condition's result, then hand the buffer to the arithmetic
    /// evaluator. Substitution keeps the placeholder's length (digit plus
    /// space padding) so the scan index stays valid; placeholders with no
    /// matching condition stay literal and make the evaluator fail, which
    /// fails the filter.
    fn evaluate_expression(&self, row: &Value, paths: &MacroPathSet) -> bool {
        let mut expression = self.formula.clone();

        for condition in &self.conditions {
            let matched = condition.matches(row, paths);
            let token = format!("{{{}}}", condition.id);
            let fill = format!("{:<1$}", if matched { "1" } else { "0" }, token.len());

            let mut from = 0;
            while let Some(found) = expression[from..].find(&token) {
                let at = from + found;
                expression.replace_range(at..at + token.len(), &fill);
                from = at + token.len();
            }
        }

        match rdisco_expr::evaluate(&expression) {
            Ok(value) => !double_compare(value, 0.0),
            Err(e) => {
                debug!("cannot evaluate filter expression '{expression}': {e}");
                false
            }
        }
    }
}
