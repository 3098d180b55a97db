//! # rdisco-expr
//!
//! Evaluator for the boolean/arithmetic formulas attached to discovery
//! filters. A formula is an ASCII expression over numeric literals combined
//! with `and`, `or`, `not`, comparisons (`=`, `<>`, `<`, `<=`, `>`, `>=`)
//! and the four arithmetic operators. By the time a formula reaches this
//! crate the filter has already substituted its condition placeholders with
//! `1`/`0`, so anything non-numeric left in the input is a parse error.
//!
//! Logical operators treat a value as true when it differs from zero by more
//! than the comparison epsilon (see [`double_compare`]) and always yield
//! exactly `1.0` or `0.0`.
//!
//! ```rust
//! use rdisco_expr::{evaluate, double_compare};
//!
//! let value = evaluate("1 and not 0").unwrap();
//! assert!(!double_compare(value, 0.0));
//!
//! assert!(evaluate("{100} and {101}").is_err()); // unsubstituted placeholders
//! ```

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "src/expr.pest"]
struct FormulaParser;

/// Errors produced while evaluating a formula.
#[derive(Debug, Error)]
pub enum ExprError {
    /// The input is not a well-formed formula.
    #[error("cannot parse expression: {0}")]
    Parse(String),

    /// The right-hand side of a division evaluated to zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The expression produced an infinity or NaN.
    #[error("expression value is not a finite number")]
    NotFinite,
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ExprError>;

/// Comparison epsilon shared by `=`/`<>` and logical truthiness.
const EPSILON: f64 = 1e-6;

/// Compare two doubles for equality within [`EPSILON`].
pub fn double_compare(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

fn truthy(v: f64) -> bool {
    !double_compare(v, 0.0)
}

fn bool_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

/// Evaluate a formula, returning its numeric value.
///
/// # Examples
///
/// ```
/// use rdisco_expr::evaluate;
///
/// assert_eq!(evaluate("(1 or 0) and 1").unwrap(), 1.0);
/// assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
/// ```
pub fn evaluate(expression: &str) -> Result<f64> {
    let mut pairs = FormulaParser::parse(Rule::formula, expression)
        .map_err(|e| ExprError::Parse(e.to_string()))?;

    let pratt = PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::infix(Rule::eq_op, Assoc::Left)
            | Op::infix(Rule::ne_op, Assoc::Left)
            | Op::infix(Rule::lt_op, Assoc::Left)
            | Op::infix(Rule::le_op, Assoc::Left)
            | Op::infix(Rule::gt_op, Assoc::Left)
            | Op::infix(Rule::ge_op, Assoc::Left))
        .op(Op::infix(Rule::add_op, Assoc::Left) | Op::infix(Rule::sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_op, Assoc::Left) | Op::infix(Rule::div_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op) | Op::prefix(Rule::neg_op));

    // formula = { SOI ~ expr ~ EOI }
    let formula = pairs.next().expect("grammar yields a formula pair");
    let expr = formula
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .expect("formula contains an expr");

    let value = eval_expr(expr.into_inner(), &pratt)?;

    if !value.is_finite() {
        return Err(ExprError::NotFinite);
    }

    Ok(value)
}

fn eval_expr(pairs: Pairs<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<f64> {
    pratt
        .map_primary(|primary: Pair<'_, Rule>| match primary.as_rule() {
            Rule::number => primary
                .as_str()
                .parse::<f64>()
                .map_err(|e| ExprError::Parse(e.to_string())),
            Rule::expr => eval_expr(primary.into_inner(), pratt),
            other => unreachable!("unexpected primary rule: {other:?}"),
        })
        .map_prefix(|op, rhs| {
            let rhs = rhs?;
            match op.as_rule() {
                Rule::not_op => Ok(bool_value(!truthy(rhs))),
                Rule::neg_op => Ok(-rhs),
                other => unreachable!("unexpected prefix rule: {other:?}"),
            }
        })
        .map_infix(|lhs, op, rhs| {
            let lhs = lhs?;
            let rhs = rhs?;
            Ok(match op.as_rule() {
                Rule::or_op => bool_value(truthy(lhs) || truthy(rhs)),
                Rule::and_op => bool_value(truthy(lhs) && truthy(rhs)),
                Rule::eq_op => bool_value(double_compare(lhs, rhs)),
                Rule::ne_op => bool_value(!double_compare(lhs, rhs)),
                Rule::lt_op => bool_value(lhs < rhs),
                Rule::le_op => bool_value(lhs <= rhs),
                Rule::gt_op => bool_value(lhs > rhs),
                Rule::ge_op => bool_value(lhs >= rhs),
                Rule::add_op => lhs + rhs,
                Rule::sub_op => lhs - rhs,
                Rule::mul_op => lhs * rhs,
                Rule::div_op => {
                    if double_compare(rhs, 0.0) {
                        return Err(ExprError::DivisionByZero);
                    }
                    lhs / rhs
                }
                other => unreachable!("unexpected infix rule: {other:?}"),
            })
        })
        .parse(pairs)
}

// =============================================================================
// Tests
// =============================================================================
