//! Regular-expression matching for filter conditions.
//!
//! Each condition owns a vector of regex alternatives: a single compiled
//! pattern for literal conditions, one or more for named expression sets.
//! Matching is case-sensitive and yields a three-way outcome so the
//! operator mapping can treat match errors as a failed condition.

use regex::Regex;

/// One regex alternative of a condition.
///
/// A literal pattern that does not compile (for example after user-macro
/// interpolation produced broken syntax) is kept as `Invalid` instead of
/// failing the filter load; it surfaces as [`MatchOutcome::Error`] when the
/// condition is evaluated.
#[derive(Debug, Clone)]
pub enum RegexRef {
    Compiled(Regex),
    Invalid(String),
}

impl RegexRef {
    /// Compile a pattern, falling back to `Invalid` on bad syntax.
    pub fn compile(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => RegexRef::Compiled(re),
            Err(_) => RegexRef::Invalid(pattern.to_string()),
        }
    }

    /// The pattern source.
    pub fn source(&self) -> &str {
        match self {
            RegexRef::Compiled(re) => re.as_str(),
            RegexRef::Invalid(pattern) => pattern,
        }
    }
}

/// Three-way result of matching a value against a set of alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched,
    NotMatched,
    Error,
}

/// Match `value` against the alternatives. The set matches when any
/// alternative matches; an invalid alternative aborts with `Error`.
pub fn regexp_match(refs: &[RegexRef], value: &str) -> MatchOutcome {
    for r in refs {
        match r {
            RegexRef::Compiled(re) => {
                if re.is_match(value) {
                    return MatchOutcome::Matched;
                }
            }
            RegexRef::Invalid(_) => return MatchOutcome::Error,
        }
    }
    MatchOutcome::NotMatched
}
