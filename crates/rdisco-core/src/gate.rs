//! Per-rule exclusion gate.
//!
//! At most one value is processed per discovery rule at any instant. The
//! gate is a process-wide claim registry with a non-blocking test-and-set:
//! a worker that loses the race abandons its value instead of waiting.

use std::collections::HashSet;
use std::sync::Mutex;

/// Process-wide registry of rule ids currently being processed.
#[derive(Debug, Default)]
pub struct RuleGate {
    claimed: Mutex<HashSet<u64>>,
}

impl RuleGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim a rule. Returns `false` without blocking when another
    /// worker already holds the claim.
    pub fn try_lock(&self, rule_id: u64) -> bool {
        self.claim_set().insert(rule_id)
    }

    /// Release a claim. Releasing an unclaimed rule is a no-op.
    pub fn unlock(&self, rule_id: u64) {
        self.claim_set().remove(&rule_id);
    }

    /// Whether a rule is currently claimed.
    pub fn is_locked(&self, rule_id: u64) -> bool {
        self.claim_set().contains(&rule_id)
    }

    fn claim_set(&self) -> std::sync::MutexGuard<'_, HashSet<u64>> {
        // A poisoned claim set is still structurally sound
        self.claimed.lock().unwrap_or_else(|e| e.into_inner())
    }
}
