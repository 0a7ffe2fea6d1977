//! Reward settlement.
//!
//! The record service settles as part of the `verify` transition. On the
//! client, [`Balances`] only moves when an acknowledgement carries a
//! settlement, and at most once per assignment.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Assignment;

/// Payout rule: a per-assignment override beats the template default.
pub fn payout(custom_reward_coins: Option<u32>, template_reward: u32) -> u32 {
    custom_reward_coins.unwrap_or(template_reward)
}

/// Payout the record would receive if verified now.
pub fn payout_for(assignment: &Assignment) -> u32 {
    payout(
        assignment.custom_reward_coins,
        assignment.template.suggested_reward,
    )
}

/// One balance increment, produced exactly once per assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub assignment_id: String,
    pub dependent_id: String,
    pub coins: u32,
    pub settled_at: DateTime<Utc>,
}

/// Compute and record the payout on the stored record.
///
/// Returns `None` when the record already carries a payout, which happens if
/// a paid assignment was unassigned and later verified again.
pub(crate) fn settle(record: &mut Assignment, now: DateTime<Utc>) -> Option<Settlement> {
    if record.reward_paid.is_some() {
        tracing::warn!(
            assignment = %record.id,
            "reward already paid; skipping settlement"
        );
        return None;
    }
    let coins = payout_for(record);
    record.reward_paid = Some(coins);
    Some(Settlement {
        assignment_id: record.id.clone(),
        dependent_id: record.dependent_id.clone(),
        coins,
        settled_at: now,
    })
}

#[derive(Debug, Default)]
struct BalanceState {
    coins: HashMap<String, u64>,
    settled: HashSet<String>,
}

/// Client-side balance view fed only by acknowledged settlements.
#[derive(Debug, Clone, Default)]
pub struct Balances {
    inner: Arc<Mutex<BalanceState>>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BalanceState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace a dependent's balance with the server's figure.
    pub fn seed(&self, dependent_id: &str, coins: u64) {
        self.state().coins.insert(dependent_id.to_string(), coins);
    }

    pub fn get(&self, dependent_id: &str) -> u64 {
        self.state().coins.get(dependent_id).copied().unwrap_or(0)
    }

    /// Apply an acknowledged settlement. Returns false for a repeat.
    pub fn credit(&self, settlement: &Settlement) -> bool {
        let mut state = self.state();
        if !state.settled.insert(settlement.assignment_id.clone()) {
            tracing::debug!(
                assignment = %settlement.assignment_id,
                "settlement already applied"
            );
            return false;
        }
        *state
            .coins
            .entry(settlement.dependent_id.clone())
            .or_insert(0) += u64::from(settlement.coins);
        tracing::info!(
            assignment = %settlement.assignment_id,
            dependent = %settlement.dependent_id,
            coins = settlement.coins,
            "reward credited"
        );
        true
    }
}
