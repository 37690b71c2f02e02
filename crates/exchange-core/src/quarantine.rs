//! Poison message quarantine policy.
//!
//! After a failed processing attempt the policy decides, from the message's
//! redelivery count alone, whether the unit of work is rolled back for another
//! attempt or the message is diverted to the backout destination.

use serde::{Deserialize, Serialize};

/// Redelivery count at which a failing message is diverted
pub const DEFAULT_REDELIVERY_THRESHOLD: u32 = 5;

/// What to do with the unit of work of a failed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineDecision {
    /// Roll back so the broker redelivers the message
    Rollback,
    /// Send the message to the backout destination, then commit
    DivertAndCommit,
}

/// Threshold-based quarantine policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantinePolicy {
    threshold: u32,
}

impl QuarantinePolicy {
    /// Create policy diverting messages whose redelivery count reaches `threshold`.
    ///
    /// A threshold of 0 diverts on the first failure.
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Decide the fate of a failed message
    pub fn decide(&self, redelivery_count: u32) -> QuarantineDecision {
        if redelivery_count >= self.threshold {
            QuarantineDecision::DivertAndCommit
        } else {
            QuarantineDecision::Rollback
        }
    }

    /// Failed attempts left before a message with this count is diverted
    pub fn attempts_remaining(&self, redelivery_count: u32) -> u32 {
        self.threshold.saturating_sub(redelivery_count)
    }
}

impl Default for QuarantinePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REDELIVERY_THRESHOLD)
    }
}

#[cfg(test)]
#[path = "quarantine_tests.rs"]
mod tests;
