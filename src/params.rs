//! Global parameters governing stake, consensus timing and rewards.

use crate::economics::{Amount, ETHER};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol-wide configuration.  Only the ledger owner may replace it, and
/// only while the ledger is paused with no batch in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalParams {
    /// Floor of the stake requirement (wei).
    pub min_stake: Amount,
    /// Seconds a batch stays open for submissions.
    pub consensus_max_duration: u64,
    /// Share of registered servers that must submit before a batch resolves.
    pub consensus_quorum_percent: u32,
    /// Share of submissions the largest agreeing group needs to complete a batch.
    pub consensus_majority_percent: u32,
    /// Seconds without activity after which a server may be evicted.
    pub inactivity_duration: u64,
    /// Share of every donation credited to the owner.
    pub owner_royalties_percent: u32,
    /// Share of stake forfeited to the treasury on unregistration or eviction.
    pub slash_percent: u32,
    /// Contribution points for any successful housekeeping call.
    pub housekeep_base_reward: u64,
    /// Extra contribution points per evicted server.
    pub housekeep_clean_reward: u64,
    /// Maximum number of registered servers (0 = unlimited).
    pub max_servers: u32,
    /// Maximum number of requests per batch.
    pub max_batch_size: u32,
    /// Ceiling on the treasury value of one contribution point (wei).
    pub contribution_point_max_value: Amount,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            min_stake: ETHER,
            consensus_max_duration: 900,
            consensus_quorum_percent: 75,
            consensus_majority_percent: 51,
            inactivity_duration: 86_400,
            owner_royalties_percent: 10,
            slash_percent: 10,
            housekeep_base_reward: 1,
            housekeep_clean_reward: 2,
            max_servers: 100,
            max_batch_size: 1_000,
            contribution_point_max_value: ETHER,
        }
    }
}

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// camelCase field name.
    pub field: String,
    /// Why the value was rejected.
    pub reason: String,
}

impl Violation {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Joins violations into one human-readable line.
pub fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn check_range(out: &mut Vec<Violation>, field: &str, value: u32, min: u32, max: u32) {
    if value < min || value > max {
        out.push(Violation::new(
            field,
            format!("must be in [{min}, {max}], got {value}"),
        ));
    }
}

impl GlobalParams {
    /// Returns every violated rule, in field-declaration order.
    pub fn validate(&self) -> Vec<Violation> {
        let mut out = Vec::new();
        if self.min_stake == 0 {
            out.push(Violation::new("minStake", "must be nonzero"));
        }
        check_range(
            &mut out,
            "consensusQuorumPercent",
            self.consensus_quorum_percent,
            1,
            100,
        );
        check_range(
            &mut out,
            "consensusMajorityPercent",
            self.consensus_majority_percent,
            51,
            100,
        );
        check_range(
            &mut out,
            "ownerRoyaltiesPercent",
            self.owner_royalties_percent,
            0,
            100,
        );
        check_range(&mut out, "slashPercent", self.slash_percent, 0, 100);
        if self.max_batch_size == 0 {
            out.push(Violation::new("maxBatchSize", "must be nonzero"));
        }
        if self.contribution_point_max_value == 0 {
            out.push(Violation::new("contributionPointMaxValue", "must be nonzero"));
        }
        out
    }

    /// Returns `Ok(())` when [`validate`](Self::validate) finds nothing.
    pub fn ensure_valid(&self) -> Result<(), Vec<Violation>> {
        let violations = self.validate();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
