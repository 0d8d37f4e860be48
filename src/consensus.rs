//! Quorum and majority predicates for batch results.
//!
//! The ledger's consensus engine evaluates these after every submission.
//! They are kept free of ledger state so the same arithmetic can be reused
//! by off-ledger tooling that wants to predict an outcome.

use crate::{Address, Multihash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Claimed outcome of applying a batch's requests in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Snapshot of the state database after the batch.
    pub final_state_cid: Multihash,
    /// Ordered list of per-request response ids.
    pub response_cid: Multihash,
}

/// Returns true once `submissions` out of `servers` meets `quorum_percent`.
///
/// ```
/// use batch_quorum::consensus::quorum_reached;
///
/// assert!(quorum_reached(3, 4, 75));
/// assert!(!quorum_reached(2, 4, 75));
/// ```
pub fn quorum_reached(submissions: usize, servers: usize, quorum_percent: u32) -> bool {
    (submissions as u128) * 100 >= (servers as u128) * u128::from(quorum_percent)
}

/// Returns true when the largest agreeing group meets `majority_percent` of submissions.
pub fn majority_reached(majority: usize, submissions: usize, majority_percent: u32) -> bool {
    submissions > 0 && (majority as u128) * 100 >= (submissions as u128) * u128::from(majority_percent)
}

/// Groups identical results and returns the largest group with its size.
///
/// Ties go to the smallest result in `Ord` order so every evaluator picks
/// the same winner.
pub fn tally<'a>(votes: impl IntoIterator<Item = &'a BatchResult>) -> Option<(BatchResult, usize)> {
    let mut groups: BTreeMap<&BatchResult, usize> = BTreeMap::new();
    for vote in votes {
        *groups.entry(vote).or_insert(0) += 1;
    }
    let mut best: Option<(&BatchResult, usize)> = None;
    for (result, count) in groups {
        if best.map(|(_, top)| count > top).unwrap_or(true) {
            best = Some((result, count));
        }
    }
    best.map(|(result, count)| (*result, count))
}

/// Verdict over a set of submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Quorum not yet reached; keep collecting.
    Pending,
    /// Quorum and majority reached on this result.
    Agreed(BatchResult),
    /// Quorum reached without a qualifying majority.
    Diverged,
}

/// Applies the quorum/majority rule to the collected results.
pub fn evaluate<'a>(
    results: impl IntoIterator<Item = &'a BatchResult>,
    submissions: usize,
    servers: usize,
    quorum_percent: u32,
    majority_percent: u32,
) -> Verdict {
    if !quorum_reached(submissions, servers, quorum_percent) {
        return Verdict::Pending;
    }
    match tally(results) {
        Some((result, count)) if majority_reached(count, submissions, majority_percent) => {
            Verdict::Agreed(result)
        }
        _ => Verdict::Diverged,
    }
}

/// Hash a server commits to before revealing its result.
///
/// Binding the sender into the hash stops a server from replaying another
/// server's commitment.
pub fn commitment_hash(result: &BatchResult, server: &Address) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(result.final_state_cid.to_bytes());
    hasher.update(result.response_cid.to_bytes());
    hasher.update(server.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(tag: &str) -> BatchResult {
        BatchResult {
            final_state_cid: Multihash::generate(format!("state-{tag}").as_bytes()),
            response_cid: Multihash::generate(format!("resp-{tag}").as_bytes()),
        }
    }

    #[test]
    fn two_of_three_agreeing_completes() {
        let votes = [result("a"), result("a"), result("b")];
        assert_eq!(
            evaluate(votes.iter(), 3, 4, 75, 51),
            Verdict::Agreed(result("a"))
        );
    }

    #[test]
    fn three_way_split_fails() {
        let votes = [result("a"), result("b"), result("c")];
        assert_eq!(evaluate(votes.iter(), 3, 4, 75, 51), Verdict::Diverged);
    }

    #[test]
    fn below_quorum_is_pending() {
        let votes = [result("a"), result("a")];
        assert_eq!(evaluate(votes.iter(), 2, 4, 75, 51), Verdict::Pending);
    }

    #[test]
    fn results_differing_in_one_field_are_distinct() {
        let a = result("a");
        let mut b = a;
        b.response_cid = Multihash::generate(b"other");
        assert_eq!(tally([a, b].iter()).map(|(_, n)| n), Some(1));
    }

    #[test]
    fn tally_tie_break_is_order_independent() {
        let a = result("a");
        let b = result("b");
        let first = tally([a, b].iter()).unwrap();
        let second = tally([b, a].iter()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.0, a.min(b));
    }

    #[test]
    fn commitment_binds_the_sender() {
        let r = result("a");
        assert_ne!(
            commitment_hash(&r, &Address::derive("x")),
            commitment_hash(&r, &Address::derive("y"))
        );
    }
}
