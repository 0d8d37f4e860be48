//! Eviction of servers that stopped participating.

use super::{Ledger, LedgerError, LedgerEvent, Server, Timestamp};
use crate::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

/// Addresses per [`Ledger::inactive_servers`] page.
pub const HOUSEKEEP_PAGE_SIZE: usize = 10;

/// Upper bound on evictions per [`Ledger::housekeep_inactive`] call.
pub const MAX_EVICTIONS_PER_CALL: usize = 10;

/// One page of inactive servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InactivePage {
    /// Inactive servers on this page, in registration order.
    pub servers: Vec<Address>,
    /// Page returned.
    pub page: u64,
    /// Last valid page.
    pub max_page: u64,
}

/// Outcome of a housekeeping call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HousekeepReport {
    /// Evicted servers, in candidate order.
    pub evicted: Vec<Address>,
    /// Contribution points awarded to the caller.
    pub reward: u64,
    /// Earliest time housekeeping may run again.
    pub next_housekeep_at: Timestamp,
}

fn is_inactive(server: &Server, inactivity: u64, now: Timestamp) -> bool {
    now.saturating_sub(server.last_seen) > inactivity
}

impl Ledger {
    /// Returns page `page` of servers idle for longer than `inactivityDuration`.
    pub fn inactive_servers(&self, page: u64, now: Timestamp) -> Result<InactivePage, LedgerError> {
        let inactivity = self.params.inactivity_duration;
        let inactive: Vec<Address> = self
            .servers()
            .filter(|server| is_inactive(server, inactivity, now))
            .map(|server| server.address)
            .collect();
        let max_page = (inactive.len().div_ceil(HOUSEKEEP_PAGE_SIZE).max(1) - 1) as u64;
        if page > max_page {
            return Err(LedgerError::MaxPageExceeded { max_page });
        }
        let servers = inactive
            .into_iter()
            .skip(page as usize * HOUSEKEEP_PAGE_SIZE)
            .take(HOUSEKEEP_PAGE_SIZE)
            .collect();
        Ok(InactivePage {
            servers,
            page,
            max_page,
        })
    }

    /// Evicts up to [`MAX_EVICTIONS_PER_CALL`] inactive servers among
    /// `candidates`. Candidates that are unknown, repeated or active again
    /// are skipped.
    pub fn housekeep_inactive(
        &mut self,
        caller: &Address,
        candidates: &[Address],
        now: Timestamp,
    ) -> Result<HousekeepReport, LedgerError> {
        self.require_server(caller)?;
        if now < self.next_housekeep_at {
            return Err(LedgerError::HousekeepCooldown {
                next: self.next_housekeep_at,
            });
        }
        self.touch(caller, now);

        let inactivity = self.params.inactivity_duration;
        let mut seen = BTreeSet::new();
        let targets: Vec<Address> = candidates
            .iter()
            .filter(|address| seen.insert(**address))
            .filter(|address| {
                self.servers
                    .get(*address)
                    .is_some_and(|server| is_inactive(server, inactivity, now))
            })
            .take(MAX_EVICTIONS_PER_CALL)
            .copied()
            .collect();

        let slash_percent = self.params.slash_percent;
        for address in &targets {
            self.remove_server(address, slash_percent, true);
        }

        let reward = self.params.housekeep_base_reward.saturating_add(
            self.params
                .housekeep_clean_reward
                .saturating_mul(targets.len() as u64),
        );
        self.award(caller, reward);
        self.next_housekeep_at = now.saturating_add(inactivity);
        info!(
            caller = %caller,
            evicted = targets.len(),
            reward,
            next = self.next_housekeep_at,
            "housekeeping complete"
        );
        self.emit(LedgerEvent::HousekeepSuccess {
            clean_count: targets.len() as u64,
            next_housekeep_at: self.next_housekeep_at,
        });
        if !targets.is_empty() {
            self.reconsider_batch(now);
        }
        Ok(HousekeepReport {
            evicted: targets,
            reward,
            next_housekeep_at: self.next_housekeep_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::super::BatchOutcome;
    use super::*;
    use crate::economics::ETHER;
    use proptest::prelude::*;

    #[test]
    fn nothing_is_inactive_before_the_deadline() {
        let ledger = ledger_with_servers(3);
        let inactivity = params().inactivity_duration;
        let page = ledger.inactive_servers(0, inactivity).unwrap();
        assert!(page.servers.is_empty());
        assert_eq!(page.max_page, 0);
        let page = ledger.inactive_servers(0, inactivity + 1).unwrap();
        assert_eq!(page.servers.len(), 3);
        assert_eq!(
            ledger.inactive_servers(1, inactivity + 1),
            Err(LedgerError::MaxPageExceeded { max_page: 0 })
        );
    }

    #[test]
    fn evicts_at_most_ten_and_rewards_caller() {
        let mut ledger = ledger_with_servers(13);
        let now = params().inactivity_duration + 1;
        let candidates: Vec<Address> = (1..13).map(server).collect();
        let treasury_before = ledger.treasury();

        let report = ledger.housekeep_inactive(&server(0), &candidates, now).unwrap();
        assert_eq!(report.evicted, (1..11).map(server).collect::<Vec<_>>());
        assert_eq!(report.reward, 1 + 2 * 10);
        assert_eq!(ledger.server_count(), 3);
        assert_eq!(ledger.server(&server(0)).map(|s| s.contributions), Some(21));
        assert!(ledger.treasury() > treasury_before);
        assert_eq!(ledger.payments_of(&server(1)), 18 * ETHER / 10);

        assert_eq!(
            ledger.housekeep_inactive(&server(0), &candidates, now + 1),
            Err(LedgerError::HousekeepCooldown {
                next: now + params().inactivity_duration
            })
        );
        let later = now + params().inactivity_duration;
        let report = ledger.housekeep_inactive(&server(0), &candidates, later).unwrap();
        assert_eq!(report.evicted, vec![server(11), server(12)]);
    }

    #[test]
    fn skips_unknown_duplicate_and_active_candidates() {
        let mut ledger = ledger_with_servers(3);
        let now = params().inactivity_duration + 1;
        ledger.touch(&server(2), now);
        let candidates = [author(0), server(1), server(1), server(2)];
        let report = ledger.housekeep_inactive(&server(0), &candidates, now).unwrap();
        assert_eq!(report.evicted, vec![server(1)]);
        assert_eq!(
            ledger.take_events().last(),
            Some(&LedgerEvent::HousekeepSuccess {
                clean_count: 1,
                next_housekeep_at: now + params().inactivity_duration
            })
        );
    }

    #[test]
    fn caller_must_be_registered() {
        let mut ledger = ledger_with_servers(2);
        assert_eq!(
            ledger.housekeep_inactive(&author(0), &[server(0)], 5_000),
            Err(LedgerError::ServerNotRegistered { address: author(0) })
        );
    }

    #[test]
    fn inactive_caller_cannot_evict_itself() {
        let mut ledger = ledger_with_servers(2);
        let now = params().inactivity_duration + 1;
        let report = ledger
            .housekeep_inactive(&server(0), &[server(0), server(1)], now)
            .unwrap();
        assert_eq!(report.evicted, vec![server(1)]);
        assert!(ledger.server(&server(0)).is_some());
    }

    #[test]
    fn evicting_idle_servers_resolves_the_open_batch() {
        let mut p = params();
        p.consensus_max_duration = 10_000;
        let mut ledger = ledger_with(p, 4);
        ledger.submit_request(&author(0), cid("a"), 0).unwrap();
        let now = params().inactivity_duration + 1;
        ledger.submit_result(&server(0), 0, result("a"), now).unwrap();
        ledger.submit_result(&server(1), 0, result("a"), now).unwrap();
        assert!(ledger.batch_outcome(0).is_none());

        ledger
            .housekeep_inactive(&server(0), &[server(2), server(3)], now)
            .unwrap();
        assert_eq!(
            ledger.batch_outcome(0),
            Some(&BatchOutcome::Completed { result: result("a") })
        );
        assert_eq!(*ledger.state_cid(), result("a").final_state_cid);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn inactive_pages_partition_the_idle_set(n in 0usize..45, active in proptest::collection::vec(any::<bool>(), 45)) {
            let mut ledger = ledger_with_servers(n);
            let now = params().inactivity_duration + 1;
            for i in 0..n {
                if active[i] {
                    ledger.touch(&server(i), now);
                }
            }
            let expected: Vec<Address> = (0..n).filter(|i| !active[*i]).map(server).collect();
            let first = ledger.inactive_servers(0, now).unwrap();
            let mut seen = Vec::new();
            for page in 0..=first.max_page {
                seen.extend(ledger.inactive_servers(page, now).unwrap().servers);
            }
            prop_assert_eq!(seen, expected);
            prop_assert_eq!(
                ledger.inactive_servers(first.max_page + 1, now),
                Err(LedgerError::MaxPageExceeded { max_page: first.max_page })
            );
        }
    }
}
