//! Contribution points, reward claims and treasury donations.

use super::{Ledger, LedgerError, LedgerEvent, Timestamp};
use crate::economics::{reward_share, split_royalties, Amount};
use crate::Address;
use tracing::info;

impl Ledger {
    /// Treasury share `address` could claim right now.
    pub fn claimable_rewards(&self, address: &Address) -> Amount {
        let points = self.servers.get(address).map_or(0, |s| s.contributions);
        reward_share(
            self.treasury,
            points,
            self.total_contributions,
            self.params.contribution_point_max_value,
        )
    }

    /// Moves the caller's share from the treasury to its withdrawable
    /// balance and consumes all of its points.
    pub fn claim_rewards(&mut self, caller: &Address, now: Timestamp) -> Result<Amount, LedgerError> {
        let points = self.require_server(caller)?.contributions;
        let amount = self.claimable_rewards(caller);
        if amount == 0 {
            return Err(LedgerError::NothingToClaim { address: *caller });
        }
        self.treasury -= amount;
        self.total_contributions = self.total_contributions.saturating_sub(points);
        if let Some(server) = self.servers.get_mut(caller) {
            server.contributions = 0;
        }
        self.credit_payment(caller, amount);
        self.touch(caller, now);
        info!(server = %caller, points, amount = %amount, treasury = %self.treasury, "rewards claimed");
        self.emit(LedgerEvent::RewardsClaimed {
            address: *caller,
            amount,
        });
        Ok(amount)
    }

    /// Adds `amount` to the treasury minus the owner's royalties; returns
    /// `(added_to_treasury, royalties)`.
    pub fn donate_to_treasury(
        &mut self,
        donor: &Address,
        amount: Amount,
    ) -> Result<(Amount, Amount), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let (to_treasury, royalties) = split_royalties(amount, self.params.owner_royalties_percent);
        self.treasury = self.treasury.saturating_add(to_treasury);
        let owner = self.owner;
        self.credit_payment(&owner, royalties);
        info!(donor = %donor, amount = %to_treasury, royalties = %royalties, "treasury funded");
        self.emit(LedgerEvent::AddedToTreasury {
            amount: to_treasury,
            royalties,
        });
        Ok((to_treasury, royalties))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::economics::ETHER;

    fn funded(treasury: Amount, points: &[u64], cap: Amount) -> Ledger {
        let mut p = params();
        p.owner_royalties_percent = 0;
        p.contribution_point_max_value = cap;
        let mut ledger = ledger_with(p, points.len());
        for (i, pts) in points.iter().enumerate() {
            ledger.award(&server(i), *pts);
        }
        ledger.donate_to_treasury(&author(0), treasury).unwrap();
        ledger
    }

    #[test]
    fn claims_drain_treasury_proportionally() {
        let mut ledger = funded(400 * ETHER, &[3, 12, 5], 100 * ETHER);
        assert_eq!(ledger.claimable_rewards(&server(0)), 60 * ETHER);

        assert_eq!(ledger.claim_rewards(&server(0), 1), Ok(60 * ETHER));
        assert_eq!(ledger.treasury(), 340 * ETHER);
        assert_eq!(ledger.claimable_rewards(&server(0)), 0);
        assert_eq!(ledger.claimable_rewards(&server(1)), 240 * ETHER);

        assert_eq!(ledger.claim_rewards(&server(1), 2), Ok(240 * ETHER));
        assert_eq!(ledger.treasury(), 100 * ETHER);
        assert_eq!(ledger.claim_rewards(&server(2), 3), Ok(100 * ETHER));
        assert_eq!(ledger.treasury(), 0);
        assert_eq!(ledger.total_contributions(), 0);

        assert_eq!(
            ledger.claim_rewards(&server(0), 4),
            Err(LedgerError::NothingToClaim { address: server(0) })
        );
        assert_eq!(ledger.payments_of(&server(1)), 240 * ETHER);
    }

    #[test]
    fn point_value_is_capped() {
        let mut ledger = funded(100 * ETHER, &[5, 1], ETHER);
        assert_eq!(ledger.claim_rewards(&server(0), 1), Ok(5 * ETHER));
        assert_eq!(ledger.treasury(), 95 * ETHER);
    }

    #[test]
    fn claim_requires_registration() {
        let mut ledger = funded(10 * ETHER, &[1], ETHER);
        assert_eq!(
            ledger.claim_rewards(&author(0), 1),
            Err(LedgerError::ServerNotRegistered { address: author(0) })
        );
    }

    #[test]
    fn donation_pays_owner_royalties() {
        let mut ledger = ledger_with_servers(0);
        assert_eq!(
            ledger.donate_to_treasury(&author(0), 0),
            Err(LedgerError::ZeroAmount)
        );
        assert_eq!(ledger.donate_to_treasury(&author(0), 999), Ok((900, 99)));
        assert_eq!(ledger.treasury(), 900);
        assert_eq!(ledger.payments_of(&owner()), 99);
        assert_eq!(
            ledger.take_events(),
            vec![LedgerEvent::AddedToTreasury {
                amount: 900,
                royalties: 99
            }]
        );
    }
}
