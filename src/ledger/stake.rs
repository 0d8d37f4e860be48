//! Server registration, the stake curve, slashing and withdrawals.

use super::{Ledger, LedgerError, LedgerEvent, Server, Timestamp};
use crate::economics::{self, percent_of, Amount};
use crate::Address;
use tracing::{debug, info};

/// Stake split applied when a server leaves the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Forfeited to the treasury.
    pub slashed: Amount,
    /// Credited to the server's withdrawable balance.
    pub refunded: Amount,
}

impl Ledger {
    /// Stake a new server must bond at ledger time `now`.
    pub fn stake_requirement(&self, now: Timestamp) -> Amount {
        economics::stake_requirement(
            self.params.min_stake,
            self.servers.len(),
            self.last_registration,
            now,
        )
    }

    /// Bonds `amount` and adds `caller` to the server set.
    pub fn register(
        &mut self,
        caller: &Address,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        if self.servers.contains_key(caller) {
            return Err(LedgerError::ServerAlreadyRegistered { address: *caller });
        }
        let max = self.params.max_servers;
        if max != 0 && self.servers.len() >= max as usize {
            return Err(LedgerError::MaxServersReached { max });
        }
        let required = self.stake_requirement(now);
        if amount < required {
            return Err(LedgerError::InsufficientStake {
                required,
                provided: amount,
            });
        }

        let seq = self.next_registration_seq;
        self.next_registration_seq += 1;
        self.servers.insert(
            *caller,
            Server {
                address: *caller,
                stake: amount,
                contributions: 0,
                last_seen: now,
                next_housekeep_at: now.saturating_add(self.params.inactivity_duration),
                registration_seq: seq,
            },
        );
        self.registration_order.insert(seq, *caller);
        self.last_registration = Some((now, required));
        self.total_staked = self.total_staked.saturating_add(amount);
        info!(server = %caller, stake = %amount, required = %required, "server registered");
        self.emit(LedgerEvent::ServerRegistered {
            address: *caller,
            stake: amount,
        });
        Ok(())
    }

    /// Leaves the server set; `slashPercent` of the stake goes to the
    /// treasury and the rest becomes withdrawable.
    pub fn unregister(
        &mut self,
        caller: &Address,
        now: Timestamp,
    ) -> Result<Settlement, LedgerError> {
        self.require_server(caller)?;
        let percent = self.params.slash_percent;
        let settlement = self.remove_server(caller, percent, false);
        self.reconsider_batch(now);
        Ok(settlement)
    }

    /// Owner-only penalty: forfeits `percent` of a server's stake to the
    /// treasury. A server left with no stake is evicted.
    pub fn slash(
        &mut self,
        caller: &Address,
        address: &Address,
        percent: u32,
        now: Timestamp,
    ) -> Result<Amount, LedgerError> {
        self.require_owner(caller)?;
        if percent > 100 {
            return Err(LedgerError::InvalidPercent { percent });
        }
        self.require_server(address)?;

        let mut remaining = 0;
        let mut slashed = 0;
        if let Some(server) = self.servers.get_mut(address) {
            slashed = percent_of(server.stake, percent);
            server.stake -= slashed;
            remaining = server.stake;
        }
        self.treasury = self.treasury.saturating_add(slashed);
        debug!(server = %address, slashed = %slashed, remaining = %remaining, "stake slashed");
        if remaining == 0 {
            self.remove_server(address, 0, true);
            self.reconsider_batch(now);
        }
        Ok(slashed)
    }

    /// Pays out the caller's withdrawable balance.
    pub fn withdraw_payments(&mut self, caller: &Address) -> Result<Amount, LedgerError> {
        let amount = self.payments_of(caller);
        if amount == 0 {
            return Err(LedgerError::NothingToWithdraw { address: *caller });
        }
        self.payments.remove(caller);
        self.emit(LedgerEvent::PaymentWithdrawn {
            address: *caller,
            amount,
        });
        Ok(amount)
    }

    /// Removes a server, settling its stake and forfeiting its points. Its
    /// vote on the current batch is withdrawn; callers re-run the verdict
    /// with [`Ledger::reconsider_batch`] once the server set is final.
    pub(super) fn remove_server(
        &mut self,
        address: &Address,
        slash_percent: u32,
        evicted: bool,
    ) -> Settlement {
        let Some(server) = self.servers.remove(address) else {
            return Settlement {
                slashed: 0,
                refunded: 0,
            };
        };
        self.registration_order.remove(&server.registration_seq);
        if let Some(batch) = self.current_batch.as_mut() {
            batch.votes.remove(address);
        }
        self.total_contributions = self.total_contributions.saturating_sub(server.contributions);

        let slashed = percent_of(server.stake, slash_percent);
        let refunded = server.stake - slashed;
        self.treasury = self.treasury.saturating_add(slashed);
        self.credit_payment(address, refunded);

        info!(
            server = %address,
            slashed = %slashed,
            refunded = %refunded,
            evicted,
            "server unregistered"
        );
        self.emit(LedgerEvent::ServerUnregistered {
            address: *address,
            slashed,
            refunded,
            evicted,
        });
        Settlement { slashed, refunded }
    }
}
