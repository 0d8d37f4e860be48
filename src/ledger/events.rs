//! Events emitted by ledger state transitions.

use crate::consensus::BatchResult;
use crate::economics::Amount;
use crate::params::GlobalParams;
use crate::Address;
use serde::{Deserialize, Serialize};

/// Why a batch resolved as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Quorum reached without a qualifying majority.
    NoMajority,
    /// The submission window elapsed and the batch was skipped.
    Expired,
}

/// Observable ledger transitions, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum LedgerEvent {
    /// A server bonded stake.
    ServerRegistered {
        /// Server address.
        address: Address,
        /// Bonded amount.
        stake: Amount,
    },
    /// A server left or was evicted.
    ServerUnregistered {
        /// Server address.
        address: Address,
        /// Stake forfeited to the treasury.
        slashed: Amount,
        /// Stake credited back as withdrawable.
        refunded: Amount,
        /// True when removed by housekeeping or full slashing.
        evicted: bool,
    },
    /// A request was accepted.
    RequestSubmitted {
        /// Request nonce.
        request_nonce: u64,
        /// Batch the request is expected to land in.
        batch_nonce: u64,
    },
    /// A new batch opened.
    NextBatchReady {
        /// Batch nonce.
        batch_nonce: u64,
    },
    /// A full result was recorded (direct submission or reveal).
    BatchResultSubmitted {
        /// Batch nonce.
        batch_nonce: u64,
        /// Submitting server.
        server: Address,
    },
    /// A result commitment was recorded.
    BatchResultHashSubmitted {
        /// Batch nonce.
        batch_nonce: u64,
        /// Committing server.
        server: Address,
    },
    /// Commitments reached quorum; reveals are now accepted.
    RevealPhaseStarted {
        /// Batch nonce.
        batch_nonce: u64,
    },
    /// A batch resolved with an agreed result.
    BatchCompleted {
        /// Batch nonce.
        batch_nonce: u64,
        /// Winning result.
        result: BatchResult,
    },
    /// A batch resolved without agreement.
    BatchFailed {
        /// Batch nonce.
        batch_nonce: u64,
        /// Failure cause.
        reason: FailureReason,
    },
    /// Housekeeping evicted inactive servers.
    HousekeepSuccess {
        /// Number of evicted servers.
        clean_count: u64,
        /// Next time housekeeping may run.
        next_housekeep_at: u64,
    },
    /// Value reached the treasury.
    AddedToTreasury {
        /// Amount added to the treasury.
        amount: Amount,
        /// Amount credited to the owner.
        royalties: Amount,
    },
    /// A server claimed rewards.
    RewardsClaimed {
        /// Claimant.
        address: Address,
        /// Amount moved out of the treasury.
        amount: Amount,
    },
    /// A withdrawable balance was paid out.
    PaymentWithdrawn {
        /// Payee.
        address: Address,
        /// Amount paid.
        amount: Amount,
    },
    /// Global params were replaced.
    GlobalParamsUpdated {
        /// New params.
        params: GlobalParams,
    },
    /// The ledger was paused.
    Paused,
    /// The ledger was unpaused.
    Unpaused,
}
