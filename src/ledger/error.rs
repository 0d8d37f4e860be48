//! Errors returned by ledger operations.

use crate::economics::Amount;
use crate::params::{format_violations, Violation};
use crate::Address;

/// Precondition failures raised by ledger operations.
///
/// Every variant leaves the ledger unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The address already has a server record.
    #[error("server {address} is already registered")]
    ServerAlreadyRegistered {
        /// Offending address.
        address: Address,
    },
    /// The address has no server record.
    #[error("server {address} is not registered")]
    ServerNotRegistered {
        /// Offending address.
        address: Address,
    },
    /// The bonded amount is below the current requirement.
    #[error("insufficient stake: required {required}, provided {provided}")]
    InsufficientStake {
        /// Current stake requirement.
        required: Amount,
        /// Amount offered.
        provided: Amount,
    },
    /// The server set is full.
    #[error("server limit of {max} reached")]
    MaxServersReached {
        /// Configured cap.
        max: u32,
    },
    /// A percentage outside `[0, 100]`.
    #[error("invalid percent {percent}")]
    InvalidPercent {
        /// Offending value.
        percent: u32,
    },
    /// The operation is disabled while paused.
    #[error("ledger is paused")]
    Paused,
    /// The operation requires the ledger to be paused.
    #[error("ledger is not paused")]
    NotPaused,
    /// The caller is not the owner.
    #[error("caller {caller} is not the owner")]
    NotOwner {
        /// Offending caller.
        caller: Address,
    },
    /// A batch is still unresolved.
    #[error("batch {batch_nonce} is in progress")]
    BatchInProgress {
        /// Current batch nonce.
        batch_nonce: u64,
    },
    /// Proposed params violate one or more rules.
    #[error("invalid global params: {}", format_violations(.0))]
    InvalidParams(Vec<Violation>),
    /// No batch is pending.
    #[error("no pending batch")]
    EmptyBatch,
    /// Requested page is past the last page.
    #[error("page exceeds max page {max_page}")]
    MaxPageExceeded {
        /// Last valid page.
        max_page: u64,
    },
    /// The request nonce was never issued.
    #[error("request nonce {nonce} was never issued")]
    InvalidRequestNonce {
        /// Offending nonce.
        nonce: u64,
    },
    /// The request's batch has not completed yet.
    #[error("response for request {nonce} is not available yet")]
    ResponseNotAvailable {
        /// Request nonce.
        nonce: u64,
    },
    /// The request's batch failed and the request was discarded.
    #[error("request {nonce} was dropped with failed batch {batch_nonce}")]
    RequestDropped {
        /// Request nonce.
        nonce: u64,
        /// Failed batch nonce.
        batch_nonce: u64,
    },
    /// The caller did not author the request.
    #[error("caller is not the author of request {nonce}")]
    RequestAuthorMismatch {
        /// Request nonce.
        nonce: u64,
    },
    /// The server already voted on this batch.
    #[error("server {server} already submitted for batch {batch_nonce}")]
    ResultAlreadySubmitted {
        /// Batch nonce.
        batch_nonce: u64,
        /// Submitting server.
        server: Address,
    },
    /// The nonce does not name the current batch.
    #[error("invalid batch nonce: expected {expected}, provided {provided}")]
    InvalidBatchNonce {
        /// Current batch nonce.
        expected: u64,
        /// Nonce supplied by the caller.
        provided: u64,
    },
    /// No submission window is open for this call.
    #[error("consensus is not active for batch {batch_nonce:?}")]
    ConsensusNotActive {
        /// Batch the caller referred to, if any.
        batch_nonce: Option<u64>,
    },
    /// A reveal arrived from a server without a commitment.
    #[error("server {server} has no commitment for batch {batch_nonce}")]
    CommitmentMissing {
        /// Batch nonce.
        batch_nonce: u64,
        /// Revealing server.
        server: Address,
    },
    /// A reveal did not hash to the committed value.
    #[error("reveal from {server} does not match its commitment")]
    RevealMismatch {
        /// Revealing server.
        server: Address,
    },
    /// No rewards are claimable.
    #[error("nothing to claim for {address}")]
    NothingToClaim {
        /// Claimant.
        address: Address,
    },
    /// No withdrawable balance.
    #[error("nothing to withdraw for {address}")]
    NothingToWithdraw {
        /// Payee.
        address: Address,
    },
    /// Housekeeping ran too recently.
    #[error("housekeeping cooldown active until {next}")]
    HousekeepCooldown {
        /// Earliest time housekeeping may run again.
        next: u64,
    },
    /// A zero amount was supplied where value is required.
    #[error("amount must be nonzero")]
    ZeroAmount,
}
