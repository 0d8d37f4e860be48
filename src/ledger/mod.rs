//! The batch-consensus ledger.
//!
//! [`Ledger`] is the authoritative state shared by every server: the stake
//! ledger, the request queue, the current batch and its votes, contribution
//! points, the treasury and withdrawable balances.  It is a plain value with
//! no interior mutability and no clock; every operation receives the caller
//! and the ledger time explicitly, validates all preconditions before
//! mutating anything, and records [`LedgerEvent`]s that callers drain with
//! [`Ledger::take_events`].  Several ledgers can live in one process, which
//! is how the tests run competing deployments side by side.
//!
//! Operations are grouped by concern:
//!
//! * `stake` — registration, the stake curve, slashing, withdrawals.
//! * `queue` — request intake, batch paging, response lookup.
//! * `engine` — result submission and batch resolution.
//! * `rewards` — contribution points, claims, donations.
//! * `housekeeping` — inactive server eviction.
//! * `governance` — owner-gated pause and parameter updates.

/// Durable JSON snapshots of a ledger.
pub mod checkpoint;
mod engine;
mod error;
mod events;
mod governance;
mod housekeeping;
mod queue;
mod rewards;
mod stake;

pub use checkpoint::{load_ledger, save_ledger, CheckpointError};
pub use error::LedgerError;
pub use events::{FailureReason, LedgerEvent};
pub use housekeeping::{HousekeepReport, InactivePage, HOUSEKEEP_PAGE_SIZE, MAX_EVICTIONS_PER_CALL};
pub use queue::{BatchView, REQUESTS_PAGE_SIZE};
pub use stake::Settlement;

use crate::consensus::BatchResult;
use crate::economics::Amount;
use crate::params::GlobalParams;
use crate::{Address, Multihash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Ledger time in seconds.
pub type Timestamp = u64;

/// A registered server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Unique key.
    pub address: Address,
    /// Bonded stake.
    pub stake: Amount,
    /// Unclaimed contribution points.
    pub contributions: u64,
    /// Last authenticated activity.
    pub last_seen: Timestamp,
    /// Earliest time the server counts as inactive.
    pub next_housekeep_at: Timestamp,
    /// Position in registration order.
    pub registration_seq: u64,
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Global sequence number.
    pub nonce: u64,
    /// Submitting account.
    pub author: Address,
    /// Payload id in the blob store.
    pub cid: Multihash,
}

/// How servers hand their results to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionProtocol {
    /// Servers submit the full result in one call.
    #[default]
    Direct,
    /// Servers commit to a hash, then reveal once commitments reach quorum.
    CommitReveal,
}

impl FromStr for SubmissionProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "commit-reveal" | "commit_reveal" => Ok(Self::CommitReveal),
            other => Err(format!("unknown submission protocol {other}")),
        }
    }
}

impl fmt::Display for SubmissionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::CommitReveal => f.write_str("commit-reveal"),
        }
    }
}

/// Submission phase of the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPhase {
    /// Accepting results (direct) or commitments (commit/reveal).
    Open,
    /// Commit/reveal only: commitments closed, reveals accepted.
    Reveal,
}

/// One server's vote on the current batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Vote {
    /// Hash of a result not yet revealed.
    Committed {
        /// Commitment hash.
        hash: [u8; 32],
    },
    /// A full result.
    Revealed {
        /// Claimed result.
        result: BatchResult,
    },
}

impl Vote {
    fn result(&self) -> Option<&BatchResult> {
        match self {
            Self::Revealed { result } => Some(result),
            Self::Committed { .. } => None,
        }
    }
}

/// The batch currently collecting votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Batch sequence number.
    pub nonce: u64,
    /// Requests in processing order.
    pub requests: Vec<Request>,
    /// State the requests apply to.
    pub initial_state_cid: Multihash,
    /// Last ledger second at which submissions are accepted.
    pub expires_at: Timestamp,
    /// Submission phase.
    pub phase: BatchPhase,
    /// Votes keyed by server.
    pub votes: BTreeMap<Address, Vote>,
}

impl Batch {
    /// True when `now` is past the submission window.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }
}

/// Terminal state of a resolved batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum BatchOutcome {
    /// Agreed result was applied.
    Completed {
        /// Winning result.
        result: BatchResult,
    },
    /// No agreement; requests dropped.
    Failed {
        /// Failure cause.
        reason: FailureReason,
    },
}

/// Where a completed request's response lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseLocation {
    /// Response list of the owning batch.
    pub response_cid: Multihash,
    /// Index of this request's response in that list.
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestRecord {
    request: Request,
    batch_nonce: Option<u64>,
}

/// Authoritative shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    owner: Address,
    params: GlobalParams,
    protocol: SubmissionProtocol,
    paused: bool,
    servers: BTreeMap<Address, Server>,
    registration_order: BTreeMap<u64, Address>,
    next_registration_seq: u64,
    last_registration: Option<(Timestamp, Amount)>,
    total_staked: Amount,
    payments: BTreeMap<Address, Amount>,
    treasury: Amount,
    total_contributions: u64,
    requests: Vec<RequestRecord>,
    queue: VecDeque<u64>,
    current_batch: Option<Batch>,
    next_batch_nonce: u64,
    outcomes: BTreeMap<u64, BatchOutcome>,
    responses: BTreeMap<u64, ResponseLocation>,
    state_cid: Multihash,
    next_housekeep_at: Timestamp,
    #[serde(skip)]
    events: Vec<LedgerEvent>,
}

impl Ledger {
    /// Creates an empty ledger rooted at `genesis_state_cid`.
    pub fn new(
        owner: Address,
        params: GlobalParams,
        genesis_state_cid: Multihash,
    ) -> Result<Self, LedgerError> {
        params.ensure_valid().map_err(LedgerError::InvalidParams)?;
        Ok(Self {
            owner,
            params,
            protocol: SubmissionProtocol::Direct,
            paused: false,
            servers: BTreeMap::new(),
            registration_order: BTreeMap::new(),
            next_registration_seq: 0,
            last_registration: None,
            total_staked: 0,
            payments: BTreeMap::new(),
            treasury: 0,
            total_contributions: 0,
            requests: Vec::new(),
            queue: VecDeque::new(),
            current_batch: None,
            next_batch_nonce: 0,
            outcomes: BTreeMap::new(),
            responses: BTreeMap::new(),
            state_cid: genesis_state_cid,
            next_housekeep_at: 0,
            events: Vec::new(),
        })
    }

    /// Selects the submission protocol (direct by default).
    pub fn with_protocol(mut self, protocol: SubmissionProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Owner address.
    pub fn owner(&self) -> &Address {
        &self.owner
    }

    /// Active params.
    pub fn params(&self) -> &GlobalParams {
        &self.params
    }

    /// Submission protocol in force.
    pub fn protocol(&self) -> SubmissionProtocol {
        self.protocol
    }

    /// True while paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Latest agreed state snapshot.
    pub fn state_cid(&self) -> &Multihash {
        &self.state_cid
    }

    /// Treasury balance.
    pub fn treasury(&self) -> Amount {
        self.treasury
    }

    /// Sum of unclaimed contribution points across servers.
    pub fn total_contributions(&self) -> u64 {
        self.total_contributions
    }

    /// Every amount ever bonded through registration.
    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    /// Server record, if registered.
    pub fn server(&self, address: &Address) -> Option<&Server> {
        self.servers.get(address)
    }

    /// Registered servers in registration order.
    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.registration_order
            .values()
            .filter_map(|addr| self.servers.get(addr))
    }

    /// Number of registered servers.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Withdrawable balance of `address`.
    pub fn payments_of(&self, address: &Address) -> Amount {
        self.payments.get(address).copied().unwrap_or(0)
    }

    /// Batch collecting votes, if any.
    pub fn current_batch(&self) -> Option<&Batch> {
        self.current_batch.as_ref()
    }

    /// Terminal state of a resolved batch.
    pub fn batch_outcome(&self, batch_nonce: u64) -> Option<&BatchOutcome> {
        self.outcomes.get(&batch_nonce)
    }

    /// Number of requests waiting for a later batch.
    pub fn queued_requests(&self) -> usize {
        self.queue.len()
    }

    /// Earliest time housekeeping may run.
    pub fn next_housekeep_at(&self) -> Timestamp {
        self.next_housekeep_at
    }

    /// Drains events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    fn require_owner(&self, caller: &Address) -> Result<(), LedgerError> {
        if *caller == self.owner {
            Ok(())
        } else {
            Err(LedgerError::NotOwner { caller: *caller })
        }
    }

    fn require_server(&self, address: &Address) -> Result<&Server, LedgerError> {
        self.servers
            .get(address)
            .ok_or(LedgerError::ServerNotRegistered { address: *address })
    }

    fn touch(&mut self, address: &Address, now: Timestamp) {
        let inactivity = self.params.inactivity_duration;
        if let Some(server) = self.servers.get_mut(address) {
            server.last_seen = now;
            server.next_housekeep_at = now.saturating_add(inactivity);
        }
    }

    fn award(&mut self, address: &Address, points: u64) {
        if points == 0 {
            return;
        }
        if let Some(server) = self.servers.get_mut(address) {
            server.contributions = server.contributions.saturating_add(points);
            self.total_contributions = self.total_contributions.saturating_add(points);
        }
    }

    fn credit_payment(&mut self, address: &Address, amount: Amount) {
        if amount == 0 {
            return;
        }
        let balance = self.payments.entry(*address).or_insert(0);
        *balance = balance.saturating_add(amount);
    }
}
