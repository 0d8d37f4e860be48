#![deny(missing_docs)]

//! # batch_quorum
//!
//! **batch_quorum** coordinates a network of untrusted servers that process
//! batches of client requests against a shared, content-addressed state.
//! Servers bond stake to join, independently replay each batch, and submit
//! the result they computed.  The ledger decides whether a quorum of them
//! agree, moves the global state pointer when they do, and pays out
//! contribution-based rewards from a treasury fed by slashing and donations.
//!
//! ## Layout
//!
//! * [`multihash`] encodes content ids (sha2-256 multihash, base-58).
//! * [`params`] holds the validated [`GlobalParams`].
//! * [`economics`] is the integer math behind stake pricing and rewards.
//! * [`consensus`] has the quorum and majority predicates.
//! * [`ledger`] is the state machine itself: stake, request queue, consensus
//!   engine, rewards, housekeeping and governance, plus JSON checkpoints.
//! * `worker` (feature `worker`, on by default) runs servers against a
//!   [`ledger::Ledger`]: a mutex-guarded shared ledger, blob stores, the
//!   request boundary, a reference key-value application and the batch
//!   processor loop.
//!
//! ## Usage
//!
//! ```rust
//! use batch_quorum::consensus::BatchResult;
//! use batch_quorum::ledger::{Ledger, LedgerEvent};
//! use batch_quorum::{Address, GlobalParams, Multihash};
//!
//! let owner = Address::derive("owner");
//! let server = Address::derive("server");
//! let client = Address::derive("client");
//! let mut ledger =
//!     Ledger::new(owner, GlobalParams::default(), Multihash::generate(b"genesis")).unwrap();
//!
//! let stake = ledger.stake_requirement(0);
//! ledger.register(&server, stake, 0).unwrap();
//! let (_, batch) = ledger.submit_request(&client, Multihash::generate(b"req"), 1).unwrap();
//!
//! let result = BatchResult {
//!     final_state_cid: Multihash::generate(b"state-1"),
//!     response_cid: Multihash::generate(b"responses-1"),
//! };
//! ledger.submit_result(&server, batch, result, 2).unwrap();
//! assert_eq!(*ledger.state_cid(), result.final_state_cid);
//! assert!(ledger
//!     .take_events()
//!     .contains(&LedgerEvent::BatchCompleted { batch_nonce: batch, result }));
//! ```

mod address;
pub mod consensus;
pub mod economics;
pub mod ledger;
pub mod multihash;
pub mod params;
/// Async runtime for running servers against a shared ledger.
#[cfg(feature = "worker")]
pub mod worker;

pub use address::{Address, AddressError, ADDRESS_LENGTH};
pub use consensus::BatchResult;
pub use economics::{Amount, ETHER};
pub use ledger::{Ledger, LedgerError, LedgerEvent, SubmissionProtocol};
pub use multihash::{DecodeError, Multihash};
pub use params::{GlobalParams, Violation};
