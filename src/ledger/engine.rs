//! Consensus engine: result submission and batch resolution.
//!
//! A batch opens in [`BatchPhase::Open`].  Under the direct protocol every
//! submission carries a full [`BatchResult`] and the quorum/majority rule is
//! evaluated after each one.  Under commit/reveal, servers first commit to
//! [`commitment_hash`] of their result; once commitments reach quorum the
//! batch moves to [`BatchPhase::Reveal`] and is evaluated when every
//! committer has revealed.  Either way exactly one terminal transition is
//! recorded per batch nonce, and a batch past its deadline can be skipped by
//! any registered server.

use super::{
    BatchOutcome, BatchPhase, FailureReason, Ledger, LedgerError, LedgerEvent, ResponseLocation,
    SubmissionProtocol, Timestamp, Vote,
};
use crate::consensus::{self, commitment_hash, BatchResult, Verdict};
use crate::Address;
use tracing::{debug, info, warn};

impl Ledger {
    /// Records a full result for the current batch (direct protocol).
    pub fn submit_result(
        &mut self,
        caller: &Address,
        batch_nonce: u64,
        result: BatchResult,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.check_submission(caller, batch_nonce, now, SubmissionProtocol::Direct)?;
        let batch = self.open_batch_mut()?;
        if batch.votes.contains_key(caller) {
            return Err(LedgerError::ResultAlreadySubmitted {
                batch_nonce,
                server: *caller,
            });
        }
        batch.votes.insert(*caller, Vote::Revealed { result });
        let submissions = batch.votes.len();

        self.touch(caller, now);
        debug!(batch = batch_nonce, server = %caller, submissions, "result submitted");
        self.emit(LedgerEvent::BatchResultSubmitted {
            batch_nonce,
            server: *caller,
        });

        let verdict = self.current_verdict();
        self.apply_verdict(verdict, now);
        Ok(())
    }

    /// Records a result commitment for the current batch (commit/reveal).
    pub fn submit_result_hash(
        &mut self,
        caller: &Address,
        batch_nonce: u64,
        hash: [u8; 32],
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.check_submission(caller, batch_nonce, now, SubmissionProtocol::CommitReveal)?;
        let servers = self.servers.len();
        let quorum = self.params.consensus_quorum_percent;
        let batch = self.open_batch_mut()?;
        if batch.phase != BatchPhase::Open {
            return Err(LedgerError::ConsensusNotActive {
                batch_nonce: Some(batch_nonce),
            });
        }
        if batch.votes.contains_key(caller) {
            return Err(LedgerError::ResultAlreadySubmitted {
                batch_nonce,
                server: *caller,
            });
        }
        batch.votes.insert(*caller, Vote::Committed { hash });
        let commits = batch.votes.len();
        let reveal = consensus::quorum_reached(commits, servers, quorum);
        if reveal {
            batch.phase = BatchPhase::Reveal;
        }

        self.touch(caller, now);
        debug!(batch = batch_nonce, server = %caller, commits, "result hash submitted");
        self.emit(LedgerEvent::BatchResultHashSubmitted {
            batch_nonce,
            server: *caller,
        });
        if reveal {
            info!(batch = batch_nonce, commits, "reveal phase started");
            self.emit(LedgerEvent::RevealPhaseStarted { batch_nonce });
        }
        Ok(())
    }

    /// Reveals the result behind an earlier commitment (commit/reveal).
    pub fn reveal_result(
        &mut self,
        caller: &Address,
        batch_nonce: u64,
        result: BatchResult,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.check_submission(caller, batch_nonce, now, SubmissionProtocol::CommitReveal)?;
        let batch = self.open_batch_mut()?;
        if batch.phase != BatchPhase::Reveal {
            return Err(LedgerError::ConsensusNotActive {
                batch_nonce: Some(batch_nonce),
            });
        }
        match batch.votes.get(caller) {
            None => {
                return Err(LedgerError::CommitmentMissing {
                    batch_nonce,
                    server: *caller,
                })
            }
            Some(Vote::Revealed { .. }) => {
                return Err(LedgerError::ResultAlreadySubmitted {
                    batch_nonce,
                    server: *caller,
                })
            }
            Some(Vote::Committed { hash }) if *hash != commitment_hash(&result, caller) => {
                return Err(LedgerError::RevealMismatch { server: *caller })
            }
            Some(Vote::Committed { .. }) => {}
        }
        batch.votes.insert(*caller, Vote::Revealed { result });
        let all_revealed = batch.votes.values().all(|vote| vote.result().is_some());

        self.touch(caller, now);
        debug!(batch = batch_nonce, server = %caller, "result revealed");
        self.emit(LedgerEvent::BatchResultSubmitted {
            batch_nonce,
            server: *caller,
        });

        if all_revealed {
            let verdict = self.reveal_verdict();
            self.apply_verdict(verdict, now);
        }
        Ok(())
    }

    /// Fails the current batch once its submission window has passed and
    /// returns its nonce. The caller earns one contribution point.
    pub fn skip_batch_if_consensus_expired(
        &mut self,
        caller: &Address,
        now: Timestamp,
    ) -> Result<u64, LedgerError> {
        self.require_server(caller)?;
        let batch = self
            .current_batch
            .as_ref()
            .ok_or(LedgerError::ConsensusNotActive { batch_nonce: None })?;
        if !batch.is_expired(now) {
            return Err(LedgerError::ConsensusNotActive {
                batch_nonce: Some(batch.nonce),
            });
        }
        let batch_nonce = batch.nonce;
        self.touch(caller, now);
        self.fail_batch(FailureReason::Expired, &[*caller], now);
        Ok(batch_nonce)
    }

    /// Re-runs the resolution rule after the server set shrank.
    pub(super) fn reconsider_batch(&mut self, now: Timestamp) {
        let servers = self.servers.len();
        let quorum = self.params.consensus_quorum_percent;
        let protocol = self.protocol;
        let Some(batch) = self.current_batch.as_mut() else {
            return;
        };
        if batch.votes.is_empty() || batch.is_expired(now) {
            return;
        }
        match (protocol, batch.phase) {
            (SubmissionProtocol::Direct, _) => {
                let verdict = self.current_verdict();
                self.apply_verdict(verdict, now);
            }
            (SubmissionProtocol::CommitReveal, BatchPhase::Open) => {
                if consensus::quorum_reached(batch.votes.len(), servers, quorum) {
                    batch.phase = BatchPhase::Reveal;
                    let batch_nonce = batch.nonce;
                    info!(batch = batch_nonce, servers, "reveal phase started");
                    self.emit(LedgerEvent::RevealPhaseStarted { batch_nonce });
                }
            }
            (SubmissionProtocol::CommitReveal, BatchPhase::Reveal) => {
                if batch.votes.values().all(|vote| vote.result().is_some()) {
                    let verdict = self.reveal_verdict();
                    self.apply_verdict(verdict, now);
                }
            }
        }
    }

    fn check_submission(
        &self,
        caller: &Address,
        batch_nonce: u64,
        now: Timestamp,
        protocol: SubmissionProtocol,
    ) -> Result<(), LedgerError> {
        self.require_server(caller)?;
        let not_active = LedgerError::ConsensusNotActive {
            batch_nonce: Some(batch_nonce),
        };
        let batch = self.current_batch.as_ref().ok_or(not_active.clone())?;
        if batch_nonce < batch.nonce {
            return Err(not_active);
        }
        if batch_nonce != batch.nonce {
            return Err(LedgerError::InvalidBatchNonce {
                expected: batch.nonce,
                provided: batch_nonce,
            });
        }
        if batch.is_expired(now) || self.protocol != protocol {
            return Err(not_active);
        }
        Ok(())
    }

    fn open_batch_mut(&mut self) -> Result<&mut super::Batch, LedgerError> {
        self.current_batch
            .as_mut()
            .ok_or(LedgerError::ConsensusNotActive { batch_nonce: None })
    }

    fn current_verdict(&self) -> Verdict {
        let Some(batch) = self.current_batch.as_ref() else {
            return Verdict::Pending;
        };
        consensus::evaluate(
            batch.votes.values().filter_map(Vote::result),
            batch.votes.len(),
            self.servers.len(),
            self.params.consensus_quorum_percent,
            self.params.consensus_majority_percent,
        )
    }

    // Quorum was settled when the reveal phase opened; only majority is left.
    fn reveal_verdict(&self) -> Verdict {
        let Some(batch) = self.current_batch.as_ref() else {
            return Verdict::Pending;
        };
        let submissions = batch.votes.len();
        match consensus::tally(batch.votes.values().filter_map(Vote::result)) {
            Some((result, count))
                if consensus::majority_reached(
                    count,
                    submissions,
                    self.params.consensus_majority_percent,
                ) =>
            {
                Verdict::Agreed(result)
            }
            _ => Verdict::Diverged,
        }
    }

    fn apply_verdict(&mut self, verdict: Verdict, now: Timestamp) {
        match verdict {
            Verdict::Pending => {}
            Verdict::Agreed(result) => self.complete_batch(result, now),
            Verdict::Diverged => {
                let voters: Vec<Address> = self
                    .current_batch
                    .as_ref()
                    .map(|batch| batch.votes.keys().copied().collect())
                    .unwrap_or_default();
                self.fail_batch(FailureReason::NoMajority, &voters, now);
            }
        }
    }

    fn complete_batch(&mut self, result: BatchResult, now: Timestamp) {
        let Some(batch) = self.current_batch.take() else {
            return;
        };
        self.state_cid = result.final_state_cid;
        for (position, request) in batch.requests.iter().enumerate() {
            self.responses.insert(
                request.nonce,
                ResponseLocation {
                    response_cid: result.response_cid,
                    position: position as u32,
                },
            );
        }
        let winners: Vec<Address> = batch
            .votes
            .iter()
            .filter(|(_, vote)| vote.result() == Some(&result))
            .map(|(address, _)| *address)
            .collect();
        for winner in &winners {
            self.award(winner, 1);
        }
        self.outcomes
            .insert(batch.nonce, BatchOutcome::Completed { result });
        info!(
            batch = batch.nonce,
            requests = batch.requests.len(),
            agreeing = winners.len(),
            submissions = batch.votes.len(),
            state = %result.final_state_cid,
            "batch completed"
        );
        self.emit(LedgerEvent::BatchCompleted {
            batch_nonce: batch.nonce,
            result,
        });
        self.open_next_batch(now);
    }

    fn fail_batch(&mut self, reason: FailureReason, rewarded: &[Address], now: Timestamp) {
        let Some(batch) = self.current_batch.take() else {
            return;
        };
        for address in rewarded {
            self.award(address, 1);
        }
        self.outcomes
            .insert(batch.nonce, BatchOutcome::Failed { reason });
        warn!(
            batch = batch.nonce,
            ?reason,
            requests = batch.requests.len(),
            submissions = batch.votes.len(),
            "batch failed"
        );
        self.emit(LedgerEvent::BatchFailed {
            batch_nonce: batch.nonce,
            reason,
        });
        self.open_next_batch(now);
    }
}
