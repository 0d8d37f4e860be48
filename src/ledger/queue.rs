//! Request intake, batch paging and response lookup.

use super::{
    Batch, BatchOutcome, BatchPhase, Ledger, LedgerError, LedgerEvent, Request, RequestRecord,
    ResponseLocation, Timestamp,
};
use crate::{Address, Multihash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Requests returned per [`Ledger::current_batch_view`] page.
pub const REQUESTS_PAGE_SIZE: usize = 1000;

/// One page of the current batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    /// Batch nonce.
    pub nonce: u64,
    /// State the requests apply to.
    pub initial_state_cid: Multihash,
    /// Last ledger second accepting submissions.
    pub expires_at: Timestamp,
    /// Submission phase.
    pub phase: BatchPhase,
    /// Requests in the whole batch.
    pub total_requests: u64,
    /// Page returned.
    pub page: u64,
    /// Last valid page.
    pub max_page: u64,
    /// Requests on this page, in processing order.
    pub requests: Vec<Request>,
}

impl Ledger {
    /// Accepts a request and returns `(request_nonce, batch_nonce)`, where
    /// the batch nonce is the batch the request is expected to land in.
    pub fn submit_request(
        &mut self,
        author: &Address,
        cid: Multihash,
        now: Timestamp,
    ) -> Result<(u64, u64), LedgerError> {
        if self.paused {
            return Err(LedgerError::Paused);
        }
        let nonce = self.requests.len() as u64;
        let request = Request {
            nonce,
            author: *author,
            cid,
        };
        let max = self.params.max_batch_size as usize;
        self.requests.push(RequestRecord {
            request,
            batch_nonce: None,
        });

        // An announced batch is sealed; everything after it waits in the queue.
        let batch_nonce = match self.current_batch.as_ref() {
            Some(batch) => batch.nonce + 1 + (self.queue.len() / max) as u64,
            None => self.next_batch_nonce,
        };
        self.queue.push_back(nonce);
        if self.current_batch.is_none() {
            self.open_next_batch(now);
        }

        debug!(request = nonce, batch = batch_nonce, author = %author, "request submitted");
        self.emit(LedgerEvent::RequestSubmitted {
            request_nonce: nonce,
            batch_nonce,
        });
        Ok((nonce, batch_nonce))
    }

    /// Returns page `page` of the current batch to a registered server.
    pub fn current_batch_view(
        &self,
        caller: &Address,
        page: u64,
    ) -> Result<BatchView, LedgerError> {
        self.require_server(caller)?;
        let batch = self.current_batch.as_ref().ok_or(LedgerError::EmptyBatch)?;
        let total = batch.requests.len();
        let max_page = (total.div_ceil(REQUESTS_PAGE_SIZE).max(1) - 1) as u64;
        if page > max_page {
            return Err(LedgerError::MaxPageExceeded { max_page });
        }
        let requests = batch
            .requests
            .iter()
            .skip(page as usize * REQUESTS_PAGE_SIZE)
            .take(REQUESTS_PAGE_SIZE)
            .cloned()
            .collect();
        Ok(BatchView {
            nonce: batch.nonce,
            initial_state_cid: batch.initial_state_cid,
            expires_at: batch.expires_at,
            phase: batch.phase,
            total_requests: total as u64,
            page,
            max_page,
            requests,
        })
    }

    /// Locates the response to request `nonce` for its author.
    pub fn response(&self, caller: &Address, nonce: u64) -> Result<ResponseLocation, LedgerError> {
        let record = self
            .requests
            .get(nonce as usize)
            .ok_or(LedgerError::InvalidRequestNonce { nonce })?;
        if record.request.author != *caller {
            return Err(LedgerError::RequestAuthorMismatch { nonce });
        }
        if let Some(location) = self.responses.get(&nonce) {
            return Ok(*location);
        }
        match record.batch_nonce {
            Some(batch_nonce)
                if matches!(
                    self.outcomes.get(&batch_nonce),
                    Some(BatchOutcome::Failed { .. })
                ) =>
            {
                Err(LedgerError::RequestDropped { nonce, batch_nonce })
            }
            _ => Err(LedgerError::ResponseNotAvailable { nonce }),
        }
    }

    /// Moves up to `maxBatchSize` queued requests into a fresh batch.
    /// Leaves no current batch when the queue is empty.
    pub(super) fn open_next_batch(&mut self, now: Timestamp) -> Option<u64> {
        if self.queue.is_empty() {
            self.current_batch = None;
            return None;
        }
        let nonce = self.next_batch_nonce;
        self.next_batch_nonce += 1;

        let take = self.queue.len().min(self.params.max_batch_size as usize);
        let mut requests = Vec::with_capacity(take);
        for request_nonce in self.queue.drain(..take) {
            if let Some(record) = self.requests.get_mut(request_nonce as usize) {
                record.batch_nonce = Some(nonce);
                requests.push(record.request.clone());
            }
        }
        let expires_at = now.saturating_add(self.params.consensus_max_duration);
        info!(batch = nonce, requests = requests.len(), expires_at, "batch ready");
        self.current_batch = Some(Batch {
            nonce,
            requests,
            initial_state_cid: self.state_cid,
            expires_at,
            phase: BatchPhase::Open,
            votes: BTreeMap::new(),
        });
        self.emit(LedgerEvent::NextBatchReady { batch_nonce: nonce });
        Some(nonce)
    }
}
