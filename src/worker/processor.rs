//! Off-ledger batch processor.
//!
//! A processor watches the ledger for a ready batch, replays the batch's
//! requests against the agreed state snapshot and submits the result it
//! computed.  It never retries a batch it already submitted for, and a
//! handler or state failure aborts the batch without submitting anything:
//! a wrong result is indistinguishable from a malicious one.

use super::blob::{BlobError, BlobStore};
use super::config::WorkerConfig;
use super::payload::{apply_payload, HandlerError, RequestHandler, Response, StateStore};
use super::shared::LedgerClient;
use crate::consensus::{commitment_hash, BatchResult};
use crate::ledger::{
    BatchPhase, BatchView, LedgerError, LedgerEvent, ResponseLocation, SubmissionProtocol,
};
use crate::Multihash;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Errors raised while processing a batch.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The ledger rejected a call.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    /// A blob store call failed.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),
    /// A blob store call exceeded the I/O timeout.
    #[error("{op} timed out after {after:?}")]
    Timeout {
        /// Operation name.
        op: &'static str,
        /// Configured timeout.
        after: Duration,
    },
    /// The application failed; the batch is abandoned.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),
    /// A response or response list could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    /// The batch changed between page reads.
    #[error("batch changed while paging: expected {expected}, found {found}")]
    BatchChanged {
        /// Nonce of the first page.
        expected: u64,
        /// Nonce of a later page.
        found: u64,
    },
    /// A response list has no entry at the position.
    #[error("response list has no entry at position {position}")]
    MissingResponse {
        /// Requested position.
        position: u32,
    },
}

impl ProcessorError {
    /// True for failures that must not be retried on the same batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Handler(_))
    }
}

/// What one processing round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to do.
    Idle,
    /// A direct result was submitted for the batch.
    Submitted(u64),
    /// A commitment was submitted for the batch.
    Committed(u64),
    /// The committed result was revealed.
    Revealed(u64),
    /// The expired batch was skipped.
    Skipped(u64),
}

#[derive(Debug, Default)]
struct Progress {
    last_attempted: Option<u64>,
    pending_reveal: Option<(u64, BatchResult)>,
}

/// Drives one server's participation in batch consensus.
pub struct BatchProcessor<H, S> {
    client: Arc<dyn LedgerClient>,
    blobs: Arc<dyn BlobStore>,
    handler: H,
    store: S,
    config: WorkerConfig,
    progress: Mutex<Progress>,
    shutdown: Arc<Notify>,
}

impl<H, S> BatchProcessor<H, S>
where
    H: RequestHandler + 'static,
    S: StateStore<State = H::State> + 'static,
{
    /// Builds a processor acting through `client`.
    pub fn new(
        client: Arc<dyn LedgerClient>,
        blobs: Arc<dyn BlobStore>,
        handler: H,
        store: S,
        config: WorkerConfig,
    ) -> Self {
        Self {
            client,
            blobs,
            handler,
            store,
            config,
            progress: Mutex::new(Progress::default()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle that stops [`start`](Self::start)'s loop when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Spawns the trigger loop: batch events, reveal-phase events and a
    /// poll interval that covers missed events.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.client.subscribe();
        tokio::spawn(async move {
            let mut ticker = time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                server = %self.client.address(),
                protocol = %self.config.protocol,
                poll_ms = self.config.poll_interval.as_millis() as u64,
                "batch processor started"
            );
            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        info!(server = %self.client.address(), "batch processor shutting down");
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(LedgerEvent::NextBatchReady { .. })
                        | Ok(LedgerEvent::RevealPhaseStarted { .. }) => self.tick().await,
                        Ok(_) => {}
                        Err(RecvError::Lagged(missed)) => {
                            debug!(missed, "event stream lagged");
                            self.tick().await;
                        }
                        Err(RecvError::Closed) => {
                            warn!("ledger event stream closed");
                            break;
                        }
                    },
                    _ = ticker.tick() => self.tick().await,
                }
            }
        })
    }

    async fn tick(&self) {
        match self.run_once().await {
            Ok(Step::Idle) => {}
            Ok(step) => debug!(server = %self.client.address(), ?step, "processing step"),
            Err(err) if err.is_fatal() => {
                error!(server = %self.client.address(), %err, "batch aborted, nothing submitted")
            }
            Err(err) => warn!(server = %self.client.address(), %err, "batch processing failed"),
        }
    }

    /// Runs one processing round against the current batch.
    pub async fn run_once(&self) -> Result<Step, ProcessorError> {
        let first = match self.client.current_batch(0).await {
            Ok(view) => view,
            Err(LedgerError::EmptyBatch) => return Ok(Step::Idle),
            Err(err) => return Err(err.into()),
        };

        if self.client.now() > first.expires_at {
            return match self.client.skip_expired_batch().await {
                Ok(nonce) => {
                    info!(batch = nonce, "skipped expired batch");
                    Ok(Step::Skipped(nonce))
                }
                Err(LedgerError::ConsensusNotActive { .. }) => Ok(Step::Idle),
                Err(err) => Err(err.into()),
            };
        }

        if first.phase == BatchPhase::Reveal {
            return self.reveal(first.nonce).await;
        }

        {
            let mut progress = self.progress.lock().await;
            if progress.last_attempted.is_some_and(|last| first.nonce <= last) {
                return Ok(Step::Idle);
            }
            // Cleared again below unless the failure came from the handler.
            progress.last_attempted = Some(first.nonce);
        }

        let nonce = first.nonce;
        let result = match self.compute(first).await {
            Ok(result) => result,
            Err(err) => {
                if !err.is_fatal() {
                    self.progress.lock().await.last_attempted = nonce.checked_sub(1);
                }
                return Err(err);
            }
        };

        match self.config.protocol {
            SubmissionProtocol::Direct => {
                self.client.submit_result(nonce, result).await?;
                info!(
                    batch = nonce,
                    server = %self.client.address(),
                    state = %result.final_state_cid,
                    "result submitted"
                );
                Ok(Step::Submitted(nonce))
            }
            SubmissionProtocol::CommitReveal => {
                let hash = commitment_hash(&result, &self.client.address());
                self.client.submit_result_hash(nonce, hash).await?;
                self.progress.lock().await.pending_reveal = Some((nonce, result));
                info!(batch = nonce, server = %self.client.address(), "result committed");
                Ok(Step::Committed(nonce))
            }
        }
    }

    async fn reveal(&self, nonce: u64) -> Result<Step, ProcessorError> {
        let pending = {
            let mut progress = self.progress.lock().await;
            match progress.pending_reveal {
                Some((pending, result)) if pending == nonce => {
                    progress.pending_reveal = None;
                    result
                }
                _ => return Ok(Step::Idle),
            }
        };
        let max = self.config.reveal_backoff.as_millis() as u64;
        let delay = rand::thread_rng().gen_range(0..=max);
        time::sleep(Duration::from_millis(delay)).await;
        self.client.reveal_result(nonce, pending).await?;
        info!(batch = nonce, server = %self.client.address(), delay_ms = delay, "result revealed");
        Ok(Step::Revealed(nonce))
    }

    async fn compute(&self, first: BatchView) -> Result<BatchResult, ProcessorError> {
        let nonce = first.nonce;
        let initial = first.initial_state_cid;
        let mut requests = first.requests;
        for page in 1..=first.max_page {
            let view = self.client.current_batch(page).await?;
            if view.nonce != nonce {
                return Err(ProcessorError::BatchChanged {
                    expected: nonce,
                    found: view.nonce,
                });
            }
            requests.extend(view.requests);
        }

        let snapshot = self.timed("get state", self.blobs.get(&initial)).await?;
        let mut state = self.store.restore(&snapshot)?;

        let mut response_cids = Vec::with_capacity(requests.len());
        for request in &requests {
            let payload = self.timed("get payload", self.blobs.get(&request.cid)).await?;
            let response = apply_payload(&self.handler, &mut state, &request.author, &payload)?;
            if let Response::InvalidPayload { reason } = &response {
                debug!(batch = nonce, request = request.nonce, %reason, "invalid payload");
            }
            let encoded = serde_json::to_vec(&response)?;
            response_cids.push(self.timed("put response", self.blobs.put(encoded)).await?);
        }

        let list = serde_json::to_vec(&response_cids)?;
        let response_cid = self.timed("put response list", self.blobs.put(list)).await?;
        let snapshot = self.store.persist(&state)?;
        let final_state_cid = self.timed("put state", self.blobs.put(snapshot)).await?;
        debug!(batch = nonce, requests = requests.len(), "batch computed");
        Ok(BatchResult {
            final_state_cid,
            response_cid,
        })
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, BlobError>>,
    ) -> Result<T, ProcessorError> {
        let after = self.config.io_timeout;
        match time::timeout(after, fut).await {
            Ok(outcome) => outcome.map_err(ProcessorError::from),
            Err(_) => Err(ProcessorError::Timeout { op, after }),
        }
    }
}

/// Resolves a response location to the stored [`Response`].
pub async fn fetch_response(
    blobs: &dyn BlobStore,
    location: ResponseLocation,
) -> Result<Response, ProcessorError> {
    let list = blobs.get(&location.response_cid).await?;
    let cids: Vec<Multihash> = serde_json::from_slice(&list)?;
    let cid = cids
        .get(location.position as usize)
        .ok_or(ProcessorError::MissingResponse {
            position: location.position,
        })?;
    let bytes = blobs.get(cid).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
