//! The single logical writer every processor talks to.
//!
//! [`SharedLedger`] serializes all mutations through one async mutex and
//! republishes the events each transaction produced on a broadcast channel,
//! so several processors in one process observe the same ordered stream.

use crate::consensus::BatchResult;
use crate::economics::Amount;
use crate::ledger::{
    BatchView, HousekeepReport, InactivePage, Ledger, LedgerError, LedgerEvent, ResponseLocation,
    Settlement, Timestamp,
};
use crate::{Address, Multihash};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex};
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Source of ledger time.
pub trait Clock: Send + Sync {
    /// Current ledger time in seconds.
    fn now(&self) -> Timestamp;
}

/// Unix wall-clock seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Starts at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Jumps to `now`.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves forward by `secs` and returns the new time.
    pub fn advance(&self, secs: u64) -> Timestamp {
        self.now.fetch_add(secs, Ordering::SeqCst) + secs
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Mutex-guarded ledger plus its event stream.
#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
    events: broadcast::Sender<LedgerEvent>,
    clock: Arc<dyn Clock>,
}

impl SharedLedger {
    /// Wraps `ledger`; `clock` supplies the time of every transaction.
    pub fn new(ledger: Ledger, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(ledger)),
            events,
            clock,
        }
    }

    /// Subscribes to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Current ledger time.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Runs `op` as one atomic transaction and publishes its events.
    pub async fn transact<T>(
        &self,
        op: impl FnOnce(&mut Ledger, Timestamp) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut ledger = self.inner.lock().await;
        let now = self.clock.now();
        let outcome = op(&mut *ledger, now);
        for event in ledger.take_events() {
            trace!(?event, "ledger event");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        outcome
    }

    /// Runs a read-only query against a consistent view.
    pub async fn read<T>(&self, query: impl FnOnce(&Ledger, Timestamp) -> T) -> T {
        let ledger = self.inner.lock().await;
        query(&*ledger, self.clock.now())
    }

    /// Clone of the current ledger, for checkpoints and reports.
    pub async fn snapshot(&self) -> Ledger {
        self.inner.lock().await.clone()
    }

    /// Authenticated view acting as `address`.
    pub fn handle(&self, address: Address) -> LedgerHandle {
        LedgerHandle {
            shared: self.clone(),
            address,
        }
    }
}

/// Ledger operations a batch processor needs.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address the client acts as.
    fn address(&self) -> Address;

    /// Current ledger time.
    fn now(&self) -> Timestamp;

    /// Subscribes to ledger events.
    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent>;

    /// Page `page` of the current batch.
    async fn current_batch(&self, page: u64) -> Result<BatchView, LedgerError>;

    /// Direct result submission.
    async fn submit_result(&self, batch_nonce: u64, result: BatchResult) -> Result<(), LedgerError>;

    /// Commit phase submission.
    async fn submit_result_hash(&self, batch_nonce: u64, hash: [u8; 32]) -> Result<(), LedgerError>;

    /// Reveal phase submission.
    async fn reveal_result(&self, batch_nonce: u64, result: BatchResult) -> Result<(), LedgerError>;

    /// Fails the current batch if its window has passed.
    async fn skip_expired_batch(&self) -> Result<u64, LedgerError>;
}

/// [`SharedLedger`] bound to one caller address.
#[derive(Clone)]
pub struct LedgerHandle {
    shared: SharedLedger,
    address: Address,
}

impl LedgerHandle {
    /// Underlying shared ledger.
    pub fn shared(&self) -> &SharedLedger {
        &self.shared
    }

    /// Registers with exactly the current requirement and returns it.
    pub async fn register_at_requirement(&self) -> Result<Amount, LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| {
                let required = ledger.stake_requirement(now);
                ledger.register(&address, required, now)?;
                Ok(required)
            })
            .await
    }

    /// Bonds `amount`.
    pub async fn register(&self, amount: Amount) -> Result<(), LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| ledger.register(&address, amount, now))
            .await
    }

    /// Leaves the server set.
    pub async fn unregister(&self) -> Result<Settlement, LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| ledger.unregister(&address, now))
            .await
    }

    /// Submits a request payload id.
    pub async fn submit_request(&self, cid: Multihash) -> Result<(u64, u64), LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| ledger.submit_request(&address, cid, now))
            .await
    }

    /// Locates the response to one of this caller's requests.
    pub async fn response(&self, nonce: u64) -> Result<ResponseLocation, LedgerError> {
        let address = self.address;
        self.shared
            .read(|ledger, _| ledger.response(&address, nonce))
            .await
    }

    /// Claimable reward share.
    pub async fn claimable_rewards(&self) -> Amount {
        let address = self.address;
        self.shared
            .read(|ledger, _| ledger.claimable_rewards(&address))
            .await
    }

    /// Claims the reward share.
    pub async fn claim_rewards(&self) -> Result<Amount, LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| ledger.claim_rewards(&address, now))
            .await
    }

    /// Pays out the withdrawable balance.
    pub async fn withdraw_payments(&self) -> Result<Amount, LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, _| ledger.withdraw_payments(&address))
            .await
    }

    /// Funds the treasury.
    pub async fn donate_to_treasury(&self, amount: Amount) -> Result<(Amount, Amount), LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, _| ledger.donate_to_treasury(&address, amount))
            .await
    }

    /// One page of inactive servers.
    pub async fn inactive_servers(&self, page: u64) -> Result<InactivePage, LedgerError> {
        self.shared
            .read(|ledger, now| ledger.inactive_servers(page, now))
            .await
    }

    /// Evicts inactive servers among `candidates`.
    pub async fn housekeep_inactive(
        &self,
        candidates: Vec<Address>,
    ) -> Result<HousekeepReport, LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| ledger.housekeep_inactive(&address, &candidates, now))
            .await
    }
}

#[async_trait]
impl LedgerClient for LedgerHandle {
    fn address(&self) -> Address {
        self.address
    }

    fn now(&self) -> Timestamp {
        self.shared.now()
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.shared.subscribe()
    }

    async fn current_batch(&self, page: u64) -> Result<BatchView, LedgerError> {
        let address = self.address;
        self.shared
            .read(|ledger, _| ledger.current_batch_view(&address, page))
            .await
    }

    async fn submit_result(&self, batch_nonce: u64, result: BatchResult) -> Result<(), LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| ledger.submit_result(&address, batch_nonce, result, now))
            .await
    }

    async fn submit_result_hash(&self, batch_nonce: u64, hash: [u8; 32]) -> Result<(), LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| ledger.submit_result_hash(&address, batch_nonce, hash, now))
            .await
    }

    async fn reveal_result(&self, batch_nonce: u64, result: BatchResult) -> Result<(), LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| ledger.reveal_result(&address, batch_nonce, result, now))
            .await
    }

    async fn skip_expired_batch(&self) -> Result<u64, LedgerError> {
        let address = self.address;
        self.shared
            .transact(|ledger, now| ledger.skip_batch_if_consensus_expired(&address, now))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GlobalParams;

    fn shared(clock: Arc<ManualClock>) -> SharedLedger {
        let ledger = Ledger::new(
            Address::derive("owner"),
            GlobalParams::default(),
            Multihash::generate(b"genesis"),
        )
        .unwrap();
        SharedLedger::new(ledger, clock)
    }

    #[tokio::test]
    async fn transactions_publish_events_in_order() {
        let clock = Arc::new(ManualClock::new(100));
        let shared = shared(clock.clone());
        let mut events = shared.subscribe();
        let server = shared.handle(Address::derive("server"));
        let client = shared.handle(Address::derive("client"));

        server.register_at_requirement().await.unwrap();
        clock.advance(5);
        let (nonce, batch) = client
            .submit_request(Multihash::generate(b"req"))
            .await
            .unwrap();
        assert_eq!((nonce, batch), (0, 0));

        assert!(matches!(events.recv().await, Ok(LedgerEvent::ServerRegistered { .. })));
        assert_eq!(
            events.recv().await.unwrap(),
            LedgerEvent::NextBatchReady { batch_nonce: 0 }
        );
        let view = server.current_batch(0).await.unwrap();
        assert_eq!(view.expires_at, 105 + GlobalParams::default().consensus_max_duration);
    }

    #[tokio::test]
    async fn failed_transaction_publishes_nothing() {
        let shared = shared(Arc::new(ManualClock::new(0)));
        let mut events = shared.subscribe();
        let stranger = shared.handle(Address::derive("stranger"));
        assert!(stranger.unregister().await.is_err());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.advance(5), 15);
        clock.set(3);
        assert_eq!(clock.now(), 3);
    }
}
