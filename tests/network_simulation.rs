use async_trait::async_trait;
use batch_quorum::ledger::{load_ledger, save_ledger, BatchOutcome, FailureReason};
use batch_quorum::worker::{
    fetch_response, BatchProcessor, BlobError, BlobStore, KvHandler, KvRequest, KvStore, LedgerClient,
    LedgerHandle, ManualClock, MemoryBlobStore, Response, SharedLedger, Step, WorkerConfig,
};
use batch_quorum::{
    Address, GlobalParams, Ledger, LedgerError, Multihash, SubmissionProtocol, ETHER,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type Processor = BatchProcessor<KvHandler, KvStore>;

struct Network {
    shared: SharedLedger,
    clock: Arc<ManualClock>,
    blobs: Arc<MemoryBlobStore>,
    protocol: SubmissionProtocol,
}

fn server_address(i: usize) -> Address {
    Address::derive(&format!("server-{i}"))
}

impl Network {
    async fn new(servers: usize, protocol: SubmissionProtocol) -> Self {
        let blobs = Arc::new(MemoryBlobStore::new());
        let genesis = blobs.put(KvStore.genesis().unwrap()).await.unwrap();
        let ledger = Ledger::new(Address::derive("owner"), GlobalParams::default(), genesis)
            .unwrap()
            .with_protocol(protocol);
        let clock = Arc::new(ManualClock::new(1_000));
        let shared = SharedLedger::new(ledger, clock.clone());
        for i in 0..servers {
            shared
                .handle(server_address(i))
                .register_at_requirement()
                .await
                .unwrap();
        }
        Self {
            shared,
            clock,
            blobs,
            protocol,
        }
    }

    fn processor(&self, i: usize, handler: KvHandler) -> Arc<Processor> {
        self.processor_with(i, handler, self.blobs.clone())
    }

    fn processor_with(
        &self,
        i: usize,
        handler: KvHandler,
        blobs: Arc<dyn BlobStore>,
    ) -> Arc<Processor> {
        let client: Arc<dyn LedgerClient> = Arc::new(self.shared.handle(server_address(i)));
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(20),
            reveal_backoff: Duration::from_millis(5),
            protocol: self.protocol,
            ..WorkerConfig::default()
        };
        Arc::new(BatchProcessor::new(
            client,
            blobs,
            handler,
            KvStore,
            config,
        ))
    }

    fn client(&self) -> LedgerHandle {
        self.shared.handle(Address::derive("client"))
    }

    async fn submit(&self, author: &LedgerHandle, request: KvRequest) -> u64 {
        let cid = self.blobs.put(request.to_payload().unwrap()).await.unwrap();
        author.submit_request(cid).await.unwrap().0
    }

    async fn response(&self, author: &LedgerHandle, nonce: u64) -> Response {
        let location = author.response(nonce).await.unwrap();
        fetch_response(self.blobs.as_ref(), location).await.unwrap()
    }

    async fn points(&self, i: usize) -> u64 {
        let address = server_address(i);
        self.shared
            .read(|ledger, _| ledger.server(&address).map_or(0, |s| s.contributions))
            .await
    }
}

fn increment(by: i64) -> KvRequest {
    KvRequest::Increment {
        key: "counter".into(),
        by,
    }
}

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("batchq_{name}_{nanos}.json"))
}

#[tokio::test]
async fn honest_servers_agree_on_every_batch() {
    let net = Network::new(4, SubmissionProtocol::Direct).await;
    let client = net.client();
    let first = net.submit(&client, increment(2)).await;
    let second = net.submit(&client, increment(3)).await;

    let workers: Vec<_> = (0..4).map(|i| net.processor(i, KvHandler::new())).collect();
    for worker in &workers[..3] {
        assert_eq!(worker.run_once().await.unwrap(), Step::Submitted(0));
    }
    assert_eq!(net.response(&client, first).await, Response::ok(2));

    for worker in workers.iter().rev().take(3) {
        assert_eq!(worker.run_once().await.unwrap(), Step::Submitted(1));
    }
    assert_eq!(workers[0].run_once().await.unwrap(), Step::Idle);
    assert_eq!(net.response(&client, second).await, Response::ok(5));

    let third = net.submit(&client, KvRequest::Get { key: "counter".into() }).await;
    for worker in &workers[..3] {
        assert_eq!(worker.run_once().await.unwrap(), Step::Submitted(2));
    }
    assert_eq!(net.response(&client, third).await, Response::ok(5));
    assert_eq!(net.points(0).await, 2);
    assert_eq!(net.points(1).await, 3);
    assert_eq!(net.points(3).await, 1);
}

/// Blob store that lets a client submit one more request while a processor
/// is still fetching the payloads of the announced batch.
struct LateArrival {
    inner: Arc<MemoryBlobStore>,
    author: LedgerHandle,
    late: Multihash,
    fired: AtomicBool,
}

#[async_trait]
impl BlobStore for LateArrival {
    async fn put(&self, bytes: Vec<u8>) -> Result<Multihash, BlobError> {
        self.inner.put(bytes).await
    }

    async fn get(&self, cid: &Multihash) -> Result<Vec<u8>, BlobError> {
        if *cid != self.late && !self.fired.swap(true, Ordering::SeqCst) {
            self.author.submit_request(self.late).await.unwrap();
        }
        self.inner.get(cid).await
    }
}

#[tokio::test]
async fn request_during_replay_waits_for_the_next_batch() {
    let net = Network::new(2, SubmissionProtocol::Direct).await;
    let client = net.client();
    let first = net.submit(&client, increment(2)).await;
    let late = net
        .blobs
        .put(increment(3).to_payload().unwrap())
        .await
        .unwrap();

    let racing: Arc<dyn BlobStore> = Arc::new(LateArrival {
        inner: net.blobs.clone(),
        author: net.client(),
        late,
        fired: AtomicBool::new(false),
    });
    let worker = net.processor_with(0, KvHandler::new(), racing);
    assert_eq!(worker.run_once().await.unwrap(), Step::Submitted(0));
    let honest = net.processor(1, KvHandler::new());
    assert_eq!(honest.run_once().await.unwrap(), Step::Submitted(0));
    assert_eq!(net.response(&client, first).await, Response::ok(2));

    let view = net
        .shared
        .read(|ledger, _| {
            ledger
                .current_batch()
                .map(|b| (b.nonce, b.requests.iter().map(|r| r.nonce).collect::<Vec<_>>()))
        })
        .await;
    assert_eq!(view, Some((1, vec![1])));
    assert_eq!(worker.run_once().await.unwrap(), Step::Submitted(1));
    assert_eq!(honest.run_once().await.unwrap(), Step::Submitted(1));
    assert_eq!(net.response(&client, 1).await, Response::ok(5));
}

#[tokio::test]
async fn faulty_minority_is_outvoted() {
    let net = Network::new(4, SubmissionProtocol::Direct).await;
    let client = net.client();
    let nonce = net.submit(&client, increment(1)).await;

    let liar = net.processor(0, KvHandler::faulty(10));
    assert_eq!(liar.run_once().await.unwrap(), Step::Submitted(0));
    for i in 1..3 {
        let worker = net.processor(i, KvHandler::new());
        assert_eq!(worker.run_once().await.unwrap(), Step::Submitted(0));
    }

    assert_eq!(net.response(&client, nonce).await, Response::ok(1));
    assert_eq!(net.points(0).await, 0);
    assert_eq!(net.points(1).await, 1);
    assert_eq!(net.points(2).await, 1);
}

#[tokio::test]
async fn even_split_fails_and_drops_requests() {
    let net = Network::new(2, SubmissionProtocol::Direct).await;
    let client = net.client();
    let nonce = net.submit(&client, increment(1)).await;

    net.processor(0, KvHandler::new()).run_once().await.unwrap();
    net.processor(1, KvHandler::faulty(1)).run_once().await.unwrap();

    let outcome = net
        .shared
        .read(|ledger, _| ledger.batch_outcome(0).cloned())
        .await;
    assert_eq!(
        outcome,
        Some(BatchOutcome::Failed {
            reason: FailureReason::NoMajority
        })
    );
    assert!(matches!(
        client.response(nonce).await,
        Err(LedgerError::RequestDropped { nonce: 0, .. })
    ));
    let genesis = net.blobs.put(KvStore.genesis().unwrap()).await.unwrap();
    assert_eq!(net.shared.read(|ledger, _| *ledger.state_cid()).await, genesis);
    assert_eq!(net.points(0).await, 1);
    assert_eq!(net.points(1).await, 1);
}

#[tokio::test]
async fn commit_reveal_round_completes() {
    let net = Network::new(3, SubmissionProtocol::CommitReveal).await;
    let client = net.client();
    let nonce = net.submit(&client, increment(4)).await;

    let workers: Vec<_> = (0..3).map(|i| net.processor(i, KvHandler::new())).collect();
    for worker in &workers {
        assert_eq!(worker.run_once().await.unwrap(), Step::Committed(0));
    }
    for worker in &workers {
        assert_eq!(worker.run_once().await.unwrap(), Step::Revealed(0));
    }
    assert_eq!(net.response(&client, nonce).await, Response::ok(4));
}

#[tokio::test]
async fn stalled_batch_is_skipped_by_any_server() {
    let net = Network::new(4, SubmissionProtocol::Direct).await;
    let client = net.client();
    let nonce = net.submit(&client, increment(1)).await;
    net.processor(0, KvHandler::new()).run_once().await.unwrap();

    net.clock
        .advance(GlobalParams::default().consensus_max_duration + 1);
    let skipper = net.processor(3, KvHandler::new());
    assert_eq!(skipper.run_once().await.unwrap(), Step::Skipped(0));
    assert!(matches!(
        client.response(nonce).await,
        Err(LedgerError::RequestDropped { .. })
    ));
    assert_eq!(net.points(3).await, 1);
    assert_eq!(net.points(0).await, 0);
}

#[tokio::test]
async fn rewards_and_housekeeping_flow() {
    let net = Network::new(4, SubmissionProtocol::Direct).await;
    let client = net.client();
    net.submit(&client, increment(1)).await;
    for i in 0..3 {
        net.processor(i, KvHandler::new()).run_once().await.unwrap();
    }

    let donor = net.shared.handle(Address::derive("donor"));
    assert_eq!(
        donor.donate_to_treasury(10 * ETHER).await.unwrap(),
        (9 * ETHER, ETHER)
    );
    let owner = net.shared.handle(Address::derive("owner"));
    assert_eq!(owner.withdraw_payments().await.unwrap(), ETHER);

    let first = net.shared.handle(server_address(0));
    assert_eq!(first.claimable_rewards().await, ETHER);
    assert_eq!(first.claim_rewards().await.unwrap(), ETHER);
    assert_eq!(first.withdraw_payments().await.unwrap(), ETHER);
    assert!(matches!(
        first.claim_rewards().await,
        Err(LedgerError::NothingToClaim { .. })
    ));

    net.clock
        .advance(GlobalParams::default().inactivity_duration + 1);
    let sweeper = net.shared.handle(server_address(1));
    let page = sweeper.inactive_servers(0).await.unwrap();
    assert_eq!(page.servers.len(), 4);
    let report = sweeper.housekeep_inactive(page.servers).await.unwrap();
    assert_eq!(
        report.evicted,
        vec![server_address(0), server_address(2), server_address(3)]
    );
    assert_eq!(report.reward, 1 + 2 * 3);
    assert_eq!(net.shared.read(|ledger, _| ledger.server_count()).await, 1);
    assert!(matches!(
        sweeper.housekeep_inactive(Vec::new()).await,
        Err(LedgerError::HousekeepCooldown { .. })
    ));

    // Evicted servers keep their refund.
    assert!(net
        .shared
        .handle(server_address(3))
        .withdraw_payments()
        .await
        .unwrap()
        > 0);
    assert!(sweeper.claim_rewards().await.unwrap() > 0);
}

#[tokio::test]
async fn running_processors_settle_batches() {
    let net = Network::new(3, SubmissionProtocol::CommitReveal).await;
    let workers: Vec<_> = (0..3).map(|i| net.processor(i, KvHandler::new())).collect();
    let stops: Vec<_> = workers.iter().map(|w| w.shutdown_handle()).collect();
    let tasks: Vec<_> = workers.iter().map(|w| w.clone().start()).collect();

    let client = net.client();
    let nonce = net.submit(&client, increment(7)).await;
    let mut settled = false;
    for _ in 0..500 {
        if client.response(nonce).await.is_ok() {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(settled);
    assert_eq!(net.response(&client, nonce).await, Response::ok(7));

    for stop in stops {
        stop.notify_one();
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn checkpoint_restores_a_live_network() {
    let net = Network::new(2, SubmissionProtocol::Direct).await;
    let client = net.client();
    net.submit(&client, increment(1)).await;
    net.processor(0, KvHandler::new()).run_once().await.unwrap();
    net.processor(1, KvHandler::new()).run_once().await.unwrap();

    let path = temp_path("live");
    save_ledger(&path, &net.shared.snapshot().await).unwrap();
    let restored = load_ledger(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let reopened = Network {
        shared: SharedLedger::new(restored, net.clock.clone()),
        clock: net.clock.clone(),
        blobs: net.blobs.clone(),
        protocol: SubmissionProtocol::Direct,
    };
    let client = reopened.client();
    let nonce = reopened.submit(&client, increment(1)).await;
    reopened.processor(0, KvHandler::new()).run_once().await.unwrap();
    reopened.processor(1, KvHandler::new()).run_once().await.unwrap();
    assert_eq!(reopened.response(&client, nonce).await, Response::ok(2));
}
