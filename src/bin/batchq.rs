//! Command-line tools for the batch_quorum ledger.
//!
//! Content-id helpers, params validation, a stake-curve table and an
//! in-process network simulation that runs real batch processors against a
//! shared ledger.

use batch_quorum::ledger::{save_ledger, BatchOutcome, LedgerEvent};
use batch_quorum::worker::{
    fetch_response, load_params, BatchProcessor, BlobStore, Clock, KvHandler, KvRequest, KvStore,
    LedgerClient, LedgerHandle, ManualClock, MemoryBlobStore, SharedLedger, SystemClock,
    WorkerConfig,
};
use batch_quorum::{
    Address, Amount, GlobalParams, Ledger, LedgerError, Multihash, SubmissionProtocol, ETHER,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SIMULATION_DEADLINE: Duration = Duration::from_secs(60);
const WEEK: u64 = 604_800;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: batchq <command> ...");
    println!("  cid <file>                 content id of a file");
    println!("  cid-decode <cid>           header and digest of a content id");
    println!("  params default             default params as JSON");
    println!("  params check <file>        validate a params file");
    println!("  stake-curve [--servers N] [--interval SECS]");
    println!("  simulate [--servers N] [--requests N] [--faulty N]");
    println!("           [--protocol direct|commit-reveal] [--state <file>]");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("cid") => {
            let path = args
                .next()
                .unwrap_or_else(|| fatal("Usage: batchq cid <file>"));
            cmd_cid(&path);
        }
        Some("cid-decode") => {
            let text = args
                .next()
                .unwrap_or_else(|| fatal("Usage: batchq cid-decode <cid>"));
            cmd_cid_decode(&text);
        }
        Some("params") => {
            let sub = args
                .next()
                .unwrap_or_else(|| fatal("Usage: batchq params <default|check> ..."));
            handle_params(&sub, args.collect());
        }
        Some("stake-curve") => cmd_stake_curve(args.collect()),
        Some("simulate") => {
            let options = SimulateOptions::parse(args.collect());
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap_or_else(|err| fatal(&format!("failed to start runtime: {err}")));
            if let Err(err) = runtime.block_on(run_simulation(options)) {
                fatal(&format!("simulation failed: {err}"));
            }
        }
        Some("help") | Some("--help") | Some("-h") | None => print_help(),
        Some(other) => {
            eprintln!("unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

fn cmd_cid(path: &str) {
    let bytes = fs::read(path).unwrap_or_else(|err| fatal(&format!("failed to read {path}: {err}")));
    println!("{}", Multihash::generate(&bytes));
}

fn cmd_cid_decode(text: &str) {
    let cid = Multihash::parse(text).unwrap_or_else(|err| fatal(&format!("invalid cid: {err}")));
    println!("header: {}", hex::encode(cid.header()));
    println!("digest: {}", hex::encode(cid.digest()));
}

fn handle_params(sub: &str, args: Vec<String>) {
    match sub {
        "default" => match serde_json::to_string_pretty(&GlobalParams::default()) {
            Ok(json) => println!("{json}"),
            Err(err) => fatal(&format!("failed to encode params: {err}")),
        },
        "check" => {
            let path = args
                .first()
                .unwrap_or_else(|| fatal("Usage: batchq params check <file>"));
            match load_params(&PathBuf::from(path)) {
                Ok(_) => println!("{path}: ok"),
                Err(err) => fatal(&err.to_string()),
            }
        }
        other => fatal(&format!("unknown params subcommand: {other}")),
    }
}

fn flag_value<'a>(args: &'a [String], index: usize, flag: &str) -> &'a str {
    args.get(index + 1)
        .map(String::as_str)
        .unwrap_or_else(|| fatal(&format!("{flag} requires a value")))
}

fn parse_count(raw: &str, flag: &str) -> usize {
    raw.parse()
        .unwrap_or_else(|_| fatal(&format!("{flag} expects a number, got {raw}")))
}

fn format_ether(amount: Amount) -> String {
    let fraction = format!("{:018}", amount % ETHER);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{}", amount / ETHER)
    } else {
        format!("{}.{fraction}", amount / ETHER)
    }
}

/// Registers servers one after another, `interval` seconds apart, on a fresh
/// ledger with default params and prints the price each one paid.
fn cmd_stake_curve(args: Vec<String>) {
    let mut servers = 10usize;
    let mut interval = 0u64;
    let mut idx = 0;
    while idx < args.len() {
        match args[idx].as_str() {
            "--servers" => {
                servers = parse_count(flag_value(&args, idx, "--servers"), "--servers");
                idx += 2;
            }
            "--interval" => {
                let raw = flag_value(&args, idx, "--interval");
                interval = raw
                    .parse()
                    .unwrap_or_else(|_| fatal(&format!("--interval expects seconds, got {raw}")));
                idx += 2;
            }
            other => fatal(&format!("unknown flag: {other}")),
        }
    }

    let params = GlobalParams {
        max_servers: 0,
        ..GlobalParams::default()
    };
    let mut ledger = Ledger::new(Address::derive("owner"), params, Multihash::generate(b""))
        .unwrap_or_else(|_| fatal("default params rejected"));
    println!("{:>6} {:>12} {:>24}", "server", "time", "stake (ether)");
    for i in 0..servers {
        let now = i as u64 * interval;
        let price = ledger.stake_requirement(now);
        let address = Address::derive(&format!("server-{i}"));
        if let Err(err) = ledger.register(&address, price, now) {
            fatal(&format!("registration {i} failed: {err}"));
        }
        println!("{:>6} {:>12} {:>24}", i + 1, now, format_ether(price));
    }
    if interval == 0 {
        let price = ledger.stake_requirement(WEEK);
        println!("after one idle week: {} ether", format_ether(price));
    }
}

#[derive(Debug)]
struct SimulateOptions {
    servers: usize,
    requests: usize,
    faulty: usize,
    protocol: SubmissionProtocol,
    state: Option<PathBuf>,
}

impl SimulateOptions {
    fn parse(args: Vec<String>) -> Self {
        let mut options = SimulateOptions {
            servers: 4,
            requests: 8,
            faulty: 0,
            protocol: SubmissionProtocol::Direct,
            state: None,
        };
        let mut idx = 0;
        while idx < args.len() {
            let flag = args[idx].as_str();
            let value = flag_value(&args, idx, flag);
            match flag {
                "--servers" => options.servers = parse_count(value, flag),
                "--requests" => options.requests = parse_count(value, flag),
                "--faulty" => options.faulty = parse_count(value, flag),
                "--protocol" => {
                    options.protocol = value.parse().unwrap_or_else(|err: String| fatal(&err))
                }
                "--state" => options.state = Some(PathBuf::from(value)),
                other => fatal(&format!("unknown flag: {other}")),
            }
            idx += 2;
        }
        if options.servers == 0 {
            fatal("--servers must be at least 1");
        }
        if options.faulty > options.servers {
            fatal("--faulty cannot exceed --servers");
        }
        options
    }
}

fn simulated_request(i: usize) -> KvRequest {
    if i % 2 == 0 {
        KvRequest::Increment {
            key: "counter".to_string(),
            by: 1,
        }
    } else {
        KvRequest::Put {
            key: format!("key-{i}"),
            value: serde_json::Value::from(i as u64),
        }
    }
}

enum RequestState {
    Pending,
    Answered,
    Dropped,
}

async fn request_state(author: &LedgerHandle, nonce: u64) -> Result<RequestState, LedgerError> {
    match author.response(nonce).await {
        Ok(_) => Ok(RequestState::Answered),
        Err(LedgerError::RequestDropped { .. }) => Ok(RequestState::Dropped),
        Err(LedgerError::ResponseNotAvailable { .. }) => Ok(RequestState::Pending),
        Err(err) => Err(err),
    }
}

async fn run_simulation(options: SimulateOptions) -> Result<(), Box<dyn std::error::Error>> {
    let blobs = Arc::new(MemoryBlobStore::new());
    let genesis = blobs.put(KvStore.genesis()?).await?;
    let ledger = Ledger::new(Address::derive("owner"), GlobalParams::default(), genesis)?
        .with_protocol(options.protocol);
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(SystemClock.now()));
    let shared = SharedLedger::new(ledger, clock);
    let mut events = shared.subscribe();

    let mut config = WorkerConfig::from_env();
    config.protocol = options.protocol;

    let mut workers = Vec::with_capacity(options.servers);
    for i in 0..options.servers {
        let handle = shared.handle(Address::derive(&format!("server-{i}")));
        let stake = handle.register_at_requirement().await?;
        info!(server = %handle.address(), stake = %format_ether(stake), "server registered");
        let handler = if i < options.faulty {
            KvHandler::faulty(1)
        } else {
            KvHandler::new()
        };
        let client: Arc<dyn LedgerClient> = Arc::new(handle);
        let processor = Arc::new(BatchProcessor::new(
            client,
            blobs.clone(),
            handler,
            KvStore,
            config.clone(),
        ));
        workers.push(processor);
    }

    let author = shared.handle(Address::derive("client"));
    let mut nonces = Vec::with_capacity(options.requests);
    for i in 0..options.requests {
        let payload = simulated_request(i).to_payload()?;
        let cid = blobs.put(payload).await?;
        let (nonce, batch) = author.submit_request(cid).await?;
        info!(request = nonce, batch, "request submitted");
        nonces.push(nonce);
    }

    let mut stops = Vec::with_capacity(workers.len());
    let mut tasks = Vec::with_capacity(workers.len());
    for worker in workers {
        stops.push(worker.shutdown_handle());
        tasks.push(worker.start());
    }

    let settle = async {
        loop {
            let mut pending = 0;
            for &nonce in &nonces {
                if let RequestState::Pending = request_state(&author, nonce).await? {
                    pending += 1;
                }
            }
            if pending == 0 {
                return Ok::<(), LedgerError>(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    let settled = tokio::time::timeout(SIMULATION_DEADLINE, settle).await;

    for stop in &stops {
        stop.notify_one();
    }
    for task in tasks {
        if let Err(err) = task.await {
            warn!(%err, "processor task ended abnormally");
        }
    }
    match settled {
        Ok(outcome) => outcome?,
        Err(_) => warn!(
            deadline_secs = SIMULATION_DEADLINE.as_secs(),
            "requests still pending at deadline"
        ),
    }

    let (mut completed, mut failed) = (0usize, 0usize);
    while let Ok(event) = events.try_recv() {
        match event {
            LedgerEvent::BatchCompleted { .. } => completed += 1,
            LedgerEvent::BatchFailed { .. } => failed += 1,
            _ => {}
        }
    }

    for &nonce in &nonces {
        match author.response(nonce).await {
            Ok(location) => {
                let response = fetch_response(blobs.as_ref(), location).await?;
                println!("request {nonce}: {}", serde_json::to_string(&response)?);
            }
            Err(err) => println!("request {nonce}: {err}"),
        }
    }

    let ledger = shared.snapshot().await;
    println!("batches completed: {completed}, failed: {failed}");
    for nonce in 0..ledger.current_batch().map(|b| b.nonce).unwrap_or(u64::MAX) {
        match ledger.batch_outcome(nonce) {
            Some(BatchOutcome::Completed { result }) => {
                println!("batch {nonce}: completed, state {}", result.final_state_cid)
            }
            Some(BatchOutcome::Failed { reason }) => println!("batch {nonce}: failed ({reason:?})"),
            None => break,
        }
    }
    println!("state: {}", ledger.state_cid());
    println!("treasury: {} ether", format_ether(ledger.treasury()));
    for server in ledger.servers() {
        println!(
            "{}: stake {} ether, {} points",
            server.address,
            format_ether(server.stake),
            server.contributions
        );
    }

    if let Some(path) = &options.state {
        save_ledger(path, &ledger)?;
        println!("ledger written to {}", path.display());
    }
    Ok(())
}
