#![cfg(feature = "worker")]

//! Async runtime pieces: the shared ledger, blob stores, the request
//! boundary, the reference key-value application and the batch processor.

pub mod blob;
pub mod config;
pub mod kv;
pub mod payload;
pub mod processor;
pub mod shared;

pub use blob::{BlobError, BlobStore, DirBlobStore, MemoryBlobStore};
pub use config::{load_params, ConfigError, WorkerConfig};
pub use kv::{KvHandler, KvRequest, KvState, KvStore};
pub use payload::{apply_payload, is_request, HandlerError, RequestHandler, Response, StateStore};
pub use processor::{fetch_response, BatchProcessor, ProcessorError, Step};
pub use shared::{Clock, LedgerClient, LedgerHandle, ManualClock, SharedLedger, SystemClock};
