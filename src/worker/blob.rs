//! Content-addressed blob stores.

use crate::Multihash;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

/// Schema tag written into every on-disk blob envelope.
pub const SCHEMA_BLOB: &str = "batchq.blob.v1";

/// Errors raised by blob stores.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob is stored under the id.
    #[error("blob {0} not found")]
    NotFound(Multihash),
    /// Underlying filesystem failure.
    #[error("blob I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The stored envelope is malformed.
    #[error("malformed blob envelope: {0}")]
    Envelope(String),
    /// The stored bytes no longer hash to their id.
    #[error("blob digest mismatch: expected {expected}, found {actual}")]
    DigestMismatch {
        /// Requested id.
        expected: Multihash,
        /// Id of the bytes actually stored.
        actual: Multihash,
    },
}

/// `put(bytes) -> id`, `get(id) -> bytes` storage addressed by [`Multihash`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` and returns their id. Storing the same bytes twice
    /// yields the same id.
    async fn put(&self, bytes: Vec<u8>) -> Result<Multihash, BlobError>;

    /// Returns the bytes stored under `cid`.
    async fn get(&self, cid: &Multihash) -> Result<Vec<u8>, BlobError>;
}

/// In-process store shared by every processor in a simulation.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<Multihash, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<Multihash, BlobError> {
        let cid = Multihash::generate(&bytes);
        self.blobs.write().await.entry(cid).or_insert(bytes);
        Ok(cid)
    }

    async fn get(&self, cid: &Multihash) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .await
            .get(cid)
            .cloned()
            .ok_or(BlobError::NotFound(*cid))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobFile {
    schema: String,
    cid: Multihash,
    size: u64,
    data: String,
}

/// One JSON envelope per blob under a directory.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    /// Uses `root` as the blob directory, creating it on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Blob directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, cid: &Multihash) -> PathBuf {
        self.root.join(format!("{cid}.json"))
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<Multihash, BlobError> {
        let cid = Multihash::generate(&bytes);
        let path = self.path_for(&cid);
        if fs::try_exists(&path).await? {
            return Ok(cid);
        }
        fs::create_dir_all(&self.root).await?;
        let file = BlobFile {
            schema: SCHEMA_BLOB.to_string(),
            cid,
            size: bytes.len() as u64,
            data: BASE64.encode(&bytes),
        };
        let encoded =
            serde_json::to_vec(&file).map_err(|err| BlobError::Envelope(err.to_string()))?;
        let tmp = self.root.join(format!("{cid}.json.tmp"));
        fs::write(&tmp, encoded).await?;
        fs::rename(&tmp, &path).await?;
        debug!(cid = %cid, size = bytes.len(), "blob stored");
        Ok(cid)
    }

    async fn get(&self, cid: &Multihash) -> Result<Vec<u8>, BlobError> {
        let raw = match fs::read(self.path_for(cid)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(BlobError::NotFound(*cid)),
            Err(err) => return Err(err.into()),
        };
        let file: BlobFile =
            serde_json::from_slice(&raw).map_err(|err| BlobError::Envelope(err.to_string()))?;
        if file.schema != SCHEMA_BLOB {
            return Err(BlobError::Envelope(format!(
                "unexpected schema {}",
                file.schema
            )));
        }
        let data = BASE64
            .decode(file.data.as_bytes())
            .map_err(|err| BlobError::Envelope(err.to_string()))?;
        if data.len() as u64 != file.size {
            return Err(BlobError::Envelope(format!(
                "size {} does not match header {}",
                data.len(),
                file.size
            )));
        }
        let actual = Multihash::generate(&data);
        if actual != *cid {
            return Err(BlobError::DigestMismatch {
                expected: *cid,
                actual,
            });
        }
        Ok(data)
    }
}
