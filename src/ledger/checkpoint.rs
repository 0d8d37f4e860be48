//! JSON checkpoints of the full ledger state.

use super::Ledger;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const CHECKPOINT_SCHEMA: &str = "batchq.ledger.v1";

#[derive(Serialize)]
struct CheckpointRef<'a> {
    schema: &'a str,
    ledger: &'a Ledger,
}

#[derive(Deserialize)]
struct CheckpointOwned {
    schema: String,
    ledger: Ledger,
}

/// Errors raised while saving or restoring a ledger snapshot.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying filesystem failure.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The document could not be encoded or decoded.
    #[error("checkpoint encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    /// The schema tag was unexpected.
    #[error("invalid checkpoint schema: {0}")]
    InvalidSchema(String),
}

/// Writes `ledger` to `path` as pretty JSON via a temporary file and rename.
/// Pending events are not persisted.
pub fn save_ledger(path: &Path, ledger: &Ledger) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let doc = CheckpointRef {
        schema: CHECKPOINT_SCHEMA,
        ledger,
    };
    let contents = serde_json::to_string_pretty(&doc)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Restores a ledger written by [`save_ledger`].
pub fn load_ledger(path: &Path) -> Result<Ledger, CheckpointError> {
    let contents = fs::read_to_string(path)?;
    let doc: CheckpointOwned = serde_json::from_str(&contents)?;
    if doc.schema != CHECKPOINT_SCHEMA {
        return Err(CheckpointError::InvalidSchema(doc.schema));
    }
    Ok(doc.ledger)
}
