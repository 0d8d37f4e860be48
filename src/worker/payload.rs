//! The boundary between raw request payloads and application handlers.

use crate::Address;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Outcome of one request, stored as a blob and indexed by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Response {
    /// The request was applied.
    Ok {
        /// Application-defined result.
        #[serde(default)]
        value: serde_json::Value,
    },
    /// The request was well formed but refused by the application.
    Rejected {
        /// Why.
        reason: String,
    },
    /// The payload is not a request this application understands.
    InvalidPayload {
        /// Decoder message.
        reason: String,
    },
}

impl Response {
    /// `Ok` with `value`.
    pub fn ok(value: impl Into<serde_json::Value>) -> Self {
        Self::Ok {
            value: value.into(),
        }
    }

    /// `Rejected` with `reason`.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Failures that must abort a batch: nothing is submitted when one occurs.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The state snapshot could not be restored or persisted.
    #[error("state store corrupted: {0}")]
    Corrupt(String),
    /// The handler hit an internal fault.
    #[error("request handler failed: {0}")]
    Failed(String),
}

/// Application logic applied to each request of a batch, in order.
pub trait RequestHandler: Send + Sync {
    /// Tagged union of the requests this application accepts.
    type Request: DeserializeOwned;
    /// Working copy of the application state.
    type State: Send;

    /// Applies one request to `state`.
    fn handle(
        &self,
        state: &mut Self::State,
        author: &Address,
        request: Self::Request,
    ) -> Result<Response, HandlerError>;
}

/// Opens and persists application state snapshots.
pub trait StateStore: Send + Sync {
    /// In-memory state.
    type State: Send;

    /// Rebuilds state from snapshot bytes.
    fn restore(&self, snapshot: &[u8]) -> Result<Self::State, HandlerError>;

    /// Serializes state into snapshot bytes. Equal states must produce
    /// identical bytes on every server.
    fn persist(&self, state: &Self::State) -> Result<Vec<u8>, HandlerError>;
}

/// True when `payload` decodes as an `R`.
pub fn is_request<R: DeserializeOwned>(payload: &[u8]) -> bool {
    serde_json::from_slice::<R>(payload).is_ok()
}

/// Decodes `payload` and hands it to `handler`; undecodable payloads become
/// [`Response::InvalidPayload`] without reaching the handler.
pub fn apply_payload<H: RequestHandler>(
    handler: &H,
    state: &mut H::State,
    author: &Address,
    payload: &[u8],
) -> Result<Response, HandlerError> {
    match serde_json::from_slice::<H::Request>(payload) {
        Ok(request) => handler.handle(state, author, request),
        Err(err) => Ok(Response::InvalidPayload {
            reason: err.to_string(),
        }),
    }
}
