//! Reference application: a shared key-value store.
//!
//! Each batch restores the map from its snapshot, applies the batch's
//! requests in order and persists it again as canonical JSON, so every
//! honest server arrives at byte-identical snapshots.

use super::payload::{HandlerError, RequestHandler, Response, StateStore};
use crate::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const KV_SCHEMA: &str = "batchq.kv.v1";

/// Requests understood by [`KvHandler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum KvRequest {
    /// Sets `key` to `value`; responds with the previous value.
    Put {
        /// Key.
        key: String,
        /// New value.
        value: Value,
    },
    /// Removes `key`; responds with the removed value.
    Delete {
        /// Key.
        key: String,
    },
    /// Adds `by` to the integer at `key` (missing counts as zero).
    Increment {
        /// Key.
        key: String,
        /// Delta.
        by: i64,
    },
    /// Reads `key`.
    Get {
        /// Key.
        key: String,
    },
}

impl KvRequest {
    /// JSON payload bytes for submission.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// In-memory key-value state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvState {
    schema: String,
    entries: BTreeMap<String, Value>,
}

impl KvState {
    /// Value at `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no key is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Snapshot codec for [`KvState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KvStore;

impl KvStore {
    /// Snapshot of the empty store, used as the genesis state.
    pub fn genesis(&self) -> Result<Vec<u8>, HandlerError> {
        self.persist(&KvState::default())
    }
}

impl StateStore for KvStore {
    type State = KvState;

    fn restore(&self, snapshot: &[u8]) -> Result<KvState, HandlerError> {
        let state: KvState = serde_json::from_slice(snapshot)
            .map_err(|err| HandlerError::Corrupt(err.to_string()))?;
        if state.schema != KV_SCHEMA {
            return Err(HandlerError::Corrupt(format!(
                "unexpected snapshot schema {:?}",
                state.schema
            )));
        }
        Ok(state)
    }

    fn persist(&self, state: &KvState) -> Result<Vec<u8>, HandlerError> {
        let canonical = KvState {
            schema: KV_SCHEMA.to_string(),
            entries: state.entries.clone(),
        };
        serde_json::to_vec(&canonical).map_err(|err| HandlerError::Corrupt(err.to_string()))
    }
}

/// Applies [`KvRequest`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvHandler {
    increment_skew: i64,
}

impl KvHandler {
    /// Correct handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that miscounts every increment by `skew`; simulates a
    /// divergent server.
    pub fn faulty(skew: i64) -> Self {
        Self {
            increment_skew: skew,
        }
    }
}

impl RequestHandler for KvHandler {
    type Request = KvRequest;
    type State = KvState;

    fn handle(
        &self,
        state: &mut KvState,
        _author: &Address,
        request: KvRequest,
    ) -> Result<Response, HandlerError> {
        let response = match request {
            KvRequest::Put { key, value } => {
                let previous = state.entries.insert(key, value);
                Response::ok(previous.unwrap_or(Value::Null))
            }
            KvRequest::Delete { key } => {
                Response::ok(state.entries.remove(&key).unwrap_or(Value::Null))
            }
            KvRequest::Increment { key, by } => {
                let current = match state.entries.get(&key) {
                    None => 0,
                    Some(value) => match value.as_i64() {
                        Some(n) => n,
                        None => return Ok(Response::rejected(format!("{key} is not an integer"))),
                    },
                };
                let Some(next) = current
                    .checked_add(by)
                    .and_then(|n| n.checked_add(self.increment_skew))
                else {
                    return Ok(Response::rejected(format!("{key} would overflow")));
                };
                state.entries.insert(key, Value::from(next));
                Response::ok(next)
            }
            KvRequest::Get { key } => {
                Response::ok(state.entries.get(&key).cloned().unwrap_or(Value::Null))
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::payload::apply_payload;
    use serde_json::json;

    fn run(handler: &KvHandler, state: &mut KvState, request: KvRequest) -> Response {
        apply_payload(handler, state, &Address::derive("a"), &request.to_payload().unwrap()).unwrap()
    }

    #[test]
    fn applies_requests_in_order() {
        let handler = KvHandler::new();
        let mut state = KvState::default();
        let put = KvRequest::Put {
            key: "x".into(),
            value: json!("hello"),
        };
        assert_eq!(run(&handler, &mut state, put), Response::ok(Value::Null));
        let inc = KvRequest::Increment {
            key: "n".into(),
            by: 5,
        };
        assert_eq!(run(&handler, &mut state, inc.clone()), Response::ok(5));
        assert_eq!(run(&handler, &mut state, inc), Response::ok(10));
        let bad = KvRequest::Increment {
            key: "x".into(),
            by: 1,
        };
        assert!(matches!(
            run(&handler, &mut state, bad),
            Response::Rejected { .. }
        ));
        let get = KvRequest::Get { key: "x".into() };
        assert_eq!(run(&handler, &mut state, get), Response::ok("hello"));
        let del = KvRequest::Delete { key: "x".into() };
        assert_eq!(run(&handler, &mut state, del), Response::ok("hello"));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn snapshots_are_canonical() {
        let store = KvStore;
        let handler = KvHandler::new();
        let mut a = store.restore(&store.genesis().unwrap()).unwrap();
        let mut b = a.clone();
        for key in ["b", "a", "c"] {
            run(&handler, &mut a, KvRequest::Increment { key: key.into(), by: 1 });
        }
        for key in ["c", "b", "a"] {
            run(&handler, &mut b, KvRequest::Increment { key: key.into(), by: 1 });
        }
        assert_eq!(store.persist(&a).unwrap(), store.persist(&b).unwrap());
        assert_eq!(store.restore(&store.persist(&a).unwrap()).unwrap().get("a"), Some(&json!(1)));
    }

    #[test]
    fn faulty_handler_diverges() {
        let mut honest = KvState::default();
        let mut faulty = KvState::default();
        let inc = KvRequest::Increment {
            key: "n".into(),
            by: 1,
        };
        run(&KvHandler::new(), &mut honest, inc.clone());
        run(&KvHandler::faulty(1), &mut faulty, inc);
        assert_ne!(KvStore.persist(&honest).unwrap(), KvStore.persist(&faulty).unwrap());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        assert!(matches!(KvStore.restore(b"[]"), Err(HandlerError::Corrupt(_))));
        assert!(matches!(
            KvStore.restore(br#"{"schema":"x","entries":{}}"#),
            Err(HandlerError::Corrupt(_))
        ));
    }
}
