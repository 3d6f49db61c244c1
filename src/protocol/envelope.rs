// ABOUTME: Envelope - the flat `{op, ...payload}` message moved between processes.
// ABOUTME: Typed operations encode into and decode out of it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RateLimitError, TransportError};

/// A typed message with a fixed operation code.
pub trait Operation: Serialize + DeserializeOwned {
    /// The `op` value this message travels under.
    const OP: &'static str;
}

/// A message on the wire: an `op` code plus the operation's fields at the
/// same level, e.g. `{"op": "global_halt", "until": 1700000000000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope with an arbitrary op and payload.
    pub fn new(op: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            op: op.into(),
            payload,
        }
    }

    /// Encode a typed operation.
    pub fn encode<T: Operation>(message: &T) -> Result<Self, TransportError> {
        let payload = match serde_json::to_value(message)? {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Ok(Self::new(T::OP, payload))
    }

    /// Decode the payload as `T`. Fails if the payload does not fit.
    pub fn decode<T: Operation>(&self) -> Result<T, RateLimitError> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|e| {
            RateLimitError::Malformed {
                op: self.op.clone(),
                message: e.to_string(),
            }
        })
    }

    /// Whether this envelope carries a `T`.
    pub fn is<T: Operation>(&self) -> bool {
        self.op == T::OP
    }

    /// Serialize to a JSON string for byte-oriented transports.
    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(json)?)
    }
}
