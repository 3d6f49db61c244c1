// ABOUTME: Dispatcher - routes envelopes to handlers keyed by op code.
// ABOUTME: Unknown ops are dropped so newer peers never break older ones.

use std::collections::HashMap;

use super::{Envelope, Operation};
use crate::error::FleetError;

/// A handler receives the state it may mutate plus the envelope, and returns
/// any envelopes to broadcast as a result.
pub type Handler<S> = fn(&mut S, &Envelope) -> Result<Vec<Envelope>, FleetError>;

/// Handler table for one side of the protocol.
pub struct Dispatcher<S> {
    handlers: HashMap<&'static str, Handler<S>>,
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> Dispatcher<S> {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for operation `T`, replacing any previous one.
    pub fn on<T: Operation>(mut self, handler: Handler<S>) -> Self {
        self.handlers.insert(T::OP, handler);
        self
    }

    /// Whether an op code has a handler.
    pub fn handles(&self, op: &str) -> bool {
        self.handlers.contains_key(op)
    }

    /// Run the handler for `envelope`.
    ///
    /// An unknown op is not an error: it is logged and yields no output.
    pub fn dispatch(&self, state: &mut S, envelope: &Envelope) -> Result<Vec<Envelope>, FleetError> {
        match self.handlers.get(envelope.op.as_str()) {
            Some(handler) => handler(state, envelope),
            None => {
                tracing::debug!(op = %envelope.op, "dropping message with unknown op");
                Ok(Vec::new())
            }
        }
    }
}
