// ABOUTME: Protocol module - wire envelopes, typed operations, and dispatch.
// ABOUTME: Shared by the coordinator and the worker listener.

mod dispatch;
mod envelope;
mod messages;

pub use dispatch::{Dispatcher, Handler};
pub use envelope::{Envelope, Operation};
pub use messages::{BucketState, GlobalHaltNotice, UpdateRatelimit};

#[cfg(test)]
mod protocol_test;
