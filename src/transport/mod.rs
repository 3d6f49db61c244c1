// ABOUTME: Transport abstraction for coordinator/worker messaging.
// ABOUTME: Re-exports the in-process LocalBus implementation.

mod local;

pub use local::{LocalBroadcaster, LocalBus, LocalDownstream, LocalInbox, LocalUpstream};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::protocol::Envelope;

/// Lifecycle of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Ready,
    Closed,
}

/// A transport session that must be ready before traffic flows over it.
#[async_trait]
pub trait Session: Send + Sync {
    /// Resolve once the session accepts traffic. Fails if it closed first.
    async fn ready(&self) -> Result<(), TransportError>;

    /// Tear the session down. Resolves once teardown is complete.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Worker → coordinator sender.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// Coordinator → all workers sender.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// Receiving end of either direction. `None` means the channel is closed.
#[async_trait]
pub trait Inbox: Send {
    async fn recv(&mut self) -> Option<Envelope>;
}
