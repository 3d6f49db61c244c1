// ABOUTME: In-process transport over tokio channels.
// ABOUTME: mpsc carries updates upward, broadcast fans decisions back out.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};

use super::{Broadcaster, Inbox, Session, SessionState, Upstream};
use crate::error::TransportError;
use crate::protocol::Envelope;

struct Shared {
    upstream: mpsc::Sender<Envelope>,
    inbox: Mutex<Option<mpsc::Receiver<Envelope>>>,
    downstream: broadcast::Sender<Envelope>,
    state: watch::Sender<SessionState>,
}

/// A message bus connecting one coordinator and any number of workers in
/// the same process. Cloning shares the bus.
///
/// The broadcast leg is lossy: a worker that falls more than `capacity`
/// messages behind skips ahead, which the protocol tolerates.
#[derive(Clone)]
pub struct LocalBus {
    shared: Arc<Shared>,
}

impl LocalBus {
    /// Create a bus that is ready immediately.
    pub fn new(capacity: usize) -> Self {
        let bus = Self::pending(capacity);
        bus.mark_ready();
        bus
    }

    /// Create a bus that stays in `Opening` until `mark_ready` is called.
    pub fn pending(capacity: usize) -> Self {
        let (upstream, inbox) = mpsc::channel(capacity);
        let (downstream, _) = broadcast::channel(capacity);
        let (state, _) = watch::channel(SessionState::Opening);
        Self {
            shared: Arc::new(Shared {
                upstream,
                inbox: Mutex::new(Some(inbox)),
                downstream,
                state,
            }),
        }
    }

    /// Open the bus for traffic.
    pub fn mark_ready(&self) {
        self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Opening {
                *state = SessionState::Ready;
                true
            } else {
                false
            }
        });
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Take the coordinator's inbox. Only the first call gets it.
    pub fn take_inbox(&self) -> Option<LocalInbox> {
        self.shared
            .inbox
            .lock()
            .ok()
            .and_then(|mut inbox| inbox.take())
            .map(|rx| LocalInbox { rx })
    }

    /// A sender workers use to reach the coordinator.
    pub fn upstream(&self) -> LocalUpstream {
        LocalUpstream {
            tx: self.shared.upstream.clone(),
            state: self.shared.state.subscribe(),
        }
    }

    /// The coordinator's fan-out sender.
    pub fn broadcaster(&self) -> LocalBroadcaster {
        LocalBroadcaster {
            tx: self.shared.downstream.clone(),
        }
    }

    /// A new worker-side receiver for coordinator broadcasts.
    pub fn subscribe(&self) -> LocalDownstream {
        LocalDownstream {
            rx: self.shared.downstream.subscribe(),
        }
    }
}

#[async_trait]
impl Session for LocalBus {
    async fn ready(&self) -> Result<(), TransportError> {
        let mut rx = self.shared.state.subscribe();
        let state = *rx
            .wait_for(|state| *state != SessionState::Opening)
            .await
            .map_err(|_| TransportError::Closed)?;
        match state {
            SessionState::Ready => Ok(()),
            _ => Err(TransportError::NotReady(
                "session closed before it became ready".to_string(),
            )),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.state.send_replace(SessionState::Closed);
        Ok(())
    }
}

/// Worker-side sender into the coordinator's inbox.
#[derive(Clone)]
pub struct LocalUpstream {
    tx: mpsc::Sender<Envelope>,
    state: watch::Receiver<SessionState>,
}

#[async_trait]
impl Upstream for LocalUpstream {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let state = *self.state.borrow();
        match state {
            SessionState::Ready => {}
            SessionState::Opening => {
                return Err(TransportError::NotReady("session still opening".to_string()));
            }
            SessionState::Closed => return Err(TransportError::Closed),
        }
        self.tx
            .send(envelope)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Coordinator-side fan-out to every subscribed worker.
#[derive(Clone)]
pub struct LocalBroadcaster {
    tx: broadcast::Sender<Envelope>,
}

#[async_trait]
impl Broadcaster for LocalBroadcaster {
    async fn broadcast(&self, envelope: Envelope) -> Result<(), TransportError> {
        // No subscribers yet is fine; workers relearn from traffic.
        let _ = self.tx.send(envelope);
        Ok(())
    }
}

/// The coordinator's inbox.
pub struct LocalInbox {
    rx: mpsc::Receiver<Envelope>,
}

#[async_trait]
impl Inbox for LocalInbox {
    async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

/// A worker's view of coordinator broadcasts.
pub struct LocalDownstream {
    rx: broadcast::Receiver<Envelope>,
}

#[async_trait]
impl Inbox for LocalDownstream {
    async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "broadcast receiver lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
