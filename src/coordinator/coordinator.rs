// ABOUTME: Coordinator - the one process holding authoritative bucket state.
// ABOUTME: Applies worker updates in arrival order and broadcasts the results.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::FleetError;
use crate::protocol::{BucketState, Dispatcher, Envelope, GlobalHaltNotice, UpdateRatelimit};
use crate::registry::BucketRegistry;
use crate::transport::{Broadcaster, Inbox, Session};

/// Authoritative rate-limit state for the fleet.
///
/// The coordinator owns its registry outright and processes one message at
/// a time, so the registry needs no locking. Handlers get the registry
/// passed in; nothing is reached through globals.
pub struct Coordinator {
    registry: BucketRegistry,
    dispatcher: Dispatcher<BucketRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl Coordinator {
    /// Wrap an existing registry.
    pub fn new(registry: BucketRegistry, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            registry,
            dispatcher: Dispatcher::new().on::<UpdateRatelimit>(handle_update),
            broadcaster,
        }
    }

    /// Start configuring a coordinator that replaces a previous session.
    pub fn builder(config: RateLimitConfig) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    pub fn registry(&self) -> &BucketRegistry {
        &self.registry
    }

    /// Handle one inbound message and broadcast whatever it produced.
    ///
    /// Bad messages are logged and dropped; they never stop the loop.
    pub async fn handle(&mut self, envelope: &Envelope) {
        let outgoing = match self.dispatcher.dispatch(&mut self.registry, envelope) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                tracing::warn!(op = %envelope.op, error = %e, "dropping message");
                return;
            }
        };

        for message in outgoing {
            if let Err(e) = self.broadcaster.broadcast(message).await {
                tracing::warn!(error = %e, "broadcast failed");
            }
        }
    }

    /// Remove buckets idle longer than the configured inactivity TTL.
    pub fn sweep(&mut self) -> usize {
        let ttl = self.registry.config().inactive_ttl();
        self.registry.sweep(ttl)
    }

    /// Process messages until the inbox closes or `shutdown` fires.
    /// Returns the coordinator so its final state can be inspected.
    pub async fn run<I: Inbox>(mut self, mut inbox: I, mut shutdown: oneshot::Receiver<()>) -> Self {
        let mut sweep = tokio::time::interval(self.registry.config().sweep_period());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick is immediate
        sweep.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                message = inbox.recv() => match message {
                    Some(envelope) => self.handle(&envelope).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    self.sweep();
                }
            }
        }

        tracing::info!(buckets = self.registry.len(), "coordinator stopped");
        self
    }
}

fn handle_update(
    registry: &mut BucketRegistry,
    envelope: &Envelope,
) -> Result<Vec<Envelope>, FleetError> {
    let update: UpdateRatelimit = envelope.decode()?;
    let outcome = registry.update(&update.method, &update.route, update.headers.as_ref())?;

    if let Some(migration) = &outcome.migration {
        tracing::info!(
            route = %migration.route,
            from = ?migration.from,
            to = %migration.to,
            "bucket hash changed"
        );
    }

    let mut outgoing = vec![Envelope::encode(&BucketState::from_bucket(
        &outcome.bucket,
        Some(&outcome.route),
    ))?];

    if let Some(until) = outcome.global_halt_until {
        tracing::warn!(route = %outcome.route, until, "global rate limit hit, halting fleet");
        outgoing.push(Envelope::encode(&GlobalHaltNotice { until })?);
    }

    Ok(outgoing)
}

/// Running coordinator task. Dropping the handle stops the coordinator.
pub struct CoordinatorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Coordinator>,
}

impl CoordinatorHandle {
    /// Ask the loop to stop and wait for it.
    pub async fn shutdown(mut self) -> Result<Coordinator, tokio::task::JoinError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await
    }

    /// Wait for the loop to end on its own, when its inbox closes.
    pub async fn join(mut self) -> Result<Coordinator, tokio::task::JoinError> {
        // keep the shutdown sender alive so only the inbox can end the loop
        let _shutdown = self.shutdown.take();
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Startup sequence for the coordinator role.
///
/// The previous session (if any) is closed first, then the new session's
/// readiness is awaited, and only then is the registry built and the loop
/// spawned. Workers therefore never reach a registry over a stale session.
pub struct CoordinatorBuilder {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    previous: Option<Arc<dyn Session>>,
    session: Option<Arc<dyn Session>>,
}

impl CoordinatorBuilder {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            previous: None,
            session: None,
        }
    }

    /// Use a custom clock for the registry.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The session being replaced. It is closed before anything else.
    pub fn replace(mut self, previous: Arc<dyn Session>) -> Self {
        self.previous = Some(previous);
        self
    }

    /// The rate-limit-aware session the coordinator will serve on.
    pub fn session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Run the startup sequence and spawn the coordinator loop.
    pub async fn start<I>(
        self,
        inbox: I,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<CoordinatorHandle, FleetError>
    where
        I: Inbox + 'static,
    {
        if let Some(previous) = &self.previous {
            previous.close().await?;
            tracing::debug!("previous session closed");
        }
        if let Some(session) = &self.session {
            session.ready().await?;
            tracing::debug!("session ready");
        }

        let registry = BucketRegistry::with_clock(self.config, self.clock);
        let coordinator = Coordinator::new(registry, broadcaster);
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(coordinator.run(inbox, rx));
        tracing::info!("coordinator started");

        Ok(CoordinatorHandle {
            shutdown: Some(tx),
            task,
        })
    }
}
