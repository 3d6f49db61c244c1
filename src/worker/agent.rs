// ABOUTME: WorkerAgent - gates a worker's outgoing requests on its bucket cache.
// ABOUTME: Forwards response headers upstream and applies coordinator broadcasts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{ApiBackend, ApiRequest, ApiResponse, RateLimitEvent};
use crate::bucket::{HeaderSet, MIN_WAIT};
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::{FleetError, RateLimitError};
use crate::protocol::{BucketState, Dispatcher, Envelope, GlobalHaltNotice, UpdateRatelimit};
use crate::registry::{BucketRegistry, RegistrySnapshot, RouteKey, UpdateOutcome};
use crate::transport::{Inbox, Upstream};

/// How many times a 429 is retried before it is handed back to the caller.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// The worker's local state: a disposable registry plus the events its
/// handlers produced since the last drain.
struct WorkerCache {
    registry: BucketRegistry,
    events: Vec<RateLimitEvent>,
}

impl WorkerCache {
    fn new(registry: BucketRegistry) -> Self {
        Self {
            registry,
            events: Vec::new(),
        }
    }

    fn record_migration(&mut self, outcome: &UpdateOutcome) {
        if let Some(migration) = &outcome.migration {
            self.events.push(RateLimitEvent::HashMigrated {
                route: migration.route.clone(),
                from: migration.from.clone(),
                to: migration.to.clone(),
            });
        }
        if let Some(until) = outcome.global_halt_until {
            self.events.push(RateLimitEvent::GlobalHalt { until });
        }
    }
}

/// Per-worker request gate.
///
/// The local cache is only ever locked for short synchronous sections;
/// sleeps and network calls happen with the lock released.
pub struct WorkerAgent {
    id: String,
    cache: Mutex<WorkerCache>,
    dispatcher: Dispatcher<WorkerCache>,
    upstream: Arc<dyn Upstream>,
    backend: Arc<dyn ApiBackend>,
    events: broadcast::Sender<RateLimitEvent>,
    max_retries: u32,
}

impl WorkerAgent {
    pub fn new(
        id: impl Into<String>,
        config: RateLimitConfig,
        upstream: Arc<dyn Upstream>,
        backend: Arc<dyn ApiBackend>,
    ) -> Self {
        Self::with_clock(id, config, Arc::new(SystemClock), upstream, backend)
    }

    pub fn with_clock(
        id: impl Into<String>,
        config: RateLimitConfig,
        clock: Arc<dyn Clock>,
        upstream: Arc<dyn Upstream>,
        backend: Arc<dyn ApiBackend>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            id: id.into(),
            cache: Mutex::new(WorkerCache::new(BucketRegistry::with_clock(config, clock))),
            dispatcher: Dispatcher::new()
                .on::<BucketState>(apply_bucket_state)
                .on::<GlobalHaltNotice>(apply_global_halt),
            upstream,
            backend,
            events,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Limit how many 429 responses are retried per call.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Diagnostics stream. Slow receivers miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<RateLimitEvent> {
        self.events.subscribe()
    }

    /// Wait until the local cache lets a request on this route go out.
    ///
    /// Admission takes a slot from the bucket, so concurrent callers on one
    /// worker cannot spend the same remaining request.
    pub async fn acquire(&self, method: &str, route: &str) {
        loop {
            let wait = self.cache.lock().await.registry.reserve(method, route);
            let Some(wait) = wait else {
                return;
            };
            tracing::debug!(worker = %self.id, %method, %route, ?wait, "rate limited, waiting");
            self.emit(RateLimitEvent::Limited {
                route: RouteKey::new(method, route),
                wait,
            });
            tokio::time::sleep(wait).await;
        }
    }

    /// Whether the local cache currently gates this route.
    pub async fn is_limited(&self, method: &str, route: &str) -> bool {
        self.cache.lock().await.registry.limited(method, route)
    }

    pub async fn global_halt_until(&self) -> i64 {
        self.cache.lock().await.registry.global_halt_until()
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.cache.lock().await.registry.snapshot()
    }

    /// Drop cached buckets idle longer than the inactivity TTL.
    pub async fn sweep(&self) -> usize {
        let mut cache = self.cache.lock().await;
        let ttl = cache.registry.config().inactive_ttl();
        cache.registry.sweep(ttl)
    }

    /// Apply one response's headers locally and forward them upstream.
    ///
    /// A failed forward is logged; the local cache already has the update and
    /// the coordinator relearns from the next response.
    pub async fn record_response(
        &self,
        method: &str,
        route: &str,
        headers: &HeaderSet,
    ) -> Result<UpdateOutcome, FleetError> {
        let (outcome, events) = {
            let mut cache = self.cache.lock().await;
            let outcome = cache.registry.update(method, route, Some(headers))?;
            cache.record_migration(&outcome);
            (outcome, std::mem::take(&mut cache.events))
        };
        for event in events {
            self.emit(event);
        }

        let envelope = Envelope::encode(&UpdateRatelimit::new(method, route, headers.clone()))?;
        if let Err(e) = self.upstream.send(envelope).await {
            tracing::warn!(worker = %self.id, error = %e, "failed to forward rate limit update");
        }
        Ok(outcome)
    }

    /// Send a request through the gate.
    ///
    /// A 429 is retried after its retry-after unless the response already
    /// left the bucket limited, in which case the gate does the waiting.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, FleetError> {
        if request.route.trim().is_empty() {
            return Err(RateLimitError::Validation("request has no route".to_string()).into());
        }
        let method = request.method.as_str().to_string();
        let mut retries = 0;

        loop {
            self.acquire(&method, &request.route).await;

            let response = self.backend.send(&request).await?;
            let outcome = self
                .record_response(&method, &request.route, &response.headers)
                .await?;

            if !response.is_rate_limited() || retries >= self.max_retries {
                return Ok(response);
            }
            retries += 1;

            if !self.is_limited(&method, &request.route).await {
                let wait = Duration::from_millis(outcome.bucket.retry_after.max(0) as u64).max(MIN_WAIT);
                tracing::warn!(
                    worker = %self.id,
                    %method,
                    route = %request.route,
                    ?wait,
                    retries,
                    "received 429, retrying"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Apply a coordinator broadcast to the local cache.
    pub async fn apply_broadcast(&self, envelope: &Envelope) -> Result<(), FleetError> {
        let events = {
            let mut cache = self.cache.lock().await;
            self.dispatcher.dispatch(&mut *cache, envelope)?;
            std::mem::take(&mut cache.events)
        };
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    /// Apply broadcasts from `downstream` until it closes, sweeping the
    /// cache on the configured cadence in between.
    pub fn spawn_listener<I>(self: &Arc<Self>, mut downstream: I) -> JoinHandle<()>
    where
        I: Inbox + 'static,
    {
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let period = agent.cache.lock().await.registry.config().sweep_period();
            let mut sweep = tokio::time::interval(period);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick is immediate
            sweep.tick().await;

            loop {
                tokio::select! {
                    message = downstream.recv() => match message {
                        Some(envelope) => {
                            if let Err(e) = agent.apply_broadcast(&envelope).await {
                                tracing::warn!(worker = %agent.id, op = %envelope.op, error = %e, "dropping broadcast");
                            }
                        }
                        None => break,
                    },
                    _ = sweep.tick() => {
                        agent.sweep().await;
                    }
                }
            }
            tracing::debug!(worker = %agent.id, "downstream closed");
        })
    }

    fn emit(&self, event: RateLimitEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

fn apply_bucket_state(cache: &mut WorkerCache, envelope: &Envelope) -> Result<Vec<Envelope>, FleetError> {
    let state: BucketState = envelope.decode()?;
    if let Some(key) = state.route_key() {
        // learning a route for the first time is not a migration
        let current = cache
            .registry
            .hash_for(&key.method, &key.route)
            .filter(|current| *current != state.hash);
        if let Some(current) = current {
            let from = Some(current.to_string());
            cache.events.push(RateLimitEvent::HashMigrated {
                route: key,
                from,
                to: state.hash.clone(),
            });
        }
    }
    cache.registry.apply_state(&state);
    Ok(Vec::new())
}

fn apply_global_halt(cache: &mut WorkerCache, envelope: &Envelope) -> Result<Vec<Envelope>, FleetError> {
    let notice: GlobalHaltNotice = envelope.decode()?;
    cache.registry.set_global_halt_until(notice.until);
    cache.events.push(RateLimitEvent::GlobalHalt {
        until: notice.until,
    });
    Ok(Vec::new())
}
