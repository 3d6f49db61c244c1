// ABOUTME: Tests for the coordinator - dispatch, broadcasts, startup ordering.
// ABOUTME: Uses a recording broadcaster and the in-process LocalBus.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::bucket::HeaderSet;
use crate::clock::{Clock, ManualClock};
use crate::config::RateLimitConfig;
use crate::error::{FleetError, TransportError};
use crate::protocol::{BucketState, Envelope, GlobalHaltNotice, UpdateRatelimit};
use crate::registry::BucketRegistry;
use crate::transport::{Broadcaster, Inbox, LocalBus, Session, Upstream};

const NOW: i64 = 1_700_000_000_000;

#[derive(Default)]
struct RecordingBroadcaster {
    sent: Mutex<Vec<Envelope>>,
}

impl RecordingBroadcaster {
    fn ops(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|e| e.op.clone()).collect()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

fn coordinator() -> (Coordinator, Arc<RecordingBroadcaster>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(NOW));
    let registry = BucketRegistry::with_clock(RateLimitConfig::default(), clock.clone());
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    (Coordinator::new(registry, broadcaster.clone()), broadcaster, clock)
}

fn update(clock: &ManualClock, hash: &str, remaining: i64) -> Envelope {
    let headers = HeaderSet::new()
        .date(clock.now_ms())
        .limit(5)
        .remaining(remaining)
        .reset(((clock.now_ms() + 2_000) / 1000) as f64)
        .hash(hash);
    Envelope::encode(&UpdateRatelimit::new("GET", "/channels/1/messages", headers)).unwrap()
}

#[tokio::test]
async fn test_update_broadcasts_bucket_state() {
    let (mut coordinator, broadcaster, clock) = coordinator();

    coordinator.handle(&update(&clock, "h1", 0)).await;

    let sent = broadcaster.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let state: BucketState = sent[0].decode().unwrap();
    assert_eq!(state.hash, "h1");
    assert_eq!(state.remaining, 0);
    assert_eq!(state.reset_at, NOW + 2_000);
    assert_eq!(state.route.as_deref(), Some("/channels/1/messages"));
    assert!(coordinator.registry().limited("GET", "/channels/1/messages"));
}

#[tokio::test]
async fn test_unknown_op_leaves_registry_untouched() {
    let (mut coordinator, broadcaster, clock) = coordinator();
    coordinator.handle(&update(&clock, "h1", 3)).await;
    let before = serde_json::to_string(&coordinator.registry().snapshot()).unwrap();

    let unknown = Envelope::from_json(r#"{"op":"shard_spawned","route":"/x","hash":"h9"}"#).unwrap();
    coordinator.handle(&unknown).await;

    let after = serde_json::to_string(&coordinator.registry().snapshot()).unwrap();
    assert_eq!(before, after);
    assert_eq!(broadcaster.ops(), vec!["bucket_state"]);
}

#[tokio::test]
async fn test_invalid_updates_are_dropped() {
    let (mut coordinator, broadcaster, clock) = coordinator();

    let no_headers = Envelope::from_json(r#"{"op":"update_ratelimit","method":"GET","route":"/a"}"#)
        .unwrap();
    let malformed = Envelope::from_json(r#"{"op":"update_ratelimit","headers":"nope"}"#).unwrap();
    coordinator.handle(&no_headers).await;
    coordinator.handle(&malformed).await;

    assert!(coordinator.registry().is_empty());
    assert!(broadcaster.ops().is_empty());

    // the coordinator keeps serving afterwards
    coordinator.handle(&update(&clock, "h1", 3)).await;
    assert_eq!(coordinator.registry().len(), 1);
}

#[tokio::test]
async fn test_global_update_broadcasts_halt() {
    let (mut coordinator, broadcaster, clock) = coordinator();
    let headers = HeaderSet::new().date(NOW).retry_after(2.0).global(true);
    let envelope = Envelope::encode(&UpdateRatelimit::new("POST", "/guilds", headers)).unwrap();

    coordinator.handle(&envelope).await;

    assert_eq!(broadcaster.ops(), vec!["bucket_state", "global_halt"]);
    let sent = broadcaster.sent.lock().unwrap().clone();
    let notice: GlobalHaltNotice = sent[1].decode().unwrap();
    assert_eq!(notice.until, clock.now_ms() + 2_000);
    assert_eq!(coordinator.registry().global_halt_until(), notice.until);
}

#[tokio::test]
async fn test_hash_migration_through_coordinator() {
    let (mut coordinator, _, clock) = coordinator();

    coordinator.handle(&update(&clock, "h1", 4)).await;
    coordinator.handle(&update(&clock, "h2", 2)).await;

    let registry = coordinator.registry();
    assert_eq!(registry.hash_for("GET", "/channels/1/messages"), Some("h2"));
    assert_eq!(registry.bucket("h2").unwrap().remaining, 2);
    assert_eq!(registry.bucket("h1").unwrap().remaining, 4);
}

#[tokio::test]
async fn test_sweep_uses_inactive_timeout() {
    let (mut coordinator, _, clock) = coordinator();
    coordinator.handle(&update(&clock, "h1", 4)).await;

    clock.advance(Duration::from_millis(240_001));
    assert_eq!(coordinator.sweep(), 1);
    assert!(coordinator.registry().is_empty());
}

#[tokio::test]
async fn test_run_loop_over_local_bus() {
    let bus = LocalBus::new(16);
    let mut downstream = bus.subscribe();
    let handle = Coordinator::builder(RateLimitConfig::default())
        .session(Arc::new(bus.clone()))
        .start(bus.take_inbox().unwrap(), Arc::new(bus.broadcaster()))
        .await
        .unwrap();

    let headers = HeaderSet::new().limit(5).remaining(4).hash("h1");
    bus.upstream()
        .send(Envelope::encode(&UpdateRatelimit::new("GET", "/users/@me", headers)).unwrap())
        .await
        .unwrap();

    let broadcast = downstream.recv().await.unwrap();
    assert!(broadcast.is::<BucketState>());

    let coordinator = handle.shutdown().await.unwrap();
    assert_eq!(coordinator.registry().hash_for("GET", "/users/@me"), Some("h1"));
}

#[tokio::test]
async fn test_run_loop_sweeps_periodically() {
    let bus = LocalBus::new(16);
    let config = RateLimitConfig::new()
        .inactive_timeout(Duration::from_millis(10))
        .sweep_interval(Duration::from_millis(20));
    let handle = Coordinator::builder(config)
        .start(bus.take_inbox().unwrap(), Arc::new(bus.broadcaster()))
        .await
        .unwrap();

    let headers = HeaderSet::new().limit(5).remaining(4).hash("h1");
    bus.upstream()
        .send(Envelope::encode(&UpdateRatelimit::new("GET", "/gateway", headers)).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let coordinator = handle.shutdown().await.unwrap();
    assert!(coordinator.registry().is_empty());
}

/// Session that records when it is closed and becomes ready after a delay.
struct ScriptedSession {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    ready_after: Duration,
    fail: bool,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn ready(&self) -> Result<(), TransportError> {
        tokio::time::sleep(self.ready_after).await;
        if self.fail {
            return Err(TransportError::NotReady(self.name.to_string()));
        }
        self.log.lock().unwrap().push(format!("{} ready", self.name));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.log.lock().unwrap().push(format!("{} closed", self.name));
        Ok(())
    }
}

#[tokio::test]
async fn test_startup_closes_previous_then_waits_for_ready() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let previous = ScriptedSession {
        name: "default",
        log: log.clone(),
        ready_after: Duration::ZERO,
        fail: false,
    };
    let next = ScriptedSession {
        name: "ratelimit",
        log: log.clone(),
        ready_after: Duration::from_millis(40),
        fail: false,
    };
    let bus = LocalBus::new(4);

    let handle = Coordinator::builder(RateLimitConfig::default())
        .replace(Arc::new(previous))
        .session(Arc::new(next))
        .start(bus.take_inbox().unwrap(), Arc::new(bus.broadcaster()))
        .await
        .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["default closed".to_string(), "ratelimit ready".to_string()]
    );
    assert!(!handle.is_finished());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_startup_fails_when_session_never_ready() {
    let bus = LocalBus::new(4);
    let session = ScriptedSession {
        name: "broken",
        log: Arc::new(Mutex::new(Vec::new())),
        ready_after: Duration::ZERO,
        fail: true,
    };

    let result = Coordinator::builder(RateLimitConfig::default())
        .session(Arc::new(session))
        .start(bus.take_inbox().unwrap(), Arc::new(bus.broadcaster()))
        .await;

    assert!(matches!(
        result,
        Err(FleetError::Transport(TransportError::NotReady(_)))
    ));
}

#[tokio::test]
async fn test_shutdown_stops_idle_loop() {
    struct Never;

    #[async_trait]
    impl Inbox for Never {
        async fn recv(&mut self) -> Option<Envelope> {
            std::future::pending().await
        }
    }

    let handle = Coordinator::builder(RateLimitConfig::default())
        .start(Never, Arc::new(RecordingBroadcaster::default()))
        .await
        .unwrap();

    let coordinator = tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("loop should stop")
        .unwrap();
    assert!(coordinator.registry().is_empty());
}

#[tokio::test]
async fn test_join_returns_when_inbox_closes() {
    let bus = LocalBus::new(4);
    let inbox = bus.take_inbox().unwrap();
    let broadcaster = Arc::new(bus.broadcaster());
    let handle = Coordinator::builder(RateLimitConfig::default())
        .start(inbox, broadcaster)
        .await
        .unwrap();

    // the bus holds the last upstream sender
    drop(bus);

    let coordinator = tokio::time::timeout(Duration::from_secs(1), handle.join())
        .await
        .expect("loop should end with its inbox")
        .unwrap();
    assert!(coordinator.registry().is_empty());
}
