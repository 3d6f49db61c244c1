// ABOUTME: Tests for envelopes, typed operations, and the dispatcher.
// ABOUTME: Checks the flat wire shape and forward-compatible dispatch.

use serde_json::json;

use super::*;
use crate::bucket::{BucketLimit, HeaderSet};
use crate::error::{FleetError, RateLimitError};

#[test]
fn test_update_wire_shape() {
    let update = UpdateRatelimit::new(
        "GET",
        "/guilds/1",
        HeaderSet::new().limit(5).remaining(4).hash("h1").global(false),
    );

    let json = serde_json::to_value(Envelope::encode(&update).unwrap()).unwrap();

    assert_eq!(json["op"], "update_ratelimit");
    assert_eq!(json["method"], "GET");
    assert_eq!(json["route"], "/guilds/1");
    assert_eq!(json["headers"]["limit"], "5");
    assert_eq!(json["headers"]["hash"], "h1");
    assert_eq!(json["headers"]["global"], false);
}

#[test]
fn test_bucket_state_uses_reset_at_key() {
    let state = BucketState {
        hash: "h1".to_string(),
        limit: BucketLimit::Count(5),
        remaining: 0,
        reset_at: 1_700_000_002_000,
        method: None,
        route: None,
    };

    let json = Envelope::encode(&state).unwrap().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["op"], "bucket_state");
    assert_eq!(value["resetAt"], 1_700_000_002_000i64);
    assert!(value.get("route").is_none());
}

#[test]
fn test_envelope_from_flat_json() {
    let envelope = Envelope::from_json(r#"{"op":"global_halt","until":42}"#).unwrap();

    assert!(envelope.is::<GlobalHaltNotice>());
    assert!(!envelope.is::<BucketState>());
    assert_eq!(envelope.decode::<GlobalHaltNotice>().unwrap().until, 42);
}

#[test]
fn test_decode_missing_fields_is_malformed() {
    let envelope = Envelope::from_json(r#"{"op":"global_halt"}"#).unwrap();
    let err = envelope.decode::<GlobalHaltNotice>().unwrap_err();
    assert!(matches!(err, RateLimitError::Malformed { ref op, .. } if op == "global_halt"));
}

#[test]
fn test_update_tolerates_missing_context() {
    // Validation of missing context happens in the registry, not the decoder.
    let envelope = Envelope::from_json(r#"{"op":"update_ratelimit"}"#).unwrap();
    let update: UpdateRatelimit = envelope.decode().unwrap();
    assert!(update.method.is_empty());
    assert!(update.headers.is_none());
}

#[derive(Default)]
struct Counter {
    halts: Vec<i64>,
}

fn count_halt(state: &mut Counter, envelope: &Envelope) -> Result<Vec<Envelope>, FleetError> {
    let notice: GlobalHaltNotice = envelope.decode()?;
    state.halts.push(notice.until);
    Ok(vec![envelope.clone()])
}

#[test]
fn test_dispatch_known_op() {
    let dispatcher: Dispatcher<Counter> = Dispatcher::new().on::<GlobalHaltNotice>(count_halt);
    let mut state = Counter::default();
    let envelope = Envelope::encode(&GlobalHaltNotice { until: 7 }).unwrap();

    let out = dispatcher.dispatch(&mut state, &envelope).unwrap();

    assert_eq!(state.halts, vec![7]);
    assert_eq!(out.len(), 1);
    assert!(dispatcher.handles("global_halt"));
}

#[test]
fn test_dispatch_unknown_op_is_noop() {
    let dispatcher: Dispatcher<Counter> = Dispatcher::new().on::<GlobalHaltNotice>(count_halt);
    let mut state = Counter::default();
    let envelope = Envelope::from_json(&json!({"op": "shard_ready", "until": 1}).to_string()).unwrap();

    let out = dispatcher.dispatch(&mut state, &envelope).unwrap();

    assert!(out.is_empty());
    assert!(state.halts.is_empty());
    assert!(!dispatcher.handles("shard_ready"));
}

#[test]
fn test_dispatch_surfaces_malformed_payload() {
    let dispatcher: Dispatcher<Counter> = Dispatcher::new().on::<GlobalHaltNotice>(count_halt);
    let mut state = Counter::default();
    let envelope = Envelope::from_json(r#"{"op":"global_halt","until":"soon"}"#).unwrap();

    let err = dispatcher.dispatch(&mut state, &envelope).unwrap_err();
    assert!(matches!(err, FleetError::RateLimit(RateLimitError::Malformed { .. })));
}
