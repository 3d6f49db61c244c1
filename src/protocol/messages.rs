// ABOUTME: The typed operations exchanged by workers and the coordinator.
// ABOUTME: update_ratelimit flows up, bucket_state and global_halt flow down.

use serde::{Deserialize, Serialize};

use super::Operation;
use crate::bucket::{BucketLimit, HeaderSet, RateLimitBucket};
use crate::registry::RouteKey;

/// Worker → coordinator: headers observed on a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRatelimit {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderSet>,
}

impl UpdateRatelimit {
    pub fn new(method: impl Into<String>, route: impl Into<String>, headers: HeaderSet) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            headers: Some(headers),
        }
    }
}

impl Operation for UpdateRatelimit {
    const OP: &'static str = "update_ratelimit";
}

/// Coordinator → workers: authoritative values for one bucket.
///
/// `method` and `route` name the route whose response produced the state,
/// so workers that never called it can map it to the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketState {
    pub hash: String,
    pub limit: BucketLimit,
    pub remaining: i64,
    pub reset_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

impl BucketState {
    /// State of `bucket`, attributed to `key`.
    pub fn from_bucket(bucket: &RateLimitBucket, key: Option<&RouteKey>) -> Self {
        Self {
            hash: bucket.hash.clone(),
            limit: bucket.limit,
            remaining: bucket.remaining,
            reset_at: bucket.reset_at,
            method: key.map(|k| k.method.clone()),
            route: key.map(|k| k.route.clone()),
        }
    }

    /// The route this state is attributed to, when both halves are present.
    pub fn route_key(&self) -> Option<RouteKey> {
        match (&self.method, &self.route) {
            (Some(method), Some(route)) => Some(RouteKey::new(method, route)),
            _ => None,
        }
    }
}

impl Operation for BucketState {
    const OP: &'static str = "bucket_state";
}

/// Coordinator → workers: every bucket is limited until `until` (epoch ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalHaltNotice {
    pub until: i64,
}

impl Operation for GlobalHaltNotice {
    const OP: &'static str = "global_halt";
}
