// ABOUTME: BucketRegistry - route→hash and hash→bucket maps plus the global halt.
// ABOUTME: Single writer; callers hold it by value or behind their own lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::GlobalHalt;
use crate::bucket::{HeaderSet, RateLimitBucket};
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::RateLimitError;
use crate::protocol::BucketState;

/// Prefix of the hash a route uses before the server has named its bucket.
pub const PROVISIONAL_PREFIX: &str = "unlimited:";

/// An HTTP method plus route template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub method: String,
    pub route: String,
}

impl RouteKey {
    /// Create a key. The method is upper-cased.
    pub fn new(method: impl AsRef<str>, route: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            route: route.into(),
        }
    }

    /// The hash used until the server reports a real one.
    pub fn provisional_hash(&self) -> String {
        format!("{}{}:{}", PROVISIONAL_PREFIX, self.method, self.route)
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.route)
    }
}

/// A route moving from one bucket hash to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMigration {
    pub route: RouteKey,
    /// The hash recorded before, if the route was known.
    pub from: Option<String>,
    pub to: String,
}

/// What a single `update` did.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub route: RouteKey,
    pub hash: String,
    /// The bucket after the update.
    pub bucket: RateLimitBucket,
    pub migration: Option<HashMigration>,
    /// Set when the response signalled a global limit.
    pub global_halt_until: Option<i64>,
}

/// Deterministic view of the registry, for comparisons and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub routes: BTreeMap<String, String>,
    pub buckets: BTreeMap<String, RateLimitBucket>,
    pub global_halt_until: i64,
}

/// Rate-limit state for every route this process has seen.
///
/// The coordinator's instance is authoritative. Workers keep their own as a
/// cache that is refreshed by their responses and by coordinator broadcasts.
pub struct BucketRegistry {
    routes: HashMap<RouteKey, String>,
    buckets: HashMap<String, RateLimitBucket>,
    global: GlobalHalt,
    special_routes: Vec<glob::Pattern>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl BucketRegistry {
    /// Create an empty registry on the system clock.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty registry on a custom clock.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let special_routes = config
            .special_routes
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(%pattern, error = %e, "ignoring invalid special route pattern");
                    None
                }
            })
            .collect();

        Self {
            routes: HashMap::new(),
            buckets: HashMap::new(),
            global: GlobalHalt::new(Arc::clone(&clock)),
            special_routes,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether `route` gets the special reset computation.
    pub fn is_special_route(&self, route: &str) -> bool {
        self.special_routes.iter().any(|p| p.matches(route))
    }

    /// The hash a route is currently mapped to.
    pub fn hash_for(&self, method: &str, route: &str) -> Option<&str> {
        self.routes
            .get(&RouteKey::new(method, route))
            .map(String::as_str)
    }

    /// Look up a bucket by hash.
    pub fn bucket(&self, hash: &str) -> Option<&RateLimitBucket> {
        self.buckets.get(hash)
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of route mappings.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// The bucket for a route, created empty if the route is new.
    pub fn get_or_create(&mut self, method: &str, route: &str) -> &RateLimitBucket {
        self.entry(method, route)
    }

    fn entry(&mut self, method: &str, route: &str) -> &mut RateLimitBucket {
        let key = RouteKey::new(method, route);
        let now = self.clock.now_ms();
        let hash = self
            .routes
            .entry(key.clone())
            .or_insert_with(|| key.provisional_hash())
            .clone();
        self.buckets
            .entry(hash.clone())
            .or_insert_with(|| RateLimitBucket::new(hash, key.route, now))
    }

    /// Apply the headers of one response for `method route`.
    pub fn update(
        &mut self,
        method: &str,
        route: &str,
        headers: Option<&HeaderSet>,
    ) -> Result<UpdateOutcome, RateLimitError> {
        if method.trim().is_empty() || route.trim().is_empty() {
            return Err(RateLimitError::Validation(
                "update requires a method and route".to_string(),
            ));
        }
        let headers = headers
            .ok_or_else(|| RateLimitError::Validation("update requires a header set".to_string()))?;

        let key = RouteKey::new(method, route);
        let now = self.clock.now_ms();
        let recorded = self.routes.get(&key).cloned();

        let mut migration = None;
        let hash = match (headers.hash.as_deref(), recorded) {
            (Some(new), Some(current)) if new == current => current,
            (Some(new), from) => {
                migration = Some(HashMigration {
                    route: key.clone(),
                    from,
                    to: new.to_string(),
                });
                new.to_string()
            }
            (None, Some(current)) => current,
            (None, None) => key.provisional_hash(),
        };
        self.routes.insert(key.clone(), hash.clone());

        let special_interval = self
            .is_special_route(&key.route)
            .then_some(self.config.special_route_interval as i64);
        let bucket = self
            .buckets
            .entry(hash.clone())
            .or_insert_with(|| RateLimitBucket::new(hash.clone(), key.route.clone(), now));
        bucket.apply(headers, now, special_interval);
        let bucket = bucket.clone();

        // retry_after is the header's seconds already scaled to ms
        let global_halt_until = headers
            .global
            .then(|| self.global.halt_for(bucket.retry_after));

        Ok(UpdateOutcome {
            route: key,
            hash,
            bucket,
            migration,
            global_halt_until,
        })
    }

    /// Overwrite a bucket with values broadcast by the coordinator.
    pub fn apply_state(&mut self, state: &BucketState) {
        let now = self.clock.now_ms();
        let key = state.route_key();
        if let Some(key) = &key {
            self.routes.insert(key.clone(), state.hash.clone());
        }
        let route = key.map(|k| k.route).unwrap_or_default();
        let bucket = self
            .buckets
            .entry(state.hash.clone())
            .or_insert_with(|| RateLimitBucket::new(state.hash.clone(), route, now));
        bucket.limit = state.limit;
        bucket.remaining = state.remaining.max(-1);
        bucket.reset_at = state.reset_at;
        bucket.last_updated = now;
    }

    /// Halt every bucket for `duration_ms`. Returns the halt timestamp.
    pub fn set_global_halt(&mut self, duration_ms: i64) -> i64 {
        self.global.halt_for(duration_ms)
    }

    /// Halt every bucket until an absolute timestamp.
    pub fn set_global_halt_until(&mut self, until: i64) {
        self.global.halt_until(until);
    }

    /// Raw halt timestamp (0 when inactive).
    pub fn global_halt_until(&self) -> i64 {
        self.global.until()
    }

    /// Whether a request on this route must wait. Does not create a bucket.
    pub fn limited(&self, method: &str, route: &str) -> bool {
        let now = self.clock.now_ms();
        match self.lookup(method, route) {
            Some(bucket) => bucket.limited(now, self.global.until()),
            None => self.global.is_active(),
        }
    }

    /// How long a request on this route must wait, if at all.
    pub fn wait_time(&mut self, method: &str, route: &str) -> Option<Duration> {
        let now = self.clock.now_ms();
        let halt = self.global.until();
        let offset = self.config.request_offset as i64;
        self.get_or_create(method, route).wait_time(now, halt, offset)
    }

    /// Like `wait_time`, but a request admitted now also takes one of the
    /// bucket's remaining slots, so the next caller sees the reduced count
    /// before the response arrives. An unknown remaining (-1) is left alone.
    pub fn reserve(&mut self, method: &str, route: &str) -> Option<Duration> {
        let now = self.clock.now_ms();
        let halt = self.global.until();
        let offset = self.config.request_offset as i64;
        let bucket = self.entry(method, route);
        let wait = bucket.wait_time(now, halt, offset);
        if wait.is_none() && bucket.remaining > 0 {
            bucket.remaining -= 1;
        }
        wait
    }

    /// Drop buckets not updated within `ttl`, and routes pointing at them.
    /// Returns how many buckets were removed.
    pub fn sweep(&mut self, ttl: Duration) -> usize {
        let cutoff = self.clock.now_ms() - ttl.as_millis() as i64;
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.last_updated >= cutoff);
        let buckets = &self.buckets;
        self.routes.retain(|_, hash| buckets.contains_key(hash));

        let removed = before - self.buckets.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.buckets.len(), "swept inactive buckets");
        }
        removed
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            routes: self
                .routes
                .iter()
                .map(|(key, hash)| (key.to_string(), hash.clone()))
                .collect(),
            buckets: self
                .buckets
                .iter()
                .map(|(hash, bucket)| (hash.clone(), bucket.clone()))
                .collect(),
            global_halt_until: self.global.until(),
        }
    }

    fn lookup(&self, method: &str, route: &str) -> Option<&RateLimitBucket> {
        let key = RouteKey::new(method, route);
        let hash = self
            .routes
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.provisional_hash());
        self.buckets.get(&hash)
    }
}
