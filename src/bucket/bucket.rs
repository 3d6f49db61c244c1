// ABOUTME: RateLimitBucket - quota state for one bucket hash.
// ABOUTME: Pure time math over header-derived inputs, no I/O.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::HeaderSet;

/// Shortest sleep a gated caller takes, so a timeout that rounds to zero
/// cannot turn the wait loop into a spin.
pub const MIN_WAIT: Duration = Duration::from_millis(10);

/// Request limit of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketLimit {
    /// No response seen yet.
    Unknown,
    /// A response arrived without a usable limit header.
    Unbounded,
    /// The server's advertised limit.
    Count(u64),
}

/// Where a bucket sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketPhase {
    Unknown,
    Active,
    Limited,
}

/// Quota state for one bucket hash.
///
/// `remaining` and `retry_after` use -1 for "unknown". `reset_at` is epoch
/// milliseconds on the local clock, already corrected for server skew.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitBucket {
    pub id: String,
    pub hash: String,
    pub route: String,
    pub limit: BucketLimit,
    pub remaining: i64,
    pub reset_at: i64,
    pub retry_after: i64,
    pub last_updated: i64,
}

impl RateLimitBucket {
    /// Create a bucket with nothing known about it.
    pub fn new(hash: impl Into<String>, route: impl Into<String>, now: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            hash: hash.into(),
            route: route.into(),
            limit: BucketLimit::Unknown,
            remaining: -1,
            reset_at: now,
            retry_after: -1,
            last_updated: now,
        }
    }

    /// Fold one response's headers into the bucket.
    ///
    /// `special_interval` is `Some` for routes whose reset header is not
    /// trusted; the reset is then pinned to the server date plus that window.
    pub fn apply(&mut self, headers: &HeaderSet, now: i64, special_interval: Option<i64>) {
        let server_date = headers.server_date_ms();
        let offset = server_date.map(|date| date - now).unwrap_or(0);

        let reset_at = match special_interval {
            Some(interval) => server_date.unwrap_or(now) - offset + interval,
            None => headers.reset_ms().map(|reset| reset - offset).unwrap_or(now),
        };

        // The first real response sets the basis; afterwards reset only moves forward.
        self.reset_at = if self.limit == BucketLimit::Unknown {
            reset_at
        } else {
            self.reset_at.max(reset_at)
        };
        self.limit = headers
            .limit_value()
            .map(BucketLimit::Count)
            .unwrap_or(BucketLimit::Unbounded);
        self.remaining = headers.remaining_value();
        self.retry_after = headers.retry_after_ms();
        self.last_updated = now;
    }

    /// Whether a request right now would exceed the limit.
    pub fn limited(&self, now: i64, global_halt_until: i64) -> bool {
        global_halt_until > now || (self.remaining <= 0 && now < self.reset_at)
    }

    /// Milliseconds until the bucket resets, padded by `request_offset`.
    /// Negative once the window has passed.
    pub fn timeout(&self, now: i64, request_offset: i64) -> i64 {
        self.reset_at + request_offset - now
    }

    /// How long a caller should sleep before re-checking, or `None` when
    /// the request may go out now.
    pub fn wait_time(&self, now: i64, global_halt_until: i64, request_offset: i64) -> Option<Duration> {
        if !self.limited(now, global_halt_until) {
            return None;
        }
        let halt = global_halt_until - now;
        let bucket = if self.remaining <= 0 {
            self.timeout(now, request_offset)
        } else {
            0
        };
        let wait = halt.max(bucket).max(0) as u64;
        Some(Duration::from_millis(wait).max(MIN_WAIT))
    }

    /// Lifecycle phase, ignoring any global halt.
    pub fn phase(&self, now: i64) -> BucketPhase {
        if self.limit == BucketLimit::Unknown {
            BucketPhase::Unknown
        } else if self.limited(now, 0) {
            BucketPhase::Limited
        } else {
            BucketPhase::Active
        }
    }
}
