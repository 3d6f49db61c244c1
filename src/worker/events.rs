// ABOUTME: RateLimitEvent - diagnostics a worker emits as limits change.
// ABOUTME: Observability only; nothing in the crate reacts to them.

use std::time::Duration;

use crate::registry::RouteKey;

/// Something a worker noticed about the fleet's limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitEvent {
    /// A route now maps to a different bucket hash.
    HashMigrated {
        route: RouteKey,
        from: Option<String>,
        to: String,
    },
    /// Every request is held until `until` (epoch ms).
    GlobalHalt { until: i64 },
    /// A caller is about to wait before sending on `route`.
    Limited { route: RouteKey, wait: Duration },
}
