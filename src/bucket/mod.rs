// ABOUTME: Bucket module - per-hash quota state and the headers that feed it.
// ABOUTME: Everything here is pure; the registry owns instances.

mod bucket;
mod headers;

pub use bucket::{BucketLimit, BucketPhase, MIN_WAIT, RateLimitBucket};
pub use headers::*;
