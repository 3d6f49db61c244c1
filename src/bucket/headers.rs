// ABOUTME: HeaderSet - the rate-limit headers observed on one API response.
// ABOUTME: Keeps raw header text and converts it to numbers on demand.

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

/// Response header carrying the server's clock.
pub const HEADER_DATE: &str = "date";
/// Response header carrying the bucket's request limit.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// Response header carrying the requests left in the window.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// Response header carrying the window reset as epoch seconds.
pub const HEADER_RESET: &str = "x-ratelimit-reset";
/// Response header carrying the bucket hash.
pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
/// Response header carrying the retry delay in seconds.
pub const HEADER_RETRY_AFTER: &str = "retry-after";
/// Response header flagging a global limit.
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";

/// Rate-limit headers from a single response.
///
/// Values are kept as the server sent them; the numeric accessors apply the
/// fallbacks the bucket math relies on (unbounded limit, unknown remaining).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
    #[serde(default)]
    pub global: bool,
}

impl HeaderSet {
    /// Create an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the rate-limit headers from an HTTP response.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };

        Self {
            date: text(HEADER_DATE),
            limit: text(HEADER_LIMIT),
            remaining: text(HEADER_REMAINING),
            reset: text(HEADER_RESET),
            hash: text(HEADER_BUCKET),
            retry_after: text(HEADER_RETRY_AFTER),
            global: text(HEADER_GLOBAL)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Set the server date from epoch milliseconds.
    pub fn date(mut self, epoch_ms: i64) -> Self {
        self.date = chrono::DateTime::from_timestamp_millis(epoch_ms).map(|d| d.to_rfc2822());
        self
    }

    /// Set the request limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit.to_string());
        self
    }

    /// Set the remaining count.
    pub fn remaining(mut self, remaining: i64) -> Self {
        self.remaining = Some(remaining.to_string());
        self
    }

    /// Set the reset time in epoch seconds.
    pub fn reset(mut self, epoch_secs: f64) -> Self {
        self.reset = Some(epoch_secs.to_string());
        self
    }

    /// Set the bucket hash.
    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Set the retry delay in seconds.
    pub fn retry_after(mut self, secs: f64) -> Self {
        self.retry_after = Some(secs.to_string());
        self
    }

    /// Flag the response as a global limit.
    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Server date in epoch milliseconds, if present and parseable.
    pub fn server_date_ms(&self) -> Option<i64> {
        let date = self.date.as_deref()?;
        chrono::DateTime::parse_from_rfc2822(date)
            .ok()
            .map(|d| d.timestamp_millis())
    }

    /// Request limit, or `None` when absent or non-numeric.
    pub fn limit_value(&self) -> Option<u64> {
        self.limit.as_deref()?.parse().ok()
    }

    /// Remaining count, or -1 when unknown.
    pub fn remaining_value(&self) -> i64 {
        self.remaining
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .map(|v| v.max(-1))
            .unwrap_or(-1)
    }

    /// Reset time in epoch milliseconds, as the server's clock sees it.
    pub fn reset_ms(&self) -> Option<i64> {
        seconds_to_ms(self.reset.as_deref()?)
    }

    /// Retry delay in milliseconds, or -1 when absent.
    ///
    /// The header is in seconds; everything downstream is milliseconds.
    pub fn retry_after_ms(&self) -> i64 {
        self.retry_after
            .as_deref()
            .and_then(seconds_to_ms)
            .unwrap_or(-1)
    }
}

fn seconds_to_ms(value: &str) -> Option<i64> {
    let secs: f64 = value.parse().ok()?;
    secs.is_finite().then(|| (secs * 1000.0).round() as i64)
}
