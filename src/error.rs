// ABOUTME: Defines all error types for the fleetgate library using thiserror.
// ABOUTME: Each submodule has its own error enum, unified under FleetError.

/// Top-level error type for the fleetgate library.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Errors from bucket and registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// The update arrived without a method, route or header set.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A payload for a known operation could not be decoded.
    #[error("Malformed '{op}' payload: {message}")]
    Malformed { op: String, message: String },
}

/// Errors from the inter-process message transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Session not ready: {0}")]
    NotReady(String),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
