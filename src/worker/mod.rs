// ABOUTME: Worker module - the request gate each worker process runs.
// ABOUTME: Holds the HTTP backend seam, the agent, and its diagnostic events.

mod agent;
mod backend;
mod events;

pub use agent::{DEFAULT_MAX_RETRIES, WorkerAgent};
pub use backend::{ApiBackend, ApiRequest, ApiResponse, HttpBackend};
pub use events::RateLimitEvent;
