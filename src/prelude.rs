// ABOUTME: Prelude module - convenient imports for common use cases.
// ABOUTME: Use `use fleetgate::prelude::*;` to get started quickly.

pub use crate::bucket::{BucketLimit, BucketPhase, HeaderSet, RateLimitBucket};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::RateLimitConfig;
pub use crate::coordinator::{Coordinator, CoordinatorBuilder, CoordinatorHandle};
pub use crate::error::{ConfigError, FleetError, RateLimitError, TransportError};
pub use crate::node::{Node, Role};
pub use crate::protocol::{BucketState, Dispatcher, Envelope, GlobalHaltNotice, Operation, UpdateRatelimit};
pub use crate::registry::{BucketRegistry, RegistrySnapshot, RouteKey};
pub use crate::transport::{Broadcaster, Inbox, LocalBus, Session, SessionState, Upstream};
pub use crate::worker::{ApiBackend, ApiRequest, ApiResponse, HttpBackend, RateLimitEvent, WorkerAgent};
