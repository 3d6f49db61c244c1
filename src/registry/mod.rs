// ABOUTME: Registry module - the route and bucket maps plus the global halt.
// ABOUTME: Owned by the coordinator; workers keep a disposable copy.

mod global;
mod registry;

pub use global::GlobalHalt;
pub use registry::{
    BucketRegistry, HashMigration, PROVISIONAL_PREFIX, RegistrySnapshot, RouteKey, UpdateOutcome,
};
