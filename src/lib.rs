// ABOUTME: Root module for fleetgate - fleet-wide REST rate-limit coordination.
// ABOUTME: Re-exports all public types from submodules.

pub mod bucket;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod node;
pub mod prelude;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod worker;

pub use error::FleetError;
