// ABOUTME: Coordinator module - the authoritative registry and its message loop.
// ABOUTME: Also holds the startup sequence that swaps in the transport session.

mod coordinator;

pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorHandle};

#[cfg(test)]
mod coordinator_test;
