// ABOUTME: GlobalHalt - the fleet-wide pause scalar and its deferred clear.
// ABOUTME: Clearing always re-reads the live value, so newer halts survive.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::clock::Clock;

/// Epoch-ms timestamp until which every bucket counts as limited.
/// Zero means no halt is active.
#[derive(Clone)]
pub struct GlobalHalt {
    until: Arc<AtomicI64>,
    clock: Arc<dyn Clock>,
}

impl GlobalHalt {
    /// Create an inactive halt.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            until: Arc::new(AtomicI64::new(0)),
            clock,
        }
    }

    /// The raw halt timestamp (0 when inactive).
    pub fn until(&self) -> i64 {
        self.until.load(Ordering::SeqCst)
    }

    /// Whether the halt is in effect right now.
    pub fn is_active(&self) -> bool {
        self.until() > self.clock.now_ms()
    }

    /// Halt for `duration_ms` from now. Returns the new timestamp.
    pub fn halt_for(&self, duration_ms: i64) -> i64 {
        let until = self.clock.now_ms() + duration_ms.max(0);
        self.halt_until(until);
        until
    }

    /// Halt until an absolute timestamp, replacing any earlier halt.
    pub fn halt_until(&self, until: i64) {
        self.until.store(until, Ordering::SeqCst);
        self.schedule_clear();
    }

    /// Spawn the task that resets the scalar once it has expired.
    ///
    /// Outside a tokio runtime nothing is scheduled; `is_active` still
    /// reports correctly because it compares against the clock.
    fn schedule_clear(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let until = Arc::clone(&self.until);
        let clock = Arc::clone(&self.clock);

        runtime.spawn(async move {
            loop {
                let live = until.load(Ordering::SeqCst);
                if live == 0 {
                    return;
                }
                let now = clock.now_ms();
                if live <= now {
                    if until
                        .compare_exchange(live, 0, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        tracing::debug!(until = live, "global halt cleared");
                        return;
                    }
                    // A newer halt landed between the load and the swap.
                    continue;
                }
                tokio::time::sleep(Duration::from_millis((live - now) as u64)).await;
            }
        });
    }
}

impl std::fmt::Debug for GlobalHalt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalHalt")
            .field("until", &self.until())
            .finish()
    }
}
