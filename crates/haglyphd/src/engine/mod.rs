//! The sync engine: ties hub, store, mapper, and display together.

#[allow(clippy::module_inception)]
mod engine;
mod status;

pub use engine::EngineError;
pub use engine::EngineHandle;
pub use engine::SurfaceFactory;
pub use engine::SyncEngine;
pub use status::EngineState;
pub use status::Status;
pub use status::StatusHandle;

use std::time::Duration;

/// Capped exponential backoff, shared by hub reconnects and display reopens.
#[derive(Debug)]
struct Backoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            next: base,
        }
    }

    /// Delay to wait before the next attempt; doubles up to the cap
    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.cap);
        delay
    }

    /// Call after a successful attempt
    fn reset(&mut self) {
        self.next = self.base;
    }
}
