//! Clock - drives the engine's logical time
//!
//! The engine never reads wall time. `ReconcileService` ticks it on a fixed
//! interval and feeds it the real elapsed time, so debounce windows and the
//! poll period follow the wall clock in production while tests advance the
//! engine by hand.
//!
//! ```text
//! ReconcileService (tokio task)
//!     │
//!     ├── every tick: engine.advance(elapsed)
//!     │                 └── pass when debounce / verify / upgrade / poll is due
//!     │
//!     └── shutdown broadcast ──► final log, task ends
//! ```

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::engine::Engine;

pub struct ReconcileService {
    engine: Engine,
    interval: Duration,
}

impl ReconcileService {
    pub fn new(engine: Engine, interval: Duration) -> Self {
        Self { engine, interval: interval.max(Duration::from_millis(1)) }
    }

    /// Tick interval from the engine's configuration.
    pub fn with_defaults(engine: Engine) -> Self {
        let interval = engine.config().tick();
        Self::new(engine, interval)
    }

    pub fn interval(&self) -> Duration { self.interval }

    /// Manual tick (for testing)
    pub fn tick(&self, elapsed: Duration) -> bool {
        self.engine.advance(elapsed).is_some()
    }

    /// Spawn the driver loop as a tokio task.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_ms = self.interval.as_millis() as u64, "reconcile service running");
            let mut last = Instant::now();
            let mut passes = 0u64;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!(passes, "reconcile service stopped");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        let now = Instant::now();
                        let elapsed = now.duration_since(last);
                        last = now;
                        if self.tick(elapsed) {
                            passes += 1;
                        }
                    }
                }
            }
        })
    }
}

/// Start the driver with the engine's configured tick.
pub fn start_reconciler(engine: Engine, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    ReconcileService::with_defaults(engine).spawn(shutdown)
}
