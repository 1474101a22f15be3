use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use web_time::Instant;

use crate::{MaybeSend, MaybeSync};

/// Monotonic time source.
pub trait Clock: MaybeSend + MaybeSync {
    fn now(&self) -> Instant;

    /// Milliseconds elapsed since `earlier`, saturating at zero.
    fn elapsed_ms(&self, earlier: Instant) -> f64 {
        self.now().saturating_duration_since(earlier).as_secs_f64() * 1000.0
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Real monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for tests. Time only moves through [`ManualClock::advance`].
///
/// Clones share the same underlying time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Total time advanced since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}
