use std::time::Instant;

/// Milliseconds since a context's time origin, as handed to frame callbacks.
pub type DomHighResTimeStamp = f64;

/// Monotonic zero point for a context's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOrigin {
    start: Instant,
}

impl Default for TimeOrigin {
    fn default() -> Self {
        Self::now_origin()
    }
}

impl TimeOrigin {
    pub fn now_origin() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn from_instant(start: Instant) -> Self {
        Self { start }
    }

    pub fn instant(&self) -> Instant {
        self.start
    }

    pub fn now(&self) -> DomHighResTimeStamp {
        self.timestamp_at(Instant::now())
    }

    /// Instants before the origin map to zero.
    pub fn timestamp_at(&self, instant: Instant) -> DomHighResTimeStamp {
        instant.saturating_duration_since(self.start).as_secs_f64() * 1_000.0
    }
}
