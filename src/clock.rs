//! Session-relative timestamp normalization

use std::sync::OnceLock;

/// Rebases raw capture timestamps into the session's own timeline.
///
/// The first raw timestamp the clock observes (or the value the
/// controller latches explicitly) becomes the origin; every normalized
/// timestamp is `raw - origin`. One clock instance is shared by both
/// stream workers, which is what keeps audio and video on a common
/// timeline in the output file.
///
/// The controller latches `min(first audio pts, first video pts)` before
/// the workers start, so the origin does not depend on which worker runs
/// first and no stream ever normalizes below zero.
#[derive(Debug, Default)]
pub struct SessionClock {
    origin: OnceLock<i64>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the origin explicitly. Idempotent; the first latch wins.
    pub fn latch_origin(&self, raw_us: i64) {
        let _ = self.origin.set(raw_us);
    }

    /// Rebase one raw timestamp. An unlatched clock latches the argument,
    /// so the first timestamp a standalone clock sees maps to 0.
    pub fn normalize(&self, raw_us: i64) -> i64 {
        raw_us - *self.origin.get_or_init(|| raw_us)
    }

    pub fn origin(&self) -> Option<i64> {
        self.origin.get().copied()
    }
}
