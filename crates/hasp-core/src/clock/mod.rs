//! Time sources and wraparound-safe deadline arithmetic.
//!
//! The controller runs against two clocks with very different guarantees:
//!
//! - a **monotonic uptime counter** in milliseconds, free-running and bounded,
//!   which wraps during long uptimes. Every millisecond deadline in the crate
//!   goes through [`millis_before`] so that wraparound never inverts a
//!   comparison.
//! - a **wall clock** in epoch seconds, which may be absent entirely (the
//!   device boots with no time sync). Components that need epoch time when no
//!   authoritative source exists approximate it with a [`ClockAnchor`].

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Epoch values at or below this are treated as "clock never synced".
///
/// An unsynced real-time clock reads as seconds since boot, which stays far
/// below any plausible calendar time.
pub const EPOCH_VALID_MIN: u64 = 100_000;

/// Wrap-safe "is `now` strictly before `target`" on a wrapping millisecond
/// counter.
///
/// Interprets the difference as signed, so deadlines remain correct across
/// counter wraparound as long as they are less than ~24.8 days apart.
#[must_use]
#[allow(clippy::cast_possible_wrap)] // signed interpretation is the point
pub const fn millis_before(now_ms: u32, target_ms: u32) -> bool {
    (now_ms.wrapping_sub(target_ms) as i32) < 0
}

/// Monotonic uptime source with a cooperative blocking delay.
///
/// `now_ms` is a free-running counter that wraps; compare values only through
/// [`millis_before`]. `sleep_ms` blocks the single execution context, which is
/// how callers wait out mandatory request spacing.
pub trait MonotonicClock {
    /// Current uptime in milliseconds (wrapping).
    fn now_ms(&self) -> u32;

    /// Block for `ms` milliseconds.
    fn sleep_ms(&self, ms: u32);
}

/// Authoritative wall-clock source.
///
/// Returns `None` until the device has ever obtained real time. Callers that
/// can tolerate approximate time fall back to a [`ClockAnchor`].
pub trait WallClock {
    /// Current epoch seconds, or `None` when no authoritative time exists.
    fn now_epoch(&self) -> Option<u64>;
}

/// Uptime clock backed by [`Instant`].
#[derive(Debug)]
pub struct SystemMonotonicClock {
    started: Instant,
}

impl SystemMonotonicClock {
    /// Creates a clock anchored at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemMonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemMonotonicClock {
    #[allow(clippy::cast_possible_truncation)] // truncation is the wrap
    fn now_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    fn sleep_ms(&self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_epoch(&self) -> Option<u64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs())
            .filter(|&secs| secs > EPOCH_VALID_MIN)
    }
}

/// A remembered `(epoch, uptime)` pair used to approximate current epoch time
/// without a continuously running real-time clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockAnchor {
    /// Epoch seconds at the moment the anchor was taken.
    pub epoch_secs: u64,

    /// Uptime milliseconds at the moment the anchor was taken.
    pub anchored_at_ms: u32,
}

impl ClockAnchor {
    /// Anchors `epoch_secs` at uptime `anchored_at_ms`.
    #[must_use]
    pub const fn new(epoch_secs: u64, anchored_at_ms: u32) -> Self {
        Self {
            epoch_secs,
            anchored_at_ms,
        }
    }

    /// Approximate current epoch seconds given the current uptime.
    #[must_use]
    pub fn approximate_now(&self, now_ms: u32) -> u64 {
        let elapsed_secs = u64::from(now_ms.wrapping_sub(self.anchored_at_ms)) / 1000;
        self.epoch_secs + elapsed_secs
    }
}
