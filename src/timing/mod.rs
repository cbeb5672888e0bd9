//! Media timestamps and the clocks that produce them
//!
//! Every sample in the pipeline carries a [`MediaTime`]: a signed nanosecond
//! count on the capture session's timebase. Integer arithmetic keeps the
//! recorder's pause offsets exact.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A presentation timestamp or duration in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MediaTime(i64);

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Rounds to the nearest nanosecond.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    /// `value / timescale` seconds, e.g. `(1, 30)` for one frame at 30 fps.
    pub fn from_ratio(value: i64, timescale: i32) -> Self {
        if timescale == 0 {
            return Self::ZERO;
        }
        Self(value.saturating_mul(NANOS_PER_SEC) / timescale as i64)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Negative values saturate to zero.
    pub fn to_duration(self) -> Duration {
        Duration::from_nanos(self.0.max(0) as u64)
    }

    pub fn clamp_to(self, min: MediaTime, max: MediaTime) -> MediaTime {
        if min > max {
            return self;
        }
        self.clamp(min, max)
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for MediaTime {
    fn add_assign(&mut self, rhs: MediaTime) {
        *self = *self + rhs;
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for MediaTime {
    fn sub_assign(&mut self, rhs: MediaTime) {
        *self = *self - rhs;
    }
}

impl Neg for MediaTime {
    type Output = MediaTime;

    fn neg(self) -> MediaTime {
        MediaTime(self.0.saturating_neg())
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// Source of "now" on the capture timebase
///
/// Devices stamp samples with it and the recorder measures pauses with it,
/// so both sides agree on what a second is.
pub trait MediaClock: Send + Sync {
    fn now(&self) -> MediaTime;
}

/// Monotonic clock for presentation timestamps
///
/// All timestamps derive from this single source
/// to ensure monotonic ordering.
#[derive(Debug, Clone)]
pub struct PTSClock {
    start: Arc<Instant>,
}

impl PTSClock {
    /// Create a new PTS clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Create a PTS clock from an existing start instant
    ///
    /// Use this to share the same timebase between components.
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Get the presentation timestamp for a given instant
    ///
    /// Instants before the clock's start map to zero.
    #[inline]
    pub fn pts_at(&self, instant: Instant) -> MediaTime {
        MediaTime::from_duration(instant.saturating_duration_since(*self.start))
    }

    /// Get the start instant for sharing with other components
    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for PTSClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock for PTSClock {
    #[inline]
    fn now(&self) -> MediaTime {
        MediaTime::from_duration(self.start.elapsed())
    }
}
