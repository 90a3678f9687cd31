use std::fmt;
use std::ops::{Add, Sub};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A point on the clock's monotonic timeline, in nanoseconds from the time
/// source's origin.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameTime(u64);

impl FrameTime {
    pub const ZERO: Self = Self(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn from_duration(since_origin: Duration) -> Self {
        Self(duration_nanos(since_origin))
    }

    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for FrameTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(duration_nanos(rhs)))
    }
}

impl Sub<Duration> for FrameTime {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self {
        Self(self.0.saturating_sub(duration_nanos(rhs)))
    }
}

impl fmt::Debug for FrameTime {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "FrameTime({}ns)", self.0)
    }
}

pub(crate) fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

pub trait TimeSource {
    fn now(&self) -> FrameTime;
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimeSource {
    origin: Instant,
}

impl MonotonicTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTimeSource {
    fn now(&self) -> FrameTime {
        FrameTime::from_duration(self.origin.elapsed())
    }
}

/// Time source advanced by hand. Clones share the same timeline, so a test can
/// keep one handle and give another to the clock.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now_nanos: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new(start: FrameTime) -> Self {
        Self {
            now_nanos: Arc::new(AtomicU64::new(start.as_nanos())),
        }
    }

    pub fn set(&self, now: FrameTime) {
        self.now_nanos.store(now.as_nanos(), Ordering::Release);
    }

    pub fn advance(&self, by: Duration) {
        self.now_nanos
            .fetch_add(duration_nanos(by), Ordering::AcqRel);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> FrameTime {
        FrameTime(self.now_nanos.load(Ordering::Acquire))
    }
}
