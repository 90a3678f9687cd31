//! Periodic tick source for pacing frame production.
//!
//! The clock is pull-based: the owning loop calls
//! [`FrameClock::dispatch_due_tick`] whenever it wakes up and uses
//! [`FrameClock::time_until_next_tick`] to decide how long it may sleep. Ticks
//! land on `timebase + k * interval` boundaries.

mod time;

use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};

pub use time::{FrameTime, ManualTimeSource, MonotonicTimeSource, TimeSource};

use time::duration_nanos;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_nanos(16_666_667);

pub trait FrameClockClient {
    fn on_frame_tick(&mut self, tick_time: FrameTime);
}

/// Routes ticks into a message loop. A full channel means the loop has not
/// consumed the previous tick yet, so the new one is coalesced away.
impl FrameClockClient for Sender<FrameTime> {
    fn on_frame_tick(&mut self, tick_time: FrameTime) {
        match self.try_send(tick_time) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(?tick_time, "tick receiver busy, coalescing tick");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!(?tick_time, "tick receiver disconnected");
            }
        }
    }
}

pub struct FrameClock<T: TimeSource = MonotonicTimeSource> {
    time_source: T,
    client: Option<Box<dyn FrameClockClient + Send>>,
    active: bool,
    timebase: FrameTime,
    interval: Duration,
    last_tick_time: Option<FrameTime>,
    next_tick_time: Option<FrameTime>,
}

impl<T: TimeSource> FrameClock<T> {
    /// Creates an inactive clock anchored at `FrameTime::ZERO`.
    pub fn new(time_source: T, interval: Duration) -> Self {
        Self {
            time_source,
            client: None,
            active: false,
            timebase: FrameTime::ZERO,
            interval,
            last_tick_time: None,
            next_tick_time: None,
        }
    }

    /// Replaces the tick receiver. Takes effect on the next delivered tick.
    pub fn set_client(&mut self, client: impl FrameClockClient + Send + 'static) {
        self.client = Some(Box::new(client));
    }

    pub fn clear_client(&mut self) -> Option<Box<dyn FrameClockClient + Send>> {
        self.client.take()
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    pub fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        if active {
            let now = self.time_source.now();
            let next = self.next_boundary_after(now);
            self.next_tick_time = Some(next);
            tracing::debug!(?now, ?next, "frame clock activated");
        } else {
            self.next_tick_time = None;
            tracing::debug!("frame clock deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Re-anchors future ticks. Never emits a tick by itself.
    pub fn set_timebase_and_interval(&mut self, timebase: FrameTime, interval: Duration) {
        self.timebase = timebase;
        self.interval = interval;
        if self.active {
            let now = self.time_source.now();
            self.next_tick_time = Some(self.next_boundary_after(now));
        }
    }

    pub fn timebase(&self) -> FrameTime {
        self.timebase
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Boundary of the most recently delivered tick, `None` before the first one.
    pub fn last_tick_time(&self) -> Option<FrameTime> {
        self.last_tick_time
    }

    /// `None` while inactive.
    pub fn next_tick_time(&self) -> Option<FrameTime> {
        self.next_tick_time
    }

    pub fn now(&self) -> FrameTime {
        self.time_source.now()
    }

    pub fn time_source(&self) -> &T {
        &self.time_source
    }

    pub fn time_until_next_tick(&self) -> Option<Duration> {
        let next = self.next_tick_time?;
        Some(next.saturating_duration_since(self.time_source.now()))
    }

    /// Delivers at most one tick if the scheduled boundary has passed.
    ///
    /// Missed intervals are skipped rather than replayed; the delivered tick is
    /// stamped with the latest boundary that is not in the future.
    pub fn dispatch_due_tick(&mut self) -> Option<FrameTime> {
        let scheduled = self.next_tick_time?;
        let now = self.time_source.now();
        if now < scheduled {
            return None;
        }

        let next = self.next_boundary_after(now);
        let tick_time = if self.interval.is_zero() {
            now
        } else {
            scheduled.max(next - self.interval)
        };
        self.last_tick_time = Some(tick_time);
        self.next_tick_time = Some(next);
        tracing::trace!(?tick_time, ?next, "frame clock tick");

        if let Some(client) = self.client.as_mut() {
            client.on_frame_tick(tick_time);
        }
        Some(tick_time)
    }

    /// Smallest `timebase + k * interval` strictly after `now` (k may be
    /// negative when the timebase is in the future). A zero interval ticks on
    /// every dispatch.
    fn next_boundary_after(&self, now: FrameTime) -> FrameTime {
        let interval = duration_nanos(self.interval);
        if interval == 0 {
            return now;
        }
        let timebase = self.timebase.as_nanos();
        let now = now.as_nanos();
        if now >= timebase {
            let elapsed = now - timebase;
            let intervals = elapsed / interval + 1;
            FrameTime::from_nanos(timebase.saturating_add(intervals.saturating_mul(interval)))
        } else {
            let ahead = timebase - now;
            let intervals_back = (ahead - 1) / interval;
            FrameTime::from_nanos(timebase - intervals_back * interval)
        }
    }
}
