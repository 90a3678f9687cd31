use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSchedulerConfig {
    pub max_frames_in_flight: usize,
    /// Consecutive ticks with nothing to draw and nothing in flight before the
    /// scheduler asks for the clock to stop.
    pub idle_ticks_before_clock_stop: u32,
}

impl Default for FrameSchedulerConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            idle_ticks_before_clock_stop: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerInput {
    pub frame_sequence_id: u64,
    pub visible: bool,
    pub can_draw: bool,
    pub needs_redraw: bool,
    pub frames_in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotVisible,
    CannotDraw,
    NothingToDraw,
    Backpressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    Draw,
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerUpdateReason {
    ProductionStarted,
    BackpressureEngaged,
    BackpressureReleased,
    ProductionStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerDecision {
    pub frame_sequence_id: u64,
    pub action: FrameAction,
    pub clock_should_run: bool,
    pub update_reason: Option<SchedulerUpdateReason>,
}

impl FrameSchedulerDecision {
    pub fn should_draw(&self) -> bool {
        matches!(self.action, FrameAction::Draw)
    }
}

#[derive(Debug, Clone)]
pub struct FrameScheduler {
    config: FrameSchedulerConfig,
    producing: bool,
    backpressured: bool,
    idle_ticks: u32,
}

impl FrameScheduler {
    pub fn new(config: FrameSchedulerConfig) -> Self {
        if config.max_frames_in_flight == 0 {
            panic!("invalid frame scheduler config: max_frames_in_flight must be at least 1");
        }
        Self {
            config,
            producing: false,
            backpressured: false,
            idle_ticks: 0,
        }
    }

    pub fn config(&self) -> FrameSchedulerConfig {
        self.config
    }

    pub fn is_producing(&self) -> bool {
        self.producing
    }

    pub fn is_backpressured(&self) -> bool {
        self.backpressured
    }

    /// Whether another frame may be submitted with `frames_in_flight` already
    /// unacknowledged.
    pub fn can_submit(&self, frames_in_flight: usize) -> bool {
        frames_in_flight < self.config.max_frames_in_flight
    }

    pub fn schedule_frame(&mut self, input: FrameSchedulerInput) -> FrameSchedulerDecision {
        let skip = if !input.visible {
            Some(SkipReason::NotVisible)
        } else if !input.can_draw {
            Some(SkipReason::CannotDraw)
        } else if !input.needs_redraw {
            Some(SkipReason::NothingToDraw)
        } else if !self.can_submit(input.frames_in_flight) {
            Some(SkipReason::Backpressure)
        } else {
            None
        };

        let mut update_reason = None;
        let was_backpressured = self.backpressured;
        self.backpressured = skip == Some(SkipReason::Backpressure);
        if self.backpressured && !was_backpressured {
            update_reason = Some(SchedulerUpdateReason::BackpressureEngaged);
        } else if was_backpressured && !self.backpressured {
            update_reason = Some(SchedulerUpdateReason::BackpressureReleased);
        }

        let Some(reason) = skip else {
            self.idle_ticks = 0;
            if !self.producing {
                self.producing = true;
                update_reason = Some(SchedulerUpdateReason::ProductionStarted);
            }
            return FrameSchedulerDecision {
                frame_sequence_id: input.frame_sequence_id,
                action: FrameAction::Draw,
                clock_should_run: true,
                update_reason,
            };
        };

        let waiting_on_work = input.needs_redraw || input.frames_in_flight > 0;
        let clock_should_run = if !input.visible {
            false
        } else if waiting_on_work {
            self.idle_ticks = 0;
            true
        } else {
            self.idle_ticks = self.idle_ticks.saturating_add(1);
            self.idle_ticks < self.config.idle_ticks_before_clock_stop
        };

        if !clock_should_run && self.producing {
            self.producing = false;
            self.idle_ticks = 0;
            update_reason = Some(SchedulerUpdateReason::ProductionStopped);
        }

        FrameSchedulerDecision {
            frame_sequence_id: input.frame_sequence_id,
            action: FrameAction::Skip(reason),
            clock_should_run,
            update_reason,
        }
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(FrameSchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn input(frame_sequence_id: u64, needs_redraw: bool, frames_in_flight: usize) -> FrameSchedulerInput {
        FrameSchedulerInput {
            frame_sequence_id,
            visible: true,
            can_draw: true,
            needs_redraw,
            frames_in_flight,
        }
    }

    #[test]
    fn first_draw_starts_production() {
        let mut scheduler = FrameScheduler::default();

        let decision = scheduler.schedule_frame(input(42, true, 0));

        assert!(decision.should_draw());
        assert!(decision.clock_should_run);
        assert_eq!(
            decision.update_reason,
            Some(SchedulerUpdateReason::ProductionStarted)
        );
        assert!(scheduler.is_producing());
    }

    #[test]
    fn cap_reached_skips_until_an_ack_lowers_in_flight_count() {
        let mut scheduler = FrameScheduler::default();
        scheduler.schedule_frame(input(1, true, 0));
        scheduler.schedule_frame(input(2, true, 1));

        let blocked = scheduler.schedule_frame(input(3, true, 2));
        assert_eq!(blocked.action, FrameAction::Skip(SkipReason::Backpressure));
        assert!(blocked.clock_should_run);
        assert_eq!(
            blocked.update_reason,
            Some(SchedulerUpdateReason::BackpressureEngaged)
        );

        let still_blocked = scheduler.schedule_frame(input(4, true, 2));
        assert_eq!(still_blocked.update_reason, None);

        let resumed = scheduler.schedule_frame(input(5, true, 1));
        assert!(resumed.should_draw());
        assert_eq!(
            resumed.update_reason,
            Some(SchedulerUpdateReason::BackpressureReleased)
        );
    }

    #[test]
    fn idle_ticks_eventually_stop_the_clock() {
        let mut scheduler = FrameScheduler::new(FrameSchedulerConfig {
            max_frames_in_flight: 2,
            idle_ticks_before_clock_stop: 2,
        });
        scheduler.schedule_frame(input(1, true, 0));

        let first_idle = scheduler.schedule_frame(input(2, false, 0));
        assert_eq!(first_idle.action, FrameAction::Skip(SkipReason::NothingToDraw));
        assert!(first_idle.clock_should_run);

        let second_idle = scheduler.schedule_frame(input(3, false, 0));
        assert!(!second_idle.clock_should_run);
        assert_eq!(
            second_idle.update_reason,
            Some(SchedulerUpdateReason::ProductionStopped)
        );
        assert!(!scheduler.is_producing());
    }

    #[test]
    fn frames_in_flight_keep_clock_running_without_redraw() {
        let mut scheduler = FrameScheduler::new(FrameSchedulerConfig {
            max_frames_in_flight: 2,
            idle_ticks_before_clock_stop: 1,
        });
        scheduler.schedule_frame(input(1, true, 0));

        let waiting = scheduler.schedule_frame(input(2, false, 1));
        assert!(waiting.clock_should_run);
    }

    #[test]
    fn hidden_surface_never_draws_and_stops_clock() {
        let mut scheduler = FrameScheduler::default();
        scheduler.schedule_frame(input(1, true, 0));

        let decision = scheduler.schedule_frame(FrameSchedulerInput {
            visible: false,
            ..input(2, true, 0)
        });

        assert_eq!(decision.action, FrameAction::Skip(SkipReason::NotVisible));
        assert!(!decision.clock_should_run);
    }

    #[test]
    fn cannot_draw_takes_priority_over_backpressure() {
        let mut scheduler = FrameScheduler::default();

        let decision = scheduler.schedule_frame(FrameSchedulerInput {
            can_draw: false,
            ..input(1, true, 2)
        });

        assert_eq!(decision.action, FrameAction::Skip(SkipReason::CannotDraw));
    }

    #[test]
    #[should_panic(expected = "max_frames_in_flight must be at least 1")]
    fn zero_cap_is_rejected() {
        let _ = FrameScheduler::new(FrameSchedulerConfig {
            max_frames_in_flight: 0,
            idle_ticks_before_clock_stop: 1,
        });
    }

    #[test]
    fn config_fills_missing_fields_from_defaults() {
        let config: FrameSchedulerConfig =
            serde_json::from_str(r#"{ "max_frames_in_flight": 3 }"#).expect("decode config");
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(
            config.idle_ticks_before_clock_stop,
            FrameSchedulerConfig::default().idle_ticks_before_clock_stop
        );
    }

    proptest! {
        #[test]
        fn never_draws_at_or_above_cap(
            cap in 1usize..4,
            ticks in proptest::collection::vec((any::<bool>(), 0usize..6), 1..64),
        ) {
            let mut scheduler = FrameScheduler::new(FrameSchedulerConfig {
                max_frames_in_flight: cap,
                idle_ticks_before_clock_stop: 2,
            });
            for (sequence, (needs_redraw, in_flight)) in ticks.into_iter().enumerate() {
                let decision = scheduler.schedule_frame(input(sequence as u64, needs_redraw, in_flight));
                if decision.should_draw() {
                    prop_assert!(in_flight < cap);
                    prop_assert!(needs_redraw);
                }
            }
        }
    }
}
