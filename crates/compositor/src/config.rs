use std::time::Duration;

use frame_clock::DEFAULT_FRAME_INTERVAL;
use frame_protocol::TextureSize;
use frame_scheduler::{DEFAULT_MAX_FRAMES_IN_FLIGHT, FrameSchedulerConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    pub max_frames_in_flight: usize,
    pub frame_interval: Duration,
    pub initial_size: TextureSize,
    pub device_scale_factor: f32,
    /// Slots in the frame and ack rings. At least `max_frames_in_flight`.
    pub ring_capacity: usize,
    pub control_capacity: usize,
    pub idle_ticks_before_clock_stop: u32,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            initial_size: TextureSize::new(1, 1),
            device_scale_factor: 1.0,
            ring_capacity: 4,
            control_capacity: 64,
            idle_ticks_before_clock_stop: FrameSchedulerConfig::default().idle_ticks_before_clock_stop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_frames_in_flight must be at least 1")]
    ZeroFramesInFlight,
    #[error("frame_interval must be non-zero")]
    ZeroFrameInterval,
    #[error("ring_capacity {ring_capacity} is smaller than max_frames_in_flight {max_frames_in_flight}")]
    RingTooSmall {
        ring_capacity: usize,
        max_frames_in_flight: usize,
    },
    #[error("control_capacity must be at least 1")]
    ZeroControlCapacity,
    #[error("device_scale_factor must be positive, got {0}")]
    InvalidScaleFactor(f32),
}

impl CompositorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::ZeroFramesInFlight);
        }
        if self.frame_interval.is_zero() {
            return Err(ConfigError::ZeroFrameInterval);
        }
        if self.ring_capacity < self.max_frames_in_flight {
            return Err(ConfigError::RingTooSmall {
                ring_capacity: self.ring_capacity,
                max_frames_in_flight: self.max_frames_in_flight,
            });
        }
        if self.control_capacity == 0 {
            return Err(ConfigError::ZeroControlCapacity);
        }
        if !(self.device_scale_factor > 0.0) {
            return Err(ConfigError::InvalidScaleFactor(self.device_scale_factor));
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> FrameSchedulerConfig {
        FrameSchedulerConfig {
            max_frames_in_flight: self.max_frames_in_flight,
            idle_ticks_before_clock_stop: self.idle_ticks_before_clock_stop,
        }
    }
}
