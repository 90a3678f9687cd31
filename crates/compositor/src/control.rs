use std::time::Duration;

use frame_clock::FrameTime;
use frame_protocol::{IntRect, MemoryPolicy, TextureSize};
use resource_updates::ResourceUpdate;

/// Controller → compositor messages.
#[derive(Debug, Clone)]
pub enum CompositorControl {
    SetVisible(bool),
    Reshape {
        size: TextureSize,
        device_scale_factor: f32,
    },
    SetMemoryPolicy(MemoryPolicy),
    SetNeedsRedraw {
        damage: IntRect,
    },
    EnqueueUpdates(Vec<ResourceUpdate>),
    SetFrameTiming {
        timebase: FrameTime,
        interval: Duration,
    },
    Shutdown,
}
