//! Producer side of the mailbox frame pipeline.
//!
//! [`CompositorDriver`] ties the frame clock, the scheduler, pending resource
//! updates, a [`Rasterizer`] and the [`output_surface::MailboxOutputSurface`]
//! together on one thread. [`CompositorBridge`] runs a driver on its own
//! thread and hands the frame consumer its ring endpoints.

mod bridge;
mod config;
mod control;
mod driver;
mod error;
mod raster;

pub use bridge::{CompositorBridge, ConsumerEndpoints, compositor_loop};
pub use config::{CompositorConfig, ConfigError};
pub use control::CompositorControl;
pub use driver::{CompositorDriver, FrameOutcome};
pub use error::CompositorError;
pub use raster::{RasterError, Rasterizer, SolidColorRasterizer};

pub use frame_clock::{FrameTime, ManualTimeSource, MonotonicTimeSource, TimeSource};
pub use frame_protocol::{
    FrameAck, FrameMetadata, FrameSubmission, HostEvent, IntRect, Mailbox, MemoryPolicy,
    PriorityCutoff, SyncPoint, TextureSize,
};
pub use gpu_context::{GpuContext, HeadlessGpuContext};
#[cfg(feature = "wgpu-backend")]
pub use gpu_context::WgpuGpuContext;
pub use host_channel::{CompositorHostClient, HostEventReceiver, HostEventSender};
