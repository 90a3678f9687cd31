use gpu_context::GpuContextLost;
use output_surface::SurfaceError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    #[error("invalid compositor config: {0}")]
    Config(#[from] ConfigError),
    /// The GPU context or the frame consumer is gone. The host has been told
    /// through `on_output_surface_lost` and must build a new compositor.
    #[error("output surface lost")]
    OutputSurfaceLost,
    #[error("output surface error: {0}")]
    Surface(SurfaceError),
    #[error("compositor thread disconnected")]
    Disconnected,
    #[error("compositor thread panicked")]
    ThreadPanicked,
    #[error("failed to spawn compositor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl CompositorError {
    pub fn is_output_surface_lost(&self) -> bool {
        matches!(self, Self::OutputSurfaceLost)
    }
}

impl From<SurfaceError> for CompositorError {
    fn from(error: SurfaceError) -> Self {
        match error {
            SurfaceError::ContextLost => Self::OutputSurfaceLost,
            SurfaceError::Gpu(gpu) if gpu.is_context_lost() => Self::OutputSurfaceLost,
            other => Self::Surface(other),
        }
    }
}

impl From<GpuContextLost> for CompositorError {
    fn from(_: GpuContextLost) -> Self {
        Self::OutputSurfaceLost
    }
}
