//! The GPU operations the compositor needs, behind one trait.
//!
//! [`HeadlessGpuContext`] keeps textures in host memory and is what tests and
//! replay tooling drive. [`WgpuGpuContext`] (feature `wgpu-backend`) backs the
//! same calls with a real `wgpu` device.

mod headless;
#[cfg(feature = "wgpu-backend")]
mod wgpu_backend;

use frame_protocol::{IntRect, Mailbox, SyncPoint, TextureId, TextureSize};

pub use headless::{HeadlessGpuContext, HeadlessGpuStats};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::{BACKBUFFER_FORMAT, WgpuContextInitError, WgpuGpuContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gpu context lost")]
pub struct GpuContextLost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    #[error(transparent)]
    ContextLost(#[from] GpuContextLost),
    #[error("texture {0:?} does not exist")]
    UnknownTexture(TextureId),
    #[error("invalid texture size {size:?} (max dimension {max_dimension})")]
    InvalidTextureSize {
        size: TextureSize,
        max_dimension: u32,
    },
    #[error("region {region:?} does not fit texture of size {size:?}")]
    RegionOutOfBounds { region: IntRect, size: TextureSize },
    #[error("pixel data has {actual} bytes, expected {expected}")]
    PixelDataLength { expected: usize, actual: usize },
}

impl GpuError {
    pub fn is_context_lost(&self) -> bool {
        matches!(self, Self::ContextLost(_))
    }
}

pub trait GpuContext {
    fn create_texture(&mut self, size: TextureSize) -> Result<TextureId, GpuError>;

    /// Deleting an unknown or stale id is a no-op.
    fn delete_texture(&mut self, id: TextureId);

    fn contains_texture(&self, id: TextureId) -> bool;

    fn texture_size(&self, id: TextureId) -> Option<TextureSize>;

    /// Makes `id` the render target for subsequent drawing.
    fn bind_framebuffer(&mut self, id: TextureId) -> Result<(), GpuError>;

    fn bound_framebuffer(&self) -> Option<TextureId>;

    /// Returns the mailbox naming `id`, creating it on first use. The same
    /// texture always yields the same mailbox and no two live textures share
    /// one.
    fn produce_mailbox(&mut self, id: TextureId) -> Result<Mailbox, GpuError>;

    /// Flushes recorded work and returns a marker that completes once it has
    /// executed.
    fn insert_sync_point(&mut self) -> Result<SyncPoint, GpuError>;

    /// Blocks further GPU work of this context on `sync_point`. `NONE` is a
    /// no-op.
    fn wait_sync_point(&mut self, sync_point: SyncPoint) -> Result<(), GpuError>;

    /// Writes tightly packed RGBA8 `pixels` into `region` of texture `id`.
    fn upload_pixels(&mut self, id: TextureId, region: IntRect, pixels: &[u8])
    -> Result<(), GpuError>;

    fn max_texture_dimension(&self) -> u32;

    fn is_context_lost(&self) -> bool;
}

pub(crate) fn validate_texture_size(
    size: TextureSize,
    max_dimension: u32,
) -> Result<(), GpuError> {
    if size.is_empty() || size.width > max_dimension || size.height > max_dimension {
        return Err(GpuError::InvalidTextureSize {
            size,
            max_dimension,
        });
    }
    Ok(())
}

pub(crate) fn validate_upload(
    size: TextureSize,
    region: IntRect,
    pixels: &[u8],
) -> Result<(), GpuError> {
    if region.x < 0
        || region.y < 0
        || region.right() > size.width as i64
        || region.bottom() > size.height as i64
    {
        return Err(GpuError::RegionOutOfBounds { region, size });
    }
    let expected = region.width as usize * region.height as usize * TextureSize::BYTES_PER_TEXEL as usize;
    if pixels.len() != expected {
        return Err(GpuError::PixelDataLength {
            expected,
            actual: pixels.len(),
        });
    }
    Ok(())
}
