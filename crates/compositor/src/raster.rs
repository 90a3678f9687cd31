use frame_protocol::{IntRect, TextureId, TextureSize};
use gpu_context::{GpuContext, GpuError};

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("gpu error during raster: {0}")]
    Gpu(#[from] GpuError),
    #[error("raster failed: {0}")]
    Failed(String),
}

impl RasterError {
    pub fn is_context_lost(&self) -> bool {
        matches!(self, Self::Gpu(error) if error.is_context_lost())
    }
}

/// Paints the bound backbuffer. `damage` is already clipped to `size`.
pub trait Rasterizer<G: ?Sized> {
    fn rasterize(
        &mut self,
        gpu: &mut G,
        target: TextureId,
        size: TextureSize,
        damage: IntRect,
    ) -> Result<(), RasterError>;
}

/// Fills the damaged region with one color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolidColorRasterizer {
    pub rgba: [u8; 4],
}

impl<G: GpuContext + ?Sized> Rasterizer<G> for SolidColorRasterizer {
    fn rasterize(
        &mut self,
        gpu: &mut G,
        target: TextureId,
        _size: TextureSize,
        damage: IntRect,
    ) -> Result<(), RasterError> {
        if damage.is_empty() {
            return Ok(());
        }
        let texels = damage.width as usize * damage.height as usize;
        let pixels: Vec<u8> = self.rgba.iter().copied().cycle().take(texels * 4).collect();
        gpu.upload_pixels(target, damage, &pixels)?;
        Ok(())
    }
}
