use std::sync::atomic::{AtomicU64, Ordering};

use frame_protocol::{IntRect, Mailbox, SyncPoint, TextureId, TextureSize};
use slotmap::SlotMap;

use crate::{GpuContext, GpuContextLost, GpuError, validate_texture_size, validate_upload};

static NEXT_MAILBOX_NAMESPACE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_mailbox_namespace() -> u64 {
    NEXT_MAILBOX_NAMESPACE.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessGpuStats {
    pub textures_created: u64,
    pub textures_deleted: u64,
    pub uploads: u64,
    pub sync_points_inserted: u64,
    pub sync_points_waited: u64,
}

#[derive(Debug)]
struct HeadlessTexture {
    size: TextureSize,
    mailbox: Option<Mailbox>,
    /// Allocated on first upload.
    pixels: Option<Vec<u8>>,
}

/// In-memory GPU context. Sync points complete immediately; context loss is
/// simulated with [`HeadlessGpuContext::lose_context`].
#[derive(Debug)]
pub struct HeadlessGpuContext {
    namespace: u64,
    textures: SlotMap<TextureId, HeadlessTexture>,
    next_mailbox_serial: u64,
    last_sync_point: u64,
    bound: Option<TextureId>,
    max_dimension: u32,
    lost: bool,
    stats: HeadlessGpuStats,
}

impl HeadlessGpuContext {
    pub const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

    pub fn new() -> Self {
        Self::with_max_texture_dimension(Self::DEFAULT_MAX_TEXTURE_DIMENSION)
    }

    pub fn with_max_texture_dimension(max_dimension: u32) -> Self {
        Self {
            namespace: next_mailbox_namespace(),
            textures: SlotMap::with_key(),
            next_mailbox_serial: 1,
            last_sync_point: 0,
            bound: None,
            max_dimension,
            lost: false,
            stats: HeadlessGpuStats::default(),
        }
    }

    pub fn lose_context(&mut self) {
        if !self.lost {
            tracing::debug!("headless gpu context lost");
        }
        self.lost = true;
    }

    pub fn stats(&self) -> HeadlessGpuStats {
        self.stats
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn last_sync_point(&self) -> SyncPoint {
        SyncPoint(self.last_sync_point)
    }

    /// Row-major RGBA8 contents, `None` if nothing was uploaded yet.
    pub fn texture_pixels(&self, id: TextureId) -> Option<&[u8]> {
        self.textures.get(id)?.pixels.as_deref()
    }

    fn ensure_live(&self) -> Result<(), GpuError> {
        if self.lost {
            return Err(GpuContextLost.into());
        }
        Ok(())
    }
}

impl Default for HeadlessGpuContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuContext for HeadlessGpuContext {
    fn create_texture(&mut self, size: TextureSize) -> Result<TextureId, GpuError> {
        self.ensure_live()?;
        validate_texture_size(size, self.max_dimension)?;
        let id = self.textures.insert(HeadlessTexture {
            size,
            mailbox: None,
            pixels: None,
        });
        self.stats.textures_created += 1;
        Ok(id)
    }

    fn delete_texture(&mut self, id: TextureId) {
        if self.textures.remove(id).is_some() {
            self.stats.textures_deleted += 1;
            if self.bound == Some(id) {
                self.bound = None;
            }
        }
    }

    fn contains_texture(&self, id: TextureId) -> bool {
        self.textures.contains_key(id)
    }

    fn texture_size(&self, id: TextureId) -> Option<TextureSize> {
        self.textures.get(id).map(|texture| texture.size)
    }

    fn bind_framebuffer(&mut self, id: TextureId) -> Result<(), GpuError> {
        self.ensure_live()?;
        if !self.textures.contains_key(id) {
            return Err(GpuError::UnknownTexture(id));
        }
        self.bound = Some(id);
        Ok(())
    }

    fn bound_framebuffer(&self) -> Option<TextureId> {
        self.bound
    }

    fn produce_mailbox(&mut self, id: TextureId) -> Result<Mailbox, GpuError> {
        self.ensure_live()?;
        let namespace = self.namespace;
        let Some(texture) = self.textures.get_mut(id) else {
            return Err(GpuError::UnknownTexture(id));
        };
        if let Some(mailbox) = texture.mailbox {
            return Ok(mailbox);
        }
        let mailbox = Mailbox::from_parts(namespace, self.next_mailbox_serial);
        self.next_mailbox_serial += 1;
        texture.mailbox = Some(mailbox);
        Ok(mailbox)
    }

    fn insert_sync_point(&mut self) -> Result<SyncPoint, GpuError> {
        self.ensure_live()?;
        self.last_sync_point += 1;
        self.stats.sync_points_inserted += 1;
        Ok(SyncPoint(self.last_sync_point))
    }

    fn wait_sync_point(&mut self, sync_point: SyncPoint) -> Result<(), GpuError> {
        self.ensure_live()?;
        if !sync_point.is_none() {
            self.stats.sync_points_waited += 1;
        }
        Ok(())
    }

    fn upload_pixels(
        &mut self,
        id: TextureId,
        region: IntRect,
        pixels: &[u8],
    ) -> Result<(), GpuError> {
        self.ensure_live()?;
        let Some(texture) = self.textures.get_mut(id) else {
            return Err(GpuError::UnknownTexture(id));
        };
        validate_upload(texture.size, region, pixels)?;

        let size = texture.size;
        let texel = TextureSize::BYTES_PER_TEXEL as usize;
        let texture_row = size.width as usize * texel;
        let region_row = region.width as usize * texel;
        let storage = texture
            .pixels
            .get_or_insert_with(|| vec![0; size.byte_size() as usize]);
        for (row, source) in pixels.chunks_exact(region_row.max(1)).enumerate() {
            let start = (region.y as usize + row) * texture_row + region.x as usize * texel;
            storage[start..start + region_row].copy_from_slice(source);
        }
        self.stats.uploads += 1;
        Ok(())
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn is_context_lost(&self) -> bool {
        self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailboxes_are_stable_per_texture_and_unique_across_contexts() {
        let mut first = HeadlessGpuContext::new();
        let mut second = HeadlessGpuContext::new();
        let a = first.create_texture(TextureSize::new(8, 8)).expect("create a");
        let b = first.create_texture(TextureSize::new(8, 8)).expect("create b");
        let c = second.create_texture(TextureSize::new(8, 8)).expect("create c");

        let mailbox_a = first.produce_mailbox(a).expect("mailbox a");
        assert_eq!(first.produce_mailbox(a).expect("mailbox a again"), mailbox_a);
        assert_ne!(first.produce_mailbox(b).expect("mailbox b"), mailbox_a);
        assert_ne!(second.produce_mailbox(c).expect("mailbox c"), mailbox_a);
        assert!(!mailbox_a.is_zero());
    }

    #[test]
    fn upload_writes_region_rows() {
        let mut gpu = HeadlessGpuContext::new();
        let id = gpu.create_texture(TextureSize::new(3, 2)).expect("create");

        gpu.upload_pixels(id, IntRect::new(1, 1, 2, 1), &[1, 2, 3, 4, 5, 6, 7, 8])
            .expect("upload");

        let pixels = gpu.texture_pixels(id).expect("pixels");
        assert_eq!(&pixels[..12], &[0; 12]);
        assert_eq!(&pixels[12..16], &[0; 4]);
        assert_eq!(&pixels[16..24], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(gpu.stats().uploads, 1);
    }

    #[test]
    fn deleted_texture_is_unknown_and_unbinds() {
        let mut gpu = HeadlessGpuContext::new();
        let id = gpu.create_texture(TextureSize::new(2, 2)).expect("create");
        gpu.bind_framebuffer(id).expect("bind");

        gpu.delete_texture(id);
        gpu.delete_texture(id);

        assert_eq!(gpu.bound_framebuffer(), None);
        assert_eq!(gpu.bind_framebuffer(id), Err(GpuError::UnknownTexture(id)));
        assert_eq!(gpu.stats().textures_deleted, 1);
    }

    #[test]
    fn lost_context_fails_every_fallible_call() {
        let mut gpu = HeadlessGpuContext::new();
        let id = gpu.create_texture(TextureSize::new(2, 2)).expect("create");
        gpu.lose_context();

        assert!(gpu.is_context_lost());
        assert!(gpu.create_texture(TextureSize::new(2, 2)).is_err_and(|e| e.is_context_lost()));
        assert!(gpu.insert_sync_point().is_err_and(|e| e.is_context_lost()));
        assert!(gpu.produce_mailbox(id).is_err_and(|e| e.is_context_lost()));
        gpu.delete_texture(id);
        assert_eq!(gpu.live_texture_count(), 0);
    }

    #[test]
    fn sync_points_increase() {
        let mut gpu = HeadlessGpuContext::new();
        let first = gpu.insert_sync_point().expect("first");
        let second = gpu.insert_sync_point().expect("second");

        assert!(second > first);
        assert!(!first.is_none());
        gpu.wait_sync_point(SyncPoint::NONE).expect("wait none");
        gpu.wait_sync_point(second).expect("wait second");
        assert_eq!(gpu.stats().sync_points_waited, 1);
    }
}
