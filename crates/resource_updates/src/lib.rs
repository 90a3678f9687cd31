//! Content writes queued during the update phase and applied once per frame,
//! in enqueue order, before rasterization.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use frame_protocol::{IntRect, TextureId};
use gpu_context::{GpuContext, GpuContextLost, GpuError};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Row-major RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<Rgba8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Rgba8::TRANSPARENT)
    }

    pub fn filled(width: u32, height: u32, color: Rgba8) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Rgba8>) -> Self {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            panic!(
                "bitmap {width}x{height} needs {expected} pixels, got {}",
                pixels.len()
            );
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Rgba8] {
        &self.pixels
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Copies out the bytes of `rect` (bitmap-local coordinates), or `None` if
    /// it is not fully inside the bitmap.
    pub fn crop_bytes(&self, rect: IntRect) -> Option<Vec<u8>> {
        let bounds = IntRect::new(0, 0, self.width, self.height);
        if rect.x < 0 || rect.y < 0 || !bounds.contains_rect(&rect) {
            return None;
        }
        if rect.is_empty() {
            return Some(Vec::new());
        }
        if rect == bounds {
            return Some(self.as_bytes().to_vec());
        }
        let mut bytes = Vec::with_capacity(rect.width as usize * rect.height as usize * 4);
        for row in 0..rect.height as usize {
            let start = (rect.y as usize + row) * self.width as usize + rect.x as usize;
            let end = start + rect.width as usize;
            bytes.extend_from_slice(bytemuck::cast_slice(&self.pixels[start..end]));
        }
        Some(bytes)
    }
}

/// Deferred recording, rasterized on the GPU thread when its update drains.
pub trait Picture: Send + Sync {
    /// Renders the content-space `rect` into a bitmap of exactly that size.
    fn rasterize(&self, rect: IntRect) -> Bitmap;
}

#[derive(Clone)]
pub enum UpdateSource {
    Bitmap(Arc<Bitmap>),
    Picture(Arc<dyn Picture>),
}

impl fmt::Debug for UpdateSource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitmap(bitmap) => formatter
                .debug_tuple("Bitmap")
                .field(&(bitmap.width(), bitmap.height()))
                .finish(),
            Self::Picture(_) => formatter.write_str("Picture"),
        }
    }
}

/// One pending write. The source covers `content_rect`; the `source_rect`
/// part of it lands in the destination texture at `dest_offset`.
#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    pub texture: TextureId,
    pub source: UpdateSource,
    pub content_rect: IntRect,
    pub source_rect: IntRect,
    pub dest_offset: (i32, i32),
}

impl ResourceUpdate {
    pub fn from_bitmap(
        texture: TextureId,
        bitmap: Arc<Bitmap>,
        content_rect: IntRect,
        source_rect: IntRect,
        dest_offset: (i32, i32),
    ) -> Self {
        Self {
            texture,
            source: UpdateSource::Bitmap(bitmap),
            content_rect,
            source_rect,
            dest_offset,
        }
    }

    pub fn from_picture(
        texture: TextureId,
        picture: Arc<dyn Picture>,
        content_rect: IntRect,
        source_rect: IntRect,
        dest_offset: (i32, i32),
    ) -> Self {
        Self {
            texture,
            source: UpdateSource::Picture(picture),
            content_rect,
            source_rect,
            dest_offset,
        }
    }

    fn dest_region(&self) -> IntRect {
        IntRect::new(
            self.dest_offset.0,
            self.dest_offset.1,
            self.source_rect.width,
            self.source_rect.height,
        )
    }

    /// Tightly packed RGBA8 bytes for `source_rect`, `None` if the rect falls
    /// outside the source.
    fn source_bytes(&self) -> Option<Vec<u8>> {
        if !self.content_rect.contains_rect(&self.source_rect) {
            return None;
        }
        match &self.source {
            UpdateSource::Bitmap(bitmap) => {
                let local = IntRect::new(
                    self.source_rect.x - self.content_rect.x,
                    self.source_rect.y - self.content_rect.y,
                    self.source_rect.width,
                    self.source_rect.height,
                );
                bitmap.crop_bytes(local)
            }
            UpdateSource::Picture(picture) => {
                let bitmap = picture.rasterize(self.source_rect);
                if bitmap.width() != self.source_rect.width
                    || bitmap.height() != self.source_rect.height
                {
                    return None;
                }
                Some(bitmap.as_bytes().to_vec())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct ResourceUpdateQueue {
    updates: VecDeque<ResourceUpdate>,
}

impl ResourceUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, update: ResourceUpdate) {
        self.updates.push_back(update);
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn clear(&mut self) {
        self.updates.clear();
    }

    /// Applies every queued update in FIFO order and empties the queue.
    ///
    /// Updates that target a missing texture or whose rectangles do not fit are
    /// skipped. Context loss stops the drain, drops what is left, and is
    /// returned to the caller.
    pub fn drain_and_apply<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &mut G,
    ) -> Result<DrainReport, GpuContextLost> {
        let mut report = DrainReport::default();
        while let Some(update) = self.updates.pop_front() {
            if update.source_rect.is_empty() {
                tracing::trace!(texture = ?update.texture, "empty resource update skipped");
                report.skipped += 1;
                continue;
            }
            let Some(bytes) = update.source_bytes() else {
                tracing::warn!(
                    texture = ?update.texture,
                    content_rect = ?update.content_rect,
                    source_rect = ?update.source_rect,
                    "resource update source rect outside source, skipping"
                );
                report.skipped += 1;
                continue;
            };
            match gpu.upload_pixels(update.texture, update.dest_region(), &bytes) {
                Ok(()) => report.applied += 1,
                Err(GpuError::ContextLost(lost)) => {
                    let dropped = self.updates.len();
                    self.updates.clear();
                    tracing::error!(dropped, "gpu context lost while applying resource updates");
                    return Err(lost);
                }
                Err(error) => {
                    tracing::warn!(texture = ?update.texture, %error, "resource update skipped");
                    report.skipped += 1;
                }
            }
        }
        if report.applied + report.skipped > 0 {
            tracing::trace!(
                applied = report.applied,
                skipped = report.skipped,
                "resource updates drained"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use frame_protocol::TextureSize;
    use gpu_context::HeadlessGpuContext;
    use proptest::prelude::*;

    use super::*;

    fn gradient(width: u32, height: u32) -> Arc<Bitmap> {
        let pixels = (0..width * height)
            .map(|index| Rgba8::new(index as u8, 0, 0, 255))
            .collect();
        Arc::new(Bitmap::from_pixels(width, height, pixels))
    }

    struct SolidPicture {
        color: Rgba8,
        calls: AtomicUsize,
    }

    impl Picture for SolidPicture {
        fn rasterize(&self, rect: IntRect) -> Bitmap {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Bitmap::filled(rect.width, rect.height, self.color)
        }
    }

    #[test]
    fn applies_source_rect_at_dest_offset() {
        let mut gpu = HeadlessGpuContext::new();
        let texture = gpu.create_texture(TextureSize::new(4, 4)).expect("create");
        let mut queue = ResourceUpdateQueue::new();
        queue.enqueue(ResourceUpdate::from_bitmap(
            texture,
            gradient(4, 4),
            IntRect::new(10, 10, 4, 4),
            IntRect::new(11, 12, 2, 1),
            (0, 3),
        ));

        let report = queue.drain_and_apply(&mut gpu).expect("drain");

        assert_eq!(report, DrainReport { applied: 1, skipped: 0 });
        assert!(queue.is_empty());
        let pixels = gpu.texture_pixels(texture).expect("pixels");
        let row_three = &pixels[3 * 16..3 * 16 + 8];
        // Source texels (1, 2) and (2, 2) of the gradient are indices 9 and 10.
        assert_eq!(row_three, &[9, 0, 0, 255, 10, 0, 0, 255]);
    }

    #[test]
    fn missing_texture_is_skipped_and_drain_continues() {
        let mut gpu = HeadlessGpuContext::new();
        let gone = gpu.create_texture(TextureSize::new(2, 2)).expect("create");
        let live = gpu.create_texture(TextureSize::new(2, 2)).expect("create");
        gpu.delete_texture(gone);

        let mut queue = ResourceUpdateQueue::new();
        let full = IntRect::new(0, 0, 2, 2);
        queue.enqueue(ResourceUpdate::from_bitmap(gone, gradient(2, 2), full, full, (0, 0)));
        queue.enqueue(ResourceUpdate::from_bitmap(live, gradient(2, 2), full, full, (0, 0)));

        let report = queue.drain_and_apply(&mut gpu).expect("drain");

        assert_eq!(report, DrainReport { applied: 1, skipped: 1 });
        assert!(gpu.texture_pixels(live).is_some());
    }

    #[test]
    fn source_rect_outside_content_is_skipped() {
        let mut gpu = HeadlessGpuContext::new();
        let texture = gpu.create_texture(TextureSize::new(8, 8)).expect("create");
        let mut queue = ResourceUpdateQueue::new();
        queue.enqueue(ResourceUpdate::from_bitmap(
            texture,
            gradient(2, 2),
            IntRect::new(0, 0, 2, 2),
            IntRect::new(1, 1, 2, 2),
            (0, 0),
        ));

        let report = queue.drain_and_apply(&mut gpu).expect("drain");

        assert_eq!(report.skipped, 1);
        assert_eq!(gpu.stats().uploads, 0);
    }

    #[test]
    fn crop_of_empty_rect_is_empty_at_any_offset() {
        let bitmap = Bitmap::new(2, 2);

        assert_eq!(bitmap.crop_bytes(IntRect::new(100, 100, 0, 3)), Some(Vec::new()));
        assert_eq!(bitmap.crop_bytes(IntRect::new(1, 0, 1, 0)), Some(Vec::new()));
        assert_eq!(bitmap.crop_bytes(IntRect::new(1, 1, 2, 1)), None);
    }

    #[test]
    fn empty_source_rect_is_skipped_and_drain_continues() {
        let mut gpu = HeadlessGpuContext::new();
        let texture = gpu.create_texture(TextureSize::new(2, 2)).expect("create");
        let full = IntRect::new(0, 0, 2, 2);
        let mut queue = ResourceUpdateQueue::new();
        queue.enqueue(ResourceUpdate::from_bitmap(
            texture,
            Arc::new(Bitmap::new(2, 2)),
            full,
            IntRect::new(100, 100, 0, 3),
            (0, 0),
        ));
        queue.enqueue(ResourceUpdate::from_bitmap(texture, gradient(2, 2), full, full, (0, 0)));

        let report = queue.drain_and_apply(&mut gpu).expect("drain");

        assert_eq!(report, DrainReport { applied: 1, skipped: 1 });
        assert_eq!(gpu.stats().uploads, 1);
    }

    #[test]
    fn picture_is_rasterized_at_drain_time() {
        let mut gpu = HeadlessGpuContext::new();
        let texture = gpu.create_texture(TextureSize::new(2, 2)).expect("create");
        let picture = Arc::new(SolidPicture {
            color: Rgba8::new(1, 2, 3, 4),
            calls: AtomicUsize::new(0),
        });
        let mut queue = ResourceUpdateQueue::new();
        queue.enqueue(ResourceUpdate::from_picture(
            texture,
            picture.clone(),
            IntRect::new(0, 0, 2, 2),
            IntRect::new(0, 0, 1, 2),
            (1, 0),
        ));
        assert_eq!(picture.calls.load(Ordering::Relaxed), 0);

        queue.drain_and_apply(&mut gpu).expect("drain");

        assert_eq!(picture.calls.load(Ordering::Relaxed), 1);
        let pixels = gpu.texture_pixels(texture).expect("pixels");
        assert_eq!(&pixels[4..8], &[1, 2, 3, 4]);
        assert_eq!(&pixels[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn context_loss_aborts_and_empties_queue() {
        let mut gpu = HeadlessGpuContext::new();
        let texture = gpu.create_texture(TextureSize::new(2, 2)).expect("create");
        gpu.lose_context();
        let mut queue = ResourceUpdateQueue::new();
        let full = IntRect::new(0, 0, 2, 2);
        for _ in 0..3 {
            queue.enqueue(ResourceUpdate::from_bitmap(texture, gradient(2, 2), full, full, (0, 0)));
        }

        assert_eq!(queue.drain_and_apply(&mut gpu), Err(GpuContextLost));
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn each_update_applied_at_most_once(
            plan in proptest::collection::vec((any::<bool>(), 0u32..3, 0u32..3), 0..24),
        ) {
            let mut gpu = HeadlessGpuContext::new();
            let live = gpu.create_texture(TextureSize::new(4, 4)).expect("create");
            let gone = gpu.create_texture(TextureSize::new(4, 4)).expect("create");
            gpu.delete_texture(gone);

            let mut queue = ResourceUpdateQueue::new();
            for (target_live, x, y) in &plan {
                let texture = if *target_live { live } else { gone };
                let full = IntRect::new(0, 0, 2, 2);
                queue.enqueue(ResourceUpdate::from_bitmap(
                    texture,
                    gradient(2, 2),
                    full,
                    full,
                    (*x as i32, *y as i32),
                ));
            }

            let report = queue.drain_and_apply(&mut gpu).expect("drain");
            prop_assert!(queue.is_empty());
            prop_assert_eq!(report.applied + report.skipped, plan.len());
            prop_assert_eq!(gpu.stats().uploads as usize, report.applied);

            let again = queue.drain_and_apply(&mut gpu).expect("second drain");
            prop_assert_eq!(again, DrainReport::default());
            prop_assert_eq!(gpu.stats().uploads as usize, report.applied);
        }
    }
}
