use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use frame_protocol::{IntRect, Mailbox, SyncPoint, TextureId, TextureSize};
use slotmap::SlotMap;

use crate::headless::next_mailbox_namespace;
use crate::{GpuContext, GpuContextLost, GpuError, validate_texture_size, validate_upload};

pub const BACKBUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, thiserror::Error)]
pub enum WgpuContextInitError {
    #[error("no suitable wgpu adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("wgpu device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: TextureSize,
    mailbox: Option<Mailbox>,
}

pub struct WgpuGpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    namespace: u64,
    textures: SlotMap<TextureId, WgpuTexture>,
    next_mailbox_serial: u64,
    last_sync_point: u64,
    completed_sync_point: u64,
    bound: Option<TextureId>,
    lost: Arc<AtomicBool>,
}

impl WgpuGpuContext {
    /// Wraps an existing device. Installs the device-lost callback.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            tracing::error!(?reason, %message, "wgpu device lost");
            lost_flag.store(true, Ordering::Release);
        });
        Self {
            device,
            queue,
            namespace: next_mailbox_namespace(),
            textures: SlotMap::with_key(),
            next_mailbox_serial: 1,
            last_sync_point: 0,
            completed_sync_point: 0,
            bound: None,
            lost,
        }
    }

    /// Requests a default adapter and device without a surface.
    pub fn new_headless_device() -> Result<Self, WgpuContextInitError> {
        let (device, queue) = pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await?;
            let limits = adapter.limits();
            let device_and_queue = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("compositor"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await?;
            Ok::<_, WgpuContextInitError>(device_and_queue)
        })?;
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn texture(&self, id: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(id).map(|entry| &entry.texture)
    }

    /// View of the bound framebuffer for render passes.
    pub fn bound_view(&self) -> Option<&wgpu::TextureView> {
        let id = self.bound?;
        self.textures.get(id).map(|entry| &entry.view)
    }

    fn ensure_live(&self) -> Result<(), GpuError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(GpuContextLost.into());
        }
        Ok(())
    }
}

impl GpuContext for WgpuGpuContext {
    fn create_texture(&mut self, size: TextureSize) -> Result<TextureId, GpuError> {
        self.ensure_live()?;
        validate_texture_size(size, self.max_texture_dimension())?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("compositor.backbuffer"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BACKBUFFER_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.textures.insert(WgpuTexture {
            texture,
            view,
            size,
            mailbox: None,
        }))
    }

    fn delete_texture(&mut self, id: TextureId) {
        if let Some(entry) = self.textures.remove(id) {
            entry.texture.destroy();
            if self.bound == Some(id) {
                self.bound = None;
            }
        }
    }

    fn contains_texture(&self, id: TextureId) -> bool {
        self.textures.contains_key(id)
    }

    fn texture_size(&self, id: TextureId) -> Option<TextureSize> {
        self.textures.get(id).map(|entry| entry.size)
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
        let Some(entry) = self.textures.get_mut(id) else {
            return Err(GpuError::UnknownTexture(id));
        };
        if let Some(mailbox) = entry.mailbox {
            return Ok(mailbox);
        }
        let mailbox = Mailbox::from_parts(namespace, self.next_mailbox_serial);
        self.next_mailbox_serial += 1;
        entry.mailbox = Some(mailbox);
        Ok(mailbox)
    }

    fn insert_sync_point(&mut self) -> Result<SyncPoint, GpuError> {
        self.ensure_live()?;
        self.queue.submit(std::iter::empty());
        self.last_sync_point += 1;
        Ok(SyncPoint(self.last_sync_point))
    }

    fn wait_sync_point(&mut self, sync_point: SyncPoint) -> Result<(), GpuError> {
        self.ensure_live()?;
        if sync_point.is_none() || sync_point.0 <= self.completed_sync_point {
            return Ok(());
        }
        if let Err(error) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            tracing::error!(%error, ?sync_point, "wgpu poll failed while waiting on sync point");
            self.lost.store(true, Ordering::Release);
            return Err(GpuContextLost.into());
        }
        self.completed_sync_point = self.last_sync_point;
        Ok(())
    }

    fn upload_pixels(
        &mut self,
        id: TextureId,
        region: IntRect,
        pixels: &[u8],
    ) -> Result<(), GpuError> {
        self.ensure_live()?;
        let Some(entry) = self.textures.get(id) else {
            return Err(GpuError::UnknownTexture(id));
        };
        validate_upload(entry.size, region, pixels)?;
        if region.is_empty() {
            return Ok(());
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x as u32,
                    y: region.y as u32,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(region.width * TextureSize::BYTES_PER_TEXEL as u32),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn is_context_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}
