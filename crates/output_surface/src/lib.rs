//! Output surface that hands finished frames to a consumer by mailbox instead
//! of presenting them itself.
//!
//! Every texture the surface allocates is in exactly one place at a time: the
//! bound backbuffer, the pending queue (submitted, not yet acknowledged), or
//! the returned queue (acknowledged and pooled for reuse). Context loss ends
//! the surface; the owner builds a new one.

use std::collections::VecDeque;

use frame_protocol::{
    FrameAck, FrameMetadata, FrameSink, FrameSinkError, FrameSubmission, Mailbox, SyncPoint,
    TextureId, TextureSize, TransferableTexture,
};
use gpu_context::{GpuContext, GpuError};
use host_channel::CompositorHostClient;
use texture_registry::TextureRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("no backbuffer is bound")]
    NoBackbuffer,
    #[error("acknowledgment for mailbox {0:?} which is not pending")]
    UnknownMailbox(Mailbox),
    #[error("front buffer discarded with no frame pending")]
    NothingPending,
    #[error("frame consumer is not draining frames")]
    Backpressure,
    #[error("output surface lost")]
    ContextLost,
    #[error("gpu error: {0}")]
    Gpu(GpuError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    NoBackbuffer,
    BackbufferBound,
    Lost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceStats {
    pub pending: usize,
    pub returned: usize,
    pub allocated_bytes: u64,
    pub pooled_bytes: u64,
    pub textures_allocated: u64,
    pub textures_reused: u64,
    pub textures_released: u64,
}

pub struct MailboxOutputSurface<S, H> {
    sink: S,
    host: H,
    size: TextureSize,
    device_scale_factor: f32,
    backbuffer: Option<TransferableTexture>,
    pending: VecDeque<TransferableTexture>,
    returned: VecDeque<TransferableTexture>,
    /// Every texture this surface owns, with its allocation size.
    textures: TextureRegistry<TextureSize>,
    lost: bool,
    textures_allocated: u64,
    textures_reused: u64,
    textures_released: u64,
}

impl<S: FrameSink, H: CompositorHostClient> MailboxOutputSurface<S, H> {
    pub fn new(sink: S, host: H, size: TextureSize, device_scale_factor: f32) -> Self {
        Self {
            sink,
            host,
            size,
            device_scale_factor,
            backbuffer: None,
            pending: VecDeque::new(),
            returned: VecDeque::new(),
            textures: TextureRegistry::new(),
            lost: false,
            textures_allocated: 0,
            textures_reused: 0,
            textures_released: 0,
        }
    }

    pub fn state(&self) -> SurfaceState {
        if self.lost {
            SurfaceState::Lost
        } else if self.backbuffer.is_some() {
            SurfaceState::BackbufferBound
        } else {
            SurfaceState::NoBackbuffer
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn size(&self) -> TextureSize {
        self.size
    }

    pub fn device_scale_factor(&self) -> f32 {
        self.device_scale_factor
    }

    pub fn frames_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn backbuffer_id(&self) -> Option<TextureId> {
        self.backbuffer.as_ref().map(|texture| texture.local_texture_id)
    }

    pub fn backbuffer_mailbox(&self) -> Option<Mailbox> {
        self.backbuffer.as_ref().map(|texture| texture.mailbox)
    }

    /// Oldest first.
    pub fn pending_mailboxes(&self) -> impl Iterator<Item = Mailbox> + '_ {
        self.pending.iter().map(|texture| texture.mailbox)
    }

    /// Oldest first.
    pub fn returned_mailboxes(&self) -> impl Iterator<Item = Mailbox> + '_ {
        self.returned.iter().map(|texture| texture.mailbox)
    }

    pub fn pooled_bytes(&self) -> u64 {
        self.returned
            .iter()
            .map(|texture| texture.size.byte_size())
            .sum()
    }

    pub fn stats(&self) -> SurfaceStats {
        SurfaceStats {
            pending: self.pending.len(),
            returned: self.returned.len(),
            allocated_bytes: self.textures.iter().map(|(_, size)| size.byte_size()).sum(),
            pooled_bytes: self.pooled_bytes(),
            textures_allocated: self.textures_allocated,
            textures_reused: self.textures_reused,
            textures_released: self.textures_released,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Binds a backbuffer if none is bound: the first pooled texture of the
    /// current size is reused, otherwise a new one is allocated. Pooled
    /// textures of any other size met on the way are released.
    pub fn ensure_backbuffer<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &mut G,
    ) -> Result<TextureId, SurfaceError> {
        self.check_live(gpu)?;
        if let Some(backbuffer) = &self.backbuffer {
            return Ok(backbuffer.local_texture_id);
        }

        while let Some(mut candidate) = self.returned.pop_front() {
            if candidate.size != self.size {
                self.release(gpu, candidate);
                continue;
            }
            let release_sync_point = candidate.sync_point;
            if let Err(error) = gpu.wait_sync_point(release_sync_point) {
                self.returned.push_front(candidate);
                return Err(self.gpu_failure(error));
            }
            candidate.sync_point = SyncPoint::NONE;
            let id = candidate.local_texture_id;
            tracing::trace!(texture = ?id, mailbox = ?candidate.mailbox, "reusing pooled backbuffer");
            self.backbuffer = Some(candidate);
            self.textures_reused += 1;
            return Ok(id);
        }

        let id = gpu
            .create_texture(self.size)
            .map_err(|error| self.gpu_failure(error))?;
        let mailbox = match gpu.produce_mailbox(id) {
            Ok(mailbox) => mailbox,
            Err(error) => {
                gpu.delete_texture(id);
                return Err(self.gpu_failure(error));
            }
        };
        self.textures.append(id, self.size);
        self.textures_allocated += 1;
        tracing::debug!(texture = ?id, ?mailbox, size = ?self.size, "allocated backbuffer");
        self.backbuffer = Some(TransferableTexture::new(id, mailbox, self.size));
        Ok(id)
    }

    /// [`Self::ensure_backbuffer`] and make it the render target.
    pub fn bind_framebuffer<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &mut G,
    ) -> Result<TextureId, SurfaceError> {
        let id = self.ensure_backbuffer(gpu)?;
        gpu.bind_framebuffer(id)
            .map_err(|error| self.gpu_failure(error))?;
        Ok(id)
    }

    /// Returns the bound backbuffer to the pool.
    pub fn discard_backbuffer(&mut self) -> Result<(), SurfaceError> {
        if self.lost {
            return Err(SurfaceError::ContextLost);
        }
        if let Some(backbuffer) = self.backbuffer.take() {
            tracing::debug!(texture = ?backbuffer.local_texture_id, "backbuffer discarded");
            self.returned.push_back(backbuffer);
        }
        Ok(())
    }

    /// A size change drops the bound backbuffer and every pooled texture so
    /// the next frame allocates at the new size. Pending frames are released
    /// when their acknowledgment arrives.
    pub fn reshape<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &mut G,
        size: TextureSize,
        device_scale_factor: f32,
    ) -> Result<(), SurfaceError> {
        if self.lost {
            return Err(SurfaceError::ContextLost);
        }
        self.device_scale_factor = device_scale_factor;
        if size == self.size {
            return Ok(());
        }
        tracing::debug!(from = ?self.size, to = ?size, "output surface reshaped");
        self.size = size;
        if let Some(backbuffer) = self.backbuffer.take() {
            self.release(gpu, backbuffer);
        }
        while let Some(pooled) = self.returned.pop_front() {
            self.release(gpu, pooled);
        }
        Ok(())
    }

    /// Flushes, stamps the backbuffer with a sync point, and transmits it.
    /// On success the texture is pending and no backbuffer is bound. A full
    /// sink leaves the backbuffer bound and returns `Backpressure`.
    pub fn send_frame_to_consumer<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &mut G,
        metadata: FrameMetadata,
    ) -> Result<(), SurfaceError> {
        self.check_live(gpu)?;
        let Some(backbuffer) = self.backbuffer.as_mut() else {
            return Err(SurfaceError::NoBackbuffer);
        };
        let sync_point = match gpu.insert_sync_point() {
            Ok(sync_point) => sync_point,
            Err(error) => return Err(self.gpu_failure(error)),
        };
        backbuffer.sync_point = sync_point;
        let submission = FrameSubmission {
            texture: backbuffer.to_mailbox(),
            metadata,
        };

        match self.sink.send_frame(submission) {
            Ok(()) => {}
            Err(FrameSinkError::Full) => {
                tracing::warn!(frame_id = metadata.frame_id, "frame sink full, frame not sent");
                return Err(SurfaceError::Backpressure);
            }
            Err(FrameSinkError::Disconnected) => {
                tracing::error!(frame_id = metadata.frame_id, "frame consumer disconnected");
                self.on_context_lost();
                return Err(SurfaceError::ContextLost);
            }
        }

        if let Some(sent) = self.backbuffer.take() {
            tracing::trace!(
                frame_id = metadata.frame_id,
                mailbox = ?sent.mailbox,
                ?sync_point,
                "frame sent to consumer"
            );
            self.pending.push_back(sent);
        }
        Ok(())
    }

    /// Takes an acknowledged texture back from the consumer and returns the
    /// number of frames still pending.
    pub fn on_ack<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &mut G,
        ack: FrameAck,
    ) -> Result<usize, SurfaceError> {
        if self.lost {
            return Err(SurfaceError::ContextLost);
        }
        match ack.mailbox {
            Some(mailbox) => {
                let Some(position) = self
                    .pending
                    .iter()
                    .position(|texture| texture.mailbox == mailbox)
                else {
                    tracing::warn!(?mailbox, "acknowledgment for unknown mailbox");
                    return Err(SurfaceError::UnknownMailbox(mailbox));
                };
                let Some(mut texture) = self.pending.remove(position) else {
                    return Err(SurfaceError::UnknownMailbox(mailbox));
                };
                texture.sync_point = ack.release_sync_point;
                if texture.size == self.size {
                    self.returned.push_back(texture);
                } else {
                    self.release(gpu, texture);
                }
            }
            None => {
                let Some(oldest) = self.pending.pop_front() else {
                    return Err(SurfaceError::NothingPending);
                };
                tracing::debug!(mailbox = ?oldest.mailbox, "consumer discarded front buffer");
                self.release(gpu, oldest);
            }
        }
        let frames_pending = self.pending.len();
        self.host.on_swap_buffers_completed(frames_pending);
        Ok(frames_pending)
    }

    /// Releases pooled textures, oldest first, until the pool fits in
    /// `limit_bytes`. Returns how many were released.
    pub fn evict_pooled_textures<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &mut G,
        limit_bytes: u64,
    ) -> usize {
        let mut pooled = self.pooled_bytes();
        let mut evicted = 0;
        while pooled > limit_bytes {
            let Some(texture) = self.returned.pop_front() else {
                break;
            };
            pooled -= texture.size.byte_size();
            self.release(gpu, texture);
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(evicted, limit_bytes, "evicted pooled textures");
        }
        evicted
    }

    /// Drops every texture record without touching the GPU and reports the
    /// loss to the host. Only the first call has any effect.
    pub fn on_context_lost(&mut self) {
        if self.lost {
            return;
        }
        self.lost = true;
        let pending = self.pending.len();
        self.backbuffer = None;
        self.pending.clear();
        self.returned.clear();
        self.textures = TextureRegistry::new();
        tracing::error!(pending, "output surface lost");
        self.host.on_output_surface_lost();
    }

    /// Deletes every texture the surface still owns. Frames in flight are
    /// abandoned without acknowledgment.
    pub fn destroy<G: GpuContext + ?Sized>(mut self, gpu: &mut G) -> H {
        if !self.pending.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                "destroying output surface with frames in flight"
            );
        }
        self.textures
            .retain(|_, _| false, |id, _| gpu.delete_texture(id));
        self.host
    }

    fn release<G: GpuContext + ?Sized>(&mut self, gpu: &mut G, texture: TransferableTexture) {
        let id = texture.local_texture_id;
        gpu.delete_texture(id);
        if self.textures.contains(id) {
            self.textures.remove(id);
        }
        self.textures_released += 1;
        tracing::trace!(texture = ?id, mailbox = ?texture.mailbox, "released texture");
    }

    fn check_live<G: GpuContext + ?Sized>(&mut self, gpu: &G) -> Result<(), SurfaceError> {
        if !self.lost && gpu.is_context_lost() {
            self.on_context_lost();
        }
        if self.lost {
            return Err(SurfaceError::ContextLost);
        }
        Ok(())
    }

    fn gpu_failure(&mut self, error: GpuError) -> SurfaceError {
        if error.is_context_lost() {
            self.on_context_lost();
            return SurfaceError::ContextLost;
        }
        SurfaceError::Gpu(error)
    }
}
