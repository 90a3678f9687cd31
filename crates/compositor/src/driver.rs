use frame_clock::{FrameClock, FrameTime, TimeSource};
use frame_protocol::{
    FrameAck, FrameMetadata, FrameSink, IntRect, MemoryPolicy, PriorityCutoff,
    RendererCapabilities,
};
use frame_scheduler::{FrameAction, FrameScheduler, FrameSchedulerInput, SkipReason};
use gpu_context::GpuContext;
use host_channel::CompositorHostClient;
use output_surface::{MailboxOutputSurface, SurfaceError};
use resource_updates::ResourceUpdateQueue;

use crate::config::CompositorConfig;
use crate::control::CompositorControl;
use crate::error::CompositorError;
use crate::raster::Rasterizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Submitted { frame_id: u64 },
    Skipped(SkipReason),
    /// The rasterizer failed. The backbuffer stays bound and the damage is
    /// kept for the next tick.
    RasterFailed,
    /// No backbuffer could be bound. The damage is kept for the next tick.
    BackbufferUnavailable,
}

/// Single-threaded owner of everything on the producer side of the mailbox.
///
/// The owning loop feeds it control messages and acknowledgments and calls
/// [`Self::tick_if_due`] whenever it wakes up.
pub struct CompositorDriver<G, R, S, H, T: TimeSource> {
    gpu: G,
    rasterizer: R,
    surface: MailboxOutputSurface<S, H>,
    host: H,
    clock: FrameClock<T>,
    scheduler: FrameScheduler,
    updates: ResourceUpdateQueue,
    visible: bool,
    can_draw: bool,
    needs_redraw: bool,
    pending_damage: IntRect,
    next_frame_id: u64,
    memory_policy: MemoryPolicy,
    shutdown_requested: bool,
}

impl<G, R, S, H, T> CompositorDriver<G, R, S, H, T>
where
    G: GpuContext,
    R: Rasterizer<G>,
    S: FrameSink,
    H: CompositorHostClient + Clone,
    T: TimeSource,
{
    /// Starts hidden with a full-surface redraw pending. Announces renderer
    /// capabilities to the host.
    pub fn new(
        config: CompositorConfig,
        gpu: G,
        rasterizer: R,
        sink: S,
        mut host: H,
        time_source: T,
    ) -> Result<Self, CompositorError> {
        config.validate()?;
        host.on_renderer_capabilities_changed(RendererCapabilities::mailbox_default(
            gpu.max_texture_dimension(),
        ));
        let surface = MailboxOutputSurface::new(
            sink,
            host.clone(),
            config.initial_size,
            config.device_scale_factor,
        );
        let mut driver = Self {
            gpu,
            rasterizer,
            surface,
            host,
            clock: FrameClock::new(time_source, config.frame_interval),
            scheduler: FrameScheduler::new(config.scheduler_config()),
            updates: ResourceUpdateQueue::new(),
            visible: false,
            can_draw: true,
            needs_redraw: true,
            pending_damage: config.initial_size.full_rect(),
            next_frame_id: 1,
            memory_policy: MemoryPolicy::UNLIMITED,
            shutdown_requested: false,
        };
        driver.refresh_can_draw();
        tracing::info!(
            size = ?config.initial_size,
            max_frames_in_flight = config.max_frames_in_flight,
            "compositor driver created"
        );
        Ok(driver)
    }

    pub fn surface(&self) -> &MailboxOutputSurface<S, H> {
        &self.surface
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn rasterizer_mut(&mut self) -> &mut R {
        &mut self.rasterizer
    }

    pub fn clock(&self) -> &FrameClock<T> {
        &self.clock
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn can_draw(&self) -> bool {
        self.can_draw
    }

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    pub fn pending_damage(&self) -> IntRect {
        self.pending_damage
    }

    pub fn pending_updates(&self) -> usize {
        self.updates.len()
    }

    pub fn next_frame_id(&self) -> u64 {
        self.next_frame_id
    }

    pub fn memory_policy(&self) -> MemoryPolicy {
        self.memory_policy
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn time_until_next_tick(&self) -> Option<std::time::Duration> {
        self.clock.time_until_next_tick()
    }

    pub fn handle_control(&mut self, control: CompositorControl) -> Result<(), CompositorError> {
        self.check_context()?;
        match control {
            CompositorControl::SetVisible(visible) => self.set_visible(visible)?,
            CompositorControl::Reshape {
                size,
                device_scale_factor,
            } => {
                self.surface
                    .reshape(&mut self.gpu, size, device_scale_factor)?;
                self.refresh_can_draw();
                self.set_needs_redraw(size.full_rect());
            }
            CompositorControl::SetMemoryPolicy(policy) => {
                self.memory_policy = policy;
                self.enforce_memory_policy();
                self.host.on_memory_policy_changed(policy);
            }
            CompositorControl::SetNeedsRedraw { damage } => self.set_needs_redraw(damage),
            CompositorControl::EnqueueUpdates(updates) => {
                if updates.is_empty() {
                    return Ok(());
                }
                tracing::trace!(count = updates.len(), "resource updates enqueued");
                for update in updates {
                    self.updates.enqueue(update);
                }
                self.set_needs_redraw(self.surface.size().full_rect());
            }
            CompositorControl::SetFrameTiming { timebase, interval } => {
                if interval.is_zero() {
                    tracing::warn!(?timebase, "ignoring zero frame interval");
                    return Ok(());
                }
                self.clock.set_timebase_and_interval(timebase, interval);
            }
            CompositorControl::Shutdown => {
                tracing::debug!("compositor shutdown requested");
                self.shutdown_requested = true;
            }
        }
        Ok(())
    }

    /// Unknown or surplus acknowledgments are logged and dropped.
    pub fn handle_ack(&mut self, ack: FrameAck) -> Result<(), CompositorError> {
        self.check_context()?;
        match self.surface.on_ack(&mut self.gpu, ack) {
            Ok(frames_pending) => {
                tracing::trace!(frames_pending, "frame acknowledged");
                self.enforce_memory_policy();
                Ok(())
            }
            Err(SurfaceError::UnknownMailbox(mailbox)) => {
                tracing::warn!(?mailbox, "dropping acknowledgment for unknown mailbox");
                Ok(())
            }
            Err(SurfaceError::NothingPending) => {
                tracing::warn!("dropping front buffer discard with nothing pending");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Runs one tick if the clock says one is due.
    pub fn tick_if_due(&mut self) -> Result<Option<FrameOutcome>, CompositorError> {
        self.check_context()?;
        match self.clock.dispatch_due_tick() {
            Some(tick_time) => self.on_tick(tick_time).map(Some),
            None => Ok(None),
        }
    }

    pub fn on_tick(&mut self, tick_time: FrameTime) -> Result<FrameOutcome, CompositorError> {
        self.check_context()?;
        self.refresh_can_draw();
        let frame_id = self.next_frame_id;
        let decision = self.scheduler.schedule_frame(FrameSchedulerInput {
            frame_sequence_id: frame_id,
            visible: self.visible,
            can_draw: self.can_draw,
            needs_redraw: self.needs_redraw,
            frames_in_flight: self.surface.frames_pending(),
        });
        self.clock.set_active(decision.clock_should_run);
        if let Some(reason) = decision.update_reason {
            tracing::debug!(?reason, frame_id, "frame production changed");
        }
        match decision.action {
            FrameAction::Draw => self.draw_frame(frame_id, tick_time),
            FrameAction::Skip(reason) => {
                tracing::trace!(?reason, frame_id, "tick skipped");
                Ok(FrameOutcome::Skipped(reason))
            }
        }
    }

    /// Tears down the surface and hands back the GPU context.
    pub fn destroy(self) -> G {
        let mut gpu = self.gpu;
        self.surface.destroy(&mut gpu);
        gpu
    }

    fn draw_frame(
        &mut self,
        frame_id: u64,
        tick_time: FrameTime,
    ) -> Result<FrameOutcome, CompositorError> {
        let report = match self.updates.drain_and_apply(&mut self.gpu) {
            Ok(report) => report,
            Err(lost) => {
                self.surface.on_context_lost();
                return Err(lost.into());
            }
        };
        if report.applied > 0 {
            self.host.on_pending_tree_activated();
        }

        let size = self.surface.size();
        let damage = self.pending_damage.intersect(&size.full_rect());
        let target = match self.surface.bind_framebuffer(&mut self.gpu) {
            Ok(target) => target,
            Err(SurfaceError::Gpu(error)) if !error.is_context_lost() => {
                tracing::warn!(frame_id, %error, "no backbuffer for frame, frame dropped");
                self.host.on_needs_redraw(damage);
                return Ok(FrameOutcome::BackbufferUnavailable);
            }
            Err(error) => return Err(error.into()),
        };
        if let Err(error) = self
            .rasterizer
            .rasterize(&mut self.gpu, target, size, damage)
        {
            if error.is_context_lost() {
                self.surface.on_context_lost();
                return Err(CompositorError::OutputSurfaceLost);
            }
            tracing::warn!(frame_id, %error, "raster failed, frame dropped");
            self.host.on_needs_redraw(damage);
            return Ok(FrameOutcome::RasterFailed);
        }

        let metadata = FrameMetadata {
            frame_id,
            device_scale_factor: self.surface.device_scale_factor(),
            damage,
        };
        match self.surface.send_frame_to_consumer(&mut self.gpu, metadata) {
            Ok(()) => {
                tracing::trace!(frame_id, ?tick_time, ?damage, "frame submitted");
                self.next_frame_id += 1;
                self.needs_redraw = false;
                self.pending_damage = IntRect::EMPTY;
                Ok(FrameOutcome::Submitted { frame_id })
            }
            Err(SurfaceError::Backpressure) => Ok(FrameOutcome::Skipped(SkipReason::Backpressure)),
            Err(error) => Err(error.into()),
        }
    }

    fn set_visible(&mut self, visible: bool) -> Result<(), CompositorError> {
        if self.visible == visible {
            return Ok(());
        }
        self.visible = visible;
        tracing::debug!(visible, "visibility changed");
        if visible {
            self.host.on_needs_commit();
            self.set_needs_redraw(self.surface.size().full_rect());
        } else {
            self.surface.discard_backbuffer()?;
            self.clock.set_active(false);
        }
        Ok(())
    }

    fn set_needs_redraw(&mut self, damage: IntRect) {
        self.needs_redraw = true;
        self.pending_damage = self.pending_damage.union(&damage);
        if self.visible {
            self.clock.set_active(true);
        }
    }

    fn enforce_memory_policy(&mut self) {
        let limit = match self.memory_policy.priority_cutoff {
            PriorityCutoff::AllowNothing => 0,
            _ => self.memory_policy.limit_bytes,
        };
        if self.surface.pooled_bytes() > limit {
            self.surface.evict_pooled_textures(&mut self.gpu, limit);
        }
    }

    /// Drawing needs a live surface whose size the GPU can allocate.
    fn refresh_can_draw(&mut self) {
        let size = self.surface.size();
        let max_dimension = self.gpu.max_texture_dimension();
        let can_draw = !self.surface.is_lost()
            && !size.is_empty()
            && size.width <= max_dimension
            && size.height <= max_dimension;
        if can_draw != self.can_draw {
            self.can_draw = can_draw;
            tracing::debug!(can_draw, "can-draw state changed");
            self.host.on_can_draw_state_changed(can_draw);
        }
    }

    /// Escalates an asynchronous GPU loss into surface loss. Once lost, every
    /// entry point fails.
    fn check_context(&mut self) -> Result<(), CompositorError> {
        if !self.surface.is_lost() && self.gpu.is_context_lost() {
            self.surface.on_context_lost();
        }
        if self.surface.is_lost() {
            return Err(CompositorError::OutputSurfaceLost);
        }
        Ok(())
    }
}
