//! Compositor thread and the controller-side handle that owns it.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, never, select};
use frame_clock::{FrameTime, TimeSource};
use frame_protocol::{FrameSink, IntRect, MemoryPolicy, TextureSize};
use gpu_context::GpuContext;
use host_channel::{
    AckReceiver, AckSender, CompositorHostClient, CompositorThreadChannels, FrameReceiver,
    HostEventReceiver, create_thread_channels,
};
use resource_updates::ResourceUpdate;

use crate::config::CompositorConfig;
use crate::control::CompositorControl;
use crate::driver::CompositorDriver;
use crate::error::CompositorError;
use crate::raster::Rasterizer;

/// Upper bound on one sleep while the clock is stopped.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Drives `driver` until shutdown, controller disconnect, or surface loss.
///
/// Each pass drains control messages, then acknowledgments, then runs a due
/// tick, then sleeps until the next tick or until either channel wakes it.
/// The driver is destroyed on the way out regardless of how the loop ended.
pub fn compositor_loop<G, R, S, H, T>(
    mut driver: CompositorDriver<G, R, S, H, T>,
    mut acks: AckReceiver,
    control: Receiver<CompositorControl>,
) -> Result<(), CompositorError>
where
    G: GpuContext,
    R: Rasterizer<G>,
    S: FrameSink,
    H: CompositorHostClient + Clone,
    T: TimeSource,
{
    let result = run_loop(&mut driver, &mut acks, &control);
    match &result {
        Ok(()) => tracing::info!("compositor loop exiting"),
        Err(error) => tracing::error!(%error, "compositor loop failed"),
    }
    driver.destroy();
    result
}

fn run_loop<G, R, S, H, T>(
    driver: &mut CompositorDriver<G, R, S, H, T>,
    acks: &mut AckReceiver,
    control: &Receiver<CompositorControl>,
) -> Result<(), CompositorError>
where
    G: GpuContext,
    R: Rasterizer<G>,
    S: FrameSink,
    H: CompositorHostClient + Clone,
    T: TimeSource,
{
    let no_wakeup = never::<()>();
    let mut consumer_gone = false;

    loop {
        loop {
            match control.try_recv() {
                Ok(message) => driver.handle_control(message)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::debug!("controller disconnected");
                    return Ok(());
                }
            }
        }

        // Acks pushed before a control message must be seen before the tick
        // that message triggers.
        while let Some(ack) = acks.pop() {
            driver.handle_ack(ack)?;
        }

        if driver.shutdown_requested() {
            return Ok(());
        }

        driver.tick_if_due()?;

        let timeout = driver.time_until_next_tick().unwrap_or(IDLE_WAIT);
        let wakeup = if consumer_gone {
            &no_wakeup
        } else {
            acks.wakeup()
        };
        select! {
            recv(control) -> message => match message {
                Ok(message) => driver.handle_control(message)?,
                Err(_) => {
                    tracing::debug!("controller disconnected");
                    return Ok(());
                }
            },
            recv(wakeup) -> signal => {
                if signal.is_err() {
                    tracing::debug!("frame consumer dropped its ack sender");
                    consumer_gone = true;
                }
            },
            default(timeout) => {},
        }
    }
}

/// Frame consumer side of the rings. Move it to whichever thread presents
/// frames.
pub struct ConsumerEndpoints {
    pub frame_receiver: FrameReceiver,
    pub ack_sender: AckSender,
}

/// Controller-side handle to a running compositor thread.
///
/// Dropping it disconnects the control channel and joins the thread.
pub struct CompositorBridge {
    control_sender: Option<Sender<CompositorControl>>,
    host_events: HostEventReceiver,
    compositor_thread: Option<JoinHandle<Result<(), CompositorError>>>,
}

impl CompositorBridge {
    pub fn spawn<G, R, T>(
        config: CompositorConfig,
        gpu: G,
        rasterizer: R,
        time_source: T,
    ) -> Result<(Self, ConsumerEndpoints), CompositorError>
    where
        G: GpuContext + Send + 'static,
        R: Rasterizer<G> + Send + 'static,
        T: TimeSource + Send + 'static,
    {
        config.validate()?;
        let (controller, compositor) = create_thread_channels::<CompositorControl>(
            config.ring_capacity,
            config.ring_capacity,
            config.control_capacity,
        );

        let compositor_thread = thread::Builder::new()
            .name("compositor".to_owned())
            .spawn(move || {
                let CompositorThreadChannels {
                    frame_sender,
                    ack_receiver,
                    control_receiver,
                    host_events,
                } = compositor;
                let driver = CompositorDriver::new(
                    config,
                    gpu,
                    rasterizer,
                    frame_sender,
                    host_events,
                    time_source,
                )?;
                compositor_loop(driver, ack_receiver, control_receiver)
            })?;

        let bridge = Self {
            control_sender: Some(controller.control_sender),
            host_events: controller.host_events,
            compositor_thread: Some(compositor_thread),
        };
        let consumer = ConsumerEndpoints {
            frame_receiver: controller.frame_receiver,
            ack_sender: controller.ack_sender,
        };
        Ok((bridge, consumer))
    }

    pub fn host_events(&self) -> &HostEventReceiver {
        &self.host_events
    }

    /// Blocks while the control channel is full.
    pub fn send_control(&self, control: CompositorControl) -> Result<(), CompositorError> {
        let Some(sender) = &self.control_sender else {
            return Err(CompositorError::Disconnected);
        };
        sender
            .send(control)
            .map_err(|_| CompositorError::Disconnected)
    }

    pub fn set_visible(&self, visible: bool) -> Result<(), CompositorError> {
        self.send_control(CompositorControl::SetVisible(visible))
    }

    pub fn reshape(
        &self,
        size: TextureSize,
        device_scale_factor: f32,
    ) -> Result<(), CompositorError> {
        self.send_control(CompositorControl::Reshape {
            size,
            device_scale_factor,
        })
    }

    pub fn set_needs_redraw(&self, damage: IntRect) -> Result<(), CompositorError> {
        self.send_control(CompositorControl::SetNeedsRedraw { damage })
    }

    pub fn set_memory_policy(&self, policy: MemoryPolicy) -> Result<(), CompositorError> {
        self.send_control(CompositorControl::SetMemoryPolicy(policy))
    }

    pub fn enqueue_updates(&self, updates: Vec<ResourceUpdate>) -> Result<(), CompositorError> {
        self.send_control(CompositorControl::EnqueueUpdates(updates))
    }

    pub fn set_frame_timing(
        &self,
        timebase: FrameTime,
        interval: Duration,
    ) -> Result<(), CompositorError> {
        self.send_control(CompositorControl::SetFrameTiming { timebase, interval })
    }

    /// Asks the thread to stop and waits for it. Returns whatever the loop
    /// returned.
    pub fn shutdown(mut self) -> Result<(), CompositorError> {
        if let Some(sender) = self.control_sender.take() {
            if sender.send(CompositorControl::Shutdown).is_err() {
                tracing::debug!("compositor thread already gone at shutdown");
            }
        }
        self.join()
    }

    fn join(&mut self) -> Result<(), CompositorError> {
        let Some(handle) = self.compositor_thread.take() else {
            return Ok(());
        };
        handle.join().map_err(|_| CompositorError::ThreadPanicked)?
    }
}

impl Drop for CompositorBridge {
    fn drop(&mut self) {
        // Disconnecting the control channel ends the loop.
        self.control_sender = None;
        if let Err(error) = self.join() {
            tracing::error!(%error, "compositor thread ended with error");
        }
    }
}
