//! Compositor ↔ controller plumbing.
//!
//! Notifications to the controller go through [`CompositorHostClient`]; the
//! production implementation, [`HostEventSender`], turns every call into a
//! [`HostEvent`] on a channel. Frames and acknowledgments travel on SPSC rings
//! created by [`create_thread_channels`].

mod rings;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use frame_protocol::{HostEvent, IntRect, MemoryPolicy, RendererCapabilities};
use smallvec::SmallVec;

pub use rings::{
    AckReceiver, AckSender, CompositorThreadChannels, ControllerThreadChannels, FrameReceiver,
    FrameSender, create_thread_channels,
};

/// One-way notifications from the compositor to whoever drives it. None of
/// these may block.
pub trait CompositorHostClient {
    fn on_renderer_capabilities_changed(&mut self, capabilities: RendererCapabilities);
    fn on_output_surface_lost(&mut self);
    fn on_swap_buffers_completed(&mut self, frames_pending: usize);
    fn on_needs_redraw(&mut self, damage: IntRect);
    fn on_needs_commit(&mut self);
    fn on_can_draw_state_changed(&mut self, can_draw: bool);
    fn on_memory_policy_changed(&mut self, policy: MemoryPolicy);
    fn on_pending_tree_activated(&mut self);
}

pub fn create_host_channel() -> (HostEventSender, HostEventReceiver) {
    let (sender, receiver) = unbounded();
    (HostEventSender { sender }, HostEventReceiver { receiver })
}

#[derive(Debug, Clone)]
pub struct HostEventSender {
    sender: Sender<HostEvent>,
}

impl HostEventSender {
    pub fn send(&self, event: HostEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!(?event, "host event dropped, controller disconnected");
        }
    }
}

impl CompositorHostClient for HostEventSender {
    fn on_renderer_capabilities_changed(&mut self, capabilities: RendererCapabilities) {
        self.send(HostEvent::RendererCapabilitiesChanged(capabilities));
    }

    fn on_output_surface_lost(&mut self) {
        self.send(HostEvent::OutputSurfaceLost);
    }

    fn on_swap_buffers_completed(&mut self, frames_pending: usize) {
        self.send(HostEvent::SwapBuffersCompleted { frames_pending });
    }

    fn on_needs_redraw(&mut self, damage: IntRect) {
        self.send(HostEvent::NeedsRedraw { damage });
    }

    fn on_needs_commit(&mut self) {
        self.send(HostEvent::NeedsCommit);
    }

    fn on_can_draw_state_changed(&mut self, can_draw: bool) {
        self.send(HostEvent::CanDrawStateChanged { can_draw });
    }

    fn on_memory_policy_changed(&mut self, policy: MemoryPolicy) {
        self.send(HostEvent::MemoryPolicyChanged(policy));
    }

    fn on_pending_tree_activated(&mut self) {
        self.send(HostEvent::PendingTreeActivated);
    }
}

pub type HostEventBatch = SmallVec<[HostEvent; 8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoalesceKey {
    Capabilities,
    SwapCompleted,
    Redraw,
    Commit,
    CanDraw,
    MemoryPolicy,
    PendingTreeActivated,
}

fn coalesce_key(event: &HostEvent) -> Option<CoalesceKey> {
    match event {
        HostEvent::RendererCapabilitiesChanged(_) => Some(CoalesceKey::Capabilities),
        HostEvent::OutputSurfaceLost => None,
        HostEvent::SwapBuffersCompleted { .. } => Some(CoalesceKey::SwapCompleted),
        HostEvent::NeedsRedraw { .. } => Some(CoalesceKey::Redraw),
        HostEvent::NeedsCommit => Some(CoalesceKey::Commit),
        HostEvent::CanDrawStateChanged { .. } => Some(CoalesceKey::CanDraw),
        HostEvent::MemoryPolicyChanged(_) => Some(CoalesceKey::MemoryPolicy),
        HostEvent::PendingTreeActivated => Some(CoalesceKey::PendingTreeActivated),
    }
}

/// Folds `incoming` into the batch. Redraw damage is unioned, every other
/// keyed event keeps its first position and takes the newest value.
fn coalesce_into(batch: &mut HostEventBatch, incoming: HostEvent) {
    let Some(key) = coalesce_key(&incoming) else {
        batch.push(incoming);
        return;
    };
    let existing = batch
        .iter_mut()
        .find(|event| coalesce_key(event) == Some(key));
    let Some(existing) = existing else {
        batch.push(incoming);
        return;
    };
    match (existing, incoming) {
        (
            HostEvent::NeedsRedraw { damage },
            HostEvent::NeedsRedraw {
                damage: incoming_damage,
            },
        ) => {
            *damage = damage.union(&incoming_damage);
        }
        (existing, incoming) => *existing = incoming,
    }
}

#[derive(Debug)]
pub struct HostEventReceiver {
    receiver: Receiver<HostEvent>,
}

impl HostEventReceiver {
    pub fn try_recv(&self) -> Option<HostEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn receiver(&self) -> &Receiver<HostEvent> {
        &self.receiver
    }

    /// Drains everything queued right now and merges redundant events.
    /// `OutputSurfaceLost` is never merged away.
    pub fn drain_coalesced(&self) -> HostEventBatch {
        let mut batch = HostEventBatch::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => coalesce_into(&mut batch, event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use frame_protocol::{PriorityCutoff, RendererFeatures};

    use super::*;

    #[test]
    fn coalescing_unions_damage_and_keeps_latest_values() {
        let (mut sender, receiver) = create_host_channel();
        sender.on_needs_redraw(IntRect::new(0, 0, 10, 10));
        sender.on_can_draw_state_changed(false);
        sender.on_needs_commit();
        sender.on_needs_redraw(IntRect::new(20, 20, 5, 5));
        sender.on_needs_commit();
        sender.on_can_draw_state_changed(true);
        sender.on_swap_buffers_completed(2);
        sender.on_swap_buffers_completed(1);

        let batch = receiver.drain_coalesced();

        assert_eq!(
            batch.as_slice(),
            &[
                HostEvent::NeedsRedraw {
                    damage: IntRect::new(0, 0, 25, 25)
                },
                HostEvent::CanDrawStateChanged { can_draw: true },
                HostEvent::NeedsCommit,
                HostEvent::SwapBuffersCompleted { frames_pending: 1 },
            ]
        );
        assert!(receiver.drain_coalesced().is_empty());
    }

    #[test]
    fn surface_lost_is_never_merged_away() {
        let (mut sender, receiver) = create_host_channel();
        sender.on_output_surface_lost();
        sender.on_memory_policy_changed(MemoryPolicy::UNLIMITED);
        sender.on_output_surface_lost();
        sender.on_memory_policy_changed(MemoryPolicy {
            limit_bytes: 1024,
            priority_cutoff: PriorityCutoff::AllowNothing,
        });

        let batch = receiver.drain_coalesced();

        let lost = batch
            .iter()
            .filter(|event| matches!(event, HostEvent::OutputSurfaceLost))
            .count();
        assert_eq!(lost, 2);
        assert_eq!(batch.len(), 3);
        assert!(batch.contains(&HostEvent::MemoryPolicyChanged(MemoryPolicy {
            limit_bytes: 1024,
            priority_cutoff: PriorityCutoff::AllowNothing,
        })));
    }

    #[test]
    fn sending_to_dropped_controller_is_silent() {
        let (mut sender, receiver) = create_host_channel();
        drop(receiver);

        sender.on_renderer_capabilities_changed(RendererCapabilities {
            features: RendererFeatures::DELEGATED_MAILBOX,
            max_texture_size: 4096,
        });
        sender.on_pending_tree_activated();
    }

    #[test]
    fn events_queued_before_senders_drop_are_still_drained() {
        let (mut sender, receiver) = create_host_channel();
        let mut clone = sender.clone();
        sender.on_needs_commit();
        clone.on_output_surface_lost();
        drop(sender);
        drop(clone);

        assert_eq!(
            receiver.drain_coalesced().as_slice(),
            &[HostEvent::NeedsCommit, HostEvent::OutputSurfaceLost]
        );
        assert!(receiver.drain_coalesced().is_empty());
        assert_eq!(receiver.try_recv(), None);
    }
}
