//! Messages and value types shared by the producer (compositor) and consumer
//! (display) sides of the frame hand-off.
//!
//! Nothing in this crate owns GPU memory. `TransferableTexture` is the producer's
//! record of a texture that is checked out to the consumer, and `TextureMailbox`
//! is the view of it that actually crosses the boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

slotmap::new_key_type! {
    /// Producer-local texture id. Generational, so a deleted texture's id never
    /// aliases a later allocation that reuses the slot.
    pub struct TextureId;
}

/// Opaque 128-bit token naming one GPU texture allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Mailbox([u8; 16]);

impl Mailbox {
    /// Reserved "no mailbox" value. Contexts never produce it.
    pub const ZERO: Self = Self([0; 16]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Builds a mailbox from a context namespace and a per-context serial.
    pub fn from_parts(namespace: u64, serial: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&namespace.to_be_bytes());
        bytes[8..].copy_from_slice(&serial.to_be_bytes());
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Mailbox(")?;
        for byte in self.0 {
            write!(formatter, "{byte:02x}")?;
        }
        write!(formatter, ")")
    }
}

/// GPU command-stream ordering marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SyncPoint(pub u64);

impl SyncPoint {
    pub const NONE: Self = Self(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextureSize {
    pub width: u32,
    pub height: u32,
}

impl TextureSize {
    pub const BYTES_PER_TEXEL: u64 = 4;

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Backing-store size assuming RGBA8.
    pub fn byte_size(self) -> u64 {
        self.width as u64 * self.height as u64 * Self::BYTES_PER_TEXEL
    }

    pub fn full_rect(self) -> IntRect {
        IntRect::new(0, 0, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IntRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl IntRect {
    pub const EMPTY: Self = Self {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn contains_rect(&self, other: &IntRect) -> bool {
        if other.is_empty() {
            return true;
        }
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Overlap of both, `EMPTY` when they do not overlap.
    pub fn intersect(&self, other: &IntRect) -> IntRect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x as i64 || bottom <= y as i64 {
            return IntRect::EMPTY;
        }
        IntRect {
            x,
            y,
            width: clamp_span(right - x as i64),
            height: clamp_span(bottom - y as i64),
        }
    }

    /// Smallest rect covering both. Empty inputs do not contribute.
    pub fn union(&self, other: &IntRect) -> IntRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        IntRect {
            x,
            y,
            width: clamp_span(right - x as i64),
            height: clamp_span(bottom - y as i64),
        }
    }
}

fn clamp_span(span: i64) -> u32 {
    u32::try_from(span).unwrap_or(u32::MAX)
}

/// Producer-side record of a texture that has been made visible to the
/// consumer. Deliberately not `Clone`: it is moved between the bound
/// backbuffer, the pending queue and the returned queue.
#[derive(Debug, PartialEq, Eq)]
pub struct TransferableTexture {
    pub local_texture_id: TextureId,
    pub mailbox: Mailbox,
    pub size: TextureSize,
    pub sync_point: SyncPoint,
}

impl TransferableTexture {
    pub fn new(local_texture_id: TextureId, mailbox: Mailbox, size: TextureSize) -> Self {
        Self {
            local_texture_id,
            mailbox,
            size,
            sync_point: SyncPoint::NONE,
        }
    }

    /// The part of the record that crosses the context boundary. The local id is
    /// meaningless to the consumer and stays behind.
    pub fn to_mailbox(&self) -> TextureMailbox {
        TextureMailbox {
            mailbox: self.mailbox,
            size: self.size,
            sync_point: self.sync_point,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureMailbox {
    pub mailbox: Mailbox,
    pub size: TextureSize,
    /// Consumer must wait on this before sampling the texture.
    pub sync_point: SyncPoint,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    pub frame_id: u64,
    pub device_scale_factor: f32,
    pub damage: IntRect,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSubmission {
    pub texture: TextureMailbox,
    pub metadata: FrameMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameSinkError {
    /// The consumer has not drained earlier frames yet. The frame was not sent.
    #[error("frame sink full")]
    Full,
    /// The consumer is gone and will never acknowledge anything again.
    #[error("frame sink disconnected")]
    Disconnected,
}

/// Destination for submitted frames.
pub trait FrameSink {
    fn send_frame(&mut self, frame: FrameSubmission) -> Result<(), FrameSinkError>;
}

impl FrameSink for Vec<FrameSubmission> {
    fn send_frame(&mut self, frame: FrameSubmission) -> Result<(), FrameSinkError> {
        self.push(frame);
        Ok(())
    }
}

/// Consumer → producer acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAck {
    /// `None` means the consumer dropped its front buffer without returning it;
    /// that is always the oldest frame in flight.
    pub mailbox: Option<Mailbox>,
    pub release_sync_point: SyncPoint,
}

impl FrameAck {
    pub fn returned(mailbox: Mailbox, release_sync_point: SyncPoint) -> Self {
        Self {
            mailbox: Some(mailbox),
            release_sync_point,
        }
    }

    pub fn frontbuffer_discarded() -> Self {
        Self {
            mailbox: None,
            release_sync_point: SyncPoint::NONE,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RendererFeatures: u32 {
        const DELEGATED_MAILBOX = 1 << 0;
        const SWAP_COMPLETE_CALLBACK = 1 << 1;
        const DISCARD_BACKBUFFER = 1 << 2;
        const SET_VISIBILITY = 1 << 3;
        const PARTIAL_SWAP = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RendererCapabilities {
    pub features: RendererFeatures,
    pub max_texture_size: u32,
}

impl RendererCapabilities {
    pub fn mailbox_default(max_texture_size: u32) -> Self {
        Self {
            features: RendererFeatures::DELEGATED_MAILBOX
                | RendererFeatures::SWAP_COMPLETE_CALLBACK
                | RendererFeatures::DISCARD_BACKBUFFER
                | RendererFeatures::SET_VISIBILITY,
            max_texture_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityCutoff {
    AllowNothing,
    AllowRequiredOnly,
    AllowNiceToHave,
    AllowEverything,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryPolicy {
    pub limit_bytes: u64,
    pub priority_cutoff: PriorityCutoff,
}

impl MemoryPolicy {
    pub const UNLIMITED: Self = Self {
        limit_bytes: u64::MAX,
        priority_cutoff: PriorityCutoff::AllowEverything,
    };
}

/// Compositor → controller notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostEvent {
    RendererCapabilitiesChanged(RendererCapabilities),
    OutputSurfaceLost,
    SwapBuffersCompleted { frames_pending: usize },
    NeedsRedraw { damage: IntRect },
    NeedsCommit,
    CanDrawStateChanged { can_draw: bool },
    MemoryPolicyChanged(MemoryPolicy),
    PendingTreeActivated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_from_parts_is_unique_per_serial_and_never_zero() {
        let first = Mailbox::from_parts(1, 1);
        let second = Mailbox::from_parts(1, 2);
        let other_namespace = Mailbox::from_parts(2, 1);

        assert_ne!(first, second);
        assert_ne!(first, other_namespace);
        assert!(!first.is_zero());
        assert!(Mailbox::ZERO.is_zero());
        assert_eq!(
            format!("{:?}", Mailbox::from_parts(0, 0x0a)),
            "Mailbox(0000000000000000000000000000000a)"
        );
    }

    #[test]
    fn union_ignores_empty_and_covers_both() {
        let left = IntRect::new(0, 0, 10, 10);
        let right = IntRect::new(20, 5, 5, 20);

        assert_eq!(left.union(&IntRect::EMPTY), left);
        assert_eq!(IntRect::EMPTY.union(&right), right);
        assert_eq!(left.union(&right), IntRect::new(0, 0, 25, 25));
    }

    #[test]
    fn intersect_clips_and_reports_disjoint_as_empty() {
        let surface = IntRect::new(0, 0, 100, 50);

        assert_eq!(
            surface.intersect(&IntRect::new(-10, 40, 30, 30)),
            IntRect::new(0, 40, 20, 10)
        );
        assert_eq!(surface.intersect(&IntRect::new(100, 0, 5, 5)), IntRect::EMPTY);
        assert!(surface.intersect(&IntRect::EMPTY).is_empty());
    }

    #[test]
    fn union_wider_than_u32_saturates() {
        let far_left = IntRect::new(i32::MIN, 0, u32::MAX, 1);
        let far_right = IntRect::new(i32::MAX - 1, 0, u32::MAX, 1);

        let covered = far_left.union(&far_right);

        assert_eq!(covered.x, i32::MIN);
        assert_eq!(covered.width, u32::MAX);
        assert_eq!(covered.height, 1);
    }

    #[test]
    fn contains_rect_handles_edges() {
        let outer = IntRect::new(0, 0, 100, 100);

        assert!(outer.contains_rect(&IntRect::new(0, 0, 100, 100)));
        assert!(outer.contains_rect(&IntRect::new(50, 50, 0, 0)));
        assert!(!outer.contains_rect(&IntRect::new(90, 90, 20, 5)));
        assert!(!outer.contains_rect(&IntRect::new(-1, 0, 5, 5)));
    }

    #[test]
    fn transferable_texture_mailbox_view_drops_local_id() {
        let mut keys = slotmap::SlotMap::<TextureId, ()>::with_key();
        let id = keys.insert(());
        let mut texture =
            TransferableTexture::new(id, Mailbox::from_parts(7, 3), TextureSize::new(64, 32));
        texture.sync_point = SyncPoint(9);

        let view = texture.to_mailbox();
        assert_eq!(view.mailbox, Mailbox::from_parts(7, 3));
        assert_eq!(view.size.byte_size(), 64 * 32 * 4);
        assert_eq!(view.sync_point, SyncPoint(9));
    }

    #[test]
    fn memory_policy_round_trips_through_json() {
        let policy = MemoryPolicy {
            limit_bytes: 64 << 20,
            priority_cutoff: PriorityCutoff::AllowRequiredOnly,
        };
        let encoded = serde_json::to_string(&policy).expect("encode memory policy");
        let decoded: MemoryPolicy = serde_json::from_str(&encoded).expect("decode memory policy");
        assert_eq!(decoded, policy);
    }
}
