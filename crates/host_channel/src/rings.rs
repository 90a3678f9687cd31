use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use frame_protocol::{FrameAck, FrameSink, FrameSinkError, FrameSubmission};
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::{HostEventReceiver, HostEventSender, create_host_channel};

/// Endpoints owned by the compositor thread.
pub struct CompositorThreadChannels<Control> {
    pub frame_sender: FrameSender,
    pub ack_receiver: AckReceiver,
    pub control_receiver: Receiver<Control>,
    pub host_events: HostEventSender,
}

/// Endpoints owned by the controller. `frame_receiver` and `ack_sender` belong
/// to whichever thread consumes frames and may be moved there.
pub struct ControllerThreadChannels<Control> {
    pub frame_receiver: FrameReceiver,
    pub ack_sender: AckSender,
    pub control_sender: Sender<Control>,
    pub host_events: HostEventReceiver,
}

fn notify(signal: &Sender<()>, what: &'static str) {
    match signal.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => {}
        Err(TrySendError::Disconnected(())) => {
            tracing::debug!(what, "notify receiver disconnected");
        }
    }
}

pub struct FrameSender {
    producer: Producer<FrameSubmission>,
    frame_ready: Sender<()>,
}

impl FrameSender {
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }

    pub fn is_abandoned(&self) -> bool {
        self.producer.is_abandoned()
    }
}

impl FrameSink for FrameSender {
    fn send_frame(&mut self, frame: FrameSubmission) -> Result<(), FrameSinkError> {
        if self.producer.is_abandoned() {
            return Err(FrameSinkError::Disconnected);
        }
        match self.producer.push(frame) {
            Ok(()) => {
                notify(&self.frame_ready, "frame ready");
                Ok(())
            }
            Err(PushError::Full(_)) => Err(FrameSinkError::Full),
        }
    }
}

pub struct FrameReceiver {
    consumer: Consumer<FrameSubmission>,
    frame_ready: Receiver<()>,
}

impl FrameReceiver {
    pub fn try_recv(&mut self) -> Option<FrameSubmission> {
        self.consumer.pop().ok()
    }

    /// Waits up to `timeout` for the next frame.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<FrameSubmission> {
        if let Ok(frame) = self.consumer.pop() {
            return Some(frame);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match self.frame_ready.recv_timeout(deadline.saturating_duration_since(now)) {
                Ok(()) => {
                    if let Ok(frame) = self.consumer.pop() {
                        return Some(frame);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => return self.consumer.pop().ok(),
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_abandoned(&self) -> bool {
        self.consumer.is_abandoned()
    }
}

pub struct AckSender {
    producer: Producer<FrameAck>,
    wakeup: Sender<()>,
}

impl AckSender {
    pub fn push(&mut self, ack: FrameAck) -> Result<(), PushError<FrameAck>> {
        self.producer.push(ack)?;
        notify(&self.wakeup, "ack");
        Ok(())
    }

    pub fn blocking_push(&mut self, mut ack: FrameAck) {
        loop {
            match self.producer.push(ack) {
                Ok(()) => {
                    notify(&self.wakeup, "ack");
                    return;
                }
                Err(PushError::Full(returned_ack)) => {
                    if self.producer.is_abandoned() {
                        return;
                    }
                    ack = returned_ack;
                    std::thread::yield_now();
                }
            }
        }
    }
}

pub struct AckReceiver {
    consumer: Consumer<FrameAck>,
    wakeup: Receiver<()>,
}

impl AckReceiver {
    pub fn pop(&mut self) -> Option<FrameAck> {
        self.consumer.pop().ok()
    }

    /// Fires at least once after acks were pushed. Drain with [`Self::pop`]
    /// after it fires; a single signal may cover several acks.
    pub fn wakeup(&self) -> &Receiver<()> {
        &self.wakeup
    }

    pub fn is_abandoned(&self) -> bool {
        self.consumer.is_abandoned()
    }
}

pub fn create_thread_channels<Control>(
    frame_capacity: usize,
    ack_capacity: usize,
    control_capacity: usize,
) -> (
    ControllerThreadChannels<Control>,
    CompositorThreadChannels<Control>,
) {
    assert!(frame_capacity > 0, "frame ring capacity must be greater than zero");
    assert!(ack_capacity > 0, "ack ring capacity must be greater than zero");
    assert!(
        control_capacity > 0,
        "control channel capacity must be greater than zero"
    );

    let (frame_producer, frame_consumer) = RingBuffer::new(frame_capacity);
    let (ack_producer, ack_consumer) = RingBuffer::new(ack_capacity);
    let (frame_ready_sender, frame_ready_receiver) = bounded(1);
    let (wakeup_sender, wakeup_receiver) = bounded(1);
    let (control_sender, control_receiver) = bounded(control_capacity);
    let (host_event_sender, host_event_receiver) = create_host_channel();

    let controller = ControllerThreadChannels {
        frame_receiver: FrameReceiver {
            consumer: frame_consumer,
            frame_ready: frame_ready_receiver,
        },
        ack_sender: AckSender {
            producer: ack_producer,
            wakeup: wakeup_sender,
        },
        control_sender,
        host_events: host_event_receiver,
    };

    let compositor = CompositorThreadChannels {
        frame_sender: FrameSender {
            producer: frame_producer,
            frame_ready: frame_ready_sender,
        },
        ack_receiver: AckReceiver {
            consumer: ack_consumer,
            wakeup: wakeup_receiver,
        },
        control_receiver,
        host_events: host_event_sender,
    };

    (controller, compositor)
}
