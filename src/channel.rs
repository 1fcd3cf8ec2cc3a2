//! Bounded frame channel.
//!
//! Fixed-capacity FIFO between every pair of stages and the pipeline's only
//! backpressure mechanism: a slow consumer stalls its producer once the channel is
//! full. Nothing is dropped or reordered.
//!
//! Blocking operations wake every `POLL_INTERVAL` to re-check the shutdown signal,
//! so a stage blocked on `put`/`get` observes a stop request without preemption.
//! After shutdown, `get` still returns packets already queued and reports
//! end-of-stream only once the channel is empty.

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use std::time::{Duration, Instant};

use crate::frame::{Frame, FramePacket};
use crate::shutdown::ShutdownSignal;

/// Default capacity: roughly 1-2 seconds of frames at typical detection latency.
pub const DEFAULT_CAPACITY: usize = 60;

/// How often a blocked `put`/`get` re-checks the shutdown signal.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a `put`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Shutdown was signaled while waiting for capacity; the packet was not queued.
    Shutdown,
    /// The receiving stage is gone.
    Disconnected,
}

/// Result of a timed `get`.
#[derive(Clone, Debug)]
pub enum Received {
    Frame(Frame),
    EndOfStream,
    TimedOut,
}

/// Create a bounded frame channel of `capacity` slots (minimum 1).
pub fn frame_channel(capacity: usize, shutdown: ShutdownSignal) -> (FrameSender, FrameReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    (
        FrameSender {
            tx,
            shutdown: shutdown.clone(),
            capacity,
        },
        FrameReceiver { rx, shutdown },
    )
}

/// Producer end of a frame channel.
#[derive(Clone, Debug)]
pub struct FrameSender {
    tx: Sender<FramePacket>,
    shutdown: ShutdownSignal,
    capacity: usize,
}

impl FrameSender {
    /// Queue a frame, blocking while the channel is full.
    pub fn put(&self, frame: Frame) -> SendOutcome {
        self.put_packet(FramePacket::Frame(frame))
    }

    /// Queue a packet, blocking while the channel is full, until shutdown.
    pub fn put_packet(&self, packet: FramePacket) -> SendOutcome {
        let mut packet = match self.tx.try_send(packet) {
            Ok(()) => return SendOutcome::Delivered,
            Err(TrySendError::Disconnected(_)) => return SendOutcome::Disconnected,
            Err(TrySendError::Full(packet)) => packet,
        };
        loop {
            if self.shutdown.is_triggered() {
                return SendOutcome::Shutdown;
            }
            match self.tx.send_timeout(packet, POLL_INTERVAL) {
                Ok(()) => return SendOutcome::Delivered,
                Err(SendTimeoutError::Timeout(p)) => packet = p,
                Err(SendTimeoutError::Disconnected(_)) => return SendOutcome::Disconnected,
            }
        }
    }

    /// Push `copies` end-of-stream markers so a consumer blocked on `get` is released.
    ///
    /// Returns how many markers were queued. Stops early if the consumer is gone, or
    /// if shutdown is signaled while the channel is full (the consumer's `get` then
    /// returns end-of-stream on its own once it drains).
    pub fn end_of_stream(&self, copies: usize) -> usize {
        let mut delivered = 0;
        for _ in 0..copies {
            match self.put_packet(FramePacket::EndOfStream) {
                SendOutcome::Delivered => delivered += 1,
                SendOutcome::Shutdown | SendOutcome::Disconnected => break,
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer end of a frame channel.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: Receiver<FramePacket>,
    shutdown: ShutdownSignal,
}

impl FrameReceiver {
    /// Block until a packet is available.
    ///
    /// Returns `EndOfStream` for a queued marker, when every sender is gone, or when
    /// shutdown is signaled and nothing is left to drain.
    pub fn get(&self) -> FramePacket {
        loop {
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(packet) => return packet,
                Err(RecvTimeoutError::Disconnected) => return FramePacket::EndOfStream,
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.is_triggered() {
                        return FramePacket::EndOfStream;
                    }
                }
            }
        }
    }

    /// Like [`get`](Self::get) but gives up after `timeout` with `Received::TimedOut`.
    pub fn get_timeout(&self, timeout: Duration) -> Received {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Received::TimedOut;
            }
            let wait = (deadline - now).min(POLL_INTERVAL);
            match self.rx.recv_timeout(wait) {
                Ok(FramePacket::Frame(frame)) => return Received::Frame(frame),
                Ok(FramePacket::EndOfStream) => return Received::EndOfStream,
                Err(RecvTimeoutError::Disconnected) => return Received::EndOfStream,
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.is_triggered() {
                        return Received::EndOfStream;
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
