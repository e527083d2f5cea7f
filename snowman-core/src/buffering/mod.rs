//! Bounded block channel between the capture stage and the control stage.
//!
//! The capture side runs on the realtime audio thread, so every operation on
//! [`BlockSender`] is `try_*`: it never blocks and never waits on the control
//! thread. When the queue is full the configured [`OverflowPolicy`] decides
//! which block is lost.
//!
//! Producers that are not on a realtime thread (file replay) can opt into
//! backpressure with [`BlockSender::with_backpressure`]. A full queue then
//! makes `send` wait for the control stage instead of losing a block.
//!
//! Consumed buffers travel back through a second bounded queue so the capture
//! side can refill them instead of allocating on every rendering quantum.

pub mod chunk;
pub mod framer;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{
    bounded, Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use serde::{Deserialize, Serialize};

pub use crossbeam_channel::RecvTimeoutError;

use crate::buffering::chunk::SampleBuffer;
use crate::ipc::messages::CaptureMessage;

/// Default queue depth: 64 quanta of 128 frames ≈ 0.5 s at 16 kHz.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// How long a backpressured send waits before re-checking for a closed receiver.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(20);

/// What to do with a block when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued block and enqueue the new one.
    #[default]
    DropOldest,
    /// Keep the queue as is and discard the incoming block.
    DropNewest,
}

/// Result of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queued after evicting the oldest block (`DropOldest`).
    QueuedAfterEviction,
    /// The incoming block was discarded (`DropNewest`, or a lost race).
    Dropped,
    /// The control stage has gone away.
    Disconnected,
}

#[derive(Debug, Default)]
pub struct ChannelStats {
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub sent: u64,
    pub dropped: u64,
}

impl ChannelStats {
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Producer half, owned by the capture stage.
pub struct BlockSender {
    tx: Sender<CaptureMessage>,
    /// Receiver clone used only to evict the oldest block under `DropOldest`.
    evict: Receiver<CaptureMessage>,
    spare_rx: Receiver<SampleBuffer>,
    /// A buffer salvaged from an evicted or dropped message.
    parked: Option<SampleBuffer>,
    policy: OverflowPolicy,
    /// Wait for room instead of applying `policy`.
    backpressure: bool,
    closed: Arc<AtomicBool>,
    stats: Arc<ChannelStats>,
}

/// Consumer half, owned by the control loop.
pub struct BlockReceiver {
    rx: Receiver<CaptureMessage>,
    spare_tx: Sender<SampleBuffer>,
    closed: Arc<AtomicBool>,
    stats: Arc<ChannelStats>,
}

/// Create a matched sender/receiver pair holding at most `capacity` blocks.
pub fn create_block_channel(
    capacity: usize,
    policy: OverflowPolicy,
) -> (BlockSender, BlockReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    let (spare_tx, spare_rx) = bounded(capacity + 2);
    let closed = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(ChannelStats::default());

    let sender = BlockSender {
        tx,
        evict: rx.clone(),
        spare_rx,
        parked: None,
        policy,
        backpressure: false,
        closed: Arc::clone(&closed),
        stats: Arc::clone(&stats),
    };
    let receiver = BlockReceiver {
        rx,
        spare_tx,
        closed,
        stats,
    };
    (sender, receiver)
}

impl BlockSender {
    /// Make `send` block while the queue is full. Never use this on a
    /// realtime audio thread.
    pub fn with_backpressure(mut self) -> Self {
        self.backpressure = true;
        self
    }

    /// Enqueue `message`, applying the overflow policy when the queue is full
    /// (or waiting for room when backpressure is enabled).
    pub fn send(&mut self, message: CaptureMessage) -> SendOutcome {
        if self.closed.load(Ordering::Acquire) {
            return SendOutcome::Disconnected;
        }
        if self.backpressure {
            return self.send_waiting(message);
        }

        let message = match self.tx.try_send(message) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                return SendOutcome::Queued;
            }
            Err(TrySendError::Disconnected(_)) => return SendOutcome::Disconnected,
            Err(TrySendError::Full(message)) => message,
        };

        match self.policy {
            OverflowPolicy::DropNewest => {
                self.discard(message);
                SendOutcome::Dropped
            }
            OverflowPolicy::DropOldest => {
                match self.evict.try_recv() {
                    Ok(oldest) => self.discard(oldest),
                    // The consumer drained the queue in the meantime.
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => return SendOutcome::Disconnected,
                }
                match self.tx.try_send(message) {
                    Ok(()) => {
                        self.stats.sent.fetch_add(1, Ordering::Relaxed);
                        SendOutcome::QueuedAfterEviction
                    }
                    Err(TrySendError::Full(message)) => {
                        self.discard(message);
                        SendOutcome::Dropped
                    }
                    Err(TrySendError::Disconnected(_)) => SendOutcome::Disconnected,
                }
            }
        }
    }

    fn send_waiting(&mut self, mut message: CaptureMessage) -> SendOutcome {
        // `evict` keeps the channel connected, so a dropped receiver shows up
        // only through `closed`.
        loop {
            match self.tx.send_timeout(message, BACKPRESSURE_POLL) {
                Ok(()) => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                    return SendOutcome::Queued;
                }
                Err(SendTimeoutError::Timeout(pending)) => {
                    if self.closed.load(Ordering::Acquire) {
                        return SendOutcome::Disconnected;
                    }
                    message = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return SendOutcome::Disconnected,
            }
        }
    }

    /// A previously used buffer, cleared and ready to be refilled.
    pub fn take_spare(&mut self) -> Option<SampleBuffer> {
        self.parked.take().or_else(|| self.spare_rx.try_recv().ok())
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn has_backpressure(&self) -> bool {
        self.backpressure
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }

    fn discard(&mut self, message: CaptureMessage) {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        let mut buffer = message.into_buffer();
        buffer.clear();
        self.parked = Some(buffer);
    }
}

impl BlockReceiver {
    /// Wait up to `timeout` for the next block.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<CaptureMessage, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<CaptureMessage> {
        self.rx.try_recv().ok()
    }

    /// Hand a consumed buffer back to the capture side. Dropped if the
    /// recycle queue is already full.
    pub fn recycle(&self, mut buffer: SampleBuffer) {
        buffer.clear();
        let _ = self.spare_tx.try_send(buffer);
    }

    /// Blocks currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for BlockReceiver {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tag: i16) -> CaptureMessage {
        CaptureMessage::detect(SampleBuffer::Int16(vec![tag; 4]))
    }

    fn first_sample(message: CaptureMessage) -> i16 {
        match message.into_buffer() {
            SampleBuffer::Int16(v) => v[0],
            other => panic!("unexpected buffer {other:?}"),
        }
    }

    fn drain(rx: &BlockReceiver) -> Vec<i16> {
        let mut out = Vec::new();
        while let Some(m) = rx.try_recv() {
            out.push(first_sample(m));
        }
        out
    }

    #[test]
    fn queues_in_order_below_capacity() {
        let (mut tx, rx) = create_block_channel(8, OverflowPolicy::DropOldest);
        for i in 0..5 {
            assert_eq!(tx.send(block(i)), SendOutcome::Queued);
        }
        assert_eq!(rx.len(), 5);
        assert_eq!(drain(&rx), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drop_oldest_keeps_newest_blocks() {
        let (mut tx, rx) = create_block_channel(3, OverflowPolicy::DropOldest);
        for i in 0..3 {
            tx.send(block(i));
        }
        assert_eq!(tx.send(block(3)), SendOutcome::QueuedAfterEviction);
        assert_eq!(tx.send(block(4)), SendOutcome::QueuedAfterEviction);

        assert_eq!(drain(&rx), vec![2, 3, 4]);
        let snap = rx.stats().snapshot();
        assert_eq!(snap.sent, 5);
        assert_eq!(snap.dropped, 2);
    }

    #[test]
    fn drop_newest_keeps_oldest_blocks() {
        let (mut tx, rx) = create_block_channel(3, OverflowPolicy::DropNewest);
        for i in 0..3 {
            tx.send(block(i));
        }
        assert_eq!(tx.send(block(3)), SendOutcome::Dropped);
        assert_eq!(drain(&rx), vec![0, 1, 2]);
        assert_eq!(rx.stats().snapshot().dropped, 1);
    }

    #[test]
    fn overflow_salvages_buffer_as_spare() {
        let (mut tx, _rx) = create_block_channel(1, OverflowPolicy::DropNewest);
        tx.send(block(0));
        tx.send(block(1));
        let spare = tx.take_spare().expect("dropped buffer should be parked");
        assert!(spare.is_empty());
    }

    #[test]
    fn recycled_buffers_come_back_cleared() {
        let (mut tx, rx) = create_block_channel(4, OverflowPolicy::DropOldest);
        assert!(tx.take_spare().is_none());
        tx.send(block(7));
        let message = rx.try_recv().expect("queued block");
        rx.recycle(message.into_buffer());
        let spare = tx.take_spare().expect("recycled buffer");
        assert!(spare.is_empty());
    }

    #[test]
    fn backpressure_waits_for_room_instead_of_dropping() {
        let (tx, rx) = create_block_channel(2, OverflowPolicy::DropOldest);
        let mut tx = tx.with_backpressure();
        assert!(tx.has_backpressure());

        let producer = std::thread::spawn(move || {
            (0..10)
                .map(|i| tx.send(block(i)))
                .filter(|o| *o != SendOutcome::Queued)
                .count()
        });

        let mut seen = Vec::new();
        while seen.len() < 10 {
            if let Ok(m) = rx.recv_timeout(Duration::from_secs(5)) {
                seen.push(first_sample(m));
            } else {
                break;
            }
        }
        assert_eq!(producer.join().unwrap(), 0);
        assert_eq!(seen, (0..10).collect::<Vec<i16>>());
        assert_eq!(rx.stats().snapshot().dropped, 0);
    }

    #[test]
    fn backpressured_send_returns_when_receiver_drops() {
        let (tx, rx) = create_block_channel(1, OverflowPolicy::DropOldest);
        let mut tx = tx.with_backpressure();
        assert_eq!(tx.send(block(0)), SendOutcome::Queued);

        let producer = std::thread::spawn(move || tx.send(block(1)));
        std::thread::sleep(Duration::from_millis(30));
        drop(rx);
        assert_eq!(producer.join().unwrap(), SendOutcome::Disconnected);
    }

    #[test]
    fn sender_sees_disconnect_after_receiver_drop() {
        let (mut tx, rx) = create_block_channel(4, OverflowPolicy::DropOldest);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.send(block(1)), SendOutcome::Disconnected);
    }

    #[test]
    fn receiver_sees_disconnect_after_sender_drop() {
        let (mut tx, rx) = create_block_channel(4, OverflowPolicy::DropOldest);
        tx.send(block(1));
        drop(tx);
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_ok());
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
}
