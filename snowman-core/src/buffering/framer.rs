//! Regroups device callbacks of arbitrary length into fixed rendering quanta.
//!
//! `cpal` makes no promise about callback sizes, while the capture stage works
//! on exact quanta (128 frames by default). The framer owns a heap ring of a
//! few quanta, allocated once up front; `push` never allocates.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Quanta of headroom held by the ring.
const RING_QUANTA: usize = 4;

pub struct QuantumFramer {
    producer: HeapProd<f32>,
    consumer: HeapCons<f32>,
    scratch: Vec<f32>,
    quantum: usize,
}

impl QuantumFramer {
    pub fn new(quantum: usize) -> Self {
        let quantum = quantum.max(1);
        let (producer, consumer) = HeapRb::<f32>::new(quantum * RING_QUANTA).split();
        Self {
            producer,
            consumer,
            scratch: vec![0.0; quantum],
            quantum,
        }
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Samples waiting for a full quantum.
    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Append `samples` and call `emit` once per completed quantum, in order.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        let mut rest = samples;
        loop {
            let written = self.producer.push_slice(rest);
            rest = &rest[written..];

            while self.consumer.occupied_len() >= self.quantum {
                let n = self.consumer.pop_slice(&mut self.scratch);
                emit(&self.scratch[..n]);
            }

            if rest.is_empty() {
                break;
            }
        }
    }

    /// Drop any partial quantum.
    pub fn clear(&mut self) {
        let occupied = self.consumer.occupied_len();
        self.consumer.skip(occupied);
    }
}
