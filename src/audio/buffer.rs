//! Lock-free ring buffer for captured PCM
//!
//! Single producer (capture ingestion) and single consumer (the pipeline
//! coordinator). Neither side ever blocks: writes drop what does not fit
//! and reads pad what is missing with silence.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::constants::PCM_BYTES_PER_SAMPLE;

/// Outcome of a write into the ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub written: usize,
    pub dropped: usize,
}

/// Bounded buffer of mono i16 samples for one stream
pub struct RingBuffer {
    queue: ArrayQueue<i16>,
    overflow_bytes: AtomicU64,
    overflow_events: AtomicU64,
    underrun_count: AtomicU64,
}

impl RingBuffer {
    /// Create a new ring buffer holding `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_bytes: AtomicU64::new(0),
            overflow_events: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
        }
    }

    /// Append samples until the buffer is full; the rest are dropped.
    /// Samples already buffered are never touched.
    pub fn write<I>(&self, samples: I) -> WriteOutcome
    where
        I: IntoIterator<Item = i16>,
    {
        let mut written = 0;
        let mut dropped = 0;
        let mut full = false;

        for sample in samples {
            if full {
                dropped += 1;
                continue;
            }
            match self.queue.push(sample) {
                Ok(()) => written += 1,
                Err(_) => {
                    full = true;
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            self.overflow_bytes
                .fetch_add((dropped * PCM_BYTES_PER_SAMPLE) as u64, Ordering::Relaxed);
            self.overflow_events.fetch_add(1, Ordering::Relaxed);
        }

        WriteOutcome { written, dropped }
    }

    /// Fill `out` completely: buffered samples first, silence for the
    /// remainder. Returns the number of buffered samples consumed; a short
    /// read counts as one underrun.
    pub fn read_block(&self, out: &mut [i16]) -> usize {
        let mut filled = 0;
        while filled < out.len() {
            match self.queue.pop() {
                Some(sample) => {
                    out[filled] = sample;
                    filled += 1;
                }
                None => break,
            }
        }

        if filled < out.len() {
            out[filled..].fill(0);
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }

        filled
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Buffered samples
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn available_bytes(&self) -> usize {
        self.len() * PCM_BYTES_PER_SAMPLE
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity() * PCM_BYTES_PER_SAMPLE
    }

    /// Free space in bytes
    pub fn free_bytes(&self) -> usize {
        (self.capacity() - self.len()) * PCM_BYTES_PER_SAMPLE
    }

    pub fn overflow_bytes(&self) -> u64 {
        self.overflow_bytes.load(Ordering::Relaxed)
    }

    pub fn overflow_events(&self) -> u64 {
        self.overflow_events.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(8);

        let outcome = buffer.write([1, 2, 3, 4]);
        assert_eq!(outcome, WriteOutcome { written: 4, dropped: 0 });
        assert_eq!(buffer.available_bytes(), 8);

        let mut out = [0i16; 4];
        assert_eq!(buffer.read_block(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.underrun_count(), 0);
    }

    #[test]
    fn test_short_read_is_zero_padded() {
        let buffer = RingBuffer::new(16);
        buffer.write([7, 8, 9]);

        let mut out = [-1i16; 6];
        assert_eq!(buffer.read_block(&mut out), 3);
        assert_eq!(out, [7, 8, 9, 0, 0, 0]);
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_empty_read_is_silence() {
        let buffer = RingBuffer::new(320);
        let mut out = [123i16; 160];

        assert_eq!(buffer.read_block(&mut out), 0);
        assert_eq!(out.len() * PCM_BYTES_PER_SAMPLE, 320);
        assert!(out.iter().all(|&s| s == 0));
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_overflow_drops_only_excess() {
        let buffer = RingBuffer::new(4);
        buffer.write([1, 2, 3]);

        let outcome = buffer.write([4, 5, 6]);
        assert_eq!(outcome, WriteOutcome { written: 1, dropped: 2 });
        assert_eq!(buffer.overflow_bytes(), 4);
        assert_eq!(buffer.overflow_events(), 1);

        let mut out = [0i16; 4];
        buffer.read_block(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn prop_overflow_preserves_buffered_data(
            capacity in 1usize..64,
            first in proptest::collection::vec(any::<i16>(), 0..64),
            second in proptest::collection::vec(any::<i16>(), 0..128),
        ) {
            let buffer = RingBuffer::new(capacity);
            let a = buffer.write(first.iter().copied());
            let b = buffer.write(second.iter().copied());

            prop_assert_eq!(a.written + a.dropped, first.len());
            prop_assert_eq!(b.written + b.dropped, second.len());
            prop_assert!(buffer.len() <= capacity);

            let expected: Vec<i16> = first.iter().chain(second.iter())
                .copied()
                .take(capacity)
                .collect();
            let mut out = vec![0i16; capacity];
            let filled = buffer.read_block(&mut out);
            prop_assert_eq!(filled, expected.len());
            prop_assert_eq!(&out[..filled], &expected[..]);
            prop_assert!(out[filled..].iter().all(|&s| s == 0));
        }
    }
}
