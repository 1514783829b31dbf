//! Per-stream pipeline state

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::PcmSource;
use crate::codec::FrameEncoder;

/// Counters the coordinator publishes for each stream. Written only by
/// the coordinator thread, readable from anywhere.
#[derive(Debug, Default)]
pub struct StreamCounters {
    sent: AtomicU64,
    rejected: AtomicU64,
    cycles: AtomicU64,
    next_seq: AtomicU64,
}

impl StreamCounters {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Completed cycles, accepted or not
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Sequence number the next frame will carry
    pub fn next_seq(&self) -> u16 {
        self.next_seq.load(Ordering::Relaxed) as u16
    }
}

/// Snapshot of one stream for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub stream: usize,
    pub next_seq: u16,
    pub sent: u64,
    pub rejected: u64,
    /// Cycles this stream took part in, whether the send was accepted or not
    pub cycles: u64,
    pub credits: usize,
    pub underruns: u64,
    pub overflow_bytes: u64,
}

/// Everything the coordinator owns for one stream
pub struct StreamSlot<E> {
    id: usize,
    /// Only ever touched by the coordinator
    seq_num: u16,
    sent_count: u64,
    encoder: E,
    source: PcmSource,
    counters: Arc<StreamCounters>,
}

impl<E: FrameEncoder> StreamSlot<E> {
    pub fn new(id: usize, encoder: E, source: PcmSource) -> Self {
        Self {
            id,
            seq_num: 0,
            sent_count: 0,
            encoder,
            source,
            counters: Arc::new(StreamCounters::default()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn seq_num(&self) -> u16 {
        self.seq_num
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    pub fn counters(&self) -> Arc<StreamCounters> {
        self.counters.clone()
    }

    pub(crate) fn source_mut(&mut self) -> &mut PcmSource {
        &mut self.source
    }

    pub(crate) fn encoder_mut(&mut self) -> &mut E {
        &mut self.encoder
    }

    pub(crate) fn source(&self) -> &PcmSource {
        &self.source
    }

    /// Take the sequence number for this cycle's hand-off and advance it.
    /// Called exactly once per cycle whatever the transport answers.
    pub(crate) fn take_seq(&mut self) -> u16 {
        let seq = self.seq_num;
        self.seq_num = self.seq_num.wrapping_add(1);
        self.counters
            .next_seq
            .store(self.seq_num as u64, Ordering::Relaxed);
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        seq
    }

    /// Record an accepted frame, returning the new total
    pub(crate) fn record_sent(&mut self) -> u64 {
        self.sent_count += 1;
        self.counters.sent.store(self.sent_count, Ordering::Relaxed);
        self.sent_count
    }

    pub(crate) fn record_rejected(&mut self) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn set_seq_num(&mut self, seq: u16) {
        self.seq_num = seq;
    }
}
