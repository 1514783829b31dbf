//! Capture ingestion
//!
//! Runs in the capture callback context. Incoming interleaved PCM is
//! decimated to the codec rate and split per channel at ingestion time,
//! then written into each stream's ring buffer. Nothing here blocks.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::audio::buffer::SharedRingBuffer;
use crate::constants::{DIAGNOSTIC_INTERVAL, PCM_BYTES_PER_SAMPLE};
use crate::error::AudioError;

/// Splits capture deliveries into per-stream ring buffers
pub struct CaptureIngest {
    /// Capture frames per codec sample
    ratio: usize,
    /// Interleaved channels in each delivery
    channels: usize,
    /// One buffer per stream, indexed by stream
    buffers: Vec<SharedRingBuffer>,
    /// Capture frames still to skip before the next kept one. Carried
    /// across deliveries so chunk boundaries do not shift the decimation.
    phase: AtomicUsize,
    /// Samples of a trailing partial frame, discarded
    dropped_samples: AtomicU64,
    deliveries: AtomicU64,
}

impl CaptureIngest {
    pub fn new(
        capture_rate_hz: u32,
        codec_rate_hz: u32,
        channels: u16,
        buffers: Vec<SharedRingBuffer>,
    ) -> Result<Self, AudioError> {
        if codec_rate_hz == 0 || capture_rate_hz % codec_rate_hz != 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "cannot downsample {} Hz to {} Hz",
                capture_rate_hz, codec_rate_hz
            )));
        }
        if channels == 0 {
            return Err(AudioError::UnsupportedFormat("zero capture channels".into()));
        }

        Ok(Self {
            ratio: (capture_rate_hz / codec_rate_hz) as usize,
            channels: channels as usize,
            buffers,
            phase: AtomicUsize::new(0),
            dropped_samples: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
        })
    }

    /// Streams that receive captured audio: one per capture channel
    pub fn fed_streams(&self) -> usize {
        self.buffers.len().min(self.channels)
    }

    /// Handle one delivery of interleaved capture samples. Deliveries may
    /// be any size; every `ratio`-th capture frame is kept across calls.
    pub fn on_samples(&self, interleaved: &[i16]) {
        if interleaved.is_empty() {
            return;
        }

        let frames = interleaved.len() / self.channels;
        let partial = interleaved.len() % self.channels;
        if partial > 0 {
            let dropped = self.dropped_samples.fetch_add(partial as u64, Ordering::Relaxed);
            if dropped == 0 {
                tracing::warn!("Capture delivery ends mid-frame, {} samples dropped", partial);
            }
        }

        // Only the capture callback calls this, so phase has a single writer
        let phase = self.phase.load(Ordering::Relaxed);
        let nsamples = if frames > phase {
            (frames - phase - 1) / self.ratio + 1
        } else {
            0
        };
        self.phase
            .store(phase + nsamples * self.ratio - frames, Ordering::Relaxed);

        let stride = self.channels * self.ratio;
        let requested = nsamples * PCM_BYTES_PER_SAMPLE;

        for (channel, buffer) in self.buffers.iter().take(self.fed_streams()).enumerate() {
            let decimated = interleaved
                .iter()
                .skip(phase * self.channels + channel)
                .step_by(stride)
                .take(nsamples)
                .copied();

            let outcome = buffer.write(decimated);
            if outcome.dropped > 0 {
                tracing::warn!(
                    "Not enough room for samples in stream {} buffer: {} < {}, total capacity: {}",
                    channel,
                    outcome.written * PCM_BYTES_PER_SAMPLE,
                    requested,
                    buffer.capacity_bytes()
                );
            }
        }

        let count = self.deliveries.fetch_add(1, Ordering::Relaxed) + 1;
        if count % DIAGNOSTIC_INTERVAL == 0 {
            tracing::info!("Capture data received (count = {})", count);
        }
    }

    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Samples discarded because a delivery ended mid-frame
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }
}
