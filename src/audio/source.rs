//! Per-stream PCM source
//!
//! Hands the coordinator exactly one block per stream per cycle, either
//! from the synthetic tone or from the stream's capture ring buffer.

use crate::audio::buffer::SharedRingBuffer;
use crate::audio::tone::ToneCursor;
use crate::constants::{DIAGNOSTIC_INTERVAL, PCM_BYTES_PER_SAMPLE};

/// Where a stream's PCM comes from
pub enum PcmSource {
    Tone(ToneCursor),
    Capture(SharedRingBuffer),
}

impl PcmSource {
    /// Fill `out` with the next block. Never fails and never blocks;
    /// a capture underrun yields silence for the missing part.
    pub fn next_block(&mut self, stream: usize, out: &mut [i16]) {
        match self {
            PcmSource::Tone(cursor) => cursor.fill(out),
            PcmSource::Capture(buffer) => {
                let filled = buffer.read_block(out);
                if filled < out.len() {
                    let underruns = buffer.underrun_count();
                    tracing::debug!(
                        stream,
                        available = filled * PCM_BYTES_PER_SAMPLE,
                        required = out.len() * PCM_BYTES_PER_SAMPLE,
                        "Capture underrun, padding with silence"
                    );
                    if underruns == 1 || underruns % DIAGNOSTIC_INTERVAL == 0 {
                        tracing::warn!("Stream {}: {} capture underruns", stream, underruns);
                    }
                }
            }
        }
    }

    /// Underruns seen so far (always zero for the tone)
    pub fn underrun_count(&self) -> u64 {
        match self {
            PcmSource::Tone(_) => 0,
            PcmSource::Capture(buffer) => buffer.underrun_count(),
        }
    }

    pub fn overflow_bytes(&self) -> u64 {
        match self {
            PcmSource::Tone(_) => 0,
            PcmSource::Capture(buffer) => buffer.overflow_bytes(),
        }
    }
}
