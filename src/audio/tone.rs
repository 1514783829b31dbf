//! Synthetic test tone
//!
//! A sine waveform precomputed once per codec configuration and replayed
//! by every stream through its own cursor.

use std::f32::consts::PI;
use std::sync::Arc;

use crate::constants::TONE_AMPLITUDE;

/// Precomputed waveform holding a whole number of periods
#[derive(Debug, Clone)]
pub struct ToneWaveform {
    samples: Arc<[i16]>,
}

impl ToneWaveform {
    /// Fill a waveform long enough to serve blocks of `block_len` samples.
    ///
    /// The buffer length is the smallest multiple of the tone period that
    /// is at least one block, so wrapping the cursor keeps the phase.
    pub fn new(frequency_hz: u32, sample_rate_hz: u32, block_len: usize) -> Self {
        let period = (sample_rate_hz / frequency_hz.max(1)).max(1) as usize;
        let periods = block_len.max(1).div_ceil(period);
        let step = 2.0 * PI / period as f32;

        let one_period: Vec<i16> = (0..period)
            .map(|i| (TONE_AMPLITUDE as f32 * (i as f32 * step).sin()) as i16)
            .collect();
        let samples: Vec<i16> = one_period
            .iter()
            .copied()
            .cycle()
            .take(periods * period)
            .collect();

        Self {
            samples: samples.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// A fresh cursor positioned at the start of the waveform
    pub fn cursor(&self) -> ToneCursor {
        ToneCursor {
            waveform: self.clone(),
            position: 0,
        }
    }
}

/// Per-stream read position into a shared waveform
#[derive(Debug, Clone)]
pub struct ToneCursor {
    waveform: ToneWaveform,
    position: usize,
}

impl ToneCursor {
    /// Copy the next window into `out`, wrapping at the waveform end
    pub fn fill(&mut self, out: &mut [i16]) {
        let samples = self.waveform.samples();
        let len = samples.len();
        let mut written = 0;

        while written < out.len() {
            let run = (len - self.position).min(out.len() - written);
            out[written..written + run]
                .copy_from_slice(&samples[self.position..self.position + run]);
            written += run;
            self.position = (self.position + run) % len;
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}
