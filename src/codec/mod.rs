//! Frame codec
//!
//! Resolves a broadcast preset into plain codec parameters and provides
//! the per-stream frame encoder used by the pipeline coordinator.

pub mod encoder;
pub mod preset;

pub use encoder::OpusFrameEncoder;
pub use preset::{CodecPreset, QosParams};

use bytes::Bytes;

use crate::constants::PCM_BYTES_PER_SAMPLE;
use crate::error::CodecError;

/// Encodes one fixed-size PCM block into one fixed-size compressed frame.
///
/// Encoding is blocking CPU work. Implementations must not touch any
/// stream state other than their own codec instance.
pub trait FrameEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError>;
}

/// Codec parameters shared read-only by every stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    pub sample_rate_hz: u32,
    pub frame_duration_us: u32,
    pub octets_per_frame: u16,
    pub frame_blocks_per_sdu: u8,
}

impl CodecConfig {
    /// Build a configuration from raw values, rejecting anything that
    /// does not resolve to a usable frame.
    pub fn new(
        sample_rate_hz: u32,
        frame_duration_us: u32,
        octets_per_frame: u16,
        frame_blocks_per_sdu: u8,
    ) -> Result<Self, CodecError> {
        let config = Self {
            sample_rate_hz,
            frame_duration_us,
            octets_per_frame,
            frame_blocks_per_sdu,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_preset(preset: CodecPreset) -> Result<Self, CodecError> {
        Self::new(
            preset.sample_rate_hz(),
            preset.frame_duration_us(),
            preset.octets_per_frame(),
            preset.frame_blocks_per_sdu(),
        )
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        if self.sample_rate_hz == 0 {
            return Err(CodecError::InvalidParameter("sample rate not set".into()));
        }
        if self.frame_duration_us == 0 {
            return Err(CodecError::InvalidParameter("frame duration not set".into()));
        }
        if self.octets_per_frame == 0 {
            return Err(CodecError::InvalidParameter("octets per frame not set".into()));
        }
        if self.frame_blocks_per_sdu == 0 {
            return Err(CodecError::InvalidParameter(
                "frame blocks per SDU not set".into(),
            ));
        }
        if (self.sample_rate_hz as u64 * self.frame_duration_us as u64) % 1_000_000 != 0 {
            return Err(CodecError::InvalidParameter(format!(
                "{} us at {} Hz is not a whole number of samples",
                self.frame_duration_us, self.sample_rate_hz
            )));
        }
        Ok(())
    }

    /// PCM samples in one block (mono)
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate_hz as u64 * self.frame_duration_us as u64 / 1_000_000) as usize
    }

    /// Size of one PCM block in bytes
    pub fn pcm_block_bytes(&self) -> usize {
        self.samples_per_frame() * PCM_BYTES_PER_SAMPLE
    }

    /// Constant bitrate implied by the frame size and duration
    pub fn bitrate(&self) -> u32 {
        (self.octets_per_frame as u64 * 8 * 1_000_000 / self.frame_duration_us as u64) as u32
    }

    /// Size of one SDU handed to the transport
    pub fn sdu_bytes(&self) -> usize {
        self.octets_per_frame as usize * self.frame_blocks_per_sdu as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_resolution() {
        let config = CodecConfig::from_preset(CodecPreset::Broadcast16_2_1).unwrap();
        assert_eq!(config.samples_per_frame(), 160);
        assert_eq!(config.pcm_block_bytes(), 320);
        assert_eq!(config.bitrate(), 32_000);

        let config = CodecConfig::from_preset(CodecPreset::Broadcast48_2_1).unwrap();
        assert_eq!(config.samples_per_frame(), 480);
        assert_eq!(config.bitrate(), 80_000);
        assert_eq!(config.sdu_bytes(), 100);
    }

    #[test]
    fn test_rejects_unset_parameters() {
        assert!(CodecConfig::new(0, 10_000, 40, 1).is_err());
        assert!(CodecConfig::new(16_000, 0, 40, 1).is_err());
        assert!(CodecConfig::new(16_000, 10_000, 0, 1).is_err());
        assert!(CodecConfig::new(16_000, 10_000, 40, 0).is_err());
    }

    #[test]
    fn test_rejects_fractional_frame() {
        // 7.5 ms at 44.1 kHz is 330.75 samples
        assert!(CodecConfig::new(44_100, 7_500, 40, 1).is_err());
        assert!(CodecConfig::new(48_000, 7_500, 40, 1).is_ok());
    }
}
