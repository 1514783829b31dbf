//! Opus frame encoder
//!
//! Constant-bitrate mono encoding so every frame has exactly the
//! configured octets-per-frame size.

use bytes::Bytes;
use opus::{Application, Bitrate, Channels, Encoder};

use crate::codec::{CodecConfig, FrameEncoder};
use crate::error::CodecError;

/// Opus encoder wrapper, one instance per stream
pub struct OpusFrameEncoder {
    encoder: Encoder,
    config: CodecConfig,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
    /// Frames the codec emitted short and had to be padded
    frames_padded: u64,
}

impl OpusFrameEncoder {
    /// Create a new encoder for the shared codec configuration
    pub fn new(config: &CodecConfig) -> Result<Self, CodecError> {
        config.validate()?;

        let mut encoder = Encoder::new(config.sample_rate_hz, Channels::Mono, Application::Audio)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, config)?;

        Ok(Self {
            encoder,
            config: *config,
            encode_buffer: vec![0u8; config.octets_per_frame as usize],
            frames_encoded: 0,
            bytes_produced: 0,
            frames_padded: 0,
        })
    }

    fn configure_encoder(encoder: &mut Encoder, config: &CodecConfig) -> Result<(), CodecError> {
        // Hard CBR: the frame size is fixed by the broadcast preset
        encoder
            .set_vbr(false)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to disable VBR: {}", e)))?;

        encoder
            .set_bitrate(Bitrate::Bits(config.bitrate() as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_inband_fec(false)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        Ok(())
    }

    /// Get expected samples per frame
    pub fn samples_per_frame(&self) -> usize {
        self.config.samples_per_frame()
    }

    /// Get current configuration
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            frames_padded: self.frames_padded,
        }
    }
}

impl FrameEncoder for OpusFrameEncoder {
    /// Input must be exactly one block of mono i16 samples
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.config.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        let octets = self.config.octets_per_frame as usize;
        let size = self
            .encoder
            .encode(pcm, &mut self.encode_buffer[..octets])
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        if size < octets {
            opus::packet::pad(&mut self.encode_buffer[..octets], size)
                .map_err(|e| CodecError::EncodingFailed(format!("Failed to pad frame: {}", e)))?;
            self.frames_padded += 1;
        }

        self.frames_encoded += 1;
        self.bytes_produced += octets as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..octets]))
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub frames_padded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecPreset;

    #[test]
    fn test_encoder_creation() {
        for preset in CodecPreset::ALL {
            let config = CodecConfig::from_preset(preset).unwrap();
            let encoder = OpusFrameEncoder::new(&config);
            assert!(encoder.is_ok(), "preset {} failed", preset);
        }
    }

    #[test]
    fn test_frames_have_fixed_size() {
        let config = CodecConfig::from_preset(CodecPreset::Broadcast16_2_1).unwrap();
        let mut encoder = OpusFrameEncoder::new(&config).unwrap();

        let silence = vec![0i16; encoder.samples_per_frame()];
        let tone: Vec<i16> = (0..encoder.samples_per_frame())
            .map(|i| ((i as f32 * 0.39).sin() * 12_000.0) as i16)
            .collect();

        for pcm in [&silence, &tone, &silence] {
            let frame = encoder.encode(pcm).unwrap();
            assert_eq!(frame.len(), 40);
        }
        assert_eq!(encoder.stats().frames_encoded, 3);
        assert_eq!(encoder.stats().bytes_produced, 120);
    }

    #[test]
    fn test_wrong_block_length() {
        let config = CodecConfig::from_preset(CodecPreset::Broadcast24_2_1).unwrap();
        let mut encoder = OpusFrameEncoder::new(&config).unwrap();

        let result = encoder.encode(&[0i16; 100]);
        assert!(matches!(result, Err(CodecError::InvalidFrameSize(100))));
    }

    #[test]
    fn test_unsupported_sample_rate() {
        // 44.1 kHz is a valid frame but not a rate the codec accepts
        let config = CodecConfig::new(44_100, 10_000, 40, 1).unwrap();
        assert!(matches!(
            OpusFrameEncoder::new(&config),
            Err(CodecError::EncoderInit(_))
        ));
    }
}
