//! Broadcast quality presets
//!
//! Each preset pins the codec parameters (sample rate, frame duration,
//! octets per frame) together with the isochronous QoS the transport
//! is created with.

use serde::{Deserialize, Serialize};

/// Isochronous channel QoS parameters for a preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosParams {
    /// SDU interval in microseconds
    pub interval_us: u32,
    /// Maximum SDU size in octets
    pub sdu: u16,
    /// Number of retransmissions
    pub retransmissions: u8,
    /// Maximum transport latency in milliseconds
    pub latency_ms: u16,
    /// Presentation delay in microseconds
    pub presentation_delay_us: u32,
}

/// The mutually exclusive broadcast presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CodecPreset {
    /// 16 kHz, 10 ms, 40 octets per frame
    #[default]
    #[serde(rename = "16_2_1")]
    Broadcast16_2_1,
    /// 24 kHz, 10 ms, 60 octets per frame
    #[serde(rename = "24_2_1")]
    Broadcast24_2_1,
    /// 48 kHz, 10 ms, 100 octets per frame, high-reliability QoS
    #[serde(rename = "48_2_1")]
    Broadcast48_2_1,
}

impl CodecPreset {
    pub const ALL: [CodecPreset; 3] = [
        CodecPreset::Broadcast16_2_1,
        CodecPreset::Broadcast24_2_1,
        CodecPreset::Broadcast48_2_1,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CodecPreset::Broadcast16_2_1 => "16_2_1",
            CodecPreset::Broadcast24_2_1 => "24_2_1",
            CodecPreset::Broadcast48_2_1 => "48_2_1",
        }
    }

    pub fn sample_rate_hz(&self) -> u32 {
        match self {
            CodecPreset::Broadcast16_2_1 => 16_000,
            CodecPreset::Broadcast24_2_1 => 24_000,
            CodecPreset::Broadcast48_2_1 => 48_000,
        }
    }

    pub fn frame_duration_us(&self) -> u32 {
        10_000
    }

    pub fn octets_per_frame(&self) -> u16 {
        match self {
            CodecPreset::Broadcast16_2_1 => 40,
            CodecPreset::Broadcast24_2_1 => 60,
            CodecPreset::Broadcast48_2_1 => 100,
        }
    }

    pub fn frame_blocks_per_sdu(&self) -> u8 {
        1
    }

    pub fn qos(&self) -> QosParams {
        match self {
            CodecPreset::Broadcast16_2_1 => QosParams {
                interval_us: 10_000,
                sdu: 40,
                retransmissions: 2,
                latency_ms: 10,
                presentation_delay_us: 40_000,
            },
            CodecPreset::Broadcast24_2_1 => QosParams {
                interval_us: 10_000,
                sdu: 60,
                retransmissions: 2,
                latency_ms: 10,
                presentation_delay_us: 40_000,
            },
            CodecPreset::Broadcast48_2_1 => QosParams {
                interval_us: 10_000,
                sdu: 100,
                retransmissions: 4,
                latency_ms: 20,
                presentation_delay_us: 80_000,
            },
        }
    }
}

impl std::fmt::Display for CodecPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdu_matches_frame_size() {
        for preset in CodecPreset::ALL {
            let qos = preset.qos();
            assert_eq!(
                qos.sdu as usize,
                preset.octets_per_frame() as usize * preset.frame_blocks_per_sdu() as usize
            );
            assert_eq!(qos.interval_us, preset.frame_duration_us());
        }
    }

    #[test]
    fn test_preset_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            preset: CodecPreset,
        }

        let parsed: Wrapper = toml::from_str("preset = \"24_2_1\"").unwrap();
        assert_eq!(parsed.preset, CodecPreset::Broadcast24_2_1);
        assert_eq!(parsed.preset.to_string(), "24_2_1");
    }
}
