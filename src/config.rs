//! Application configuration
//!
//! Loaded from TOML; every section falls back to its defaults. The values
//! are checked once at startup by [`AppConfig::validate`] and then handed
//! to the pipeline as plain values.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::codec::CodecPreset;
use crate::constants::{
    BROADCAST_CODE_SIZE, BROADCAST_NAME_LEN_MAX, BROADCAST_NAME_LEN_MIN, MAX_STREAMS,
};
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub broadcast: BroadcastConfig,
    pub source: SourceConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

/// Broadcast layout and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Broadcast name, announced to receivers next to the frames
    pub name: String,
    /// Number of audio streams
    pub stream_count: usize,
    /// Number of subgroups the streams are split into
    pub subgroup_count: usize,
    /// Codec quality preset
    pub preset: CodecPreset,
    /// Encryption code; empty for an unencrypted broadcast
    pub broadcast_code: String,
    /// Frames each stream may have in flight
    pub enqueue_count: usize,
    /// Transport buffer pool size shared by all streams
    pub tx_buf_count: usize,
    /// Fixed 24-bit broadcast id; random when unset
    pub broadcast_id: Option<u32>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            name: "Broadcast Audio Source".to_string(),
            stream_count: 2,
            subgroup_count: 1,
            preset: CodecPreset::default(),
            broadcast_code: String::new(),
            enqueue_count: 3,
            tx_buf_count: 6,
            broadcast_id: None,
        }
    }
}

/// PCM source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Tone,
    Capture,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub mode: SourceKind,
    pub tone_frequency_hz: u32,
    /// Capture device, default input when unset
    pub device_id: Option<String>,
    pub capture_sample_rate: u32,
    pub capture_channels: u16,
    /// Minimum ring buffer length per stream in milliseconds of audio;
    /// raised to fit one capture callback plus one codec block
    pub ring_buffer_ms: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceKind::Tone,
            tone_frequency_hz: 1000,
            device_id: None,
            capture_sample_rate: 48_000,
            capture_channels: 2,
            ring_buffer_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Where paced frames are sent; frames are discarded when unset
    pub target: Option<SocketAddr>,
    pub send_buffer_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set
    pub level: String,
    /// Seconds between stats snapshots; 0 disables them
    pub stats_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stats_interval_secs: 10,
        }
    }
}

impl AppConfig {
    /// Parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "broadcast-audio-source")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, or use defaults when there is no file
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Startup checks on values that must agree with each other
    pub fn validate(&self) -> Result<()> {
        let b = &self.broadcast;

        if b.broadcast_code.len() > BROADCAST_CODE_SIZE {
            return Err(Error::Config(format!(
                "broadcast code is {} bytes, at most {} allowed",
                b.broadcast_code.len(),
                BROADCAST_CODE_SIZE
            )));
        }
        if !(BROADCAST_NAME_LEN_MIN..=BROADCAST_NAME_LEN_MAX).contains(&b.name.len()) {
            return Err(Error::Config(format!(
                "broadcast name must be {} to {} bytes, got {}",
                BROADCAST_NAME_LEN_MIN,
                BROADCAST_NAME_LEN_MAX,
                b.name.len()
            )));
        }
        if b.stream_count == 0 || b.stream_count > MAX_STREAMS {
            return Err(Error::Config(format!(
                "stream_count must be between 1 and {}, got {}",
                MAX_STREAMS, b.stream_count
            )));
        }
        if b.subgroup_count == 0 || b.stream_count % b.subgroup_count != 0 {
            return Err(Error::Config(format!(
                "{} streams cannot be split evenly into {} subgroups",
                b.stream_count, b.subgroup_count
            )));
        }
        if b.enqueue_count == 0 {
            return Err(Error::Config("enqueue_count must be at least 1".into()));
        }
        let needed = b.enqueue_count * b.stream_count;
        if b.tx_buf_count < needed {
            return Err(Error::Config(format!(
                "tx_buf_count should be at least enqueue_count * stream_count ({})",
                needed
            )));
        }
        if let Some(id) = b.broadcast_id {
            if id > 0x00FF_FFFF {
                return Err(Error::Config(format!(
                    "broadcast id 0x{:x} exceeds 24 bits",
                    id
                )));
            }
        }

        let s = &self.source;
        if s.mode == SourceKind::Tone && s.tone_frequency_hz == 0 {
            return Err(Error::Config("tone_frequency_hz must be positive".into()));
        }
        if s.mode == SourceKind::Capture {
            let codec_rate = b.preset.sample_rate_hz();
            if s.capture_sample_rate == 0 || s.capture_sample_rate % codec_rate != 0 {
                return Err(Error::Config(format!(
                    "capture rate {} Hz is not a multiple of the {} Hz preset rate",
                    s.capture_sample_rate, codec_rate
                )));
            }
            if s.capture_channels == 0 {
                return Err(Error::Config("capture_channels must be at least 1".into()));
            }
            if s.ring_buffer_ms == 0 {
                return Err(Error::Config("ring_buffer_ms must be positive".into()));
            }
        }

        Ok(())
    }

    /// Ring buffer capacity per stream in samples at the codec rate
    pub fn ring_buffer_samples(&self) -> usize {
        (self.broadcast.preset.sample_rate_hz() as u64 * self.source.ring_buffer_ms as u64 / 1000)
            as usize
    }

    /// Ring capacity for a capture that delivers up to `period_frames`
    /// frames per callback: room for one whole delivery on top of the
    /// block the encoder is waiting for
    pub fn ring_buffer_samples_for(&self, period_frames: u32) -> usize {
        let codec_rate = self.broadcast.preset.sample_rate_hz();
        let ratio = (self.source.capture_sample_rate / codec_rate).max(1);
        let per_delivery = period_frames.div_ceil(ratio) as usize;
        let block = (codec_rate as u64 * self.broadcast.preset.frame_duration_us() as u64
            / 1_000_000) as usize;
        self.ring_buffer_samples().max(per_delivery + block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.broadcast.stream_count, 2);
        assert_eq!(config.broadcast.enqueue_count, 3);
        assert_eq!(config.ring_buffer_samples(), 320);
    }

    #[test]
    fn test_ring_fits_capture_period() {
        let mut config = AppConfig::default();
        config.source.mode = SourceKind::Capture;

        // 1 ms deliveries: the configured 20 ms is enough
        assert_eq!(config.ring_buffer_samples_for(48), 320);
        // 1024-frame deliveries at 48 kHz: 342 samples plus one 160 block
        assert_eq!(config.ring_buffer_samples_for(1024), 342 + 160);
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [broadcast]
            preset = "48_2_1"
            broadcast_code = "secret"

            [source]
            mode = "capture"
            "#,
        )
        .unwrap();

        assert_eq!(config.broadcast.preset, CodecPreset::Broadcast48_2_1);
        assert_eq!(config.broadcast.stream_count, 2);
        assert_eq!(config.source.mode, SourceKind::Capture);
        assert_eq!(config.source.capture_sample_rate, 48_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_broadcast_code_length() {
        let mut config = AppConfig::default();
        config.broadcast.broadcast_code = "0123456789abcdef".into();
        assert!(config.validate().is_ok());
        config.broadcast.broadcast_code.push('x');
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_broadcast_name_length() {
        let mut config = AppConfig::default();
        config.broadcast.name = "Hall".into();
        assert!(config.validate().is_ok());
        config.broadcast.name = "Bar".into();
        assert!(config.validate().is_err());
        config.broadcast.name = "x".repeat(128);
        assert!(config.validate().is_ok());
        config.broadcast.name.push('x');
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_buffer_pool_sizing() {
        let mut config = AppConfig::default();
        config.broadcast.enqueue_count = 4;
        assert!(config.validate().is_err());
        config.broadcast.tx_buf_count = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_subgroup_layout() {
        let mut config = AppConfig::default();
        config.broadcast.stream_count = 3;
        config.broadcast.subgroup_count = 2;
        config.broadcast.tx_buf_count = 9;
        assert!(config.validate().is_err());
        config.broadcast.subgroup_count = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_capture_rate_must_divide() {
        let mut config = AppConfig::default();
        config.source.mode = SourceKind::Capture;
        config.source.capture_sample_rate = 44_100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.broadcast.broadcast_id = Some(0x123456);
        config.transport.target = Some("127.0.0.1:5000".parse().unwrap());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.broadcast.broadcast_id, Some(0x123456));
        assert_eq!(loaded.transport.target, config.transport.target);
    }
}
