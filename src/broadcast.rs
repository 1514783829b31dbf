//! Broadcast source setup
//!
//! One-shot glue around the pipeline: lays out streams and subgroups,
//! derives encryption and the broadcast id, and performs the startup
//! ordering the pipeline relies on (coordinator waiting first, transport
//! started, then credits pre-seeded).

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::audio::{create_shared_buffer, AudioCapture, CaptureIngest, SharedRingBuffer};
use crate::codec::{CodecConfig, CodecPreset, OpusFrameEncoder};
use crate::config::{AppConfig, SourceKind};
use crate::constants::BROADCAST_CODE_SIZE;
use crate::error::{Error, Result};
use crate::pipeline::{
    Coordinator, CreditReleaser, CreditTracker, PipelineHandle, PipelineStats, SourceMode,
};
use crate::transport::{IsoTransport, UdpWire};

/// Audio channel a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLocation {
    FrontLeft,
    FrontRight,
    FrontLeftRight,
}

#[derive(Debug, Clone)]
pub struct StreamParams {
    pub index: usize,
    pub location: ChannelLocation,
}

#[derive(Debug, Clone)]
pub struct SubgroupParams {
    pub streams: Range<usize>,
}

/// A configured, not yet started broadcast
pub struct BroadcastSource {
    config: AppConfig,
    codec: CodecConfig,
    broadcast_id: u32,
    broadcast_code: Option<[u8; BROADCAST_CODE_SIZE]>,
    streams: Vec<StreamParams>,
    subgroups: Vec<SubgroupParams>,
}

impl BroadcastSource {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let b = &config.broadcast;
        let codec = CodecConfig::from_preset(b.preset)?;
        let streams = stream_layout(b.stream_count);
        let subgroups = subgroup_layout(b.stream_count, b.subgroup_count);
        let broadcast_id = b.broadcast_id.unwrap_or_else(random_broadcast_id);
        let broadcast_code = encode_broadcast_code(&b.broadcast_code);

        tracing::info!(
            "Creating broadcast source with {} subgroups with {} streams",
            subgroups.len(),
            streams.len()
        );

        Ok(Self {
            config,
            codec,
            broadcast_id,
            broadcast_code,
            streams,
            subgroups,
        })
    }

    pub fn broadcast_id(&self) -> u32 {
        self.broadcast_id
    }

    pub fn is_encrypted(&self) -> bool {
        self.broadcast_code.is_some()
    }

    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }

    pub fn preset(&self) -> CodecPreset {
        self.config.broadcast.preset
    }

    pub fn streams(&self) -> &[StreamParams] {
        &self.streams
    }

    pub fn subgroups(&self) -> &[SubgroupParams] {
        &self.subgroups
    }

    /// Bring the broadcast up. A pipeline that fails to initialise is
    /// logged and the broadcast keeps running without audio.
    pub fn start(self) -> Result<RunningBroadcast> {
        let b = &self.config.broadcast;
        let stream_count = b.stream_count;
        let qos = b.preset.qos();

        let credits = Arc::new(CreditTracker::new(stream_count, b.enqueue_count));

        let wire = match self.config.transport.target {
            Some(target) => {
                let wire = UdpWire::connect(
                    target,
                    self.broadcast_id,
                    &b.name,
                    self.config.transport.send_buffer_size,
                )?;
                tracing::info!("Sending \"{}\" to {}", b.name, wire.target());
                Some(wire)
            }
            None => None,
        };
        let transport = Arc::new(IsoTransport::new(
            stream_count,
            b.enqueue_count,
            Duration::from_micros(qos.interval_us as u64),
            CreditReleaser::new(credits.clone()),
            wire,
        ));

        let (mode, capture) = match self.config.source.mode {
            SourceKind::Tone => (
                SourceMode::Tone {
                    frequency_hz: self.config.source.tone_frequency_hz,
                },
                None,
            ),
            SourceKind::Capture => {
                let (buffers, capture, ingest) = self.open_capture()?;
                (SourceMode::Capture(buffers), Some((capture, ingest)))
            }
        };

        let pipeline = match Coordinator::init(
            self.codec,
            mode,
            credits.clone(),
            transport.clone(),
            |_, codec| OpusFrameEncoder::new(codec),
        ) {
            Ok(coordinator) => match coordinator.spawn() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!("Audio pipeline not started: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::error!("Audio pipeline disabled: {}", e);
                None
            }
        };

        let capture = match capture {
            Some((mut capture, ingest)) => {
                capture.start(ingest)?;
                Some(capture)
            }
            None => None,
        };

        tracing::info!(
            "Starting broadcast source 0x{:06x} ({}, {})",
            self.broadcast_id,
            self.preset(),
            if self.is_encrypted() { "encrypted" } else { "unencrypted" }
        );
        transport.start_streams()?;
        tracing::info!("Broadcast source started");

        // Let the coordinator run `enqueue_count` frames ahead so the
        // transport is never idle
        credits.seed();

        Ok(RunningBroadcast {
            broadcast_id: self.broadcast_id,
            credits,
            transport,
            pipeline,
            capture,
        })
    }

    /// Ring buffers are sized from the capture period, so the device is
    /// opened first
    fn open_capture(&self) -> Result<(Vec<SharedRingBuffer>, AudioCapture, Arc<CaptureIngest>)> {
        let s = &self.config.source;
        let capture =
            AudioCapture::new(s.device_id.as_deref(), s.capture_sample_rate, s.capture_channels)?;
        let capacity = self.config.ring_buffer_samples_for(capture.period_frames());

        let buffers: Vec<SharedRingBuffer> = (0..self.streams.len())
            .map(|i| {
                let buffer = create_shared_buffer(capacity);
                tracing::info!("Initialized ring buf {}: capacity: {}", i, buffer.capacity_bytes());
                buffer
            })
            .collect();

        let ingest = Arc::new(CaptureIngest::new(
            s.capture_sample_rate,
            self.codec.sample_rate_hz,
            s.capture_channels,
            buffers.clone(),
        )?);

        Ok((buffers, capture, ingest))
    }
}

/// A started broadcast
pub struct RunningBroadcast {
    broadcast_id: u32,
    credits: Arc<CreditTracker>,
    transport: Arc<IsoTransport>,
    pipeline: Option<PipelineHandle>,
    capture: Option<AudioCapture>,
}

impl RunningBroadcast {
    pub fn broadcast_id(&self) -> u32 {
        self.broadcast_id
    }

    pub fn has_audio(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|p| p.is_running())
    }

    pub fn stats(&self) -> Option<PipelineStats> {
        self.pipeline.as_ref().map(|p| p.stats())
    }

    pub fn transport(&self) -> &IsoTransport {
        &self.transport
    }

    pub fn stop(mut self) -> Result<()> {
        tracing::info!("Stopping broadcast source");
        if let Some(capture) = self.capture.as_mut() {
            capture.stop();
        }
        self.transport.stop();
        self.credits.close();
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop()?;
        }
        Ok(())
    }
}

fn stream_layout(stream_count: usize) -> Vec<StreamParams> {
    (0..stream_count)
        .map(|index| StreamParams {
            index,
            location: match (stream_count, index % 2) {
                (1, _) => ChannelLocation::FrontLeftRight,
                (_, 0) => ChannelLocation::FrontLeft,
                _ => ChannelLocation::FrontRight,
            },
        })
        .collect()
}

fn subgroup_layout(stream_count: usize, subgroup_count: usize) -> Vec<SubgroupParams> {
    let per_subgroup = stream_count / subgroup_count;
    (0..subgroup_count)
        .map(|i| SubgroupParams {
            streams: i * per_subgroup..(i + 1) * per_subgroup,
        })
        .collect()
}

fn random_broadcast_id() -> u32 {
    let bytes = Uuid::new_v4().into_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

/// Zero-padded code, or `None` for an unencrypted broadcast
fn encode_broadcast_code(code: &str) -> Option<[u8; BROADCAST_CODE_SIZE]> {
    if code.is_empty() {
        return None;
    }
    let mut out = [0u8; BROADCAST_CODE_SIZE];
    let len = code.len().min(BROADCAST_CODE_SIZE);
    out[..len].copy_from_slice(&code.as_bytes()[..len]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{decode_datagram, Datagram};

    #[test]
    fn test_stream_locations() {
        let mono = stream_layout(1);
        assert_eq!(mono[0].location, ChannelLocation::FrontLeftRight);

        let stereo = stream_layout(2);
        assert_eq!(stereo[0].location, ChannelLocation::FrontLeft);
        assert_eq!(stereo[1].location, ChannelLocation::FrontRight);
    }

    #[test]
    fn test_subgroups_split_evenly() {
        let subgroups = subgroup_layout(4, 2);
        assert_eq!(subgroups[0].streams, 0..2);
        assert_eq!(subgroups[1].streams, 2..4);
    }

    #[test]
    fn test_broadcast_id_is_24_bits() {
        for _ in 0..32 {
            assert!(random_broadcast_id() <= 0x00FF_FFFF);
        }
    }

    #[test]
    fn test_broadcast_code_padding() {
        assert!(encode_broadcast_code("").is_none());
        let code = encode_broadcast_code("abc").unwrap();
        assert_eq!(&code[..4], b"abc\0");
    }

    #[test]
    fn test_new_resolves_config() {
        let mut config = AppConfig::default();
        config.broadcast.broadcast_id = Some(0xABCDEF);
        config.broadcast.broadcast_code = "1234".into();

        let source = BroadcastSource::new(config).unwrap();
        assert_eq!(source.broadcast_id(), 0xABCDEF);
        assert!(source.is_encrypted());
        assert_eq!(source.codec().samples_per_frame(), 160);
        assert_eq!(source.subgroups().len(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.broadcast.tx_buf_count = 1;
        assert!(matches!(BroadcastSource::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_tone_broadcast_end_to_end() {
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut config = AppConfig::default();
        config.broadcast.broadcast_id = Some(0x42);
        config.transport.target = Some(receiver.local_addr().unwrap());

        let running = BroadcastSource::new(config).unwrap().start().unwrap();
        assert!(running.has_audio());

        let mut buf = [0u8; 256];
        let mut seen = [Vec::new(), Vec::new()];
        let mut named = false;
        while seen.iter().any(|s| s.len() < 5) {
            let len = receiver.recv(&mut buf).unwrap();
            let packet = match decode_datagram(&buf[..len]).unwrap() {
                Datagram::Frame(packet) => packet,
                Datagram::Announce(announcement) => {
                    assert_eq!(announcement.broadcast_id, 0x42);
                    assert_eq!(announcement.name, "Broadcast Audio Source");
                    named = true;
                    continue;
                }
            };
            assert_eq!(packet.broadcast_id, 0x42);
            assert_eq!(packet.payload.len(), 40);
            seen[packet.stream as usize].push(packet.seq);
        }

        assert!(named);

        // Each stream's sequence numbers arrive in order from zero
        for seqs in &seen {
            for (i, seq) in seqs.iter().enumerate() {
                assert_eq!(*seq as usize, i);
            }
        }

        running.stop().unwrap();
    }
}
