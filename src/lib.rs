//! # Broadcast Audio Source
//!
//! Real-time multi-stream audio broadcast source: PCM is encoded into
//! fixed-size frames and handed to a paced transport that accepts one
//! frame per stream per SDU interval.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  PCM sources (audio)                                                 │
//! │  ┌──────────────┐        ┌──────────────────────────────────────┐   │
//! │  │ Tone cursor  │   or   │ cpal capture ─▶ ingest ─▶ ring bufs  │   │
//! │  └──────┬───────┘        └──────────────────┬───────────────────┘   │
//! │         └──────────────┬────────────────────┘                       │
//! │                        ▼                                             │
//! │  ┌────────────────────────────────────────────────────────────────┐ │
//! │  │ Coordinator (pipeline), one worker thread                      │ │
//! │  │   acquire credit on every stream (barrier)                     │ │
//! │  │   next PCM block ─▶ frame encoder (codec) ─▶ seq number        │ │
//! │  └──────────────────────────────┬─────────────────────────────────┘ │
//! │                 send(stream, frame, seq)        ▲ on_complete(stream)│
//! │                                 ▼               │                    │
//! │  ┌────────────────────────────────────────────────────────────────┐ │
//! │  │ IsoTransport (transport): one queue per stream, paced drain    │ │
//! │  │   optional UDP wire: [id|stream|seq|len|payload]               │ │
//! │  └────────────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod broadcast;
pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Bytes per mono 16-bit PCM sample
    pub const PCM_BYTES_PER_SAMPLE: usize = 2;

    /// Peak amplitude of the synthetic tone
    pub const TONE_AMPLITUDE: i16 = i16::MAX - 3000;

    /// Periodic diagnostics are logged once every this many events
    pub const DIAGNOSTIC_INTERVAL: u64 = 1000;

    /// Maximum number of broadcast streams
    pub const MAX_STREAMS: usize = 16;

    /// Size of a broadcast encryption code in bytes
    pub const BROADCAST_CODE_SIZE: usize = 16;

    /// Broadcast name length limits in bytes
    pub const BROADCAST_NAME_LEN_MIN: usize = 4;
    pub const BROADCAST_NAME_LEN_MAX: usize = 128;

    /// Default UDP port the scanner listens on
    pub const DEFAULT_UDP_PORT: u16 = 5000;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers
}
