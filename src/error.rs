//! Error types for the broadcast audio source

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid codec parameter: {0}")]
    InvalidParameter(String),

    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Transport sink errors. Every variant is a rejected send or a failed
/// wire operation; none of them stall the pipeline.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Stream {0} is not started")]
    NotStarted(usize),

    #[error("Unknown stream: {0}")]
    UnknownStream(usize),

    #[error("Transmit queue full on stream {0}")]
    QueueFull(usize),

    #[error("Transport closed")]
    Closed,

    #[error("Socket setup failed: {0}")]
    SocketSetup(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Packet too short: {0} bytes")]
    PacketTooShort(usize),

    #[error("Malformed announcement: {0}")]
    MalformedAnnouncement(String),
}

/// Pipeline coordinator errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid codec configuration: {0}")]
    InvalidCodecConfig(#[source] CodecError),

    #[error("Failed to set up encoder for stream {stream}: {source}")]
    EncoderInit {
        stream: usize,
        #[source]
        source: CodecError,
    },

    #[error("Encoder failed on stream {stream}, codec misconfigured: {source}")]
    FatalEncode {
        stream: usize,
        #[source]
        source: CodecError,
    },

    #[error("Stream count mismatch: expected {expected}, got {actual}")]
    StreamCountMismatch { expected: usize, actual: usize },

    #[error("Failed to spawn encoder thread: {0}")]
    Spawn(String),

    #[error("Encoder thread panicked: {0}")]
    WorkerPanicked(String),

    #[error("Pipeline stopped")]
    Stopped,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
