//! Transport sink for encoded frames
//!
//! The broadcast transport accepts one frame per stream per transmission
//! opportunity and reports completion asynchronously through a
//! [`CreditReleaser`](crate::pipeline::CreditReleaser).

pub mod iso;
pub mod monitor;
pub mod udp;

pub use iso::IsoTransport;
pub use monitor::{BroadcastMonitor, Observation, StreamReception};
pub use udp::{
    decode_datagram, decode_packet, encode_announcement, encode_packet, Announcement, Datagram,
    FramePacket, UdpWire,
};

use bytes::Bytes;

use crate::error::TransportError;

/// Destination of encoded frames
pub trait TransportSink: Send + Sync {
    /// Hand one frame to the transport. Must not block beyond normal
    /// allocation latency; an `Err` means the frame was not accepted and
    /// no completion will follow for it.
    fn send(&self, stream: usize, frame: Bytes, seq_num: u16) -> Result<(), TransportError>;
}

impl<T: TransportSink + ?Sized> TransportSink for std::sync::Arc<T> {
    fn send(&self, stream: usize, frame: Bytes, seq_num: u16) -> Result<(), TransportError> {
        (**self).send(stream, frame, seq_num)
    }
}
