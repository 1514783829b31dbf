//! UDP wire for paced frames
//!
//! Packet layout (little endian):
//! `[broadcast_id: u24][stream: u8][seq: u16][payload_len: u16][payload]`
//!
//! A packet on stream [`ANNOUNCE_STREAM`] is an announcement whose
//! payload is the UTF-8 broadcast name.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{SocketAddr, UdpSocket};

use crate::constants::MAX_PACKET_SIZE;
use crate::error::TransportError;

pub const HEADER_LEN: usize = 8;

/// Stream byte reserved for announcements
pub const ANNOUNCE_STREAM: u8 = 0xFF;

/// One frame as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    pub broadcast_id: u32,
    pub stream: u8,
    pub seq: u16,
    pub payload: Bytes,
}

/// Broadcast metadata sent periodically next to the frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub broadcast_id: u32,
    pub name: String,
}

/// Anything that can arrive on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Frame(FramePacket),
    Announce(Announcement),
}

pub fn encode_packet(
    broadcast_id: u32,
    stream: u8,
    seq: u16,
    payload: &[u8],
) -> Result<Bytes, TransportError> {
    let len = HEADER_LEN + payload.len();
    if len > MAX_PACKET_SIZE {
        return Err(TransportError::PacketTooLarge(len));
    }

    let mut buf = BytesMut::with_capacity(len);
    buf.put_uint_le(broadcast_id as u64 & 0x00FF_FFFF, 3);
    buf.put_u8(stream);
    buf.put_u16_le(seq);
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

pub fn decode_packet(data: &[u8]) -> Result<FramePacket, TransportError> {
    if data.len() < HEADER_LEN {
        return Err(TransportError::PacketTooShort(data.len()));
    }

    let mut buf = data;
    let broadcast_id = buf.get_uint_le(3) as u32;
    let stream = buf.get_u8();
    let seq = buf.get_u16_le();
    let payload_len = buf.get_u16_le() as usize;

    if buf.remaining() < payload_len {
        return Err(TransportError::PacketTooShort(data.len()));
    }

    Ok(FramePacket {
        broadcast_id,
        stream,
        seq,
        payload: Bytes::copy_from_slice(&buf[..payload_len]),
    })
}

pub fn encode_announcement(broadcast_id: u32, name: &str) -> Result<Bytes, TransportError> {
    encode_packet(broadcast_id, ANNOUNCE_STREAM, 0, name.as_bytes())
}

/// Decode a frame or an announcement
pub fn decode_datagram(data: &[u8]) -> Result<Datagram, TransportError> {
    let packet = decode_packet(data)?;
    if packet.stream != ANNOUNCE_STREAM {
        return Ok(Datagram::Frame(packet));
    }

    let name = std::str::from_utf8(&packet.payload)
        .map_err(|e| TransportError::MalformedAnnouncement(e.to_string()))?;
    Ok(Datagram::Announce(Announcement {
        broadcast_id: packet.broadcast_id,
        name: name.to_string(),
    }))
}

/// Connected, non-blocking UDP socket the pacer writes frames to
pub struct UdpWire {
    socket: UdpSocket,
    target: SocketAddr,
    broadcast_id: u32,
    announcement: Bytes,
}

impl UdpWire {
    pub fn connect(
        target: SocketAddr,
        broadcast_id: u32,
        name: &str,
        send_buffer_size: Option<usize>,
    ) -> Result<Self, TransportError> {
        let announcement = encode_announcement(broadcast_id, name)?;
        let socket = Socket::new(Domain::for_address(target), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::SocketSetup(e.to_string()))?;

        if let Some(size) = send_buffer_size {
            socket
                .set_send_buffer_size(size)
                .map_err(|e| TransportError::SocketSetup(format!("send buffer: {}", e)))?;
        }

        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        socket
            .bind(&SockAddr::from(local))
            .map_err(|e| TransportError::SocketSetup(format!("bind: {}", e)))?;
        socket
            .connect(&SockAddr::from(target))
            .map_err(|e| TransportError::SocketSetup(format!("connect {}: {}", target, e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::SocketSetup(e.to_string()))?;

        Ok(Self {
            socket: socket.into(),
            target,
            broadcast_id,
            announcement,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Write one frame; never waits for socket space
    pub fn send_frame(
        &self,
        stream: usize,
        seq: u16,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let packet = encode_packet(self.broadcast_id, stream as u8, seq, payload)?;
        self.socket
            .send(&packet)
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Write the broadcast name announcement
    pub fn send_announcement(&self) -> Result<(), TransportError> {
        self.socket
            .send(&self.announcement)
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}
