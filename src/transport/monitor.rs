//! Receive-side bookkeeping for broadcast frames seen on the wire

use serde::Serialize;
use std::collections::BTreeMap;

use crate::transport::{Announcement, FramePacket};

/// Forward distances at or beyond this are packets from the past
const LATE_DISTANCE: u16 = 0x8000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamReception {
    pub received: u64,
    /// Frames missing between consecutive sequence numbers
    pub lost: u64,
    /// Frames that arrived behind a newer one
    pub late: u64,
    pub duplicates: u64,
    pub last_seq: Option<u16>,
}

/// What a packet told us beyond its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    NewBroadcast,
    InOrder,
    Gap(u16),
    Late,
    Duplicate,
}

/// Tracks broadcasts by id and sequence continuity per stream
#[derive(Debug, Default)]
pub struct BroadcastMonitor {
    streams: BTreeMap<(u32, u8), StreamReception>,
    names: BTreeMap<u32, String>,
    packets: u64,
}

impl BroadcastMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, packet: &FramePacket) -> Observation {
        self.packets += 1;
        let new_broadcast = !self.knows(packet.broadcast_id);

        let reception = self
            .streams
            .entry((packet.broadcast_id, packet.stream))
            .or_default();
        reception.received += 1;

        let observation = match reception.last_seq {
            None => Observation::InOrder,
            Some(last) => match packet.seq.wrapping_sub(last) {
                0 => {
                    reception.duplicates += 1;
                    Observation::Duplicate
                }
                distance if distance >= LATE_DISTANCE => {
                    reception.late += 1;
                    Observation::Late
                }
                1 => Observation::InOrder,
                distance => {
                    reception.lost += (distance - 1) as u64;
                    Observation::Gap(distance - 1)
                }
            },
        };

        // Only moves forward
        if matches!(observation, Observation::InOrder | Observation::Gap(_)) {
            reception.last_seq = Some(packet.seq);
        }

        if new_broadcast {
            Observation::NewBroadcast
        } else {
            observation
        }
    }

    /// Record a broadcast name. Returns true when the name is new or changed.
    pub fn announce(&mut self, announcement: &Announcement) -> bool {
        match self.names.get(&announcement.broadcast_id) {
            Some(name) if *name == announcement.name => false,
            _ => {
                self.names
                    .insert(announcement.broadcast_id, announcement.name.clone());
                true
            }
        }
    }

    pub fn name(&self, broadcast_id: u32) -> Option<&str> {
        self.names.get(&broadcast_id).map(String::as_str)
    }

    pub fn knows(&self, broadcast_id: u32) -> bool {
        self.streams
            .range((broadcast_id, 0)..=(broadcast_id, u8::MAX))
            .next()
            .is_some()
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn stream(&self, broadcast_id: u32, stream: u8) -> Option<&StreamReception> {
        self.streams.get(&(broadcast_id, stream))
    }

    pub fn streams(&self) -> impl Iterator<Item = (u32, u8, &StreamReception)> {
        self.streams.iter().map(|(&(id, stream), r)| (id, stream, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn packet(broadcast_id: u32, stream: u8, seq: u16) -> FramePacket {
        FramePacket {
            broadcast_id,
            stream,
            seq,
            payload: Bytes::new(),
        }
    }

    #[test]
    fn test_first_packet_announces_broadcast() {
        let mut monitor = BroadcastMonitor::new();
        assert_eq!(monitor.observe(&packet(0x42, 0, 0)), Observation::NewBroadcast);
        assert_eq!(monitor.observe(&packet(0x42, 1, 0)), Observation::InOrder);
        assert_eq!(monitor.observe(&packet(0x42, 0, 1)), Observation::InOrder);
        assert!(monitor.knows(0x42));
        assert!(!monitor.knows(0x43));
    }

    #[test]
    fn test_gap_counts_missing_frames() {
        let mut monitor = BroadcastMonitor::new();
        monitor.observe(&packet(1, 0, 10));
        assert_eq!(monitor.observe(&packet(1, 0, 14)), Observation::Gap(3));

        let stream = monitor.stream(1, 0).unwrap();
        assert_eq!(stream.received, 2);
        assert_eq!(stream.lost, 3);
        assert_eq!(stream.last_seq, Some(14));
    }

    #[test]
    fn test_wrap_is_continuous() {
        let mut monitor = BroadcastMonitor::new();
        monitor.observe(&packet(1, 0, u16::MAX));
        assert_eq!(monitor.observe(&packet(1, 0, 0)), Observation::InOrder);
        assert_eq!(monitor.stream(1, 0).unwrap().lost, 0);
        assert_eq!(monitor.packets(), 2);
    }

    #[test]
    fn test_duplicate_is_not_a_loss() {
        let mut monitor = BroadcastMonitor::new();
        monitor.observe(&packet(1, 0, 20));
        assert_eq!(monitor.observe(&packet(1, 0, 20)), Observation::Duplicate);
        assert_eq!(monitor.observe(&packet(1, 0, 21)), Observation::InOrder);

        let stream = monitor.stream(1, 0).unwrap();
        assert_eq!(stream.received, 3);
        assert_eq!(stream.lost, 0);
        assert_eq!(stream.duplicates, 1);
        assert_eq!(stream.last_seq, Some(21));
    }

    #[test]
    fn test_reordered_packet_keeps_position() {
        let mut monitor = BroadcastMonitor::new();
        monitor.observe(&packet(1, 0, 10));
        assert_eq!(monitor.observe(&packet(1, 0, 12)), Observation::Gap(1));
        assert_eq!(monitor.observe(&packet(1, 0, 11)), Observation::Late);
        assert_eq!(monitor.observe(&packet(1, 0, 13)), Observation::InOrder);

        let stream = monitor.stream(1, 0).unwrap();
        assert_eq!(stream.lost, 1);
        assert_eq!(stream.late, 1);
        assert_eq!(stream.last_seq, Some(13));
    }

    #[test]
    fn test_late_packet_across_wrap() {
        let mut monitor = BroadcastMonitor::new();
        monitor.observe(&packet(1, 0, 1));
        assert_eq!(monitor.observe(&packet(1, 0, u16::MAX)), Observation::Late);
        assert_eq!(monitor.stream(1, 0).unwrap().lost, 0);
        assert_eq!(monitor.stream(1, 0).unwrap().last_seq, Some(1));
    }

    #[test]
    fn test_names_follow_announcements() {
        let mut monitor = BroadcastMonitor::new();
        let mut announcement = Announcement {
            broadcast_id: 0x42,
            name: "Living Room".into(),
        };
        assert!(monitor.announce(&announcement));
        assert!(!monitor.announce(&announcement));
        assert_eq!(monitor.name(0x42), Some("Living Room"));

        announcement.name = "Kitchen".into();
        assert!(monitor.announce(&announcement));
        assert_eq!(monitor.name(0x42), Some("Kitchen"));
        assert_eq!(monitor.name(0x43), None);
    }
}
