//! Paced isochronous transport
//!
//! Models the broadcast controller: every SDU interval one queued frame
//! per stream is transmitted and its completion is signalled back to the
//! credit tracker. `send` only ever enqueues. With a wire attached the
//! broadcast name is announced when pacing starts and then once a second.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::constants::DIAGNOSTIC_INTERVAL;
use crate::error::TransportError;
use crate::pipeline::CreditReleaser;
use crate::transport::{TransportSink, UdpWire};

const ANNOUNCE_PERIOD: Duration = Duration::from_secs(1);

struct Sdu {
    seq: u16,
    frame: Bytes,
}

struct IsoChannel {
    tx: Sender<Sdu>,
    rx: Receiver<Sdu>,
    started: AtomicBool,
    transmitted: AtomicU64,
}

struct IsoShared {
    channels: Vec<IsoChannel>,
    releaser: CreditReleaser,
    wire: Option<UdpWire>,
    interval: Duration,
    running: AtomicBool,
    wire_errors: AtomicU64,
}

/// Transport that drains one frame per stream per interval
pub struct IsoTransport {
    shared: Arc<IsoShared>,
    pacer: Mutex<Option<Pacer>>,
}

struct Pacer {
    /// Dropping the sender wakes the pacer and ends it
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl IsoTransport {
    pub fn new(
        stream_count: usize,
        queue_depth: usize,
        interval: Duration,
        releaser: CreditReleaser,
        wire: Option<UdpWire>,
    ) -> Self {
        let channels = (0..stream_count)
            .map(|_| {
                let (tx, rx) = bounded(queue_depth.max(1));
                IsoChannel {
                    tx,
                    rx,
                    started: AtomicBool::new(false),
                    transmitted: AtomicU64::new(0),
                }
            })
            .collect();

        Self {
            shared: Arc::new(IsoShared {
                channels,
                releaser,
                wire,
                interval,
                running: AtomicBool::new(false),
                wire_errors: AtomicU64::new(0),
            }),
            pacer: Mutex::new(None),
        }
    }

    /// Start every stream and the pacer; frames are accepted from now on
    pub fn start_streams(&self) -> Result<(), TransportError> {
        let mut pacer = self.pacer.lock();
        if pacer.is_some() {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let (shutdown, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("iso-pacer".to_string())
            .spawn(move || pace(shared, shutdown_rx))
            .map_err(|e| TransportError::SendFailed(format!("pacer thread: {}", e)))?;
        *pacer = Some(Pacer { shutdown, handle });

        for (stream, channel) in self.shared.channels.iter().enumerate() {
            channel.started.store(true, Ordering::SeqCst);
            tracing::debug!("Stream {} started", stream);
        }
        Ok(())
    }

    /// Stop the pacer; queued frames are discarded
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        for channel in &self.shared.channels {
            channel.started.store(false, Ordering::SeqCst);
        }
        if let Some(pacer) = self.pacer.lock().take() {
            drop(pacer.shutdown);
            let _ = pacer.handle.join();
        }
        for channel in &self.shared.channels {
            while channel.rx.try_recv().is_ok() {}
        }
    }

    pub fn is_started(&self, stream: usize) -> bool {
        self.shared
            .channels
            .get(stream)
            .is_some_and(|c| c.started.load(Ordering::SeqCst))
    }

    /// Frames transmitted on a stream so far
    pub fn transmitted(&self, stream: usize) -> u64 {
        self.shared
            .channels
            .get(stream)
            .map_or(0, |c| c.transmitted.load(Ordering::Relaxed))
    }

    /// Frames waiting for their transmission slot
    pub fn queued(&self, stream: usize) -> usize {
        self.shared.channels.get(stream).map_or(0, |c| c.rx.len())
    }

    pub fn wire_errors(&self) -> u64 {
        self.shared.wire_errors.load(Ordering::Relaxed)
    }
}

impl TransportSink for IsoTransport {
    fn send(&self, stream: usize, frame: Bytes, seq_num: u16) -> Result<(), TransportError> {
        let channel = self
            .shared
            .channels
            .get(stream)
            .ok_or(TransportError::UnknownStream(stream))?;

        if !channel.started.load(Ordering::Acquire) {
            return Err(TransportError::NotStarted(stream));
        }

        channel
            .tx
            .try_send(Sdu { seq: seq_num, frame })
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::QueueFull(stream),
                TrySendError::Disconnected(_) => TransportError::Closed,
            })
    }
}

impl Drop for IsoTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pacing ticks between announcements, at least one
fn announce_every(interval: Duration) -> u64 {
    let ticks = ANNOUNCE_PERIOD.as_nanos() / interval.as_nanos().max(1);
    (ticks as u64).max(1)
}

fn record_wire_error(shared: &IsoShared, what: &str, e: TransportError) {
    let errors = shared.wire_errors.fetch_add(1, Ordering::Relaxed) + 1;
    if errors == 1 || errors % DIAGNOSTIC_INTERVAL == 0 {
        tracing::warn!("Wire send failed for {} ({} errors): {}", what, errors, e);
    }
}

fn pace(shared: Arc<IsoShared>, shutdown: Receiver<()>) {
    let mut next = Instant::now() + shared.interval;
    let announce_every = announce_every(shared.interval);
    let mut ticks: u64 = 0;

    while shared.running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if next > now {
            match shutdown.recv_timeout(next - now) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
        } else if now - next > shared.interval {
            tracing::debug!(behind = ?(now - next), "Pacer fell behind, resynchronising");
            next = now;
        }
        next += shared.interval;

        if let Some(wire) = &shared.wire {
            if ticks % announce_every == 0 {
                if let Err(e) = wire.send_announcement() {
                    record_wire_error(&shared, "announcement", e);
                }
            }
        }
        ticks += 1;

        for (stream, channel) in shared.channels.iter().enumerate() {
            let Ok(sdu) = channel.rx.try_recv() else {
                continue;
            };

            if let Some(wire) = &shared.wire {
                if let Err(e) = wire.send_frame(stream, sdu.seq, &sdu.frame) {
                    record_wire_error(&shared, &format!("stream {}", stream), e);
                }
            }

            channel.transmitted.fetch_add(1, Ordering::Relaxed);
            shared.releaser.on_complete(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CreditTracker;
    use crate::transport::{decode_datagram, Datagram};

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn frame() -> Bytes {
        Bytes::from_static(&[0u8; 40])
    }

    #[test]
    fn test_rejects_before_start() {
        let tracker = Arc::new(CreditTracker::new(2, 3));
        let releaser = CreditReleaser::new(tracker);
        let transport = IsoTransport::new(2, 3, Duration::from_millis(2), releaser, None);

        assert!(matches!(
            transport.send(0, frame(), 0),
            Err(TransportError::NotStarted(0))
        ));
        assert!(matches!(
            transport.send(5, frame(), 0),
            Err(TransportError::UnknownStream(5))
        ));
    }

    #[test]
    fn test_queue_bounded_by_depth() {
        let tracker = Arc::new(CreditTracker::new(1, 2));
        // Long interval so nothing drains during the test
        let releaser = CreditReleaser::new(tracker);
        let transport = IsoTransport::new(1, 2, Duration::from_secs(10), releaser, None);
        transport.start_streams().unwrap();

        transport.send(0, frame(), 0).unwrap();
        transport.send(0, frame(), 1).unwrap();
        assert!(matches!(
            transport.send(0, frame(), 2),
            Err(TransportError::QueueFull(0))
        ));
        assert_eq!(transport.queued(0), 2);

        // Stopping discards the queue and rejects further sends
        transport.stop();
        assert_eq!(transport.queued(0), 0);
        assert!(matches!(
            transport.send(0, frame(), 3),
            Err(TransportError::NotStarted(0))
        ));
    }

    #[test]
    fn test_completion_releases_credit() {
        let tracker = Arc::new(CreditTracker::new(2, 3));
        let transport = IsoTransport::new(
            2,
            3,
            Duration::from_millis(2),
            CreditReleaser::new(tracker.clone()),
            None,
        );
        transport.start_streams().unwrap();

        for seq in 0..3 {
            transport.send(0, frame(), seq).unwrap();
            transport.send(1, frame(), seq).unwrap();
        }

        assert!(wait_for(|| tracker.available(0) == 3 && tracker.available(1) == 3));
        assert_eq!(transport.transmitted(0), 3);
        assert_eq!(transport.transmitted(1), 3);
        assert_eq!(transport.queued(0), 0);
    }

    #[test]
    fn test_frames_reach_the_wire_in_order() {
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let target = receiver.local_addr().unwrap();
        let wire = UdpWire::connect(target, 7, "Test Source", None).unwrap();

        let tracker = Arc::new(CreditTracker::new(1, 3));
        let transport = IsoTransport::new(
            1,
            3,
            Duration::from_millis(2),
            CreditReleaser::new(tracker),
            Some(wire),
        );
        transport.start_streams().unwrap();
        for seq in 10..13 {
            transport.send(0, frame(), seq).unwrap();
        }

        let mut buf = [0u8; 128];
        let mut seqs = Vec::new();
        let mut names = Vec::new();
        while seqs.len() < 3 {
            let len = receiver.recv(&mut buf).unwrap();
            match decode_datagram(&buf[..len]).unwrap() {
                Datagram::Frame(packet) => {
                    assert_eq!(packet.broadcast_id, 7);
                    seqs.push(packet.seq);
                }
                Datagram::Announce(announcement) => names.push(announcement.name),
            }
        }
        assert_eq!(seqs, vec![10, 11, 12]);
        // Announced on the first tick, ahead of any frame
        assert_eq!(names, vec!["Test Source".to_string()]);
    }

    #[test]
    fn test_announce_cadence() {
        assert_eq!(announce_every(Duration::from_millis(10)), 100);
        assert_eq!(announce_every(Duration::from_micros(7500)), 133);
        assert_eq!(announce_every(Duration::from_secs(2)), 1);
    }
}
