//! Broadcast Scanner Application
//!
//! Listens for broadcast frames and name announcements on UDP and
//! reports what it finds.
//! Usage: `scanner [port]`

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broadcast_audio_source::{
    constants::{DIAGNOSTIC_INTERVAL, DEFAULT_UDP_PORT, MAX_PACKET_SIZE},
    transport::{decode_datagram, BroadcastMonitor, Datagram, Observation},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port: u16 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("invalid port")?,
        None => DEFAULT_UDP_PORT,
    };

    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding UDP port {}", port))?;
    tracing::info!("Scanning for broadcasts on {}", socket.local_addr()?);

    let mut monitor = BroadcastMonitor::new();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let (len, from) = tokio::select! {
            result = socket.recv_from(&mut buf) => result?,
            result = &mut ctrl_c => {
                result?;
                break;
            }
        };

        let packet = match decode_datagram(&buf[..len]) {
            Ok(Datagram::Frame(packet)) => packet,
            Ok(Datagram::Announce(announcement)) => {
                if monitor.announce(&announcement) {
                    tracing::info!(
                        "Found broadcast with name {} and id 0x{:06x}",
                        announcement.name,
                        announcement.broadcast_id
                    );
                }
                continue;
            }
            Err(e) => {
                tracing::debug!("Ignoring datagram from {}: {}", from, e);
                continue;
            }
        };

        match monitor.observe(&packet) {
            Observation::NewBroadcast => tracing::info!(
                "Receiving broadcast 0x{:06x} from {}",
                packet.broadcast_id,
                from
            ),
            Observation::Gap(missing) => tracing::debug!(
                "Broadcast 0x{:06x} stream {}: {} frames missing before seq {}",
                packet.broadcast_id,
                packet.stream,
                missing,
                packet.seq
            ),
            Observation::Late | Observation::Duplicate => tracing::trace!(
                "Broadcast 0x{:06x} stream {}: stale seq {}",
                packet.broadcast_id,
                packet.stream,
                packet.seq
            ),
            Observation::InOrder => {}
        }

        if monitor.packets() % DIAGNOSTIC_INTERVAL == 0 {
            for (id, stream, reception) in monitor.streams() {
                tracing::info!(
                    "Broadcast 0x{:06x} ({}) stream {}: {} received, {} lost, {} late",
                    id,
                    monitor.name(id).unwrap_or("unnamed"),
                    stream,
                    reception.received,
                    reception.lost,
                    reception.late + reception.duplicates
                );
            }
        }
    }

    tracing::info!("Scanner stopped after {} packets", monitor.packets());
    Ok(())
}
