//! UDP beacon discovery stub.
//!
//! Scanning the LAN (broadcast, interface walking) belongs to an external
//! component; the daemon's part is the beacon hook: it answers for the
//! well-known discovery port and can aim a unicast beacon at a specific
//! address (`Manager::ping`). A beacon is a framed [`Beacon`] record carrying
//! the scan key, the sender's [`DeviceInfo`] and its TCP listen port.
//!
//! The receive loop runs as a blocking thread with a short read timeout so
//! it can observe the shutdown flag, and feeds [`DiscoveryEvent`]s to the
//! async side over an mpsc channel.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coop_core::{decode_datagram, encode_datagram, Beacon, DeviceInfo, SCAN_KEY};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::manager::BeaconSender;

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A valid beacon arrived from a peer.
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    /// The peer identity parsed out of the beacon.
    pub uuid: Uuid,
    /// The advertised device record.
    pub info: DeviceInfo,
    /// Source address of the datagram.
    pub ip: IpAddr,
    /// TCP port the peer accepts pair connections on.
    pub tcp_port: u16,
}

/// Sends unicast beacons from the discovery socket.
pub struct Pinger {
    socket: UdpSocket,
    discovery_port: u16,
    payload: Vec<u8>,
}

impl BeaconSender for Pinger {
    fn send_beacon(&self, ip: IpAddr) {
        if let Err(e) = self
            .socket
            .send_to(&self.payload, (ip, self.discovery_port))
        {
            debug!(%ip, "failed to send beacon: {e}");
        }
    }
}

/// Binds the discovery socket and spawns the receive thread.
///
/// Returns the [`Pinger`] (sharing the same socket, so answers reach the
/// well-known port) and the receiver of [`DiscoveryEvent`]s.
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] when the socket cannot be bound.
pub fn start_beacon_responder(
    bind_address: IpAddr,
    discovery_port: u16,
    local_info: DeviceInfo,
    local_tcp_port: u16,
    running: Arc<AtomicBool>,
) -> Result<(Pinger, mpsc::Receiver<DiscoveryEvent>), DiscoveryError> {
    let addr = SocketAddr::new(bind_address, discovery_port);
    let socket = UdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    socket.set_read_timeout(Some(Duration::from_millis(500))).ok();

    let local_uuid = local_info.uuid.clone();
    let beacon = Beacon {
        key: SCAN_KEY.to_string(),
        device_info: Some(local_info),
        tcp_port: u32::from(local_tcp_port),
    };
    let pinger = Pinger {
        socket: socket
            .try_clone()
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?,
        discovery_port,
        payload: encode_datagram(&beacon),
    };

    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("coopd-discovery".to_string())
        .spawn(move || beacon_loop(socket, local_uuid, tx, running))
        .expect("failed to spawn discovery thread");

    info!("discovery responder listening on UDP {addr}");
    Ok((pinger, rx))
}

/// The receive loop executed on the discovery thread.
fn beacon_loop(
    socket: UdpSocket,
    local_uuid: String,
    tx: mpsc::Sender<DiscoveryEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; 4096];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                warn!("discovery recv error: {e}");
                continue;
            }
        };

        let beacon: Beacon = match decode_datagram(&buf[..len]) {
            Ok(beacon) => beacon,
            Err(e) => {
                debug!(%src, "undecodable discovery datagram: {e}");
                continue;
            }
        };

        if beacon.key != SCAN_KEY {
            debug!(%src, key = %beacon.key, "beacon with foreign scan key dropped");
            continue;
        }

        let Some(info) = beacon.device_info else {
            debug!(%src, "beacon without device info dropped");
            continue;
        };

        if info.uuid == local_uuid {
            continue; // our own beacon reflected back
        }

        let uuid = match info.parsed_uuid() {
            Ok(uuid) => uuid,
            Err(e) => {
                debug!(%src, uuid = %info.uuid, "beacon with malformed uuid dropped: {e}");
                continue;
            }
        };

        let event = DiscoveryEvent {
            uuid,
            info,
            ip: src.ip(),
            tcp_port: beacon.tcp_port as u16,
        };
        if tx.blocking_send(event).is_err() {
            break; // receiver dropped, daemon is shutting down
        }
    }

    info!("discovery responder stopped");
}

/// True for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use coop_core::{Compositor, DeviceOs};

    fn device_info(uuid: Uuid, name: &str) -> DeviceInfo {
        DeviceInfo {
            uuid: uuid.to_string(),
            name: name.to_string(),
            os: DeviceOs::Linux as i32,
            compositor: Compositor::X11 as i32,
        }
    }

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    fn free_udp_port() -> u16 {
        let probe = UdpSocket::bind("127.0.0.1:0").expect("probe bind");
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        port
    }

    #[test]
    fn test_is_timeout_error_recognises_retryable_kinds() {
        for kind in [std::io::ErrorKind::WouldBlock, std::io::ErrorKind::TimedOut] {
            assert!(is_timeout_error(&std::io::Error::new(kind, "t")));
        }
        assert!(!is_timeout_error(&std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "r"
        )));
    }

    #[tokio::test]
    async fn test_responder_binds_and_stops_on_flag() {
        let running = Arc::new(AtomicBool::new(false)); // stops immediately
        let result = start_beacon_responder(
            localhost(),
            free_udp_port(),
            device_info(Uuid::new_v4(), "a"),
            24810,
            running,
        );
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_ping_between_two_responders_yields_a_discovery_event() {
        let running = Arc::new(AtomicBool::new(true));
        let uuid_a = Uuid::new_v4();
        let uuid_b = Uuid::new_v4();
        let port_a = free_udp_port();
        let port_b = free_udp_port();

        let (_pinger_a, mut rx_a) = start_beacon_responder(
            localhost(),
            port_a,
            device_info(uuid_a, "a"),
            24810,
            Arc::clone(&running),
        )
        .expect("responder a");
        let (pinger_b, _rx_b) = start_beacon_responder(
            localhost(),
            port_b,
            device_info(uuid_b, "b"),
            24820,
            Arc::clone(&running),
        )
        .expect("responder b");

        // B aims a beacon at A's well-known port. A's port differs from B's
        // in this test, so send explicitly instead of using the shared
        // discovery port.
        let beacon = Beacon {
            key: SCAN_KEY.to_string(),
            device_info: Some(device_info(uuid_b, "b")),
            tcp_port: 24820,
        };
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&encode_datagram(&beacon), (localhost(), port_a))
            .unwrap();
        let _ = pinger_b; // keeps responder b alive for symmetry

        let event = tokio::time::timeout(Duration::from_secs(5), rx_a.recv())
            .await
            .expect("no discovery event within timeout")
            .expect("channel closed");
        assert_eq!(event.uuid, uuid_b);
        assert_eq!(event.tcp_port, 24820);
        assert_eq!(event.info.name, "b");

        running.store(false, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn test_foreign_scan_key_is_dropped() {
        let running = Arc::new(AtomicBool::new(true));
        let port = free_udp_port();
        let (_pinger, mut rx) = start_beacon_responder(
            localhost(),
            port,
            device_info(Uuid::new_v4(), "a"),
            24810,
            Arc::clone(&running),
        )
        .expect("responder");

        let beacon = Beacon {
            key: "SOMEONE-ELSE".to_string(),
            device_info: Some(device_info(Uuid::new_v4(), "x")),
            tcp_port: 1,
        };
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&encode_datagram(&beacon), (localhost(), port))
            .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(800), rx.recv()).await;
        assert!(result.is_err(), "foreign key must not produce an event");

        running.store(false, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn test_own_beacon_is_ignored() {
        let running = Arc::new(AtomicBool::new(true));
        let port = free_udp_port();
        let uuid = Uuid::new_v4();
        let (pinger, mut rx) = start_beacon_responder(
            localhost(),
            port,
            device_info(uuid, "self"),
            24810,
            Arc::clone(&running),
        )
        .expect("responder");

        // Aim our own beacon back at ourselves.
        pinger.send_beacon(localhost());

        let result = tokio::time::timeout(Duration::from_millis(800), rx.recv()).await;
        assert!(result.is_err(), "own beacon must not produce an event");

        running.store(false, Ordering::Relaxed);
    }
}
