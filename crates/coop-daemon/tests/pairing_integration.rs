//! End-to-end session tests over real localhost TCP.
//!
//! Each test spins up complete in-process daemons (manager + pair listener +
//! recording collaborators), introduces them through beacons like discovery
//! would, and drives the public manager surface. Assertions poll the session
//! status snapshots until the expected steady state is reached.

mod common;

use common::{eventually, spawn_daemon};
use coop_core::{FlowDirection, InputDeviceType};
use coop_daemon::machine::SessionState;

/// Handshake success: after an outbound connect and an accepting user on the
/// far side, both daemons hold a Paired, connected session and have received
/// each other's service flags.
#[tokio::test]
async fn test_handshake_success_pairs_both_sides() {
    let a = spawn_daemon("a", true).await;
    let b = spawn_daemon("b", true).await;

    a.manager
        .on_beacon("127.0.0.1".parse().unwrap(), b.tcp_port, b.info.clone())
        .expect("beacon");
    a.manager.connect(b.uuid).expect("connect");

    eventually(
        || async {
            matches!(
                a.manager.machine_status(b.uuid).await,
                Some(s) if s.connected && s.state == SessionState::Paired
            )
        },
        "side A to reach Paired",
    )
    .await;

    eventually(
        || async {
            matches!(
                b.manager.machine_status(a.uuid).await,
                Some(s) if s.connected && s.state == SessionState::Paired
            )
        },
        "side B to reach Paired",
    )
    .await;

    // Both sides announced their services after pairing; each recorded the
    // other's flags, which proves the ServiceOnOffNotification exchange.
    eventually(
        || async {
            let sa = a.manager.machine_status(b.uuid).await;
            let sb = b.manager.machine_status(a.uuid).await;
            matches!((sa, sb), (Some(sa), Some(sb))
                if sa.peer_clipboard_on && sa.peer_devices_on
                    && sb.peer_clipboard_on && sb.peer_devices_on)
        },
        "service flags to be exchanged",
    )
    .await;

    a.manager.shutdown().await;
    b.manager.shutdown().await;
}

/// Handshake rejection: a REJECT verdict on the far side sends a refusing
/// PairResponse, both connections close, and neither side is connected.
#[tokio::test]
async fn test_handshake_rejection_leaves_both_sides_disconnected() {
    let a = spawn_daemon("a", true).await;
    let b = spawn_daemon("b", false).await; // user rejects

    a.manager
        .on_beacon("127.0.0.1".parse().unwrap(), b.tcp_port, b.info.clone())
        .expect("beacon");
    a.manager.connect(b.uuid).expect("connect");

    eventually(
        || async {
            // B created a session for A on the inbound pair, refused it, and
            // tore the transport down; A fell back to Idle on the refusal.
            let sa = a.manager.machine_status(b.uuid).await;
            let sb = b.manager.machine_status(a.uuid).await;
            matches!((sa, sb), (Some(sa), Some(sb))
                if !sa.connected && sa.state == SessionState::Idle
                    && !sb.connected && sb.state == SessionState::Idle)
        },
        "both sides to settle disconnected",
    )
    .await;

    a.manager.shutdown().await;
    b.manager.shutdown().await;
}

/// Input forwarding: a captured event on the source lands in the sink's
/// injector for the same device with the same triple.
#[tokio::test]
async fn test_input_events_reach_the_peer_injector() {
    let a = spawn_daemon("a", true).await;
    let b = spawn_daemon("b", true).await;

    a.manager
        .on_beacon("127.0.0.1".parse().unwrap(), b.tcp_port, b.info.clone())
        .expect("beacon");
    a.manager.connect(b.uuid).expect("connect");

    eventually(
        || async {
            matches!(a.manager.machine_status(b.uuid).await, Some(s) if s.connected)
        },
        "pairing",
    )
    .await;

    a.manager
        .on_input_captured(b.uuid, InputDeviceType::Mouse, 2, 0, 5)
        .expect("forward input");

    eventually(
        || async {
            b.injected
                .snapshot()
                .contains(&(InputDeviceType::Mouse, 2, 0, 5))
        },
        "the event to be injected on B",
    )
    .await;

    a.manager.shutdown().await;
    b.manager.shutdown().await;
}

/// Device-sharing mutual exclusion: with A→B sharing active, a second
/// session towards C is refused by A's manager and unwound on C.
#[tokio::test]
async fn test_device_sharing_is_exclusive_across_peers() {
    let a = spawn_daemon("a", true).await;
    let b = spawn_daemon("b", true).await;
    let c = spawn_daemon("c", true).await;

    for peer in [&b, &c] {
        a.manager
            .on_beacon(
                "127.0.0.1".parse().unwrap(),
                peer.tcp_port,
                peer.info.clone(),
            )
            .expect("beacon");
        a.manager.connect(peer.uuid).expect("connect");
    }

    eventually(
        || async {
            let sb = a.manager.machine_status(b.uuid).await;
            let sc = a.manager.machine_status(c.uuid).await;
            matches!((sb, sc), (Some(sb), Some(sc)) if sb.connected && sc.connected)
        },
        "both peers to pair with A",
    )
    .await;

    // First session: A → B. B accepts and becomes the sink.
    a.manager.request_device_sharing(b.uuid).expect("request");
    eventually(
        || async { a.manager.sharing_holder() == Some(b.uuid) },
        "A to hold the sharing slot for B",
    )
    .await;
    eventually(
        || async {
            matches!(
                a.manager.machine_status(b.uuid).await,
                Some(s) if s.device_sharing && s.direction == FlowDirection::Right
            )
        },
        "A to act as source towards B",
    )
    .await;

    // Second session: A → C. C accepts locally, but A's slot is taken, so
    // the source side refuses and unwinds the remote sink.
    a.manager.request_device_sharing(c.uuid).expect("request");

    eventually(
        || async {
            matches!(
                a.manager.machine_status(c.uuid).await,
                Some(s) if !s.device_sharing
            ) && c.manager.sharing_holder().is_none()
        },
        "the C session to be refused and unwound",
    )
    .await;

    // Let any in-flight unwind traffic settle, then check the steady state:
    // exactly one sharing session remains.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(matches!(
        a.manager.machine_status(c.uuid).await,
        Some(s) if !s.device_sharing
    ));
    assert_eq!(c.manager.sharing_holder(), None);
    assert_eq!(a.manager.sharing_holder(), Some(b.uuid));
    assert_eq!(
        b.manager.sharing_holder(),
        Some(a.uuid),
        "B still hosts A as its sink session"
    );

    a.manager.shutdown().await;
    b.manager.shutdown().await;
    c.manager.shutdown().await;
}

/// A send-file request towards a peer without a mounted remote filesystem is
/// answered with a refusal and produces no transfer result; the session
/// stays healthy.
#[tokio::test]
async fn test_send_file_without_mount_keeps_the_session_healthy() {
    let a = spawn_daemon("a", true).await;
    let b = spawn_daemon("b", true).await;

    a.manager
        .on_beacon("127.0.0.1".parse().unwrap(), b.tcp_port, b.info.clone())
        .expect("beacon");
    a.manager.connect(b.uuid).expect("connect");
    eventually(
        || async {
            matches!(a.manager.machine_status(b.uuid).await, Some(s) if s.connected)
        },
        "pairing",
    )
    .await;

    a.manager
        .send_files(b.uuid, vec!["/x.txt".to_string()])
        .expect("send files");

    // The refusal is silent on the wire; what matters is that both sessions
    // remain paired and no transfer state appears.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let sa = a.manager.machine_status(b.uuid).await.expect("status");
    let sb = b.manager.machine_status(a.uuid).await.expect("status");
    assert!(sa.connected && sb.connected);
    assert!(!sa.mounted && !sb.mounted);

    a.manager.shutdown().await;
    b.manager.shutdown().await;
}
