//! Shared fixtures for the daemon integration tests: a full in-process
//! daemon (manager + pair listener) wired to recording collaborators, and a
//! polling helper for the asynchronous assertions.

// Each test binary uses a different subset of these fixtures.
#![allow(dead_code)]

use std::future::Future;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coop_core::{Compositor, DeviceInfo, DeviceOs, InputDeviceType};
use tokio::time::Instant;
use uuid::Uuid;

use coop_daemon::clipboard::ClipboardBridge;
use coop_daemon::listener;
use coop_daemon::machine::{FileTransfer, InputInjector, Notifier, UserConfirm};
use coop_daemon::manager::{
    BeaconSender, Collaborators, InjectorFactory, Manager, ManagerSettings,
};

// ── Recording collaborators ───────────────────────────────────────────────────

#[derive(Default)]
pub struct BeaconLog(Mutex<Vec<IpAddr>>);

impl BeaconLog {
    pub fn pings(&self) -> Vec<IpAddr> {
        self.0.lock().unwrap().clone()
    }
}

struct BeaconProbe(Arc<BeaconLog>);

impl BeaconSender for BeaconProbe {
    fn send_beacon(&self, ip: IpAddr) {
        self.0 .0.lock().unwrap().push(ip);
    }
}

#[derive(Default)]
pub struct InjectedEvents(Mutex<Vec<(InputDeviceType, u32, u32, i32)>>);

impl InjectedEvents {
    pub fn snapshot(&self) -> Vec<(InputDeviceType, u32, u32, i32)> {
        self.0.lock().unwrap().clone()
    }
}

struct RecordingInjector {
    device: InputDeviceType,
    log: Arc<InjectedEvents>,
}

#[async_trait]
impl InputInjector for RecordingInjector {
    async fn emit_event(&mut self, event_type: u32, code: u32, value: i32) -> bool {
        self.log
            .0
            .lock()
            .unwrap()
            .push((self.device, event_type, code, value));
        true
    }
}

struct RecordingInjectorFactory {
    log: Arc<InjectedEvents>,
}

impl InjectorFactory for RecordingInjectorFactory {
    fn create(&self, device: InputDeviceType) -> Box<dyn InputInjector> {
        Box::new(RecordingInjector {
            device,
            log: Arc::clone(&self.log),
        })
    }
}

struct QuietClipboard;

#[async_trait]
impl ClipboardBridge for QuietClipboard {
    fn is_files(&self) -> bool {
        false
    }
    async fn read_target(&self, _target: &str) -> Vec<u8> {
        Vec::new()
    }
    fn update_target(&self, _target: &str, _content: Vec<u8>) {}
    fn set_remote_targets(&self, _targets: &[String]) {}
}

struct QuietNotifier;
impl Notifier for QuietNotifier {
    fn file_received(&self, _path: &Path, _success: bool) {}
}

struct AutoConfirm(bool);

#[async_trait]
impl UserConfirm for AutoConfirm {
    async fn ask(&self, _ip: IpAddr, _peer_name: &str) -> Option<bool> {
        Some(self.0)
    }
}

struct QuietTransfer;

#[async_trait]
impl FileTransfer for QuietTransfer {
    async fn copy(&self, _src: &Path, _dst_dir: &Path) -> bool {
        true
    }
}

// ── Daemon fixture ────────────────────────────────────────────────────────────

pub struct TestDaemon {
    pub manager: Arc<Manager>,
    pub uuid: Uuid,
    pub info: DeviceInfo,
    pub tcp_port: u16,
    pub injected: Arc<InjectedEvents>,
    pub beacons: Arc<BeaconLog>,
}

pub fn device_info(uuid: Uuid, name: &str) -> DeviceInfo {
    DeviceInfo {
        uuid: uuid.to_string(),
        name: name.to_string(),
        os: DeviceOs::Linux as i32,
        compositor: Compositor::X11 as i32,
    }
}

pub fn build_manager(name: &str, confirm: bool) -> TestDaemon {
    let uuid = Uuid::new_v4();
    let info = device_info(uuid, name);
    let injected = Arc::new(InjectedEvents::default());
    let beacons = Arc::new(BeaconLog::default());

    let settings = ManagerSettings {
        local_uuid: uuid,
        local_info: info.clone(),
        data_dir: std::env::temp_dir().join(format!("coopd-it-{uuid}")),
        receive_dir: std::env::temp_dir().join(format!("coopd-it-recv-{uuid}")),
        accept_device_sharing: true,
        share_clipboard: true,
        share_devices: true,
    };

    let manager = Manager::new(
        settings,
        Collaborators {
            clipboard: Arc::new(QuietClipboard),
            notifier: Arc::new(QuietNotifier),
            confirmer: Arc::new(AutoConfirm(confirm)),
            file_transfer: Arc::new(QuietTransfer),
            beacon: Arc::new(BeaconProbe(Arc::clone(&beacons))),
            injectors: Arc::new(RecordingInjectorFactory {
                log: Arc::clone(&injected),
            }),
        },
    );

    TestDaemon {
        manager,
        uuid,
        info,
        tcp_port: 0,
        injected,
        beacons,
    }
}

/// A full daemon: manager plus a pair listener on an ephemeral localhost
/// port, accepting inbound handshakes like production does.
pub async fn spawn_daemon(name: &str, confirm: bool) -> TestDaemon {
    let mut daemon = build_manager(name, confirm);
    let listener = listener::bind("127.0.0.1".parse().unwrap(), 0)
        .await
        .expect("bind pair listener");
    daemon.tcp_port = listener.local_addr().expect("local addr").port();
    tokio::spawn(listener::accept_loop(listener, Arc::clone(&daemon.manager)));
    daemon
}

/// Polls `f` until it yields true or five seconds pass.
pub async fn eventually<F, Fut>(mut f: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if f().await {
            return;
        }
        assert!(Instant::now() < deadline, "timeout waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
