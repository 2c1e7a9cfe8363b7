//! The peer manager.
//!
//! Process-wide singleton owning every [`crate::machine::Machine`] session.
//! Machines are keyed by peer UUID; each entry is a handle to the session
//! task (its command channel plus a registry snapshot for listings). The
//! manager also arbitrates everything that spans peers:
//!
//! - the single active device-sharing slot,
//! - which peer currently owns the local clipboard targets,
//! - broadcasting local clipboard changes to all paired peers,
//! - discovery pings and offline removal.
//!
//! Machines reach the manager through a shared `Arc` that outlives them by
//! construction (the manager is torn down last); the manager never holds an
//! `Arc` back to a session, only its command channel, so there is no cycle.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use coop_core::{
    Compositor, DeviceInfo, DeviceOs, FlowDirection, InputDeviceType, PairRequest, SCAN_KEY,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clipboard::ClipboardBridge;
use crate::config::Config;
use crate::machine::{
    self, FileTransfer, InputInjector, MachineCmd, MachineHandle, MachineStatus, Notifier,
    PeerStream, UserConfirm,
};

/// Error type for manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no machine with uuid {0}")]
    UnknownMachine(Uuid),

    #[error("device sharing already active with {holder}")]
    SharingBusy { holder: Uuid },

    #[error("pair request carried a foreign scan key")]
    InvalidScanKey,

    #[error("malformed device info: {0}")]
    MalformedDeviceInfo(String),

    #[error("no peer currently owns the clipboard")]
    NoClipboardOwner,
}

/// Emits a discovery beacon towards one address. Implemented by
/// `discovery::Pinger`; tests record the calls.
pub trait BeaconSender: Send + Sync {
    fn send_beacon(&self, ip: IpAddr);
}

/// Builds the per-device input injectors for a new session.
pub trait InjectorFactory: Send + Sync {
    fn create(&self, device: InputDeviceType) -> Box<dyn InputInjector>;
}

/// The external collaborators every session shares.
pub struct Collaborators {
    pub clipboard: Arc<dyn ClipboardBridge>,
    pub notifier: Arc<dyn Notifier>,
    pub confirmer: Arc<dyn UserConfirm>,
    pub file_transfer: Arc<dyn FileTransfer>,
    pub beacon: Arc<dyn BeaconSender>,
    pub injectors: Arc<dyn InjectorFactory>,
}

/// Settings the manager and its sessions read; derived from [`Config`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub local_uuid: Uuid,
    pub local_info: DeviceInfo,
    pub data_dir: PathBuf,
    pub receive_dir: PathBuf,
    pub accept_device_sharing: bool,
    pub share_clipboard: bool,
    pub share_devices: bool,
}

impl ManagerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            local_uuid: cfg.device.uuid,
            local_info: DeviceInfo {
                uuid: cfg.device.uuid.to_string(),
                name: cfg.device.name.clone(),
                os: DeviceOs::Linux as i32,
                compositor: Compositor::X11 as i32,
            },
            data_dir: cfg.storage.data_dir.clone(),
            receive_dir: cfg.storage.receive_dir.clone(),
            accept_device_sharing: cfg.daemon.accept_device_sharing,
            share_clipboard: cfg.daemon.share_clipboard,
            share_devices: cfg.daemon.share_devices,
        }
    }
}

/// Registry row returned by [`Manager::machines`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSummary {
    pub uuid: Uuid,
    pub name: String,
    pub ip: IpAddr,
    pub port: u16,
}

struct SharingSlot {
    holder: Uuid,
    is_sink: bool,
    /// True while the shared cursor is on the peer's screen.
    pointer_away: bool,
}

#[derive(Default)]
struct ManagerInner {
    machines: HashMap<Uuid, MachineHandle>,
    sharing: Option<SharingSlot>,
    clipboard_owner: Option<Uuid>,
}

/// See the module docs.
pub struct Manager {
    settings: ManagerSettings,
    collab: Collaborators,
    inner: Mutex<ManagerInner>,
}

impl Manager {
    pub fn new(settings: ManagerSettings, collab: Collaborators) -> Arc<Self> {
        Arc::new(Self {
            settings,
            collab,
            inner: Mutex::new(ManagerInner::default()),
        })
    }

    // ── Accessors used by sessions ────────────────────────────────────────────

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn collab(&self) -> &Collaborators {
        &self.collab
    }

    pub fn local_uuid(&self) -> Uuid {
        self.settings.local_uuid
    }

    pub fn local_device_info(&self) -> DeviceInfo {
        self.settings.local_info.clone()
    }

    pub fn is_shared_clipboard(&self) -> bool {
        self.settings.share_clipboard
    }

    pub fn is_shared_devices(&self) -> bool {
        self.settings.share_devices
    }

    /// Where received files are stored.
    pub fn file_storage_path(&self) -> PathBuf {
        self.settings.receive_dir.clone()
    }

    /// Emits a discovery beacon towards `ip`.
    pub fn ping(&self, ip: IpAddr) {
        self.collab.beacon.send_beacon(ip);
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Handles a received beacon: create the machine when unknown, refresh
    /// its addressing and liveness when known.
    pub fn on_beacon(
        self: &Arc<Self>,
        ip: IpAddr,
        tcp_port: u16,
        info: DeviceInfo,
    ) -> Result<(), ManagerError> {
        let uuid = info
            .parsed_uuid()
            .map_err(|e| ManagerError::MalformedDeviceInfo(e.to_string()))?;

        let newly_discovered = {
            let mut inner = self.inner.lock().expect("manager lock poisoned");
            if let Some(handle) = inner.machines.get_mut(&uuid) {
                handle.name = info.name.clone();
                handle.ip = ip;
                handle.port = tcp_port;
                let _ = handle.cmd_tx.send(MachineCmd::UpdateInfo {
                    ip,
                    port: tcp_port,
                    info,
                });
                let _ = handle.cmd_tx.send(MachineCmd::ReceivedPing);
                false
            } else {
                info!(%uuid, name = %info.name, %ip, "discovered new machine");
                let handle = machine::spawn(Arc::clone(self), uuid, info, ip, tcp_port);
                inner.machines.insert(uuid, handle);
                true
            }
        };

        // Answer a first-contact beacon so the peer learns us without
        // waiting for our next ping period.
        if newly_discovered {
            self.ping(ip);
        }
        Ok(())
    }

    // ── Inbound pairing ───────────────────────────────────────────────────────

    /// Routes a fresh inbound connection whose first frame was `request`.
    pub fn on_inbound_pair(
        self: &Arc<Self>,
        stream: PeerStream,
        request: PairRequest,
        ip: IpAddr,
    ) -> Result<(), ManagerError> {
        if request.key != SCAN_KEY {
            warn!(%ip, key = %request.key, "pair request with foreign scan key rejected");
            return Err(ManagerError::InvalidScanKey);
        }
        let info = request
            .device_info
            .ok_or_else(|| ManagerError::MalformedDeviceInfo("missing device info".into()))?;
        let uuid = info
            .parsed_uuid()
            .map_err(|e| ManagerError::MalformedDeviceInfo(e.to_string()))?;

        let mut inner = self.inner.lock().expect("manager lock poisoned");
        let handle = inner.machines.entry(uuid).or_insert_with(|| {
            info!(%uuid, name = %info.name, %ip, "machine created from inbound pair request");
            machine::spawn(Arc::clone(self), uuid, info, ip, 0)
        });
        let _ = handle.cmd_tx.send(MachineCmd::InboundPair { stream });
        Ok(())
    }

    // ── Control surface ───────────────────────────────────────────────────────

    /// Asks `uuid`'s session to open its outgoing connection.
    pub fn connect(&self, uuid: Uuid) -> Result<(), ManagerError> {
        self.send_cmd(uuid, MachineCmd::Connect)
    }

    pub fn disconnect(&self, uuid: Uuid) -> Result<(), ManagerError> {
        self.send_cmd(uuid, MachineCmd::Disconnect)
    }

    pub fn request_device_sharing(&self, uuid: Uuid) -> Result<(), ManagerError> {
        self.send_cmd(uuid, MachineCmd::RequestDeviceSharing)
    }

    pub fn stop_device_sharing(&self, uuid: Uuid) -> Result<(), ManagerError> {
        self.send_cmd(uuid, MachineCmd::StopDeviceSharing)
    }

    pub fn set_flow_direction(
        &self,
        uuid: Uuid,
        direction: FlowDirection,
    ) -> Result<(), ManagerError> {
        self.send_cmd(uuid, MachineCmd::SetFlowDirection(direction))
    }

    /// Queues one `FsSendFileRequest` per path on `uuid`'s session.
    pub fn send_files(&self, uuid: Uuid, paths: Vec<String>) -> Result<(), ManagerError> {
        self.send_cmd(uuid, MachineCmd::SendFiles(paths))
    }

    /// Entry point for the input-capture collaborator: forward one grabbed
    /// event to the peer currently receiving shared input.
    pub fn on_input_captured(
        &self,
        uuid: Uuid,
        device_type: InputDeviceType,
        event_type: u32,
        code: u32,
        value: i32,
    ) -> Result<(), ManagerError> {
        self.send_cmd(
            uuid,
            MachineCmd::InputCaptured {
                device_type,
                event_type,
                code,
                value,
            },
        )
    }

    /// Current session state snapshot, for the control surface and tests.
    pub async fn machine_status(&self, uuid: Uuid) -> Option<MachineStatus> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        {
            let inner = self.inner.lock().expect("manager lock poisoned");
            inner
                .machines
                .get(&uuid)?
                .cmd_tx
                .send(MachineCmd::Query(reply_tx))
                .ok()?;
        }
        reply_rx.await.ok()
    }

    pub fn machines(&self) -> Vec<MachineSummary> {
        let inner = self.inner.lock().expect("manager lock poisoned");
        inner
            .machines
            .values()
            .map(|h| MachineSummary {
                uuid: h.uuid,
                name: h.name.clone(),
                ip: h.ip,
                port: h.port,
            })
            .collect()
    }

    fn send_cmd(&self, uuid: Uuid, cmd: MachineCmd) -> Result<(), ManagerError> {
        let inner = self.inner.lock().expect("manager lock poisoned");
        let handle = inner
            .machines
            .get(&uuid)
            .ok_or(ManagerError::UnknownMachine(uuid))?;
        let _ = handle.cmd_tx.send(cmd);
        Ok(())
    }

    // ── Device-sharing arbitration ────────────────────────────────────────────

    /// Claims the single device-sharing slot for `uuid`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::SharingBusy`] when another machine holds it.
    pub fn on_start_device_sharing(&self, uuid: Uuid, is_sink: bool) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock().expect("manager lock poisoned");
        match &inner.sharing {
            Some(slot) if slot.holder != uuid => Err(ManagerError::SharingBusy {
                holder: slot.holder,
            }),
            _ => {
                inner.sharing = Some(SharingSlot {
                    holder: uuid,
                    is_sink,
                    pointer_away: false,
                });
                info!(%uuid, is_sink, "device sharing session active");
                Ok(())
            }
        }
    }

    /// Releases the sharing slot if `uuid` holds it.
    pub fn on_stop_device_sharing(&self, uuid: Uuid) {
        let mut inner = self.inner.lock().expect("manager lock poisoned");
        if matches!(&inner.sharing, Some(slot) if slot.holder == uuid) {
            inner.sharing = None;
            info!(%uuid, "device sharing session cleared");
        }
    }

    /// Who holds the sharing slot, if anyone.
    pub fn sharing_holder(&self) -> Option<Uuid> {
        let inner = self.inner.lock().expect("manager lock poisoned");
        inner.sharing.as_ref().map(|s| s.holder)
    }

    /// The shared cursor crossed back onto the local screen at `(x, y)`.
    /// The input-capture collaborator picks the pointer up from here.
    pub fn on_flow_back(&self, direction: FlowDirection, x: u32, y: u32) {
        let mut inner = self.inner.lock().expect("manager lock poisoned");
        if let Some(slot) = inner.sharing.as_mut() {
            slot.pointer_away = false;
            info!(?direction, x, y, "pointer flowed back to the local screen");
        } else {
            debug!(?direction, x, y, "flow back without an active sharing session");
        }
    }

    /// The local capture collaborator pushed the cursor across an edge
    /// towards `uuid`.
    pub fn flow_to(&self, uuid: Uuid, direction: FlowDirection, x: u32, y: u32) -> Result<(), ManagerError> {
        {
            let mut inner = self.inner.lock().expect("manager lock poisoned");
            if let Some(slot) = inner.sharing.as_mut() {
                if slot.holder == uuid {
                    slot.pointer_away = true;
                }
            }
        }
        self.send_cmd(uuid, MachineCmd::FlowTo { direction, x, y })
    }

    // ── Clipboard routing ─────────────────────────────────────────────────────

    /// A peer announced that it owns the listed clipboard targets.
    pub fn on_machine_own_clipboard(&self, uuid: Uuid, targets: Vec<String>) {
        {
            let mut inner = self.inner.lock().expect("manager lock poisoned");
            inner.clipboard_owner = Some(uuid);
        }
        self.collab.clipboard.set_remote_targets(&targets);
    }

    /// The local clipboard changed; tell every paired peer.
    pub fn on_clipboard_targets_changed(&self, targets: Vec<String>) {
        if !self.settings.share_clipboard {
            return;
        }
        let mut inner = self.inner.lock().expect("manager lock poisoned");
        inner.clipboard_owner = None; // we own it again
        for handle in inner.machines.values() {
            let _ = handle
                .cmd_tx
                .send(MachineCmd::ClipboardTargetsChanged(targets.clone()));
        }
    }

    /// Asks the current clipboard owner for one target's content; the reply
    /// lands in the local clipboard through the owning session.
    pub fn read_remote_target(&self, target: String) -> Result<(), ManagerError> {
        let inner = self.inner.lock().expect("manager lock poisoned");
        let owner = inner.clipboard_owner.ok_or(ManagerError::NoClipboardOwner)?;
        let handle = inner
            .machines
            .get(&owner)
            .ok_or(ManagerError::UnknownMachine(owner))?;
        let _ = handle.cmd_tx.send(MachineCmd::ReadRemoteTarget(target));
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Removes `uuid` after its offline window elapsed (or on explicit
    /// unpair). The session task winds itself down on the shutdown command.
    pub fn on_machine_offline(&self, uuid: Uuid) {
        let mut inner = self.inner.lock().expect("manager lock poisoned");
        if let Some(handle) = inner.machines.remove(&uuid) {
            info!(%uuid, name = %handle.name, "machine offline, removed");
            let _ = handle.cmd_tx.send(MachineCmd::Shutdown);
        }
        if matches!(&inner.sharing, Some(slot) if slot.holder == uuid) {
            inner.sharing = None;
        }
        if inner.clipboard_owner == Some(uuid) {
            inner.clipboard_owner = None;
        }
    }

    /// Drains every session, awaiting their teardown.
    pub async fn shutdown(&self) {
        let handles: Vec<MachineHandle> = {
            let mut inner = self.inner.lock().expect("manager lock poisoned");
            inner.sharing = None;
            inner.clipboard_owner = None;
            inner.machines.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            let _ = handle.cmd_tx.send(MachineCmd::Shutdown);
        }
        for handle in handles {
            let _ = handle.task.await;
        }
        info!("all sessions drained");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
