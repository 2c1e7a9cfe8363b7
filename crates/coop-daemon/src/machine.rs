//! The per-peer session: state machine, dispatcher, and service handlers.
//!
//! One `Machine` exists per discovered peer, owned by the
//! [`crate::manager::Manager`] and driven by a single task. The task is the
//! serialization point: socket frames, timer fires, child-process results
//! and commands from other tasks all arrive as events on its channels, so no
//! two callbacks for the same peer ever run concurrently. Handlers never
//! block; slow work (dialogs, clipboard reads, file copies) is spawned off
//! and re-enters through the event channel.
//!
//! # Session lifecycle
//!
//! ```text
//!            connect()                stream up              PairResponse(agree)
//!   Idle ───────────────► Connecting ───────────► AwaitingPair ─────────► Paired
//!    ▲  ◄───────────────┘ (failed: ping & retry)        │ (refused)          │
//!    │                                                   ▼                   │
//!    │            inbound PairRequest          ┌──────── Idle ◄──────────────┘
//!    └───────────────────────────────────────┐ │         stream closed /
//!        AwaitingUserConfirm ─ ACCEPT ─► Paired┘         illegal frame
//!                  └──────── REJECT ──► Idle
//! ```
//!
//! While disconnected, two timers keep the peer alive in the registry: a
//! periodic ping (10 s) re-beacons it, and a one-shot offline window (25 s)
//! removes it when no beacon answers. Both stop while a connection is up;
//! liveness is then TCP keepalive's job (20 s idle).

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use coop_core::{
    ClipboardGetContentRequest, ClipboardGetContentResponse, ClipboardNotify, Compositor,
    DeviceInfo, DeviceOs, DeviceSharingStartRequest, DeviceSharingStartResponse,
    DeviceSharingStopRequest, FlowDirection, FlowDirectionNtf, FlowRequest, FrameCodec,
    FrameError, FsResponse, FsSendFileRequest, FsSendFileResponse, FsSendFileResult,
    InputDeviceType, InputEventRequest, InputEventResponse, Message, PairRequest, PairResponse,
    Payload, SerialCounter, ServiceOnOffNotification, CLIPBOARD_FILE_TARGET, KEEPALIVE_IDLE,
    OFFLINE_WINDOW, PING_INTERVAL, SCAN_KEY, URI_LIST_TARGET,
};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clipboard::{first_file_uri_path, rewrite_with_mountpoint, ClipboardBridge};
use crate::event::Timer;
use crate::manager::Manager;
use crate::wrappers::fuse::{FuseClient, FuseServer};

// ── Collaborator seams ────────────────────────────────────────────────────────

/// Injects input events on a local device. One injector per
/// [`InputDeviceType`] per session.
#[async_trait]
pub trait InputInjector: Send {
    /// Returns whether the injection pipe accepted the event.
    async fn emit_event(&mut self, event_type: u32, code: u32, value: i32) -> bool;
}

/// Asks the local user whether to accept an inbound pair.
/// `None` means the dialog produced no usable verdict.
#[async_trait]
pub trait UserConfirm: Send + Sync {
    async fn ask(&self, ip: IpAddr, peer_name: &str) -> Option<bool>;
}

/// Copies a received file out of the mounted remote filesystem.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn copy(&self, src: &Path, dst_dir: &Path) -> bool;
}

/// Emits a desktop notification for a finished transfer.
pub trait Notifier: Send + Sync {
    fn file_received(&self, path: &Path, success: bool);
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Any duplex byte stream a session can run over. Production hands in a
/// [`TcpStream`]; tests use in-memory duplex pipes.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

pub type PeerStream = Box<dyn Conn>;

/// Applies the session socket options: `TCP_NODELAY` plus keepalive with the
/// protocol's idle time. Must happen while the concrete socket is still in
/// hand, before it is boxed for the session.
pub fn configure_stream(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to set TCP_NODELAY: {e}");
    }
    let sock = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        debug!("failed to enable TCP keepalive: {e}");
    }
}

// ── Commands and events ───────────────────────────────────────────────────────

/// Cross-task entry points into a session. Senders of this channel are the
/// wake primitive: anything sent here runs on the session task's next turn.
pub enum MachineCmd {
    /// Open the outgoing connection to the peer's listen port.
    Connect,
    /// Close the connection, tearing down session services.
    Disconnect,
    /// A fresh inbound connection whose first frame was a valid PairRequest.
    InboundPair { stream: PeerStream },
    /// Discovery refreshed the peer's addressing.
    UpdateInfo {
        ip: IpAddr,
        port: u16,
        info: DeviceInfo,
    },
    /// A beacon arrived; re-arm the liveness timers.
    ReceivedPing,
    /// Ask the peer to become the sink of a device-sharing session.
    RequestDeviceSharing,
    /// End the active device-sharing session.
    StopDeviceSharing,
    /// The control surface changed which edge flows to this peer.
    SetFlowDirection(FlowDirection),
    /// The local cursor crossed the edge towards this peer at `(x, y)`.
    FlowTo {
        direction: FlowDirection,
        x: u32,
        y: u32,
    },
    /// The capture collaborator grabbed one local input event.
    InputCaptured {
        device_type: InputDeviceType,
        event_type: u32,
        code: u32,
        value: i32,
    },
    /// The local clipboard changed; advertise the new targets.
    ClipboardTargetsChanged(Vec<String>),
    /// Fetch one clipboard target's content from this peer.
    ReadRemoteTarget(String),
    /// Queue one FsSendFileRequest per path.
    SendFiles(Vec<String>),
    /// Snapshot the session state.
    Query(oneshot::Sender<MachineStatus>),
    /// Wind the session down; the task exits after cleanup.
    Shutdown,
}

/// Everything that re-enters the session task from its own helpers.
enum SessionEvent {
    Connected(PeerStream),
    ConnectFailed(String),
    Frame(Message),
    StreamIllegal(FrameError),
    StreamClosed,
    PingTick,
    OfflineTimeout,
    ConfirmVerdict(Option<bool>),
    CopyFinished {
        serial: u32,
        path: String,
        dest: PathBuf,
        ok: bool,
    },
    ClipboardContent {
        target: String,
        content: Vec<u8>,
    },
}

/// Externally visible session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingPair,
    AwaitingUserConfirm,
    Paired,
}

/// Snapshot returned by [`MachineCmd::Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineStatus {
    pub state: SessionState,
    pub os: DeviceOs,
    pub compositor: Compositor,
    pub connected: bool,
    pub device_sharing: bool,
    pub mounted: bool,
    pub direction: FlowDirection,
    pub peer_clipboard_on: bool,
    pub peer_devices_on: bool,
}

/// What the manager keeps per session: the command channel, the driver task,
/// and a registry snapshot for listings.
pub struct MachineHandle {
    pub uuid: Uuid,
    pub name: String,
    pub ip: IpAddr,
    pub port: u16,
    pub cmd_tx: mpsc::UnboundedSender<MachineCmd>,
    pub task: JoinHandle<()>,
}

/// Creates the session and spawns its driver task.
pub fn spawn(
    manager: Arc<Manager>,
    uuid: Uuid,
    info: DeviceInfo,
    ip: IpAddr,
    port: u16,
) -> MachineHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let name = info.name.clone();

    let machine = Machine::new(manager, uuid, info, ip, port, events_tx);
    let task = tokio::spawn(machine.run(cmd_rx, events_rx));

    MachineHandle {
        uuid,
        name,
        ip,
        port,
        cmd_tx,
        task,
    }
}

// ── The session itself ────────────────────────────────────────────────────────

struct Machine {
    manager: Arc<Manager>,

    // Peer identity and addressing.
    uuid: Uuid,
    name: String,
    os: DeviceOs,
    compositor: Compositor,
    ip: IpAddr,
    port: u16,

    // State machine.
    state: SessionState,
    connected: bool,
    device_sharing: bool,
    mounted: bool,
    peer_clipboard_on: bool,
    peer_devices_on: bool,
    direction: FlowDirection,

    // Local identity and policy, frozen at creation.
    local_uuid: Uuid,
    local_info: DeviceInfo,
    mountpoint: PathBuf,
    accept_device_sharing: bool,

    // Collaborators.
    serial: SerialCounter,
    emittors: HashMap<InputDeviceType, Box<dyn InputInjector>>,
    clipboard: Arc<dyn ClipboardBridge>,
    confirmer: Arc<dyn UserConfirm>,
    file_transfer: Arc<dyn FileTransfer>,

    // Session services.
    fuse_server: Option<FuseServer>,
    fuse_client: Option<FuseClient>,

    // Connection plumbing.
    conn_tx: Option<mpsc::UnboundedSender<Message>>,
    pending_read: Option<ReadHalf<PeerStream>>,
    reader_task: Option<JoinHandle<()>>,
    confirm_pending: bool,

    // Event-loop wiring.
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    ping_timer: Timer,
    offline_timer: Timer,
}

impl Machine {
    fn new(
        manager: Arc<Manager>,
        uuid: Uuid,
        info: DeviceInfo,
        ip: IpAddr,
        port: u16,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let ping_timer = Timer::spawn(events_tx.clone(), || SessionEvent::PingTick);
        let offline_timer = Timer::spawn(events_tx.clone(), || SessionEvent::OfflineTimeout);
        ping_timer.start(PING_INTERVAL);
        offline_timer.oneshot(OFFLINE_WINDOW);

        let collab = manager.collab();
        let emittors = [
            InputDeviceType::Keyboard,
            InputDeviceType::Mouse,
            InputDeviceType::Touchpad,
        ]
        .into_iter()
        .map(|device| (device, collab.injectors.create(device)))
        .collect();

        let settings = manager.settings();
        let local_uuid = settings.local_uuid;
        let local_info = settings.local_info.clone();
        let mountpoint = settings.data_dir.join("mp");
        let accept_device_sharing = settings.accept_device_sharing;
        let clipboard = Arc::clone(&collab.clipboard);
        let confirmer = Arc::clone(&collab.confirmer);
        let file_transfer = Arc::clone(&collab.file_transfer);

        Self {
            manager,
            uuid,
            name: info.name.clone(),
            os: info.os(),
            compositor: info.compositor(),
            ip,
            port,
            state: SessionState::Idle,
            connected: false,
            device_sharing: false,
            mounted: false,
            peer_clipboard_on: false,
            peer_devices_on: false,
            direction: FlowDirection::Right,
            local_uuid,
            local_info,
            mountpoint,
            accept_device_sharing,
            serial: SerialCounter::new(),
            emittors,
            clipboard,
            confirmer,
            file_transfer,
            fuse_server: None,
            fuse_client: None,
            conn_tx: None,
            pending_read: None,
            reader_task: None,
            confirm_pending: false,
            events_tx,
            ping_timer,
            offline_timer,
        }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<MachineCmd>,
        mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        debug!(peer = %self.uuid, name = %self.name, "session task started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(MachineCmd::Shutdown) | None => break,
                    Some(cmd) => self.on_cmd(cmd).await,
                },
                ev = events_rx.recv() => match ev {
                    Some(ev) => self.on_event(ev).await,
                    None => break, // unreachable: we hold a sender
                },
            }
        }
        self.wind_down();
        debug!(peer = %self.uuid, "session task ended");
    }

    /// Final cleanup: every owned timer and stream is closed before the
    /// session is dropped.
    fn wind_down(&mut self) {
        self.handle_disconnected();
        self.ping_timer.close();
        self.offline_timer.close();
    }

    // ── Command handling ──────────────────────────────────────────────────────

    async fn on_cmd(&mut self, cmd: MachineCmd) {
        match cmd {
            MachineCmd::Connect => self.connect(),
            MachineCmd::Disconnect => self.close_connection(),
            MachineCmd::InboundPair { stream } => self.on_inbound_pair(stream),
            MachineCmd::UpdateInfo { ip, port, info } => {
                self.ip = ip;
                self.port = port;
                self.name = info.name.clone();
                self.compositor = info.compositor();
            }
            MachineCmd::ReceivedPing => {
                self.ping_timer.reset();
                self.offline_timer.reset();
            }
            MachineCmd::RequestDeviceSharing => {
                self.send_message(DeviceSharingStartRequest {}.into());
            }
            MachineCmd::StopDeviceSharing => {
                self.send_message(DeviceSharingStopRequest {}.into());
                self.stop_sharing_aux();
            }
            MachineCmd::SetFlowDirection(direction) => {
                if self.direction != direction {
                    self.direction = direction;
                    self.send_flow_direction();
                }
            }
            MachineCmd::FlowTo { direction, x, y } => {
                self.send_message(
                    FlowRequest {
                        direction: direction as i32,
                        x,
                        y,
                    }
                    .into(),
                );
            }
            MachineCmd::InputCaptured {
                device_type,
                event_type,
                code,
                value,
            } => {
                self.send_message(
                    InputEventRequest {
                        serial: self.serial.next(),
                        device_type: device_type as i32,
                        event_type,
                        code,
                        value,
                    }
                    .into(),
                );
            }
            MachineCmd::ClipboardTargetsChanged(targets) => {
                if self.connected {
                    self.send_message(ClipboardNotify { targets }.into());
                }
            }
            MachineCmd::ReadRemoteTarget(target) => {
                self.send_message(ClipboardGetContentRequest { target }.into());
            }
            MachineCmd::SendFiles(paths) => {
                for path in paths {
                    self.send_message(
                        FsSendFileRequest {
                            serial: self.serial.next(),
                            path,
                        }
                        .into(),
                    );
                }
            }
            MachineCmd::Query(reply) => {
                let _ = reply.send(self.status());
            }
            MachineCmd::Shutdown => {} // handled by the run loop
        }
    }

    // ── Event handling ────────────────────────────────────────────────────────

    async fn on_event(&mut self, ev: SessionEvent) {
        match ev {
            SessionEvent::Connected(stream) => self.on_connected(stream),
            SessionEvent::ConnectFailed(reason) => self.on_connect_failed(reason),
            SessionEvent::Frame(msg) => self.dispatch(msg).await,
            SessionEvent::StreamIllegal(e) => {
                error!(peer = %self.uuid, "illegal frame, closing connection: {e}");
                self.close_connection();
            }
            SessionEvent::StreamClosed => self.handle_disconnected(),
            SessionEvent::PingTick => self.manager.ping(self.ip),
            SessionEvent::OfflineTimeout => self.manager.on_machine_offline(self.uuid),
            SessionEvent::ConfirmVerdict(verdict) => self.on_user_confirm(verdict),
            SessionEvent::CopyFinished {
                serial,
                path,
                dest,
                ok,
            } => self.on_copy_finished(serial, path, dest, ok),
            SessionEvent::ClipboardContent { target, content } => {
                self.send_message(ClipboardGetContentResponse { target, content }.into());
            }
        }
    }

    // ── Connection management ─────────────────────────────────────────────────

    fn connect(&mut self) {
        if self.state != SessionState::Idle {
            warn!(peer = %self.uuid, state = ?self.state, "connect ignored");
            return;
        }
        self.state = SessionState::Connecting;

        let ip = self.ip;
        let port = self.port;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            match TcpStream::connect((ip, port)).await {
                Ok(stream) => {
                    configure_stream(&stream);
                    let _ = events.send(SessionEvent::Connected(Box::new(stream)));
                }
                Err(e) => {
                    let _ = events.send(SessionEvent::ConnectFailed(e.to_string()));
                }
            }
        });
    }

    fn on_connected(&mut self, stream: PeerStream) {
        if self.state != SessionState::Connecting {
            // A stale dial result; an inbound handshake won the race.
            debug!(peer = %self.uuid, state = ?self.state, "dropping stale outbound connection");
            return;
        }
        info!(peer = %self.uuid, "connected");

        self.attach(stream);
        self.start_read();
        self.ping_timer.stop();
        self.offline_timer.stop();
        self.state = SessionState::AwaitingPair;

        self.send_message(
            PairRequest {
                key: SCAN_KEY.to_string(),
                device_info: Some(self.local_info.clone()),
            }
            .into(),
        );
    }

    fn on_connect_failed(&mut self, reason: String) {
        if self.state != SessionState::Connecting {
            return;
        }
        info!(peer = %self.uuid, "connect failed: {reason}");
        self.state = SessionState::Idle;
        // Re-discover; a beacon answer refreshes the peer's addressing.
        self.manager.ping(self.ip);
    }

    fn on_inbound_pair(&mut self, stream: PeerStream) {
        match self.state {
            SessionState::Idle => {}
            SessionState::Connecting | SessionState::AwaitingPair => {
                // Simultaneous connect: the peer with the lower uuid keeps
                // its inbound handshake, the other keeps dialing.
                if self.uuid < self.local_uuid {
                    info!(peer = %self.uuid, "simultaneous pair, yielding to the peer's connection");
                    self.drop_connection();
                } else {
                    info!(peer = %self.uuid, "simultaneous pair, keeping our outbound attempt");
                    return;
                }
            }
            SessionState::AwaitingUserConfirm | SessionState::Paired => {
                warn!(peer = %self.uuid, state = ?self.state, "dropping surplus inbound pair");
                return;
            }
        }

        info!(peer = %self.uuid, name = %self.name, "inbound pair request");
        self.attach(stream);
        self.state = SessionState::AwaitingUserConfirm;
        self.confirm_pending = true;

        let confirmer = Arc::clone(&self.confirmer);
        let events = self.events_tx.clone();
        let ip = self.ip;
        let name = self.name.clone();
        tokio::spawn(async move {
            let verdict = confirmer.ask(ip, &name).await;
            let _ = events.send(SessionEvent::ConfirmVerdict(verdict));
        });
    }

    fn on_user_confirm(&mut self, verdict: Option<bool>) {
        if !self.confirm_pending {
            debug!(peer = %self.uuid, "stale confirm verdict dropped");
            return;
        }
        self.confirm_pending = false;
        if self.state != SessionState::AwaitingUserConfirm {
            debug!(peer = %self.uuid, state = ?self.state, "confirm verdict after teardown dropped");
            return;
        }
        let Some(accept) = verdict else {
            warn!(peer = %self.uuid, "user confirm has error");
            return;
        };

        self.send_message(
            PairResponse {
                key: SCAN_KEY.to_string(),
                device_info: Some(self.local_info.clone()),
                agree: accept,
            }
            .into(),
        );

        if accept {
            self.start_read();
            self.ping_timer.stop();
            self.offline_timer.stop();
            self.connected = true;
            self.state = SessionState::Paired;
            self.send_service_status();
        } else {
            self.close_connection();
        }
    }

    /// Installs the write half; reading starts separately so an inbound
    /// connection stays quiet until the local user has decided.
    fn attach(&mut self, stream: PeerStream) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(rx, write_half));
        self.conn_tx = Some(tx);
        self.pending_read = Some(read_half);
    }

    fn start_read(&mut self) {
        if let Some(read_half) = self.pending_read.take() {
            let events = self.events_tx.clone();
            self.reader_task = Some(tokio::spawn(run_reader(read_half, events)));
        }
    }

    /// Silently discards the transport without touching session state.
    fn drop_connection(&mut self) {
        self.conn_tx = None;
        self.pending_read = None;
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }

    fn close_connection(&mut self) {
        self.handle_disconnected();
    }

    /// Transport gone (either side): tear down session services, return to
    /// Idle, and re-arm the liveness timers so an unreachable peer ages out
    /// of the registry within the offline window.
    fn handle_disconnected(&mut self) {
        if self.conn_tx.is_none() && self.state == SessionState::Idle {
            return;
        }
        info!(peer = %self.uuid, "disconnected");

        if self.connected {
            self.manager.on_stop_device_sharing(self.uuid);
            self.device_sharing = false;
            self.connected = false;
        }

        if let Some(client) = self.fuse_client.take() {
            client.exit();
        }
        self.fuse_server = None;
        self.mounted = false;

        self.drop_connection();
        self.state = SessionState::Idle;

        self.ping_timer.reset();
        self.offline_timer.reset();
    }

    // ── Dispatcher ────────────────────────────────────────────────────────────

    async fn dispatch(&mut self, msg: Message) {
        let kind = msg.kind();
        debug!(peer = %self.uuid, kind, "message received");
        match msg.payload {
            Some(Payload::PairResponse(resp)) => self.handle_pair_response(resp),
            Some(Payload::ServiceOnOffNotification(ntf)) => {
                self.peer_clipboard_on = ntf.shared_clipboard_on;
                self.peer_devices_on = ntf.shared_devices_on;
            }
            Some(Payload::DeviceSharingStartRequest(_)) => self.handle_sharing_start_request(),
            Some(Payload::DeviceSharingStartResponse(resp)) => {
                self.handle_sharing_start_response(resp);
            }
            Some(Payload::DeviceSharingStopRequest(_)) => self.stop_sharing_aux(),
            Some(Payload::DeviceSharingStopResponse(_)) => {}
            Some(Payload::InputEventRequest(req)) => self.handle_input_event_request(req).await,
            Some(Payload::InputEventResponse(resp)) => {
                if !resp.success {
                    debug!(peer = %self.uuid, serial = resp.serial, "peer failed to inject event");
                }
            }
            Some(Payload::FlowDirectionNtf(ntf)) => {
                self.direction = ntf.direction().mirrored();
            }
            Some(Payload::FlowRequest(req)) => {
                self.manager.on_flow_back(req.direction(), req.x, req.y);
            }
            Some(Payload::FlowResponse(_)) => {}
            Some(Payload::FsRequest(_)) => self.handle_fs_request().await,
            Some(Payload::FsResponse(resp)) => self.handle_fs_response(resp).await,
            Some(Payload::FsSendFileRequest(req)) => self.handle_fs_send_file_request(req),
            Some(Payload::FsSendFileResponse(resp)) => {
                if !resp.accepted {
                    info!(peer = %self.uuid, serial = resp.serial, "peer refused file transfer");
                }
            }
            Some(Payload::FsSendFileResult(result)) => {
                info!(
                    peer = %self.uuid,
                    path = %result.path,
                    ok = result.result,
                    "file transfer finished on the peer"
                );
            }
            Some(Payload::ClipboardNotify(ntf)) => self.handle_clipboard_notify(ntf),
            Some(Payload::ClipboardGetContentRequest(req)) => {
                self.handle_clipboard_get_content_request(req);
            }
            Some(Payload::ClipboardGetContentResponse(resp)) => {
                self.handle_clipboard_get_content_response(resp);
            }
            Some(Payload::PairRequest(_)) | None => {
                warn!(peer = %self.uuid, kind, "invalid message, closing connection");
                self.close_connection();
            }
        }
    }

    // ── Service handlers ──────────────────────────────────────────────────────

    fn handle_pair_response(&mut self, resp: PairResponse) {
        if self.state != SessionState::AwaitingPair {
            debug!(peer = %self.uuid, state = ?self.state, "unexpected pair response dropped");
            return;
        }
        if resp.key != SCAN_KEY {
            warn!(peer = %self.uuid, "pair response with foreign scan key");
            self.close_connection();
            return;
        }
        if !resp.agree {
            info!(peer = %self.uuid, "pair rejected by the peer's user");
            self.close_connection();
            return;
        }

        self.connected = true;
        self.state = SessionState::Paired;
        self.send_service_status();
    }

    fn handle_sharing_start_request(&mut self) {
        // The exclusion slot is checked before replying so a busy manager
        // refuses instead of accepting a session it cannot host.
        let accepted = self.connected
            && self.accept_device_sharing
            && self.manager.on_start_device_sharing(self.uuid, true).is_ok();

        self.send_message(DeviceSharingStartResponse { accept: accepted }.into());

        if accepted {
            self.device_sharing = true;
            self.direction = FlowDirection::Left;
        }
    }

    fn handle_sharing_start_response(&mut self, resp: DeviceSharingStartResponse) {
        if !resp.accept {
            info!(peer = %self.uuid, "device sharing declined");
            return;
        }
        match self.manager.on_start_device_sharing(self.uuid, false) {
            Ok(()) => {
                self.device_sharing = true;
                self.direction = FlowDirection::Right;
                self.send_flow_direction();
            }
            Err(e) => {
                // Our own manager is busy with another peer; unwind the
                // sink we just created on the remote side.
                warn!(peer = %self.uuid, "cannot become sharing source: {e}");
                self.send_message(DeviceSharingStopRequest {}.into());
            }
        }
    }

    fn stop_sharing_aux(&mut self) {
        self.manager.on_stop_device_sharing(self.uuid);
        self.device_sharing = false;
    }

    async fn handle_input_event_request(&mut self, req: InputEventRequest) {
        let success = match req.device_type() {
            Some(device) => match self.emittors.get_mut(&device) {
                Some(emittor) => emittor.emit_event(req.event_type, req.code, req.value).await,
                None => {
                    error!(peer = %self.uuid, ?device, "no emittor for device");
                    false
                }
            },
            None => {
                error!(peer = %self.uuid, raw = req.device_type, "unknown input device type");
                false
            }
        };

        self.send_message(
            InputEventResponse {
                serial: req.serial,
                success,
            }
            .into(),
        );
    }

    async fn handle_fs_request(&mut self) {
        if self.fuse_server.is_some() {
            self.send_message(
                FsResponse {
                    accepted: false,
                    port: 0,
                }
                .into(),
            );
            return;
        }

        match FuseServer::bind().await {
            Ok(server) => {
                let port = server.port();
                self.fuse_server = Some(server);
                self.send_message(
                    FsResponse {
                        accepted: true,
                        port: u32::from(port),
                    }
                    .into(),
                );
            }
            Err(e) => {
                warn!(peer = %self.uuid, "failed to start file server: {e}");
                self.send_message(
                    FsResponse {
                        accepted: false,
                        port: 0,
                    }
                    .into(),
                );
            }
        }
    }

    async fn handle_fs_response(&mut self, resp: FsResponse) {
        if !resp.accepted {
            info!(peer = %self.uuid, "peer refused file access");
            return;
        }
        match FuseClient::mount(self.ip, resp.port as u16, &self.mountpoint).await {
            Ok(client) => {
                self.fuse_client = Some(client);
                self.mounted = true;
            }
            Err(e) => warn!(peer = %self.uuid, "failed to attach remote filesystem: {e}"),
        }
    }

    fn handle_fs_send_file_request(&mut self, req: FsSendFileRequest) {
        let Some(client) = &self.fuse_client else {
            self.send_message(
                FsSendFileResponse {
                    serial: req.serial,
                    accepted: false,
                }
                .into(),
            );
            return;
        };

        let src = client.source_path(&req.path);
        self.send_message(
            FsSendFileResponse {
                serial: req.serial,
                accepted: true,
            }
            .into(),
        );

        let dst_dir = self.manager.file_storage_path();
        let file_name = Path::new(&req.path)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| std::ffi::OsString::from(req.path.clone()));
        let dest = dst_dir.join(file_name);

        let transfer = Arc::clone(&self.file_transfer);
        let events = self.events_tx.clone();
        let serial = req.serial;
        let path = req.path;
        tokio::spawn(async move {
            let ok = transfer.copy(&src, &dst_dir).await;
            let _ = events.send(SessionEvent::CopyFinished {
                serial,
                path,
                dest,
                ok,
            });
        });
    }

    fn on_copy_finished(&mut self, serial: u32, path: String, dest: PathBuf, ok: bool) {
        if ok {
            info!(peer = %self.uuid, path = %path, "file copy finished");
        } else {
            info!(peer = %self.uuid, path = %path, "file copy failed");
        }

        self.manager.collab().notifier.file_received(&dest, ok);
        self.send_message(
            FsSendFileResult {
                serial,
                path,
                result: ok,
            }
            .into(),
        );
    }

    fn handle_clipboard_notify(&mut self, ntf: ClipboardNotify) {
        let mut targets = ntf.targets;

        // Peers without a UOS file manager advertise copied files but not
        // the uri-list target every paste consumer expects; synthesize it.
        if self.os != DeviceOs::Uos
            && targets.iter().any(|t| t == CLIPBOARD_FILE_TARGET)
            && !targets.iter().any(|t| t == URI_LIST_TARGET)
        {
            targets.push(URI_LIST_TARGET.to_string());
        }

        self.manager.on_machine_own_clipboard(self.uuid, targets);
    }

    fn handle_clipboard_get_content_request(&mut self, req: ClipboardGetContentRequest) {
        let clipboard = Arc::clone(&self.clipboard);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let content = clipboard.read_target(&req.target).await;
            let _ = events.send(SessionEvent::ClipboardContent {
                target: req.target,
                content,
            });
        });
    }

    fn handle_clipboard_get_content_response(&mut self, resp: ClipboardGetContentResponse) {
        let target = resp.target;
        let mut content = resp.content;

        if self.clipboard.is_files() {
            match String::from_utf8(content) {
                Ok(text) => {
                    content = rewrite_with_mountpoint(&text, &self.mountpoint).into_bytes();
                }
                Err(e) => content = e.into_bytes(), // not text, pass through
            }
        }

        if self.os != DeviceOs::Uos && target == CLIPBOARD_FILE_TARGET {
            if let Some(path) = first_file_uri_path(&String::from_utf8_lossy(&content)) {
                self.clipboard
                    .update_target(URI_LIST_TARGET, path.into_bytes());
            }
        }

        self.clipboard.update_target(&target, content);
    }

    // ── Outbound helpers ──────────────────────────────────────────────────────

    /// Hands a frame to the write queue; a no-op with a warning while the
    /// connection is reset. Per-connection FIFO order is the only guarantee.
    fn send_message(&mut self, msg: Message) {
        match &self.conn_tx {
            Some(tx) => {
                if tx.send(msg).is_err() {
                    warn!(peer = %self.uuid, "write queue gone, dropping message");
                    self.conn_tx = None;
                }
            }
            None => {
                warn!(peer = %self.uuid, kind = msg.kind(), "connection reset but still want to send");
            }
        }
    }

    fn send_service_status(&mut self) {
        let ntf = ServiceOnOffNotification {
            shared_clipboard_on: self.manager.is_shared_clipboard(),
            shared_devices_on: self.manager.is_shared_devices(),
        };
        self.send_message(ntf.into());
    }

    fn send_flow_direction(&mut self) {
        let ntf = FlowDirectionNtf {
            direction: self.direction as i32,
        };
        self.send_message(ntf.into());
    }

    fn status(&self) -> MachineStatus {
        MachineStatus {
            state: self.state,
            os: self.os,
            compositor: self.compositor,
            connected: self.connected,
            device_sharing: self.device_sharing,
            mounted: self.mounted,
            direction: self.direction,
            peer_clipboard_on: self.peer_clipboard_on,
            peer_devices_on: self.peer_devices_on,
        }
    }
}

// ── Transport tasks ───────────────────────────────────────────────────────────

/// Drains the write queue into the framed sink; ends when the queue closes
/// or the peer stops accepting bytes.
async fn run_writer(mut rx: mpsc::UnboundedReceiver<Message>, write_half: WriteHalf<PeerStream>) {
    let mut sink = FramedWrite::new(write_half, FrameCodec::<Message>::new());
    while let Some(msg) = rx.recv().await {
        if let Err(e) = sink.send(msg).await {
            debug!("session write failed: {e}");
            break;
        }
    }
}

/// Feeds decoded frames into the session until the stream ends or turns
/// illegal. The codec drains complete frames in arrival order.
async fn run_reader(read_half: ReadHalf<PeerStream>, events: mpsc::UnboundedSender<SessionEvent>) {
    let mut frames = FramedRead::new(read_half, FrameCodec::<Message>::new());
    loop {
        match frames.next().await {
            Some(Ok(msg)) => {
                if events.send(SessionEvent::Frame(msg)).is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                let _ = events.send(SessionEvent::StreamIllegal(e));
                break;
            }
            None => {
                let _ = events.send(SessionEvent::StreamClosed);
                break;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
