//! All cooperation protocol message types.
//!
//! The wire schema is protobuf: every field is encoded as tag + value, unknown
//! fields are skipped, absent fields decode to their defaults. Peers MUST run
//! the same schema generation; there is no negotiation. The types below are
//! hand-written [`prost`] messages so the schema lives next to the code that
//! speaks it.
//!
//! The top-level [`Message`] carries exactly one payload variant in a
//! `oneof`; the dispatcher on the receiving side matches on [`Payload`] and a
//! message with no payload set (including one whose body failed to parse)
//! tears the connection down.

use std::time::Duration;

use uuid::Uuid;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Frame magic, first 8 bytes of every frame.
pub const MAGIC: [u8; 8] = *b"DDECPRT\0";

/// Total size of the frame header: 8 bytes magic + 8 bytes body length.
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a frame body. A well-magic'd header declaring more than
/// this is treated the same as a bad magic: the connection is closed.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// Shared scan key. Carried in discovery beacons and in the
/// `key` field of [`PairRequest`]/[`PairResponse`]; a mismatch is grounds for
/// rejecting the pair.
pub const SCAN_KEY: &str = "UOS-COOPERATION";

/// Clipboard target advertised by file managers for copied files.
pub const CLIPBOARD_FILE_TARGET: &str = "x-special/gnome-copied-files";

/// Clipboard target holding newline-separated file URIs.
pub const URI_LIST_TARGET: &str = "text/uri-list";

/// URI scheme prefix used in file-list clipboard content.
pub const FILE_SCHEMA: &str = "file://";

/// Interval between discovery pings while a peer is not connected.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// How long a peer may stay silent before it is considered offline.
pub const OFFLINE_WINDOW: Duration = Duration::from_secs(25);

/// TCP keepalive idle time once a session is established.
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(20);

// ── Shared enums ──────────────────────────────────────────────────────────────

/// Operating system advertised in [`DeviceInfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DeviceOs {
    Uos = 0,
    Linux = 1,
    Windows = 2,
    Macos = 3,
    Android = 4,
    Other = 5,
}

impl DeviceOs {
    /// Desktop-class systems, as opposed to mobile peers.
    pub fn is_pc(self) -> bool {
        matches!(
            self,
            DeviceOs::Uos | DeviceOs::Linux | DeviceOs::Windows | DeviceOs::Macos
        )
    }

    pub fn is_android(self) -> bool {
        self == DeviceOs::Android
    }
}

/// Display compositor advertised in [`DeviceInfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Compositor {
    X11 = 0,
    Wayland = 1,
    None = 2,
}

/// Which local input device an [`InputEventRequest`] targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum InputDeviceType {
    Keyboard = 0,
    Mouse = 1,
    Touchpad = 2,
}

/// Screen edge through which the shared cursor leaves the local screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FlowDirection {
    Top = 0,
    Bottom = 1,
    Left = 2,
    Right = 3,
}

impl FlowDirection {
    /// The edge as seen from the other side of the boundary: the peer's LEFT
    /// is our RIGHT, its TOP is our BOTTOM.
    pub fn mirrored(self) -> Self {
        match self {
            FlowDirection::Top => FlowDirection::Bottom,
            FlowDirection::Bottom => FlowDirection::Top,
            FlowDirection::Left => FlowDirection::Right,
            FlowDirection::Right => FlowDirection::Left,
        }
    }
}

// ── Device identity ───────────────────────────────────────────────────────────

/// Immutable identity record transmitted in pair requests/responses and in
/// discovery beacons.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceInfo {
    /// Stable peer identity, a UUID in canonical string form.
    #[prost(string, tag = "1")]
    pub uuid: String,
    /// Human-readable device name.
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int32, tag = "3")]
    pub os: i32,
    #[prost(int32, tag = "4")]
    pub compositor: i32,
}

impl DeviceInfo {
    pub fn os(&self) -> DeviceOs {
        DeviceOs::try_from(self.os).unwrap_or(DeviceOs::Other)
    }

    pub fn compositor(&self) -> Compositor {
        Compositor::try_from(self.compositor).unwrap_or(Compositor::None)
    }

    /// Parses the `uuid` field; the wire carries it as a string.
    pub fn parsed_uuid(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.uuid)
    }
}

// ── Pairing ───────────────────────────────────────────────────────────────────

/// Opens the mutual-consent handshake on a fresh connection.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PairRequest {
    /// Must equal [`SCAN_KEY`].
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, optional, tag = "2")]
    pub device_info: Option<DeviceInfo>,
}

/// Answer to a [`PairRequest`], sent after the local user decided.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PairResponse {
    /// Must equal [`SCAN_KEY`].
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, optional, tag = "2")]
    pub device_info: Option<DeviceInfo>,
    #[prost(bool, tag = "3")]
    pub agree: bool,
}

/// Reports which cooperation services the sender currently offers.
/// Emitted by both sides right after a pair completes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceOnOffNotification {
    #[prost(bool, tag = "1")]
    pub shared_clipboard_on: bool,
    #[prost(bool, tag = "2")]
    pub shared_devices_on: bool,
}

// ── Device sharing ────────────────────────────────────────────────────────────

/// Asks the peer to become the sink of a device-sharing session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceSharingStartRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceSharingStartResponse {
    #[prost(bool, tag = "1")]
    pub accept: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceSharingStopRequest {}

/// Defined by the schema but never sent; stop requests are not acknowledged.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceSharingStopResponse {}

// ── Input events ──────────────────────────────────────────────────────────────

/// One captured input event, forwarded from the sharing source to the sink.
///
/// `event_type`, `code` and `value` follow the evdev convention: e.g.
/// `(EV_REL, REL_X, dx)` for relative mouse motion.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InputEventRequest {
    #[prost(uint32, tag = "1")]
    pub serial: u32,
    #[prost(int32, tag = "2")]
    pub device_type: i32,
    #[prost(uint32, tag = "3")]
    pub event_type: u32,
    #[prost(uint32, tag = "4")]
    pub code: u32,
    #[prost(sint32, tag = "5")]
    pub value: i32,
}

impl InputEventRequest {
    pub fn device_type(&self) -> Option<InputDeviceType> {
        InputDeviceType::try_from(self.device_type).ok()
    }
}

/// Acknowledges an [`InputEventRequest`]; `success` is false when the sink
/// had no emittor for the device type or the injection pipe refused.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InputEventResponse {
    #[prost(uint32, tag = "1")]
    pub serial: u32,
    #[prost(bool, tag = "2")]
    pub success: bool,
}

// ── Flow control ──────────────────────────────────────────────────────────────

/// Announces the sender's flow direction so the peer can mirror it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowDirectionNtf {
    #[prost(int32, tag = "1")]
    pub direction: i32,
}

impl FlowDirectionNtf {
    pub fn direction(&self) -> FlowDirection {
        FlowDirection::try_from(self.direction).unwrap_or(FlowDirection::Right)
    }
}

/// The shared cursor crossed a screen edge at `(x, y)`; the receiver hands
/// this to its manager to switch which peer's pointer is active.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowRequest {
    #[prost(int32, tag = "1")]
    pub direction: i32,
    #[prost(uint32, tag = "2")]
    pub x: u32,
    #[prost(uint32, tag = "3")]
    pub y: u32,
}

impl FlowRequest {
    pub fn direction(&self) -> FlowDirection {
        FlowDirection::try_from(self.direction).unwrap_or(FlowDirection::Right)
    }
}

/// Defined by the schema but never sent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowResponse {}

// ── File access ───────────────────────────────────────────────────────────────

/// Asks the peer to expose its files; answered with [`FsResponse`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FsRequest {}

/// Carries the ephemeral port of the peer's file server when accepted.
/// `accepted = false, port = 0` when a server is already running.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FsResponse {
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    #[prost(uint32, tag = "2")]
    pub port: u32,
}

/// Asks the receiver to pull `path` out of its mounted remote filesystem into
/// its local receive directory.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FsSendFileRequest {
    #[prost(uint32, tag = "1")]
    pub serial: u32,
    #[prost(string, tag = "2")]
    pub path: String,
}

/// Immediate answer: whether the transfer was started at all.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FsSendFileResponse {
    #[prost(uint32, tag = "1")]
    pub serial: u32,
    #[prost(bool, tag = "2")]
    pub accepted: bool,
}

/// Final outcome of an accepted transfer, sent when the copy finishes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FsSendFileResult {
    #[prost(uint32, tag = "1")]
    pub serial: u32,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(bool, tag = "3")]
    pub result: bool,
}

// ── Clipboard ─────────────────────────────────────────────────────────────────

/// The sender's clipboard changed; `targets` lists the offered MIME-like
/// selection targets.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClipboardNotify {
    #[prost(string, repeated, tag = "1")]
    pub targets: Vec<String>,
}

/// Pulls one target's content from the current clipboard owner.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClipboardGetContentRequest {
    #[prost(string, tag = "1")]
    pub target: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClipboardGetContentResponse {
    #[prost(string, tag = "1")]
    pub target: String,
    #[prost(bytes = "vec", tag = "2")]
    pub content: Vec<u8>,
}

// ── Top-level message ─────────────────────────────────────────────────────────

/// The tagged union travelling inside every frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(
        oneof = "Payload",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20"
    )]
    pub payload: Option<Payload>,
}

/// All payload variants a [`Message`] can carry.
#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum Payload {
    #[prost(message, tag = "1")]
    PairRequest(PairRequest),
    #[prost(message, tag = "2")]
    PairResponse(PairResponse),
    #[prost(message, tag = "3")]
    ServiceOnOffNotification(ServiceOnOffNotification),
    #[prost(message, tag = "4")]
    DeviceSharingStartRequest(DeviceSharingStartRequest),
    #[prost(message, tag = "5")]
    DeviceSharingStartResponse(DeviceSharingStartResponse),
    #[prost(message, tag = "6")]
    DeviceSharingStopRequest(DeviceSharingStopRequest),
    #[prost(message, tag = "7")]
    DeviceSharingStopResponse(DeviceSharingStopResponse),
    #[prost(message, tag = "8")]
    InputEventRequest(InputEventRequest),
    #[prost(message, tag = "9")]
    InputEventResponse(InputEventResponse),
    #[prost(message, tag = "10")]
    FlowDirectionNtf(FlowDirectionNtf),
    #[prost(message, tag = "11")]
    FlowRequest(FlowRequest),
    #[prost(message, tag = "12")]
    FlowResponse(FlowResponse),
    #[prost(message, tag = "13")]
    FsRequest(FsRequest),
    #[prost(message, tag = "14")]
    FsResponse(FsResponse),
    #[prost(message, tag = "15")]
    FsSendFileRequest(FsSendFileRequest),
    #[prost(message, tag = "16")]
    FsSendFileResponse(FsSendFileResponse),
    #[prost(message, tag = "17")]
    FsSendFileResult(FsSendFileResult),
    #[prost(message, tag = "18")]
    ClipboardNotify(ClipboardNotify),
    #[prost(message, tag = "19")]
    ClipboardGetContentRequest(ClipboardGetContentRequest),
    #[prost(message, tag = "20")]
    ClipboardGetContentResponse(ClipboardGetContentResponse),
}

impl Message {
    /// The payload variant's name, for log lines. `"None"` when no payload is
    /// set (which the dispatcher treats as illegal).
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            Some(Payload::PairRequest(_)) => "PairRequest",
            Some(Payload::PairResponse(_)) => "PairResponse",
            Some(Payload::ServiceOnOffNotification(_)) => "ServiceOnOffNotification",
            Some(Payload::DeviceSharingStartRequest(_)) => "DeviceSharingStartRequest",
            Some(Payload::DeviceSharingStartResponse(_)) => "DeviceSharingStartResponse",
            Some(Payload::DeviceSharingStopRequest(_)) => "DeviceSharingStopRequest",
            Some(Payload::DeviceSharingStopResponse(_)) => "DeviceSharingStopResponse",
            Some(Payload::InputEventRequest(_)) => "InputEventRequest",
            Some(Payload::InputEventResponse(_)) => "InputEventResponse",
            Some(Payload::FlowDirectionNtf(_)) => "FlowDirectionNtf",
            Some(Payload::FlowRequest(_)) => "FlowRequest",
            Some(Payload::FlowResponse(_)) => "FlowResponse",
            Some(Payload::FsRequest(_)) => "FsRequest",
            Some(Payload::FsResponse(_)) => "FsResponse",
            Some(Payload::FsSendFileRequest(_)) => "FsSendFileRequest",
            Some(Payload::FsSendFileResponse(_)) => "FsSendFileResponse",
            Some(Payload::FsSendFileResult(_)) => "FsSendFileResult",
            Some(Payload::ClipboardNotify(_)) => "ClipboardNotify",
            Some(Payload::ClipboardGetContentRequest(_)) => "ClipboardGetContentRequest",
            Some(Payload::ClipboardGetContentResponse(_)) => "ClipboardGetContentResponse",
            None => "None",
        }
    }
}

/// Lets handlers build a frame from a payload record directly:
/// `self.send(PairResponse { .. }.into())`.
macro_rules! impl_into_message {
    ($($variant:ident),+ $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(value: $variant) -> Self {
                    Message { payload: Some(Payload::$variant(value)) }
                }
            }
        )+
    };
}

impl_into_message!(
    PairRequest,
    PairResponse,
    ServiceOnOffNotification,
    DeviceSharingStartRequest,
    DeviceSharingStartResponse,
    DeviceSharingStopRequest,
    DeviceSharingStopResponse,
    InputEventRequest,
    InputEventResponse,
    FlowDirectionNtf,
    FlowRequest,
    FlowResponse,
    FsRequest,
    FsResponse,
    FsSendFileRequest,
    FsSendFileResponse,
    FsSendFileResult,
    ClipboardNotify,
    ClipboardGetContentRequest,
    ClipboardGetContentResponse,
);

// ── Discovery beacon ──────────────────────────────────────────────────────────

/// UDP discovery record. Framed with the same codec as session messages but
/// kept outside the [`Message`] union: a beacon arriving on a TCP session
/// would be a protocol violation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Beacon {
    /// Must equal [`SCAN_KEY`]; beacons from other product families are
    /// silently dropped.
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, optional, tag = "2")]
    pub device_info: Option<DeviceInfo>,
    /// TCP port the sender accepts pair connections on.
    #[prost(uint32, tag = "3")]
    pub tcp_port: u32,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
