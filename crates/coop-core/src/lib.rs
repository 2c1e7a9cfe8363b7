//! # coop-core
//!
//! Shared protocol library for the `coopd` LAN cooperation daemon: the wire
//! frame codec, the protobuf message schema, and the serial counter used to
//! number requests.
//!
//! This crate is deliberately free of OS APIs, sockets, and runtime state so
//! that both the daemon and any future control tooling can depend on it.
//!
//! # Protocol overview
//!
//! Two cooperating daemons speak a single duplex TCP connection carrying
//! length-prefixed protobuf messages:
//!
//! ```text
//! offset 0 : 8 bytes  magic  'D','D','E','C','P','R','T', 0
//! offset 8 : 8 bytes  body length (u64, network byte order)
//! offset 16: body     protobuf-encoded `Message`
//! ```
//!
//! A `Message` holds exactly one payload variant (pairing, service flags,
//! device sharing, input events, flow control, file access, clipboard).
//! Discovery uses the same framing over UDP with the separate [`Beacon`]
//! record.

pub mod protocol;

pub use protocol::frame::{decode_datagram, encode_datagram, FrameCodec, FrameError};
pub use protocol::messages::{
    Beacon, ClipboardGetContentRequest, ClipboardGetContentResponse, ClipboardNotify, Compositor,
    DeviceInfo, DeviceOs, DeviceSharingStartRequest, DeviceSharingStartResponse,
    DeviceSharingStopRequest, DeviceSharingStopResponse, FlowDirection, FlowDirectionNtf,
    FlowRequest, FlowResponse, FsRequest, FsResponse, FsSendFileRequest, FsSendFileResponse,
    FsSendFileResult, InputDeviceType, InputEventRequest, InputEventResponse, Message, Payload,
    PairRequest, PairResponse, ServiceOnOffNotification, CLIPBOARD_FILE_TARGET, FILE_SCHEMA,
    HEADER_SIZE, KEEPALIVE_IDLE, MAGIC, MAX_FRAME_LEN, OFFLINE_WINDOW, PING_INTERVAL, SCAN_KEY,
    URI_LIST_TARGET,
};
pub use protocol::serial::SerialCounter;
