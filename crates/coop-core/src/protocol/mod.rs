//! Protocol module: the message schema, the wire frame codec, and the serial
//! counter.
//!
//! - **`messages`** — every payload record, the `Message` tagged union, the
//!   discovery `Beacon`, shared constants (magic, scan key, timings).
//! - **`frame`** — `FrameCodec`, the length-prefixed framing over a byte
//!   stream, plus one-shot datagram helpers for UDP.
//! - **`serial`** — thread-safe counter numbering outgoing requests.

pub mod frame;
pub mod messages;
pub mod serial;

pub use frame::{decode_datagram, encode_datagram, FrameCodec, FrameError};
pub use messages::*;
pub use serial::SerialCounter;
